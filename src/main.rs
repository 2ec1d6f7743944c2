use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nexora::config::Config;
use nexora::AppState;

#[derive(Parser, Debug)]
#[command(name = "nexora")]
#[command(author, version, about = "Back-office suite served from one API", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "nexora.toml")]
    config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    log_level: Option<String>,

    /// Override the listen port
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// Override the token signing secret
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    jwt_secret: Option<String>,

    /// Seed demo data and reject DELETE requests
    #[arg(long, env = "DEMO_MODE", value_parser = parse_flag)]
    demo: Option<bool>,

    /// Override the data directory
    #[arg(long, env = "NEXORA_DATA_DIR")]
    data_dir: Option<PathBuf>,
}

/// Accepts `1`, `true`, `yes` (any case) as on; anything else is off
fn parse_flag(value: &str) -> Result<bool, String> {
    Ok(matches!(value.to_lowercase().as_str(), "1" | "true" | "yes"))
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(secret) = &self.jwt_secret {
            config.auth.jwt_secret = secret.clone();
        }
        if let Some(demo) = self.demo {
            config.demo.enabled = demo;
        }
        if let Some(dir) = &self.data_dir {
            config.server.data_dir = dir.clone();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::load(&cli.config)?;
    cli.apply(&mut config);

    // Initialize logging
    let log_level = cli
        .log_level
        .as_ref()
        .unwrap_or(&config.logging.level)
        .clone();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Nexora v{}", env!("CARGO_PKG_VERSION"));

    // Ensure data directory exists
    nexora::utils::ensure_dir(&config.server.data_dir)?;

    // Initialize database
    let db = nexora::db::init(&config.server.data_dir).await?;

    nexora::api::auth::ensure_admin_user(&db, config.auth.admin.as_ref()).await?;

    if config.demo.enabled {
        tracing::warn!("Demo mode is enabled; DELETE requests will be rejected");
        nexora::db::seed_demo_data(&db).await?;
    }

    nexora::engine::spawn_stock_monitor_task(db.clone(), config.inventory.clone());

    let state = Arc::new(AppState::new(config.clone(), db));
    let app = nexora::api::create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("API server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
