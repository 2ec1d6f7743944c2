pub mod models;
mod seeders;

pub use models::*;
pub use seeders::seed_demo_data;

use anyhow::Result;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous},
    SqlitePool,
};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

pub type DbPool = SqlitePool;

/// Execute a SQL migration file, properly handling comments
async fn execute_sql(pool: &SqlitePool, sql: &str) -> Result<()> {
    for statement in sql.split(';') {
        let cleaned: String = statement
            .lines()
            .filter(|line| !line.trim().starts_with("--"))
            .collect::<Vec<_>>()
            .join("\n");
        let trimmed = cleaned.trim();
        if !trimmed.is_empty() {
            sqlx::query(trimmed).execute(pool).await?;
        }
    }
    Ok(())
}

pub async fn init(data_dir: &Path) -> Result<DbPool> {
    let db_path = data_dir.join("nexora.db");
    let db_url = format!("sqlite:{}", db_path.display());

    info!("Initializing database at {}", db_path.display());

    // Pragmas go on the connect options so every pooled connection gets them
    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(5))
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    info!("Database initialized successfully");
    Ok(pool)
}

/// Single-connection in-memory database, used by the test suite.
pub async fn init_memory() -> Result<DbPool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

    // One connection that never expires, otherwise the database vanishes
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;
    Ok(pool)
}

async fn table_exists(pool: &SqlitePool, table: &str) -> Result<bool> {
    let found: Option<(String,)> =
        sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' AND name = ?")
            .bind(table)
            .fetch_optional(pool)
            .await?;
    Ok(found.is_some())
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Running database migrations...");

    // Each migration is keyed on a table it creates
    let migrations: [(&str, &str); 14] = [
        ("users", include_str!("../../migrations/001_core.sql")),
        ("warehouses", include_str!("../../migrations/002_inventory.sql")),
        ("leads", include_str!("../../migrations/003_crm.sql")),
        ("invoices", include_str!("../../migrations/004_invoice.sql")),
        ("expense_reports", include_str!("../../migrations/005_expense.sql")),
        ("support_tickets", include_str!("../../migrations/006_desk.sql")),
        ("booking_calendars", include_str!("../../migrations/007_bookings.sql")),
        ("commerce_products", include_str!("../../migrations/008_commerce.sql")),
        ("payroll_employees", include_str!("../../migrations/009_payroll.sql")),
        ("service_jobs", include_str!("../../migrations/010_service.sql")),
        ("salesiq_visitors", include_str!("../../migrations/011_salesiq.sql")),
        ("bigin_deals", include_str!("../../migrations/012_bigin.sql")),
        ("assist_requests", include_str!("../../migrations/013_assist.sql")),
        ("books", include_str!("../../migrations/014_books.sql")),
    ];

    for (marker, sql) in migrations {
        if !table_exists(pool, marker).await? {
            info!(marker, "Applying migration");
            execute_sql(pool, sql).await?;
        }
    }

    info!("Migrations completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = init_memory().await.unwrap();
        run_migrations(&pool).await.unwrap();

        for table in [
            "users",
            "module_items",
            "inventory_items",
            "stock_alerts",
            "deals",
            "invoice_lines",
            "expense_attachments",
            "ticket_comments",
            "booking_appointments",
            "commerce_order_items",
            "payroll_attendance",
            "service_jobs",
            "salesiq_messages",
            "bigin_tasks",
            "assist_session_logs",
            "book_transactions",
        ] {
            assert!(table_exists(&pool, table).await.unwrap(), "missing {table}");
        }
    }

    #[tokio::test]
    async fn test_file_database_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let pool = init(dir.path()).await.unwrap();
        assert!(dir.path().join("nexora.db").exists());

        let mode: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(mode.0.to_lowercase(), "wal");
    }
}
