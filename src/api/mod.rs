pub mod auth;
pub mod demo;
pub mod error;
pub mod pricing;
pub mod validation;

use axum::{
    http::{header, HeaderName, Method, StatusCode},
    middleware,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::modules::{self, ModuleInfo, MODULES};
use crate::AppState;
use auth::AuthUser;
use error::{ApiError, ApiPath};

pub fn create_router(state: Arc<AppState>) -> Router {
    let home = Router::new()
        .route("/", get(index))
        .route("/api/health", get(health_check))
        .route("/api/modules", get(list_modules))
        .route("/api/modules/:name", get(get_module))
        .nest("/api/auth", auth::router())
        .nest("/api/pricing", pricing::router());

    modules::mount_all(home)
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            demo::block_deletes,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            pricing::pricing_headers,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
        .with_state(state)
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .expose_headers([
            HeaderName::from_static("x-pricing-free-tier-active"),
            HeaderName::from_static("x-pricing-free-until"),
            HeaderName::from_static("x-pricing-active-from"),
            HeaderName::from_static("x-pricing-days-remaining"),
        ])
}

async fn index() -> Json<Value> {
    let mut names: Vec<&str> = MODULES.iter().map(|m| m.name()).collect();
    names.sort_unstable();
    Json(json!({
        "service": "nexora-home",
        "version": env!("CARGO_PKG_VERSION"),
        "modules": names,
    }))
}

async fn health_check() -> Json<Value> {
    Json(json!({"status": "healthy", "service": "nexora-home"}))
}

async fn list_modules(_user: AuthUser) -> Json<Vec<ModuleInfo>> {
    let mut modules: Vec<ModuleInfo> = MODULES.iter().map(|m| ModuleInfo::new(*m)).collect();
    modules.sort_by(|a, b| a.name.cmp(b.name));
    Json(modules)
}

async fn get_module(
    _user: AuthUser,
    ApiPath(name): ApiPath<String>,
) -> Result<Json<ModuleInfo>, ApiError> {
    modules::find(&name)
        .map(|m| Json(ModuleInfo::new(m)))
        .ok_or_else(|| ApiError::not_found(format!("Module '{}' not found", name)))
}

async fn not_found() -> (StatusCode, Json<Value>) {
    (StatusCode::NOT_FOUND, Json(json!({"error": "Not found"})))
}

#[cfg(test)]
mod tests {
    use crate::db::Role;
    use crate::testing::{send, TestApp};
    use axum::http::{Method, StatusCode};

    #[tokio::test]
    async fn test_home_endpoints() {
        let app = TestApp::new().await;

        let res = send(&app.router, Method::GET, "/", None, None).await;
        assert_eq!(res.body["service"], "nexora-home");
        assert_eq!(res.body["modules"].as_array().unwrap().len(), 18);

        let res = send(&app.router, Method::GET, "/api/health", None, None).await;
        assert_eq!(res.body["status"], "healthy");
        assert_eq!(res.body["service"], "nexora-home");

        let res = send(&app.router, Method::GET, "/no/such/path", None, None).await;
        assert_eq!(res.status, StatusCode::NOT_FOUND);
        assert_eq!(res.body["error"], "Not found");
    }

    #[tokio::test]
    async fn test_module_catalogue_requires_auth() {
        let app = TestApp::new().await;
        let res = send(&app.router, Method::GET, "/api/modules", None, None).await;
        assert_eq!(res.status, StatusCode::UNAUTHORIZED);

        let (_, token) = app.user("viewer", Role::User).await;
        let res = send(&app.router, Method::GET, "/api/modules", Some(&token), None).await;
        let modules = res.body.as_array().unwrap();
        assert_eq!(modules.len(), 18);
        assert_eq!(modules[0]["name"], "nexora-assist");
        assert_eq!(modules[0]["display_name"], "Assist");
        assert_eq!(modules[0]["access_url"], "/module/nexora-assist/");

        let res = send(&app.router, Method::GET, "/api/modules/nexora-routeiq", Some(&token), None).await;
        assert_eq!(res.body["health_url"], "/module/nexora-routeiq/api/health");

        let res = send(&app.router, Method::GET, "/api/modules/nexora-payroll", Some(&token), None).await;
        assert_eq!(res.body["display_name"], "Payroll");

        let res = send(&app.router, Method::GET, "/api/modules/nexora-ghost", Some(&token), None).await;
        assert_eq!(res.status, StatusCode::NOT_FOUND);
    }
}
