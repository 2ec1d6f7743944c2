use axum::{
    body::Body,
    extract::{Request, State},
    http::Method,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use crate::AppState;

use super::error::ApiError;

/// Refuse every DELETE while demo mode is on
pub async fn block_deletes(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if state.config.demo.enabled && request.method() == Method::DELETE {
        tracing::debug!(path = %request.uri().path(), "Blocked DELETE in demo mode");
        return ApiError::forbidden("DELETE disabled in demo mode").into_response();
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use crate::db::Role;
    use crate::testing::{send, test_config, TestApp};
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn test_demo_mode_blocks_delete() {
        let mut config = test_config();
        config.demo.enabled = true;
        let app = TestApp::with_config(config).await;
        let (_, token) = app.user("root", Role::Admin).await;

        let res = send(
            &app.router,
            Method::POST,
            "/module/nexora-crm/api/items",
            Some(&token),
            Some(json!({"title": "keep me"})),
        )
        .await;
        assert_eq!(res.status, StatusCode::CREATED);
        let id = res.body["id"].as_i64().unwrap();

        let uri = format!("/module/nexora-crm/api/items/{}", id);
        let res = send(&app.router, Method::DELETE, &uri, Some(&token), None).await;
        assert_eq!(res.status, StatusCode::FORBIDDEN);
        assert_eq!(res.body["error"], "DELETE disabled in demo mode");

        let res = send(&app.router, Method::GET, &uri, Some(&token), None).await;
        assert_eq!(res.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_delete_allowed_outside_demo_mode() {
        let app = TestApp::new().await;
        let (_, token) = app.user("root", Role::Admin).await;

        let res = send(
            &app.router,
            Method::POST,
            "/module/nexora-crm/api/items",
            Some(&token),
            Some(json!({"title": "remove me"})),
        )
        .await;
        let uri = format!("/module/nexora-crm/api/items/{}", res.body["id"]);
        let res = send(&app.router, Method::DELETE, &uri, Some(&token), None).await;
        assert_eq!(res.status, StatusCode::OK);
    }
}
