use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::api::auth::{AuthUser, READ_ROLES, WRITE_ROLES};
use crate::api::error::{ApiError, ApiJson, ApiPath, ApiQuery};
use crate::api::validation::non_empty;
use crate::db::{fetch_filtered, AlertType, CreateStockAlertRequest, Filters, StockAlert, StockAlertQuery};
use crate::utils::now_rfc3339;
use crate::AppState;

use super::items::find_item;
use super::stock;

const SELECT: &str = "a.*, i.name AS item_name";
const FROM: &str = "stock_alerts a LEFT JOIN inventory_items i ON i.id = a.item_id";

pub async fn list_alerts(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiQuery(query): ApiQuery<StockAlertQuery>,
) -> Result<Json<Vec<StockAlert>>, ApiError> {
    user.require(READ_ROLES)?;

    let resolved = query
        .resolved
        .as_deref()
        .is_some_and(|r| r.eq_ignore_ascii_case("true"));

    let mut filters = Filters::new();
    filters
        .push("a.is_resolved = ?", i64::from(resolved))
        .eq("a.alert_type", query.alert_type);

    let alerts = fetch_filtered(&state.db, SELECT, FROM, &filters, "a.created_at DESC, a.id DESC").await?;
    Ok(Json(alerts))
}

pub async fn create_alert(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<CreateStockAlertRequest>,
) -> Result<(StatusCode, Json<StockAlert>), ApiError> {
    user.require(WRITE_ROLES)?;

    let (Some(item_id), Some(alert_type)) = (request.item_id, non_empty(&request.alert_type)) else {
        return Err(ApiError::bad_request("Item ID and alert type are required"));
    };
    let alert_type: AlertType = alert_type
        .parse()
        .map_err(|e: String| ApiError::validation_field("alert_type", e))?;
    find_item(&state, item_id).await?;

    let id: i64 = sqlx::query_scalar(
        r#"INSERT INTO stock_alerts (item_id, alert_type, message, current_stock, threshold)
           VALUES (?, ?, ?, ?, ?)
           RETURNING id"#,
    )
    .bind(item_id)
    .bind(alert_type.as_str())
    .bind(&request.message)
    .bind(request.current_stock)
    .bind(request.threshold)
    .fetch_one(&state.db)
    .await?;

    let alert: StockAlert = sqlx::query_as(&format!("SELECT {} FROM {} WHERE a.id = ?", SELECT, FROM))
        .bind(id)
        .fetch_one(&state.db)
        .await?;
    Ok((StatusCode::CREATED, Json(alert)))
}

pub async fn resolve_alert(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    user.require(WRITE_ROLES)?;

    let result = sqlx::query("UPDATE stock_alerts SET is_resolved = 1, resolved_at = ? WHERE id = ?")
        .bind(now_rfc3339())
        .bind(id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Alert not found"));
    }

    Ok(Json(json!({"message": "Alert resolved"})))
}

/// Run the stock check on demand
pub async fn run_check(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Value>, ApiError> {
    user.require(WRITE_ROLES)?;

    let report = stock::check_stock_levels(&state.db, Utc::now()).await?;
    Ok(Json(json!({
        "alerts_created": report.alerts_created(),
        "low_stock": report.low_stock_alerts,
        "expired": report.expired_alerts,
        "expired_batches": report.expired_batches,
    })))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{item, warehouse, BASE};
    use crate::db::Role;
    use crate::testing::{send, TestApp};
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn test_check_then_resolve() {
        let app = TestApp::new().await;
        let (_, token) = app.user("mgr", Role::Manager).await;
        let wh = warehouse(&app, &token, "Main").await;
        let item_id = item(&app, &token, "LOW-1", wh, 10).await;

        let check = format!("{}/api/alerts/check", BASE);
        let res = send(&app.router, Method::POST, &check, Some(&token), None).await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.body["alerts_created"], 1);

        let res = send(&app.router, Method::POST, &check, Some(&token), None).await;
        assert_eq!(res.body["alerts_created"], 0);

        let res = send(&app.router, Method::GET, &format!("{}/api/alerts", BASE), Some(&token), None).await;
        let alerts = res.body.as_array().unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0]["item_id"], item_id);
        assert_eq!(alerts[0]["item_name"], "Item LOW-1");
        assert_eq!(alerts[0]["threshold"], 10);
        let alert_id = alerts[0]["id"].as_i64().unwrap();

        let res = send(
            &app.router,
            Method::PUT,
            &format!("{}/api/alerts/{}/resolve", BASE, alert_id),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.body["message"], "Alert resolved");

        let res = send(&app.router, Method::GET, &format!("{}/api/alerts", BASE), Some(&token), None).await;
        assert_eq!(res.body, json!([]));
        let res = send(
            &app.router,
            Method::GET,
            &format!("{}/api/alerts?resolved=TRUE", BASE),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(res.body.as_array().unwrap().len(), 1);
        assert!(res.body[0]["resolved_at"].is_string());

        let res = send(
            &app.router,
            Method::PUT,
            &format!("{}/api/alerts/999/resolve", BASE),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(res.status, StatusCode::NOT_FOUND);
        assert_eq!(res.body["error"], "Alert not found");
    }

    #[tokio::test]
    async fn test_manual_alert() {
        let app = TestApp::new().await;
        let (_, token) = app.user("mgr", Role::Manager).await;
        let wh = warehouse(&app, &token, "Main").await;
        let item_id = item(&app, &token, "X-1", wh, 0).await;
        let uri = format!("{}/api/alerts", BASE);

        let res = send(&app.router, Method::POST, &uri, Some(&token), Some(json!({"item_id": item_id}))).await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        assert_eq!(res.body["error"], "Item ID and alert type are required");

        let res = send(
            &app.router,
            Method::POST,
            &uri,
            Some(&token),
            Some(json!({"item_id": item_id, "alert_type": "flooded"})),
        )
        .await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);

        let res = send(
            &app.router,
            Method::POST,
            &uri,
            Some(&token),
            Some(json!({"item_id": item_id, "alert_type": "overstock", "message": "Too many"})),
        )
        .await;
        assert_eq!(res.status, StatusCode::CREATED);
        assert_eq!(res.body["alert_type"], "overstock");
        assert_eq!(res.body["is_resolved"], false);

        let res = send(
            &app.router,
            Method::GET,
            &format!("{}?alert_type=low_stock", uri),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(res.body, json!([]));
    }
}
