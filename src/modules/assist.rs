//! Remote assistance: support requests and the log of each help session.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::Arc;

use super::Module;
use crate::api::auth::{AuthUser, DELETE_ROLES, READ_ROLES, WRITE_ROLES};
use crate::api::error::{ApiError, ApiJson, ApiPath, ApiQuery, ValidationErrorBuilder};
use crate::api::validation::{non_empty, validate_one_of};
use crate::db::{
    fetch_filtered, AssistRequest, AssistRequestBody, AssistRequestQuery, AssistRequestResponse,
    DbPool, Filters, SessionLog, SessionLogRequest, SessionLogResponse, LOG_ENTRY_TYPES,
    REQUEST_SEVERITIES, REQUEST_STATUSES,
};
use crate::utils::now_rfc3339;
use crate::AppState;

pub struct Assist;

impl Module for Assist {
    fn name(&self) -> &'static str {
        "nexora-assist"
    }

    fn description(&self) -> &'static str {
        "Remote support requests with session logs"
    }

    fn icon(&self) -> &'static str {
        "🛟"
    }

    fn endpoints(&self) -> &'static [&'static str] {
        &["/api/items", "/api/assist/requests"]
    }

    fn routes(&self) -> Router<Arc<AppState>> {
        Router::new()
            .route("/api/assist/requests", get(list_requests).post(create_request))
            .route(
                "/api/assist/requests/:id",
                get(get_request).put(update_request).delete(delete_request),
            )
            .route("/api/assist/requests/:id/session/start", post(start_session))
            .route(
                "/api/assist/requests/:id/session/logs",
                get(list_logs).post(add_log),
            )
    }
}

/// Public reference quoted to the customer
fn new_request_number() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..12].to_string()
}

fn check_request_fields(severity: Option<&str>, status: Option<&str>) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Some(severity) = severity {
        errors.check("severity", validate_one_of(severity, REQUEST_SEVERITIES, "severity"));
    }
    if let Some(status) = status {
        errors.check("status", validate_one_of(status, REQUEST_STATUSES, "status"));
    }
    errors.finish()
}

async fn find_request(db: &DbPool, id: i64) -> Result<AssistRequest, ApiError> {
    sqlx::query_as("SELECT * FROM assist_requests WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("request not found"))
}

async fn list_requests(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiQuery(query): ApiQuery<AssistRequestQuery>,
) -> Result<Json<Vec<AssistRequestResponse>>, ApiError> {
    user.require(READ_ROLES)?;
    let mut filters = Filters::new();
    filters
        .eq("status", query.status)
        .eq("assigned_to", query.assigned_to);
    let requests: Vec<AssistRequest> = fetch_filtered(
        &state.db,
        "*",
        "assist_requests",
        &filters,
        "created_at DESC, id DESC",
    )
    .await?;
    Ok(Json(requests.into_iter().map(Into::into).collect()))
}

async fn get_request(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<AssistRequestResponse>, ApiError> {
    user.require(READ_ROLES)?;
    Ok(Json(find_request(&state.db, id).await?.into()))
}

async fn create_request(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(body): ApiJson<AssistRequestBody>,
) -> Result<(StatusCode, Json<AssistRequestResponse>), ApiError> {
    user.require(READ_ROLES)?;
    let subject = non_empty(&body.subject).ok_or_else(|| ApiError::bad_request("subject required"))?;
    let severity = non_empty(&body.severity).unwrap_or("normal");
    let status = non_empty(&body.status).unwrap_or("open");
    check_request_fields(Some(severity), Some(status))?;

    let request: AssistRequest = sqlx::query_as(
        r#"INSERT INTO assist_requests
           (request_number, subject, description, customer_name, customer_contact,
            severity, status, assigned_to, preferred_time, metadata)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
           RETURNING *"#,
    )
    .bind(new_request_number())
    .bind(subject)
    .bind(&body.description)
    .bind(&body.customer_name)
    .bind(&body.customer_contact)
    .bind(severity)
    .bind(status)
    .bind(body.assigned_to)
    .bind(&body.preferred_time)
    .bind(body.metadata.as_ref().map(Value::to_string))
    .fetch_one(&state.db)
    .await?;

    tracing::info!(request_id = request.id, severity = %request.severity, "Opened assist request");
    Ok((StatusCode::CREATED, Json(request.into())))
}

async fn update_request(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(body): ApiJson<AssistRequestBody>,
) -> Result<Json<AssistRequestResponse>, ApiError> {
    user.require(WRITE_ROLES)?;
    let existing = find_request(&state.db, id).await?;
    let severity = non_empty(&body.severity);
    let status = non_empty(&body.status);
    check_request_fields(severity, status)?;

    let request: AssistRequest = sqlx::query_as(
        r#"UPDATE assist_requests
           SET subject = ?, description = ?, customer_name = ?, customer_contact = ?,
               severity = ?, status = ?, assigned_to = ?, preferred_time = ?, metadata = ?,
               updated_at = ?
           WHERE id = ?
           RETURNING *"#,
    )
    .bind(non_empty(&body.subject).unwrap_or(&existing.subject))
    .bind(body.description.as_ref().or(existing.description.as_ref()))
    .bind(body.customer_name.as_ref().or(existing.customer_name.as_ref()))
    .bind(body.customer_contact.as_ref().or(existing.customer_contact.as_ref()))
    .bind(severity.unwrap_or(&existing.severity))
    .bind(status.unwrap_or(&existing.status))
    .bind(body.assigned_to.or(existing.assigned_to))
    .bind(body.preferred_time.as_ref().or(existing.preferred_time.as_ref()))
    .bind(body.metadata.as_ref().map(Value::to_string).or(existing.metadata))
    .bind(now_rfc3339())
    .bind(id)
    .fetch_one(&state.db)
    .await?;
    Ok(Json(request.into()))
}

async fn delete_request(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    user.require(DELETE_ROLES)?;
    // Session logs cascade with the request
    let result = sqlx::query("DELETE FROM assist_requests WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("request not found"));
    }
    Ok(Json(json!({"message": "request deleted"})))
}

// -------------------------------------------------------------------------
// Sessions
// -------------------------------------------------------------------------

/// Mark the request in progress and log a system entry for it
async fn start_session(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
    body: Option<ApiJson<SessionLogRequest>>,
) -> Result<(StatusCode, Json<SessionLogResponse>), ApiError> {
    user.require(WRITE_ROLES)?;
    let body = body.map(|ApiJson(body)| body).unwrap_or_default();
    let message = non_empty(&body.message).unwrap_or("session started");

    let mut tx = state.db.begin().await?;
    let started: Option<i64> = sqlx::query_scalar(
        "UPDATE assist_requests SET status = 'in_progress', updated_at = ? WHERE id = ? RETURNING id",
    )
    .bind(now_rfc3339())
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?;
    if started.is_none() {
        return Err(ApiError::not_found("request not found"));
    }

    let log: SessionLog = sqlx::query_as(
        r#"INSERT INTO assist_session_logs (request_id, actor_id, entry_type, message, metadata)
           VALUES (?, ?, 'system', ?, ?)
           RETURNING *"#,
    )
    .bind(id)
    .bind(user.id)
    .bind(message)
    .bind(body.metadata.as_ref().map(Value::to_string))
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    tracing::info!(request_id = id, user_id = user.id, "Started assist session");
    Ok((StatusCode::CREATED, Json(log.into())))
}

async fn list_logs(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Vec<SessionLogResponse>>, ApiError> {
    user.require(READ_ROLES)?;
    find_request(&state.db, id).await?;
    let logs: Vec<SessionLog> = sqlx::query_as(
        "SELECT * FROM assist_session_logs WHERE request_id = ? ORDER BY timestamp, id",
    )
    .bind(id)
    .fetch_all(&state.db)
    .await?;
    Ok(Json(logs.into_iter().map(Into::into).collect()))
}

async fn add_log(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(body): ApiJson<SessionLogRequest>,
) -> Result<(StatusCode, Json<SessionLogResponse>), ApiError> {
    user.require(READ_ROLES)?;
    find_request(&state.db, id).await?;
    let message = non_empty(&body.message).ok_or_else(|| ApiError::bad_request("message required"))?;
    let entry_type = non_empty(&body.entry_type).unwrap_or("note");
    if let Err(error) = validate_one_of(entry_type, LOG_ENTRY_TYPES, "entry_type") {
        return Err(ApiError::validation_field("entry_type", error));
    }

    let log: SessionLog = sqlx::query_as(
        r#"INSERT INTO assist_session_logs (request_id, actor_id, entry_type, message, metadata)
           VALUES (?, ?, ?, ?, ?)
           RETURNING *"#,
    )
    .bind(id)
    .bind(user.id)
    .bind(entry_type)
    .bind(message)
    .bind(body.metadata.as_ref().map(Value::to_string))
    .fetch_one(&state.db)
    .await?;
    Ok((StatusCode::CREATED, Json(log.into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Role;
    use crate::testing::{send, TestApp};
    use axum::http::Method;

    const BASE: &str = "/module/nexora-assist/api/assist/requests";

    #[tokio::test]
    async fn test_request_session_flow() {
        let app = TestApp::new().await;
        let (_, customer) = app.user("cust", Role::User).await;
        let (tech_id, tech) = app.user("tech", Role::Manager).await;

        let res = send(&app.router, Method::POST, BASE, Some(&customer), Some(json!({"description": "x"}))).await;
        assert_eq!(res.body["error"], "subject required");
        let res = send(
            &app.router,
            Method::POST,
            BASE,
            Some(&customer),
            Some(json!({"subject": "VPN down", "severity": "urgent"})),
        )
        .await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);

        let res = send(
            &app.router,
            Method::POST,
            BASE,
            Some(&customer),
            Some(json!({"subject": "VPN down", "metadata": {"os": "linux"}})),
        )
        .await;
        assert_eq!(res.status, StatusCode::CREATED);
        assert_eq!(res.body["severity"], "normal");
        assert_eq!(res.body["status"], "open");
        assert_eq!(res.body["metadata"], json!({"os": "linux"}));
        assert_eq!(res.body["request_number"].as_str().unwrap().len(), 12);
        let uri = format!("{}/{}", BASE, res.body["id"]);

        let res = send(&app.router, Method::POST, &format!("{}/session/start", uri), Some(&customer), None).await;
        assert_eq!(res.status, StatusCode::FORBIDDEN);
        let res = send(&app.router, Method::POST, &format!("{}/session/start", uri), Some(&tech), None).await;
        assert_eq!(res.status, StatusCode::CREATED);
        assert_eq!(res.body["entry_type"], "system");
        assert_eq!(res.body["message"], "session started");
        assert_eq!(res.body["actor_id"], tech_id);

        let res = send(&app.router, Method::GET, &uri, Some(&customer), None).await;
        assert_eq!(res.body["status"], "in_progress");

        let logs = format!("{}/session/logs", uri);
        let res = send(&app.router, Method::POST, &logs, Some(&tech), Some(json!({}))).await;
        assert_eq!(res.body["error"], "message required");
        let res = send(&app.router, Method::POST, &logs, Some(&tech), Some(json!({"message": "Reset tunnel"}))).await;
        assert_eq!(res.body["entry_type"], "note");

        let res = send(&app.router, Method::GET, &logs, Some(&customer), None).await;
        let messages: Vec<&str> = res.body.as_array().unwrap().iter().map(|l| l["message"].as_str().unwrap()).collect();
        assert_eq!(messages, vec!["session started", "Reset tunnel"]);

        let res = send(&app.router, Method::GET, &format!("{}?status=in_progress", BASE), Some(&tech), None).await;
        assert_eq!(res.body.as_array().unwrap().len(), 1);

        let res = send(&app.router, Method::POST, &format!("{}/999/session/start", BASE), Some(&tech), None).await;
        assert_eq!(res.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_request_removes_logs() {
        let app = TestApp::new().await;
        let (_, admin) = app.user("root", Role::Admin).await;
        let res = send(&app.router, Method::POST, BASE, Some(&admin), Some(json!({"subject": "Printer"}))).await;
        let uri = format!("{}/{}", BASE, res.body["id"]);
        send(
            &app.router,
            Method::POST,
            &format!("{}/session/start", uri),
            Some(&admin),
            Some(json!({"message": "Connected"})),
        )
        .await;

        let res = send(&app.router, Method::DELETE, &uri, Some(&admin), None).await;
        assert_eq!(res.body["message"], "request deleted");
        let logs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM assist_session_logs")
            .fetch_one(&app.state.db)
            .await
            .unwrap();
        assert_eq!(logs, 0);
    }
}
