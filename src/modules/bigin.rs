//! Small-team pipeline: deals by stage and the tasks hanging off them.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;

use super::Module;
use crate::api::auth::{AuthUser, DELETE_ROLES, READ_ROLES, WRITE_ROLES};
use crate::api::error::{ApiError, ApiJson, ApiPath, ApiQuery, ValidationErrorBuilder};
use crate::api::validation::{non_empty, validate_one_of};
use crate::db::{
    fetch_page, BiginDeal, BiginDealQuery, BiginDealRequest, BiginPipeline, BiginTask,
    BiginTaskQuery, BiginTaskRequest, DbPool, Filters, Page, PageWindow, PipelineStage,
    BIGIN_DEAL_STATUSES, BIGIN_TASK_STATUSES,
};
use crate::utils::{format_utc, parse_datetime};
use crate::AppState;

const DEFAULT_PER_PAGE: i64 = 50;

pub struct Bigin;

impl Module for Bigin {
    fn name(&self) -> &'static str {
        "nexora-bigin"
    }

    fn description(&self) -> &'static str {
        "Deal pipeline and follow-up tasks for small teams"
    }

    fn icon(&self) -> &'static str {
        "📈"
    }

    fn endpoints(&self) -> &'static [&'static str] {
        &["/api/items", "/api/bigin/deals", "/api/bigin/tasks", "/api/bigin/pipeline"]
    }

    fn routes(&self) -> Router<Arc<AppState>> {
        Router::new()
            .route("/api/bigin/deals", get(list_deals).post(create_deal))
            .route(
                "/api/bigin/deals/:id",
                get(get_deal).put(update_deal).delete(delete_deal),
            )
            .route("/api/bigin/tasks", get(list_tasks).post(create_task))
            .route(
                "/api/bigin/tasks/:id",
                get(get_task).put(update_task).delete(delete_task),
            )
            .route("/api/bigin/pipeline", get(pipeline))
    }
}

fn check_status(status: Option<&str>, allowed: &[&str]) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Some(status) = status {
        errors.check("status", validate_one_of(status, allowed, "status"));
    }
    errors.finish()
}

fn due_date(raw: &Option<String>) -> Option<String> {
    non_empty(raw).and_then(parse_datetime).map(format_utc)
}

// -------------------------------------------------------------------------
// Deals
// -------------------------------------------------------------------------

async fn find_deal(db: &DbPool, id: i64) -> Result<BiginDeal, ApiError> {
    sqlx::query_as("SELECT * FROM bigin_deals WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Deal not found"))
}

async fn list_deals(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiQuery(query): ApiQuery<BiginDealQuery>,
) -> Result<Json<Page<BiginDeal>>, ApiError> {
    user.require(READ_ROLES)?;
    let window = PageWindow::new(query.page, query.per_page, DEFAULT_PER_PAGE);
    let mut filters = Filters::new();
    filters.eq("stage", query.stage);

    let page = fetch_page(
        &state.db,
        "deals",
        "*",
        "bigin_deals",
        &filters,
        "created_at DESC, id DESC",
        window,
    )
    .await?;
    Ok(Json(page))
}

async fn get_deal(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<BiginDeal>, ApiError> {
    user.require(READ_ROLES)?;
    Ok(Json(find_deal(&state.db, id).await?))
}

async fn create_deal(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<BiginDealRequest>,
) -> Result<(StatusCode, Json<BiginDeal>), ApiError> {
    user.require(WRITE_ROLES)?;
    let title = non_empty(&request.title).ok_or_else(|| ApiError::bad_request("title required"))?;
    let status = non_empty(&request.status).unwrap_or("open");
    check_status(Some(status), BIGIN_DEAL_STATUSES)?;

    let deal: BiginDeal = sqlx::query_as(
        r#"INSERT INTO bigin_deals (title, amount, stage, status, created_by)
           VALUES (?, ?, ?, ?, ?)
           RETURNING *"#,
    )
    .bind(title)
    .bind(request.amount)
    .bind(non_empty(&request.stage).unwrap_or("prospect"))
    .bind(status)
    .bind(user.id)
    .fetch_one(&state.db)
    .await?;
    Ok((StatusCode::CREATED, Json(deal)))
}

async fn update_deal(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<BiginDealRequest>,
) -> Result<Json<BiginDeal>, ApiError> {
    user.require(WRITE_ROLES)?;
    let existing = find_deal(&state.db, id).await?;
    let status = non_empty(&request.status);
    check_status(status, BIGIN_DEAL_STATUSES)?;

    let deal: BiginDeal = sqlx::query_as(
        "UPDATE bigin_deals SET title = ?, amount = ?, stage = ?, status = ? WHERE id = ? RETURNING *",
    )
    .bind(non_empty(&request.title).unwrap_or(&existing.title))
    .bind(request.amount.or(existing.amount))
    .bind(non_empty(&request.stage).unwrap_or(&existing.stage))
    .bind(status.unwrap_or(&existing.status))
    .bind(id)
    .fetch_one(&state.db)
    .await?;
    Ok(Json(deal))
}

async fn delete_deal(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    user.require(DELETE_ROLES)?;
    // Tasks stay, unlinked from the deal
    let result = sqlx::query("DELETE FROM bigin_deals WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Deal not found"));
    }
    Ok(Json(json!({"message": "Deal deleted"})))
}

// -------------------------------------------------------------------------
// Tasks
// -------------------------------------------------------------------------

async fn find_task(db: &DbPool, id: i64) -> Result<BiginTask, ApiError> {
    sqlx::query_as("SELECT * FROM bigin_tasks WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Task not found"))
}

async fn list_tasks(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiQuery(query): ApiQuery<BiginTaskQuery>,
) -> Result<Json<Page<BiginTask>>, ApiError> {
    user.require(READ_ROLES)?;
    let window = PageWindow::new(query.page, query.per_page, DEFAULT_PER_PAGE);
    let mut filters = Filters::new();
    filters.eq("related_deal_id", query.related_deal_id);

    let page = fetch_page(
        &state.db,
        "tasks",
        "*",
        "bigin_tasks",
        &filters,
        "due_date IS NULL, due_date ASC, id ASC",
        window,
    )
    .await?;
    Ok(Json(page))
}

async fn get_task(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<BiginTask>, ApiError> {
    user.require(READ_ROLES)?;
    Ok(Json(find_task(&state.db, id).await?))
}

async fn create_task(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<BiginTaskRequest>,
) -> Result<(StatusCode, Json<BiginTask>), ApiError> {
    user.require(WRITE_ROLES)?;
    let title = non_empty(&request.title).ok_or_else(|| ApiError::bad_request("title required"))?;
    let status = non_empty(&request.status).unwrap_or("todo");
    check_status(Some(status), BIGIN_TASK_STATUSES)?;

    let task: BiginTask = sqlx::query_as(
        r#"INSERT INTO bigin_tasks (title, description, related_deal_id, due_date, status)
           VALUES (?, ?, ?, ?, ?)
           RETURNING *"#,
    )
    .bind(title)
    .bind(&request.description)
    .bind(request.related_deal_id)
    .bind(due_date(&request.due_date))
    .bind(status)
    .fetch_one(&state.db)
    .await?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn update_task(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<BiginTaskRequest>,
) -> Result<Json<BiginTask>, ApiError> {
    user.require(WRITE_ROLES)?;
    let existing = find_task(&state.db, id).await?;
    let status = non_empty(&request.status);
    check_status(status, BIGIN_TASK_STATUSES)?;

    let task: BiginTask = sqlx::query_as(
        r#"UPDATE bigin_tasks
           SET title = ?, description = ?, related_deal_id = ?, due_date = ?, status = ?
           WHERE id = ?
           RETURNING *"#,
    )
    .bind(non_empty(&request.title).unwrap_or(&existing.title))
    .bind(request.description.as_ref().or(existing.description.as_ref()))
    .bind(request.related_deal_id.or(existing.related_deal_id))
    .bind(due_date(&request.due_date).or(existing.due_date))
    .bind(status.unwrap_or(&existing.status))
    .bind(id)
    .fetch_one(&state.db)
    .await?;
    Ok(Json(task))
}

async fn delete_task(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    user.require(DELETE_ROLES)?;
    let result = sqlx::query("DELETE FROM bigin_tasks WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Task not found"));
    }
    Ok(Json(json!({"message": "Task deleted"})))
}

async fn pipeline(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<BiginPipeline>, ApiError> {
    user.require(READ_ROLES)?;

    let (total_deals, open_deals, closed_deals): (i64, i64, i64) = sqlx::query_as(
        r#"SELECT COUNT(*),
                  COALESCE(SUM(CASE WHEN status = 'open' THEN 1 ELSE 0 END), 0),
                  COALESCE(SUM(CASE WHEN status = 'closed' THEN 1 ELSE 0 END), 0)
           FROM bigin_deals"#,
    )
    .fetch_one(&state.db)
    .await?;
    let stages: Vec<PipelineStage> = sqlx::query_as(
        "SELECT stage, COUNT(*) AS count FROM bigin_deals GROUP BY stage ORDER BY stage",
    )
    .fetch_all(&state.db)
    .await?;

    Ok(Json(BiginPipeline {
        total_deals,
        open_deals,
        closed_deals,
        stages,
    }))
}
