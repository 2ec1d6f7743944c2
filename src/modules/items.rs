//! Generic `module_items` CRUD shared by the DB-backed modules.
//!
//! Every router is bound to one module name and only ever sees rows
//! carrying that name.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::api::auth::{AuthUser, DELETE_ROLES, READ_ROLES, WRITE_ROLES};
use crate::api::error::{ApiError, ApiJson, ApiPath, ApiQuery};
use crate::api::validation::non_empty;
use crate::db::{
    fetch_page, CreateModuleItemRequest, Filters, ModuleItem, ModuleItemQuery, Page, PageWindow,
    UpdateModuleItemRequest,
};
use crate::utils::now_rfc3339;
use crate::AppState;

const DEFAULT_PER_PAGE: i64 = 10;

pub fn router(module: &'static str) -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/items",
            get(
                move |state: State<Arc<AppState>>, user: AuthUser, query: ApiQuery<ModuleItemQuery>| {
                    list_items(module, state, user, query)
                },
            )
            .post(
                move |state: State<Arc<AppState>>,
                      user: AuthUser,
                      body: ApiJson<CreateModuleItemRequest>| {
                    create_item(module, state, user, body)
                },
            ),
        )
        .route(
            "/api/items/:id",
            get(move |state: State<Arc<AppState>>, user: AuthUser, path: ApiPath<i64>| {
                get_item(module, state, user, path)
            })
            .put(
                move |state: State<Arc<AppState>>,
                      user: AuthUser,
                      path: ApiPath<i64>,
                      body: ApiJson<UpdateModuleItemRequest>| {
                    update_item(module, state, user, path, body)
                },
            )
            .delete(move |state: State<Arc<AppState>>, user: AuthUser, path: ApiPath<i64>| {
                delete_item(module, state, user, path)
            }),
        )
}

async fn find_item(state: &AppState, module: &str, id: i64) -> Result<ModuleItem, ApiError> {
    sqlx::query_as("SELECT * FROM module_items WHERE id = ? AND module = ?")
        .bind(id)
        .bind(module)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Item not found"))
}

async fn list_items(
    module: &'static str,
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiQuery(query): ApiQuery<ModuleItemQuery>,
) -> Result<Json<Page<ModuleItem>>, ApiError> {
    user.require(READ_ROLES)?;

    let window = PageWindow::new(query.page, query.per_page, DEFAULT_PER_PAGE);
    let mut filters = Filters::new();
    filters.eq("module", Some(module)).eq("status", query.status);

    let page = fetch_page(
        &state.db,
        "items",
        "*",
        "module_items",
        &filters,
        "created_at DESC, id DESC",
        window,
    )
    .await?;
    Ok(Json(page))
}

async fn get_item(
    module: &'static str,
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<ModuleItem>, ApiError> {
    user.require(READ_ROLES)?;
    Ok(Json(find_item(&state, module, id).await?))
}

async fn create_item(
    module: &'static str,
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<CreateModuleItemRequest>,
) -> Result<(StatusCode, Json<ModuleItem>), ApiError> {
    user.require(WRITE_ROLES)?;

    let title = non_empty(&request.title).ok_or_else(|| ApiError::bad_request("Title is required"))?;
    let status = non_empty(&request.status).unwrap_or("active");

    let item: ModuleItem = sqlx::query_as(
        r#"INSERT INTO module_items (module, title, description, status, created_by)
           VALUES (?, ?, ?, ?, ?)
           RETURNING *"#,
    )
    .bind(module)
    .bind(title)
    .bind(&request.description)
    .bind(status)
    .bind(user.id)
    .fetch_one(&state.db)
    .await?;

    tracing::info!(module, item_id = item.id, user_id = user.id, "Created item");
    Ok((StatusCode::CREATED, Json(item)))
}

async fn update_item(
    module: &'static str,
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<UpdateModuleItemRequest>,
) -> Result<Json<ModuleItem>, ApiError> {
    user.require(WRITE_ROLES)?;

    let existing = find_item(&state, module, id).await?;
    let title = non_empty(&request.title).unwrap_or(&existing.title);
    let description = request.description.as_ref().or(existing.description.as_ref());
    let status = non_empty(&request.status).unwrap_or(&existing.status);

    let item: ModuleItem = sqlx::query_as(
        r#"UPDATE module_items
           SET title = ?, description = ?, status = ?, updated_at = ?
           WHERE id = ? AND module = ?
           RETURNING *"#,
    )
    .bind(title)
    .bind(description)
    .bind(status)
    .bind(now_rfc3339())
    .bind(id)
    .bind(module)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(item))
}

async fn delete_item(
    module: &'static str,
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    user.require(DELETE_ROLES)?;

    let result = sqlx::query("DELETE FROM module_items WHERE id = ? AND module = ?")
        .bind(id)
        .bind(module)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Item not found"));
    }

    tracing::info!(module, item_id = id, user_id = user.id, "Deleted item");
    Ok(Json(json!({"message": "Item deleted successfully"})))
}
