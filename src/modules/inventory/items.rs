use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::api::auth::{AuthUser, READ_ROLES, WRITE_ROLES};
use crate::api::error::{ApiError, ApiJson, ApiPath, ApiQuery, ValidationErrorBuilder};
use crate::api::validation::non_empty;
use crate::db::{
    fetch_page, CreateInventoryItemRequest, Filters, InventoryItem, InventoryItemDetail,
    InventoryItemQuery, Page, PageWindow, UpdateInventoryItemRequest,
};
use crate::utils::{now_rfc3339, round2};
use crate::AppState;

const DEFAULT_PER_PAGE: i64 = 10;

pub(super) async fn find_item(state: &AppState, id: i64) -> Result<InventoryItem, ApiError> {
    sqlx::query_as("SELECT * FROM inventory_items WHERE id = ?")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Item not found"))
}

fn validate_levels(
    unit_price: Option<f64>,
    reorder_level: Option<i64>,
    reorder_quantity: Option<i64>,
) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if unit_price.is_some_and(|p| !p.is_finite() || p < 0.0) {
        errors.add("unit_price", "unit_price must not be negative");
    }
    if reorder_level.is_some_and(|l| l < 0) {
        errors.add("reorder_level", "reorder_level must not be negative");
    }
    if reorder_quantity.is_some_and(|q| q < 0) {
        errors.add("reorder_quantity", "reorder_quantity must not be negative");
    }
    errors.finish()
}

pub async fn list_items(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiQuery(query): ApiQuery<InventoryItemQuery>,
) -> Result<Json<Page<InventoryItem>>, ApiError> {
    user.require(READ_ROLES)?;

    let window = PageWindow::new(query.page, query.per_page, DEFAULT_PER_PAGE);
    let mut filters = Filters::new();
    filters
        .eq("category", query.category)
        .eq("warehouse_id", query.warehouse_id);

    let page = fetch_page(&state.db, "items", "*", "inventory_items", &filters, "id", window).await?;
    Ok(Json(page))
}

pub async fn get_item(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<InventoryItemDetail>, ApiError> {
    user.require(READ_ROLES)?;

    let item = find_item(&state, id).await?;
    let batches: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stock_batches WHERE item_id = ?")
        .bind(id)
        .fetch_one(&state.db)
        .await?;

    Ok(Json(InventoryItemDetail { item, batches }))
}

pub async fn create_item(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<CreateInventoryItemRequest>,
) -> Result<(StatusCode, Json<InventoryItem>), ApiError> {
    user.require(WRITE_ROLES)?;

    let (Some(sku), Some(name), Some(unit_price)) =
        (non_empty(&request.sku), non_empty(&request.name), request.unit_price)
    else {
        return Err(ApiError::bad_request("SKU, name, and price are required"));
    };
    validate_levels(Some(unit_price), request.reorder_level, request.reorder_quantity)?;

    let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM inventory_items WHERE sku = ?")
        .bind(sku)
        .fetch_optional(&state.db)
        .await?;
    if exists.is_some() {
        return Err(ApiError::conflict("SKU already exists"));
    }

    let item: InventoryItem = sqlx::query_as(
        r#"INSERT INTO inventory_items
               (sku, name, description, category, unit_price, reorder_level, reorder_quantity, warehouse_id)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?)
           RETURNING *"#,
    )
    .bind(sku)
    .bind(name)
    .bind(&request.description)
    .bind(&request.category)
    .bind(round2(unit_price))
    .bind(request.reorder_level.unwrap_or(10))
    .bind(request.reorder_quantity.unwrap_or(50))
    .bind(request.warehouse_id)
    .fetch_one(&state.db)
    .await?;

    tracing::info!(item_id = item.id, sku = %item.sku, "Created inventory item");
    Ok((StatusCode::CREATED, Json(item)))
}

pub async fn update_item(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<UpdateInventoryItemRequest>,
) -> Result<Json<InventoryItem>, ApiError> {
    user.require(WRITE_ROLES)?;
    validate_levels(request.unit_price, request.reorder_level, request.reorder_quantity)?;

    let existing = find_item(&state, id).await?;

    let item: InventoryItem = sqlx::query_as(
        r#"UPDATE inventory_items
           SET name = ?, description = ?, category = ?, unit_price = ?,
               reorder_level = ?, reorder_quantity = ?, warehouse_id = ?, updated_at = ?
           WHERE id = ?
           RETURNING *"#,
    )
    .bind(non_empty(&request.name).unwrap_or(&existing.name))
    .bind(request.description.as_ref().or(existing.description.as_ref()))
    .bind(request.category.as_ref().or(existing.category.as_ref()))
    .bind(request.unit_price.map(round2).unwrap_or(existing.unit_price))
    .bind(request.reorder_level.unwrap_or(existing.reorder_level))
    .bind(request.reorder_quantity.unwrap_or(existing.reorder_quantity))
    .bind(request.warehouse_id.or(existing.warehouse_id))
    .bind(now_rfc3339())
    .bind(id)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(item))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{item, warehouse, BASE};
    use crate::db::Role;
    use crate::testing::{send, TestApp};
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    #[tokio::test]
    async fn test_create_and_update_item() {
        let app = TestApp::new().await;
        let (_, token) = app.user("mgr", Role::Manager).await;
        let wh = warehouse(&app, &token, "Main").await;
        let uri = format!("{}/api/items", BASE);

        let res = send(&app.router, Method::POST, &uri, Some(&token), Some(json!({"sku": "A-1", "name": "Bolt"}))).await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        assert_eq!(res.body["error"], "SKU, name, and price are required");

        let res = send(
            &app.router,
            Method::POST,
            &uri,
            Some(&token),
            Some(json!({"sku": "A-1", "name": "Bolt", "unit_price": 0.255, "warehouse_id": wh})),
        )
        .await;
        assert_eq!(res.status, StatusCode::CREATED);
        assert_eq!(res.body["current_stock"], 0);
        assert_eq!(res.body["reorder_level"], 10);
        assert_eq!(res.body["reorder_quantity"], 50);
        let id = res.body["id"].as_i64().unwrap();

        let res = send(
            &app.router,
            Method::POST,
            &uri,
            Some(&token),
            Some(json!({"sku": "A-1", "name": "Other", "unit_price": 1})),
        )
        .await;
        assert_eq!(res.status, StatusCode::CONFLICT);
        assert_eq!(res.body["error"], "SKU already exists");

        let res = send(
            &app.router,
            Method::PUT,
            &format!("{}/{}", uri, id),
            Some(&token),
            Some(json!({"name": "Hex bolt", "sku": "B-2", "reorder_level": 3})),
        )
        .await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.body["name"], "Hex bolt");
        assert_eq!(res.body["sku"], "A-1");
        assert_eq!(res.body["reorder_level"], 3);

        let res = send(&app.router, Method::GET, &format!("{}/{}", uri, id), Some(&token), None).await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.body["batches"], 0);
        assert_eq!(res.body["sku"], "A-1");
    }

    #[tokio::test]
    async fn test_list_items_filters_and_paginates() {
        let app = TestApp::new().await;
        let (_, token) = app.user("mgr", Role::Manager).await;
        let north = warehouse(&app, &token, "North").await;
        let south = warehouse(&app, &token, "South").await;
        for n in 0..12 {
            item(&app, &token, &format!("N-{}", n), north, 10).await;
        }
        item(&app, &token, "S-1", south, 10).await;

        let res = send(&app.router, Method::GET, &format!("{}/api/items", BASE), Some(&token), None).await;
        assert_eq!(res.body["total"], 13);
        assert_eq!(res.body["pages"], 2);
        assert_eq!(res.body["per_page"], 10);
        assert_eq!(res.body["items"].as_array().unwrap().len(), 10);

        let res = send(
            &app.router,
            Method::GET,
            &format!("{}/api/items?warehouse_id={}", BASE, south),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(res.body["total"], 1);
        assert_eq!(res.body["items"][0]["sku"], "S-1");

        let res = send(
            &app.router,
            Method::GET,
            &format!("{}/api/items?category=tools", BASE),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(res.body["total"], 0);
    }

    #[tokio::test]
    async fn test_plain_user_cannot_create() {
        let app = TestApp::new().await;
        let (_, token) = app.user("viewer", Role::User).await;
        let res = send(
            &app.router,
            Method::POST,
            &format!("{}/api/items", BASE),
            Some(&token),
            Some(json!({"sku": "X", "name": "X", "unit_price": 1})),
        )
        .await;
        assert_eq!(res.status, StatusCode::FORBIDDEN);
    }
}
