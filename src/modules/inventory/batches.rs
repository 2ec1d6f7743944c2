use axum::{extract::State, http::StatusCode, Json};
use std::sync::Arc;

use crate::api::auth::{AuthUser, READ_ROLES, WRITE_ROLES};
use crate::api::error::{ApiError, ApiJson, ApiQuery};
use crate::api::validation::non_empty;
use crate::db::{fetch_filtered, CreateStockBatchRequest, Filters, StockBatch, StockBatchQuery};
use crate::utils::{now_rfc3339, round2};
use crate::AppState;

const SELECT: &str = "b.*, i.name AS item_name";
const FROM: &str = "stock_batches b LEFT JOIN inventory_items i ON i.id = b.item_id";

pub async fn list_batches(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiQuery(query): ApiQuery<StockBatchQuery>,
) -> Result<Json<Vec<StockBatch>>, ApiError> {
    user.require(READ_ROLES)?;

    let mut filters = Filters::new();
    filters
        .eq("b.item_id", query.item_id)
        .eq("b.warehouse_id", query.warehouse_id)
        .eq("b.status", query.status);

    let batches = fetch_filtered(&state.db, SELECT, FROM, &filters, "b.id").await?;
    Ok(Json(batches))
}

/// Record a received batch and add its quantity to the item's stock
pub async fn create_batch(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<CreateStockBatchRequest>,
) -> Result<(StatusCode, Json<StockBatch>), ApiError> {
    user.require(WRITE_ROLES)?;

    let (Some(batch_number), Some(item_id), Some(warehouse_id), Some(quantity), Some(unit_cost)) = (
        non_empty(&request.batch_number),
        request.item_id,
        request.warehouse_id,
        request.quantity.filter(|q| *q > 0),
        request.unit_cost.filter(|c| c.is_finite() && *c >= 0.0),
    ) else {
        return Err(ApiError::bad_request("Missing required fields"));
    };

    let mut tx = state.db.begin().await?;

    // Stock first so the transaction holds the write lock before it reads
    let updated = sqlx::query(
        "UPDATE inventory_items SET current_stock = current_stock + ?, updated_at = ? WHERE id = ?",
    )
    .bind(quantity)
    .bind(now_rfc3339())
    .bind(item_id)
    .execute(&mut *tx)
    .await?;
    if updated.rows_affected() == 0 {
        return Err(ApiError::not_found("Item not found"));
    }

    let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM stock_batches WHERE batch_number = ?")
        .bind(batch_number)
        .fetch_optional(&mut *tx)
        .await?;
    if exists.is_some() {
        return Err(ApiError::conflict("Batch number already exists"));
    }

    let batch_id: i64 = sqlx::query_scalar(
        r#"INSERT INTO stock_batches
               (batch_number, item_id, warehouse_id, quantity, unit_cost,
                manufacture_date, expiry_date, location_rack)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?)
           RETURNING id"#,
    )
    .bind(batch_number)
    .bind(item_id)
    .bind(warehouse_id)
    .bind(quantity)
    .bind(round2(unit_cost))
    .bind(&request.manufacture_date)
    .bind(&request.expiry_date)
    .bind(&request.location_rack)
    .fetch_one(&mut *tx)
    .await?;

    let batch: StockBatch = sqlx::query_as(&format!("SELECT {} FROM {} WHERE b.id = ?", SELECT, FROM))
        .bind(batch_id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(batch_id, item_id, quantity, "Received stock batch");
    Ok((StatusCode::CREATED, Json(batch)))
}
