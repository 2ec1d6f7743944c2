use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::api::auth::{AuthUser, READ_ROLES, WRITE_ROLES};
use crate::api::error::{ApiError, ApiJson, ApiPath, ApiQuery};
use crate::api::validation::non_empty;
use crate::db::{
    fetch_page, CreatePurchaseOrderRequest, CreateSaleOrderRequest, Filters, OrderQuery, Page,
    PageWindow, PurchaseOrder, SaleOrder, ORDER_FULFILLED, ORDER_PENDING, ORDER_RECEIVED,
};
use crate::utils::{now_rfc3339, round2};
use crate::AppState;

use super::items::find_item;
use super::stock;

const DEFAULT_PER_PAGE: i64 = 10;

const PO_SELECT: &str = "o.*, i.name AS item_name";
const PO_FROM: &str = "purchase_orders o LEFT JOIN inventory_items i ON i.id = o.item_id";
const SO_SELECT: &str = "o.*, i.name AS item_name";
const SO_FROM: &str = "sale_orders o LEFT JOIN inventory_items i ON i.id = o.item_id";

/// Common required fields of both order kinds
struct OrderLine<'a> {
    number: &'a str,
    party: &'a str,
    item_id: i64,
    quantity: i64,
    price: f64,
    warehouse_id: i64,
}

fn order_line<'a>(
    number: &'a Option<String>,
    party: &'a Option<String>,
    item_id: Option<i64>,
    quantity: Option<i64>,
    price: Option<f64>,
    warehouse_id: Option<i64>,
) -> Result<OrderLine<'a>, ApiError> {
    match (
        non_empty(number),
        non_empty(party),
        item_id,
        quantity.filter(|q| *q > 0),
        price.filter(|p| p.is_finite() && *p >= 0.0),
        warehouse_id,
    ) {
        (Some(number), Some(party), Some(item_id), Some(quantity), Some(price), Some(warehouse_id)) => {
            Ok(OrderLine {
                number,
                party,
                item_id,
                quantity,
                price,
                warehouse_id,
            })
        }
        _ => Err(ApiError::bad_request("Missing required fields")),
    }
}

// -------------------------------------------------------------------------
// Purchase orders
// -------------------------------------------------------------------------

pub async fn list_purchase_orders(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiQuery(query): ApiQuery<OrderQuery>,
) -> Result<Json<Page<PurchaseOrder>>, ApiError> {
    user.require(READ_ROLES)?;

    let window = PageWindow::new(query.page, query.per_page, DEFAULT_PER_PAGE);
    let mut filters = Filters::new();
    filters.eq("o.status", query.status);

    let page = fetch_page(&state.db, "orders", PO_SELECT, PO_FROM, &filters, "o.id DESC", window).await?;
    Ok(Json(page))
}

pub async fn create_purchase_order(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<CreatePurchaseOrderRequest>,
) -> Result<(StatusCode, Json<PurchaseOrder>), ApiError> {
    user.require(WRITE_ROLES)?;

    let line = order_line(
        &request.po_number,
        &request.supplier_name,
        request.item_id,
        request.quantity,
        request.unit_cost,
        request.warehouse_id,
    )?;
    find_item(&state, line.item_id).await?;

    let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM purchase_orders WHERE po_number = ?")
        .bind(line.number)
        .fetch_optional(&state.db)
        .await?;
    if exists.is_some() {
        return Err(ApiError::conflict("PO number already exists"));
    }

    let unit_cost = round2(line.price);
    let id: i64 = sqlx::query_scalar(
        r#"INSERT INTO purchase_orders
               (po_number, supplier_name, item_id, quantity, unit_cost, total_cost,
                warehouse_id, expected_delivery, notes, created_by)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
           RETURNING id"#,
    )
    .bind(line.number)
    .bind(line.party)
    .bind(line.item_id)
    .bind(line.quantity)
    .bind(unit_cost)
    .bind(round2(line.quantity as f64 * unit_cost))
    .bind(line.warehouse_id)
    .bind(&request.expected_delivery)
    .bind(&request.notes)
    .bind(user.id)
    .fetch_one(&state.db)
    .await?;

    let order: PurchaseOrder = sqlx::query_as(&format!("SELECT {} FROM {} WHERE o.id = ?", PO_SELECT, PO_FROM))
        .bind(id)
        .fetch_one(&state.db)
        .await?;

    tracing::info!(order_id = id, po_number = %order.po_number, "Created purchase order");
    Ok((StatusCode::CREATED, Json(order)))
}

/// Mark a pending purchase order received and add its quantity to stock
pub async fn receive_purchase_order(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    user.require(WRITE_ROLES)?;

    let mut tx = state.db.begin().await?;

    // Write first: the transaction takes the write lock before reading anything
    let now = now_rfc3339();
    let claimed: Option<(i64, i64)> = sqlx::query_as(
        r#"UPDATE purchase_orders SET status = ?, received_date = ?
           WHERE id = ? AND status = ?
           RETURNING item_id, quantity"#,
    )
    .bind(ORDER_RECEIVED)
    .bind(&now)
    .bind(id)
    .bind(ORDER_PENDING)
    .fetch_optional(&mut *tx)
    .await?;
    let Some((item_id, quantity)) = claimed else {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM purchase_orders WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        return Err(match status {
            Some(status) => ApiError::conflict(format!("Purchase order is already {}", status)),
            None => ApiError::not_found("Purchase order not found"),
        });
    };

    sqlx::query("UPDATE inventory_items SET current_stock = current_stock + ?, updated_at = ? WHERE id = ?")
        .bind(quantity)
        .bind(&now)
        .bind(item_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(order_id = id, item_id, quantity, "Received purchase order");
    Ok(Json(json!({"message": "Purchase order received"})))
}

// -------------------------------------------------------------------------
// Sale orders
// -------------------------------------------------------------------------

pub async fn list_sale_orders(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiQuery(query): ApiQuery<OrderQuery>,
) -> Result<Json<Page<SaleOrder>>, ApiError> {
    user.require(READ_ROLES)?;

    let window = PageWindow::new(query.page, query.per_page, DEFAULT_PER_PAGE);
    let mut filters = Filters::new();
    filters.eq("o.status", query.status);

    let page = fetch_page(&state.db, "orders", SO_SELECT, SO_FROM, &filters, "o.id DESC", window).await?;
    Ok(Json(page))
}

pub async fn create_sale_order(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<CreateSaleOrderRequest>,
) -> Result<(StatusCode, Json<SaleOrder>), ApiError> {
    user.require(WRITE_ROLES)?;

    let line = order_line(
        &request.so_number,
        &request.customer_name,
        request.item_id,
        request.quantity,
        request.unit_price,
        request.warehouse_id,
    )?;
    find_item(&state, line.item_id).await?;

    let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM sale_orders WHERE so_number = ?")
        .bind(line.number)
        .fetch_optional(&state.db)
        .await?;
    if exists.is_some() {
        return Err(ApiError::conflict("Sale order number already exists"));
    }

    let unit_price = round2(line.price);
    let id: i64 = sqlx::query_scalar(
        r#"INSERT INTO sale_orders
               (so_number, customer_name, item_id, quantity, unit_price, total_price,
                warehouse_id, notes, created_by)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
           RETURNING id"#,
    )
    .bind(line.number)
    .bind(line.party)
    .bind(line.item_id)
    .bind(line.quantity)
    .bind(unit_price)
    .bind(round2(line.quantity as f64 * unit_price))
    .bind(line.warehouse_id)
    .bind(&request.notes)
    .bind(user.id)
    .fetch_one(&state.db)
    .await?;

    let order: SaleOrder = sqlx::query_as(&format!("SELECT {} FROM {} WHERE o.id = ?", SO_SELECT, SO_FROM))
        .bind(id)
        .fetch_one(&state.db)
        .await?;

    tracing::info!(order_id = id, so_number = %order.so_number, "Created sale order");
    Ok((StatusCode::CREATED, Json(order)))
}

/// Ship a pending sale order.
///
/// The status change is conditional on `status = 'pending'` and the stock
/// decrement on `current_stock >= quantity`, both inside one transaction, so
/// an order is fulfilled at most once and stock never goes negative. The
/// order row is claimed before anything is read, so the transaction holds
/// the write lock from its first statement.
pub async fn fulfill_sale_order(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    user.require(WRITE_ROLES)?;

    let mut tx = state.db.begin().await?;

    let now = now_rfc3339();
    let claimed: Option<(i64, i64)> = sqlx::query_as(
        r#"UPDATE sale_orders SET status = ?, fulfillment_date = ?
           WHERE id = ? AND status = ?
           RETURNING item_id, quantity"#,
    )
    .bind(ORDER_FULFILLED)
    .bind(&now)
    .bind(id)
    .bind(ORDER_PENDING)
    .fetch_optional(&mut *tx)
    .await?;
    let Some((item_id, quantity)) = claimed else {
        let status: Option<String> = sqlx::query_scalar("SELECT status FROM sale_orders WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        return Err(match status {
            Some(status) => ApiError::conflict(format!("Sale order is already {}", status)),
            None => ApiError::not_found("Sale order not found"),
        });
    };

    let decremented = sqlx::query(
        r#"UPDATE inventory_items SET current_stock = current_stock - ?, updated_at = ?
           WHERE id = ? AND current_stock >= ?"#,
    )
    .bind(quantity)
    .bind(&now)
    .bind(item_id)
    .bind(quantity)
    .execute(&mut *tx)
    .await?;
    if decremented.rows_affected() == 0 {
        // Dropping the transaction rolls the status change back
        return Err(ApiError::bad_request("Insufficient stock"));
    }

    tx.commit().await?;
    tracing::info!(order_id = id, item_id, quantity, "Fulfilled sale order");

    if let Err(e) = stock::check_item_stock(&state.db, item_id).await {
        tracing::warn!(item_id, error = %e, "Low-stock check after fulfillment failed");
    }

    Ok(Json(json!({"message": "Sale order fulfilled"})))
}
