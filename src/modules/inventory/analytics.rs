//! Inventory reports. All of them are a premium feature once the free
//! period ends.

use axum::{extract::State, Json};
use std::sync::Arc;

use crate::api::auth::{AuthUser, READ_ROLES};
use crate::api::error::ApiError;
use crate::api::pricing::require_feature;
use crate::db::{
    CategoryStockValue, InventoryMovement, InventorySummary, PurchaseMovement, SaleMovement,
    WarehouseCapacity, ORDER_FULFILLED, ORDER_PENDING, ORDER_RECEIVED,
};
use crate::utils::round2;
use crate::AppState;

const FEATURE: &str = "advanced_reports";

fn authorize(state: &AppState, user: &AuthUser) -> Result<(), ApiError> {
    user.require(READ_ROLES)?;
    require_feature(state, user, FEATURE)
}

async fn count(state: &AppState, sql: &str, bind: Option<&str>) -> Result<i64, sqlx::Error> {
    let mut query = sqlx::query_scalar::<_, i64>(sql);
    if let Some(value) = bind {
        query = query.bind(value);
    }
    query.fetch_one(&state.db).await
}

pub async fn summary(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<InventorySummary>, ApiError> {
    authorize(&state, &user)?;

    let total_stock_value: f64 = sqlx::query_scalar(
        "SELECT CAST(COALESCE(SUM(current_stock * unit_price), 0) AS REAL) FROM inventory_items",
    )
    .fetch_one(&state.db)
    .await?;

    Ok(Json(InventorySummary {
        total_items: count(&state, "SELECT COUNT(*) FROM inventory_items", None).await?,
        total_warehouses: count(&state, "SELECT COUNT(*) FROM warehouses", None).await?,
        total_stock_value: round2(total_stock_value),
        low_stock_items: count(
            &state,
            "SELECT COUNT(*) FROM inventory_items WHERE current_stock <= reorder_level",
            None,
        )
        .await?,
        pending_purchase_orders: count(
            &state,
            "SELECT COUNT(*) FROM purchase_orders WHERE status = ?",
            Some(ORDER_PENDING),
        )
        .await?,
        pending_sale_orders: count(
            &state,
            "SELECT COUNT(*) FROM sale_orders WHERE status = ?",
            Some(ORDER_PENDING),
        )
        .await?,
        active_alerts: count(&state, "SELECT COUNT(*) FROM stock_alerts WHERE is_resolved = 0", None).await?,
    }))
}

pub async fn stock_value(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<CategoryStockValue>>, ApiError> {
    authorize(&state, &user)?;

    let rows: Vec<CategoryStockValue> = sqlx::query_as(
        r#"SELECT COALESCE(category, 'Uncategorized') AS category,
                  CAST(COALESCE(SUM(current_stock * unit_price), 0) AS REAL) AS total_value,
                  COALESCE(SUM(current_stock), 0) AS total_quantity
           FROM inventory_items
           GROUP BY COALESCE(category, 'Uncategorized')
           ORDER BY category"#,
    )
    .fetch_all(&state.db)
    .await?;

    Ok(Json(
        rows.into_iter()
            .map(|row| CategoryStockValue {
                total_value: round2(row.total_value),
                ..row
            })
            .collect(),
    ))
}

pub async fn warehouse_capacity(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<WarehouseCapacity>>, ApiError> {
    authorize(&state, &user)?;

    let rows: Vec<(i64, String, i64, i64)> = sqlx::query_as(
        r#"SELECT w.id, w.name, w.capacity, COALESCE(SUM(i.current_stock), 0)
           FROM warehouses w
           LEFT JOIN inventory_items i ON i.warehouse_id = w.id
           GROUP BY w.id
           ORDER BY w.id"#,
    )
    .fetch_all(&state.db)
    .await?;

    Ok(Json(
        rows.into_iter()
            .map(|(warehouse_id, warehouse_name, capacity, current_usage)| WarehouseCapacity {
                warehouse_id,
                warehouse_name,
                capacity,
                current_usage,
                utilization_percent: utilization(current_usage, capacity),
            })
            .collect(),
    ))
}

fn utilization(usage: i64, capacity: i64) -> f64 {
    if capacity > 0 {
        round2(usage as f64 / capacity as f64 * 100.0)
    } else {
        0.0
    }
}

pub async fn movement(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<InventoryMovement>, ApiError> {
    authorize(&state, &user)?;

    let (po_count, po_cost): (i64, f64) = sqlx::query_as(
        "SELECT COUNT(*), CAST(COALESCE(SUM(total_cost), 0) AS REAL) FROM purchase_orders WHERE status = ?",
    )
    .bind(ORDER_RECEIVED)
    .fetch_one(&state.db)
    .await?;

    let (so_count, so_revenue): (i64, f64) = sqlx::query_as(
        "SELECT COUNT(*), CAST(COALESCE(SUM(total_price), 0) AS REAL) FROM sale_orders WHERE status = ?",
    )
    .bind(ORDER_FULFILLED)
    .fetch_one(&state.db)
    .await?;

    Ok(Json(InventoryMovement {
        purchase_orders: PurchaseMovement {
            count: po_count,
            total_cost: round2(po_cost),
        },
        sale_orders: SaleMovement {
            count: so_count,
            total_revenue: round2(so_revenue),
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{item, warehouse, BASE};
    use super::*;
    use crate::db::Role;
    use crate::testing::{send, TestApp};
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    #[test]
    fn test_utilization() {
        assert_eq!(utilization(250, 1000), 25.0);
        assert_eq!(utilization(1, 3), 33.33);
        assert_eq!(utilization(10, 0), 0.0);
    }

    #[tokio::test]
    async fn test_reports() {
        let app = TestApp::new().await;
        let (_, token) = app.user("mgr", Role::Manager).await;
        let wh = warehouse(&app, &token, "Main").await;
        let a = item(&app, &token, "A", wh, 10).await;
        item(&app, &token, "B", wh, 10).await;
        sqlx::query("UPDATE inventory_items SET current_stock = 100 WHERE id = ?")
            .bind(a)
            .execute(&app.state.db)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO inventory_items (sku, name, unit_price, current_stock) VALUES ('C', 'Loose', 1.0, 4)",
        )
        .execute(&app.state.db)
        .await
        .unwrap();

        let res = send(&app.router, Method::GET, &format!("{}/api/analytics/summary", BASE), Some(&token), None).await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.body["total_items"], 3);
        assert_eq!(res.body["total_warehouses"], 1);
        assert_eq!(res.body["total_stock_value"], 254.0);
        assert_eq!(res.body["low_stock_items"], 2);
        assert_eq!(res.body["active_alerts"], 0);

        let res = send(
            &app.router,
            Method::GET,
            &format!("{}/api/analytics/stock-value", BASE),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(
            res.body,
            json!([
                {"category": "Uncategorized", "total_value": 4.0, "total_quantity": 4},
                {"category": "parts", "total_value": 250.0, "total_quantity": 100},
            ])
        );

        let res = send(
            &app.router,
            Method::GET,
            &format!("{}/api/analytics/warehouse-capacity", BASE),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(res.body[0]["current_usage"], 100);
        assert_eq!(res.body[0]["utilization_percent"], 20.0);

        let res = send(&app.router, Method::GET, &format!("{}/api/analytics/movement", BASE), Some(&token), None).await;
        assert_eq!(res.body["purchase_orders"]["count"], 0);
        assert_eq!(res.body["sale_orders"]["total_revenue"], 0.0);
    }
}
