//! Warehouses, stock items, batches, purchase/sale orders and stock alerts.

mod alerts;
mod analytics;
mod batches;
mod items;
mod orders;
pub mod stock;
mod warehouses;

use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;

use super::Module;
use crate::AppState;

pub struct Inventory;

impl Module for Inventory {
    fn name(&self) -> &'static str {
        "nexora-inventory"
    }

    fn description(&self) -> &'static str {
        "Warehouses, stock batches, purchase and sale orders with low-stock alerts"
    }

    fn icon(&self) -> &'static str {
        "📦"
    }

    fn endpoints(&self) -> &'static [&'static str] {
        &[
            "/api/warehouses",
            "/api/items",
            "/api/batches",
            "/api/purchase-orders",
            "/api/sale-orders",
            "/api/alerts",
            "/api/analytics/summary",
        ]
    }

    // `/api/items` here are stock items, not generic records
    fn generic_items(&self) -> bool {
        false
    }

    fn routes(&self) -> Router<Arc<AppState>> {
        Router::new()
            .route(
                "/api/warehouses",
                get(warehouses::list_warehouses).post(warehouses::create_warehouse),
            )
            .route(
                "/api/warehouses/:id",
                get(warehouses::get_warehouse).put(warehouses::update_warehouse),
            )
            .route("/api/items", get(items::list_items).post(items::create_item))
            .route("/api/items/:id", get(items::get_item).put(items::update_item))
            .route("/api/batches", get(batches::list_batches).post(batches::create_batch))
            .route(
                "/api/purchase-orders",
                get(orders::list_purchase_orders).post(orders::create_purchase_order),
            )
            .route("/api/purchase-orders/:id/receive", put(orders::receive_purchase_order))
            .route(
                "/api/sale-orders",
                get(orders::list_sale_orders).post(orders::create_sale_order),
            )
            .route("/api/sale-orders/:id/fulfill", put(orders::fulfill_sale_order))
            .route("/api/alerts", get(alerts::list_alerts).post(alerts::create_alert))
            .route("/api/alerts/check", post(alerts::run_check))
            .route("/api/alerts/:id/resolve", put(alerts::resolve_alert))
            .route("/api/analytics/summary", get(analytics::summary))
            .route("/api/analytics/stock-value", get(analytics::stock_value))
            .route("/api/analytics/warehouse-capacity", get(analytics::warehouse_capacity))
            .route("/api/analytics/movement", get(analytics::movement))
    }
}
