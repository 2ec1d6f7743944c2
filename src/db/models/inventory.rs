//! Inventory models: warehouses, stock items, batches, orders and alerts.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Status values shared by purchase and sale orders
pub const ORDER_PENDING: &str = "pending";
pub const ORDER_RECEIVED: &str = "received";
pub const ORDER_FULFILLED: &str = "fulfilled";

pub const BATCH_EXPIRED: &str = "expired";

/// Alert kinds raised by the stock check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    LowStock,
    Expired,
    Overstock,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::LowStock => "low_stock",
            AlertType::Expired => "expired",
            AlertType::Overstock => "overstock",
        }
    }
}

impl std::str::FromStr for AlertType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low_stock" => Ok(AlertType::LowStock),
            "expired" => Ok(AlertType::Expired),
            "overstock" => Ok(AlertType::Overstock),
            _ => Err(format!("Unknown alert type: {}", s)),
        }
    }
}

// -------------------------------------------------------------------------
// Warehouses
// -------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Warehouse {
    pub id: i64,
    pub name: String,
    pub location: String,
    pub capacity: i64,
    pub manager_id: Option<i64>,
    pub is_active: bool,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateWarehouseRequest {
    pub name: Option<String>,
    pub location: Option<String>,
    pub capacity: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateWarehouseRequest {
    pub name: Option<String>,
    pub location: Option<String>,
    pub capacity: Option<i64>,
    pub is_active: Option<bool>,
}

// -------------------------------------------------------------------------
// Items
// -------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct InventoryItem {
    pub id: i64,
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub unit_price: f64,
    pub reorder_level: i64,
    pub reorder_quantity: i64,
    pub warehouse_id: Option<i64>,
    pub current_stock: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Item with its batch count, returned by the detail endpoint
#[derive(Debug, Serialize)]
pub struct InventoryItemDetail {
    #[serde(flatten)]
    pub item: InventoryItem,
    pub batches: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct InventoryItemQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub category: Option<String>,
    pub warehouse_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateInventoryItemRequest {
    pub sku: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub unit_price: Option<f64>,
    pub reorder_level: Option<i64>,
    pub reorder_quantity: Option<i64>,
    pub warehouse_id: Option<i64>,
}

/// Partial update; the SKU is immutable once created
#[derive(Debug, Deserialize)]
pub struct UpdateInventoryItemRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub unit_price: Option<f64>,
    pub reorder_level: Option<i64>,
    pub reorder_quantity: Option<i64>,
    pub warehouse_id: Option<i64>,
}

// -------------------------------------------------------------------------
// Batches
// -------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StockBatch {
    pub id: i64,
    pub batch_number: String,
    pub item_id: i64,
    pub item_name: Option<String>,
    pub warehouse_id: i64,
    pub quantity: i64,
    pub unit_cost: f64,
    pub manufacture_date: Option<String>,
    pub expiry_date: Option<String>,
    pub location_rack: Option<String>,
    pub status: String,
    pub received_date: String,
    pub created_at: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct StockBatchQuery {
    pub item_id: Option<i64>,
    pub warehouse_id: Option<i64>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateStockBatchRequest {
    pub batch_number: Option<String>,
    pub item_id: Option<i64>,
    pub warehouse_id: Option<i64>,
    pub quantity: Option<i64>,
    pub unit_cost: Option<f64>,
    pub manufacture_date: Option<String>,
    pub expiry_date: Option<String>,
    pub location_rack: Option<String>,
}

// -------------------------------------------------------------------------
// Purchase and sale orders
// -------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PurchaseOrder {
    pub id: i64,
    pub po_number: String,
    pub supplier_name: String,
    pub item_id: i64,
    pub item_name: Option<String>,
    pub quantity: i64,
    pub unit_cost: f64,
    pub total_cost: f64,
    pub status: String,
    pub warehouse_id: Option<i64>,
    pub order_date: String,
    pub expected_delivery: Option<String>,
    pub received_date: Option<String>,
    pub notes: Option<String>,
    pub created_by: Option<i64>,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreatePurchaseOrderRequest {
    pub po_number: Option<String>,
    pub supplier_name: Option<String>,
    pub item_id: Option<i64>,
    pub quantity: Option<i64>,
    pub unit_cost: Option<f64>,
    pub warehouse_id: Option<i64>,
    pub expected_delivery: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SaleOrder {
    pub id: i64,
    pub so_number: String,
    pub customer_name: String,
    pub item_id: i64,
    pub item_name: Option<String>,
    pub quantity: i64,
    pub unit_price: f64,
    pub total_price: f64,
    pub status: String,
    pub warehouse_id: Option<i64>,
    pub order_date: String,
    pub fulfillment_date: Option<String>,
    pub notes: Option<String>,
    pub created_by: Option<i64>,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateSaleOrderRequest {
    pub so_number: Option<String>,
    pub customer_name: Option<String>,
    pub item_id: Option<i64>,
    pub quantity: Option<i64>,
    pub unit_price: Option<f64>,
    pub warehouse_id: Option<i64>,
    pub notes: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OrderQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub status: Option<String>,
}

// -------------------------------------------------------------------------
// Alerts
// -------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StockAlert {
    pub id: i64,
    pub item_id: i64,
    pub item_name: Option<String>,
    pub alert_type: String,
    pub message: Option<String>,
    pub current_stock: Option<i64>,
    pub threshold: Option<i64>,
    pub is_resolved: bool,
    pub created_at: String,
    pub resolved_at: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct StockAlertQuery {
    /// `true` lists resolved alerts; anything else lists open ones
    pub resolved: Option<String>,
    pub alert_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateStockAlertRequest {
    pub item_id: Option<i64>,
    pub alert_type: Option<String>,
    pub message: Option<String>,
    pub current_stock: Option<i64>,
    pub threshold: Option<i64>,
}

// -------------------------------------------------------------------------
// Analytics
// -------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct InventorySummary {
    pub total_items: i64,
    pub total_warehouses: i64,
    pub total_stock_value: f64,
    pub low_stock_items: i64,
    pub pending_purchase_orders: i64,
    pub pending_sale_orders: i64,
    pub active_alerts: i64,
}

#[derive(Debug, Serialize, FromRow)]
pub struct CategoryStockValue {
    pub category: String,
    pub total_value: f64,
    pub total_quantity: i64,
}

#[derive(Debug, Serialize)]
pub struct WarehouseCapacity {
    pub warehouse_id: i64,
    pub warehouse_name: String,
    pub capacity: i64,
    pub current_usage: i64,
    pub utilization_percent: f64,
}

#[derive(Debug, Serialize)]
pub struct PurchaseMovement {
    pub count: i64,
    pub total_cost: f64,
}

#[derive(Debug, Serialize)]
pub struct SaleMovement {
    pub count: i64,
    pub total_revenue: f64,
}

#[derive(Debug, Serialize)]
pub struct InventoryMovement {
    pub purchase_orders: PurchaseMovement,
    pub sale_orders: SaleMovement,
}
