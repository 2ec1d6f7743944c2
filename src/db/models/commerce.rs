//! Commerce models: catalogue, storefront pages and checkout orders.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::common::lenient;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProductCategory {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProductCategoryRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Product {
    pub id: i64,
    pub sku: String,
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    pub quantity: i64,
    pub category_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ProductRequest {
    pub sku: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient::amount")]
    pub price: Option<f64>,
    pub quantity: Option<i64>,
    pub category_id: Option<i64>,
}

/// `category` matches a category id or, failing that, a name fragment
#[derive(Debug, Default, Deserialize)]
pub struct ProductQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Storefront {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub html: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct StorefrontRequest {
    pub name: Option<String>,
    pub slug: Option<String>,
    pub html: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CommerceOrder {
    pub id: i64,
    pub order_number: String,
    pub customer_name: String,
    pub customer_email: String,
    pub total_amount: f64,
    pub status: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CommerceOrderLine {
    pub id: i64,
    pub order_id: i64,
    pub product_id: i64,
    pub quantity: i64,
    pub unit_price: f64,
}

/// Order with its lines embedded
#[derive(Debug, Serialize)]
pub struct CommerceOrderResponse {
    #[serde(flatten)]
    pub order: CommerceOrder,
    pub items: Vec<CommerceOrderLine>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CommerceOrderQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutLine {
    pub product_id: i64,
    /// Defaults to one unit
    pub quantity: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub items: Option<Vec<CheckoutLine>>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub order_id: i64,
    pub order_number: String,
    pub total: f64,
}
