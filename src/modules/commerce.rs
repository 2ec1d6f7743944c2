//! Online store: product catalogue, storefront pages and checkout.

use axum::{
    extract::State,
    http::StatusCode,
    response::Html,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;

use super::Module;
use crate::api::auth::{AuthUser, DELETE_ROLES, READ_ROLES, WRITE_ROLES};
use crate::api::error::{ApiError, ApiJson, ApiPath, ApiQuery, ValidationErrorBuilder};
use crate::api::validation::{non_empty, validate_email};
use crate::db::{
    fetch_page, CheckoutRequest, CheckoutResponse, CommerceOrder, CommerceOrderLine,
    CommerceOrderQuery, CommerceOrderResponse, DbPool, Filters, Page, PageWindow, Product,
    ProductCategory, ProductCategoryRequest, ProductQuery, ProductRequest, Storefront,
    StorefrontRequest,
};
use crate::utils::round2;
use crate::AppState;

const DEFAULT_PER_PAGE: i64 = 20;

pub struct Commerce;

impl Module for Commerce {
    fn name(&self) -> &'static str {
        "nexora-commerce"
    }

    fn description(&self) -> &'static str {
        "Product catalogue, storefront pages and checkout"
    }

    fn icon(&self) -> &'static str {
        "🛒"
    }

    fn endpoints(&self) -> &'static [&'static str] {
        &[
            "/api/items",
            "/api/categories",
            "/api/products",
            "/api/checkout",
            "/api/orders",
            "/api/storefronts",
            "/store/<slug>",
        ]
    }

    fn routes(&self) -> Router<Arc<AppState>> {
        Router::new()
            .route("/api/categories", get(list_categories).post(create_category))
            .route("/api/products", get(list_products).post(create_product))
            .route(
                "/api/products/:id",
                get(get_product).put(update_product).delete(delete_product),
            )
            .route("/api/checkout", post(checkout))
            .route("/api/orders", get(list_orders))
            .route("/api/orders/:id", get(get_order))
            .route("/api/storefronts", get(list_storefronts).post(create_storefront))
            .route("/store/:slug", get(render_storefront))
    }
}

/// `ORD-<unix seconds>-<random suffix>`; the suffix keeps same-second
/// checkouts apart
fn new_order_number() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("ORD-{}-{}", Utc::now().timestamp(), &suffix[..6])
}

// -------------------------------------------------------------------------
// Catalogue
// -------------------------------------------------------------------------

async fn list_categories(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<ProductCategory>>, ApiError> {
    user.require(READ_ROLES)?;
    let categories = sqlx::query_as("SELECT * FROM commerce_categories ORDER BY name")
        .fetch_all(&state.db)
        .await?;
    Ok(Json(categories))
}

async fn create_category(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<ProductCategoryRequest>,
) -> Result<(StatusCode, Json<ProductCategory>), ApiError> {
    user.require(WRITE_ROLES)?;
    let name = non_empty(&request.name).ok_or_else(|| ApiError::bad_request("name required"))?;

    let category: ProductCategory = sqlx::query_as(
        "INSERT INTO commerce_categories (name, description) VALUES (?, ?) RETURNING *",
    )
    .bind(name)
    .bind(&request.description)
    .fetch_one(&state.db)
    .await?;
    Ok((StatusCode::CREATED, Json(category)))
}

async fn find_product(db: &DbPool, id: i64) -> Result<Product, ApiError> {
    sqlx::query_as("SELECT * FROM commerce_products WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("product not found"))
}

async fn list_products(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiQuery(query): ApiQuery<ProductQuery>,
) -> Result<Json<Page<Product>>, ApiError> {
    user.require(READ_ROLES)?;
    let window = PageWindow::new(query.page, query.per_page, DEFAULT_PER_PAGE);

    let mut filters = Filters::new();
    if let Some(category) = non_empty(&query.category) {
        match category.parse::<i64>() {
            Ok(id) => filters.push("category_id = ?", id),
            Err(_) => filters.push(
                "category_id IN (SELECT id FROM commerce_categories WHERE name LIKE ?)",
                format!("%{}%", category),
            ),
        };
    }

    let page = fetch_page(
        &state.db,
        "items",
        "*",
        "commerce_products",
        &filters,
        "name ASC, id ASC",
        window,
    )
    .await?;
    Ok(Json(page))
}

async fn get_product(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Product>, ApiError> {
    user.require(READ_ROLES)?;
    Ok(Json(find_product(&state.db, id).await?))
}

fn check_product_numbers(price: Option<f64>, quantity: Option<i64>) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if matches!(price, Some(p) if p < 0.0) {
        errors.add("price", "price cannot be negative");
    }
    if matches!(quantity, Some(q) if q < 0) {
        errors.add("quantity", "quantity cannot be negative");
    }
    errors.finish()
}

async fn create_product(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<ProductRequest>,
) -> Result<(StatusCode, Json<Product>), ApiError> {
    user.require(WRITE_ROLES)?;
    let (Some(sku), Some(name)) = (non_empty(&request.sku), non_empty(&request.name)) else {
        return Err(ApiError::bad_request("sku and name required"));
    };
    check_product_numbers(request.price, request.quantity)?;

    let product: Product = sqlx::query_as(
        r#"INSERT INTO commerce_products (sku, name, description, price, quantity, category_id)
           VALUES (?, ?, ?, ?, ?, ?)
           RETURNING *"#,
    )
    .bind(sku)
    .bind(name)
    .bind(&request.description)
    .bind(request.price.unwrap_or(0.0))
    .bind(request.quantity.unwrap_or(0))
    .bind(request.category_id)
    .fetch_one(&state.db)
    .await?;

    tracing::info!(product_id = product.id, sku = %product.sku, "Created product");
    Ok((StatusCode::CREATED, Json(product)))
}

async fn update_product(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<ProductRequest>,
) -> Result<Json<Product>, ApiError> {
    user.require(WRITE_ROLES)?;
    let existing = find_product(&state.db, id).await?;
    check_product_numbers(request.price, request.quantity)?;

    let product: Product = sqlx::query_as(
        r#"UPDATE commerce_products
           SET sku = ?, name = ?, description = ?, price = ?, quantity = ?, category_id = ?
           WHERE id = ?
           RETURNING *"#,
    )
    .bind(non_empty(&request.sku).unwrap_or(&existing.sku))
    .bind(non_empty(&request.name).unwrap_or(&existing.name))
    .bind(request.description.as_ref().or(existing.description.as_ref()))
    .bind(request.price.unwrap_or(existing.price))
    .bind(request.quantity.unwrap_or(existing.quantity))
    .bind(request.category_id.or(existing.category_id))
    .bind(id)
    .fetch_one(&state.db)
    .await?;
    Ok(Json(product))
}

async fn delete_product(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    user.require(DELETE_ROLES)?;
    // Products already sold stay for their order lines (FK violation -> 400)
    let result = sqlx::query("DELETE FROM commerce_products WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("product not found"));
    }
    Ok(Json(json!({"message": "product deleted"})))
}

// -------------------------------------------------------------------------
// Checkout and orders
// -------------------------------------------------------------------------

/// Turn a cart into an order, taking the stock in the same transaction.
///
/// The order row is inserted first and every line claims its stock with a
/// conditional decrement, so the transaction writes before it reads and a
/// short line rolls the whole cart back.
async fn checkout(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<CheckoutRequest>,
) -> Result<(StatusCode, Json<CheckoutResponse>), ApiError> {
    user.require(READ_ROLES)?;
    let (Some(customer_name), Some(customer_email), Some(lines)) = (
        non_empty(&request.customer_name),
        non_empty(&request.customer_email),
        request.items.as_ref().filter(|lines| !lines.is_empty()),
    ) else {
        return Err(ApiError::bad_request(
            "customer_name, customer_email and items are required",
        ));
    };
    if let Err(message) = validate_email(customer_email) {
        return Err(ApiError::validation_field("customer_email", message));
    }
    if lines.iter().any(|line| line.quantity.unwrap_or(1) <= 0) {
        return Err(ApiError::validation_field("items", "quantity must be positive"));
    }

    let order_number = new_order_number();
    let mut tx = state.db.begin().await?;

    let order_id: i64 = sqlx::query_scalar(
        r#"INSERT INTO commerce_orders (order_number, customer_name, customer_email)
           VALUES (?, ?, ?)
           RETURNING id"#,
    )
    .bind(&order_number)
    .bind(customer_name)
    .bind(customer_email)
    .fetch_one(&mut *tx)
    .await?;

    let mut total = 0.0;
    for line in lines {
        let quantity = line.quantity.unwrap_or(1);
        let taken: Option<f64> = sqlx::query_scalar(
            r#"UPDATE commerce_products SET quantity = quantity - ?
               WHERE id = ? AND quantity >= ?
               RETURNING price"#,
        )
        .bind(quantity)
        .bind(line.product_id)
        .bind(quantity)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(price) = taken else {
            let name: Option<String> =
                sqlx::query_scalar("SELECT name FROM commerce_products WHERE id = ?")
                    .bind(line.product_id)
                    .fetch_optional(&mut *tx)
                    .await?;
            return Err(match name {
                Some(name) => {
                    ApiError::bad_request(format!("not enough stock for product {}", name))
                }
                None => ApiError::bad_request(format!("product {} not found", line.product_id)),
            });
        };

        sqlx::query(
            "INSERT INTO commerce_order_items (order_id, product_id, quantity, unit_price) VALUES (?, ?, ?, ?)",
        )
        .bind(order_id)
        .bind(line.product_id)
        .bind(quantity)
        .bind(price)
        .execute(&mut *tx)
        .await?;
        total += price * quantity as f64;
    }

    let total = round2(total);
    sqlx::query("UPDATE commerce_orders SET total_amount = ? WHERE id = ?")
        .bind(total)
        .bind(order_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    tracing::info!(order_id, order_number = %order_number, total, "Checked out order");
    Ok((
        StatusCode::CREATED,
        Json(CheckoutResponse {
            order_id,
            order_number,
            total,
        }),
    ))
}

async fn list_orders(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiQuery(query): ApiQuery<CommerceOrderQuery>,
) -> Result<Json<Page<CommerceOrder>>, ApiError> {
    user.require(WRITE_ROLES)?;
    let window = PageWindow::new(query.page, query.per_page, DEFAULT_PER_PAGE);
    let mut filters = Filters::new();
    filters.eq("status", query.status);

    let page = fetch_page(
        &state.db,
        "orders",
        "*",
        "commerce_orders",
        &filters,
        "created_at DESC, id DESC",
        window,
    )
    .await?;
    Ok(Json(page))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<CommerceOrderResponse>, ApiError> {
    user.require(WRITE_ROLES)?;
    let order: CommerceOrder = sqlx::query_as("SELECT * FROM commerce_orders WHERE id = ?")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("order not found"))?;
    let items: Vec<CommerceOrderLine> =
        sqlx::query_as("SELECT * FROM commerce_order_items WHERE order_id = ? ORDER BY id")
            .bind(id)
            .fetch_all(&state.db)
            .await?;
    Ok(Json(CommerceOrderResponse { order, items }))
}

// -------------------------------------------------------------------------
// Storefronts
// -------------------------------------------------------------------------

async fn list_storefronts(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<Storefront>>, ApiError> {
    user.require(READ_ROLES)?;
    let storefronts = sqlx::query_as("SELECT * FROM commerce_storefronts ORDER BY name")
        .fetch_all(&state.db)
        .await?;
    Ok(Json(storefronts))
}

async fn create_storefront(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<StorefrontRequest>,
) -> Result<(StatusCode, Json<Storefront>), ApiError> {
    user.require(WRITE_ROLES)?;
    let (Some(name), Some(slug)) = (non_empty(&request.name), non_empty(&request.slug)) else {
        return Err(ApiError::bad_request("name and slug required"));
    };

    let storefront: Storefront = sqlx::query_as(
        "INSERT INTO commerce_storefronts (name, slug, html) VALUES (?, ?, ?) RETURNING *",
    )
    .bind(name)
    .bind(slug)
    .bind(&request.html)
    .fetch_one(&state.db)
    .await?;
    Ok((StatusCode::CREATED, Json(storefront)))
}

/// Public page; an empty template renders the store name as a heading
async fn render_storefront(
    State(state): State<Arc<AppState>>,
    ApiPath(slug): ApiPath<String>,
) -> Result<Html<String>, ApiError> {
    let storefront: Storefront = sqlx::query_as("SELECT * FROM commerce_storefronts WHERE slug = ?")
        .bind(&slug)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("storefront not found"))?;

    Ok(Html(match storefront.html.filter(|html| !html.trim().is_empty()) {
        Some(html) => html,
        None => format!("<h1>{}</h1>", storefront.name),
    }))
}
