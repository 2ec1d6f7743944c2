//! Customers, a priced item catalogue and invoices with line items.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;

use super::Module;
use crate::api::auth::{AuthUser, DELETE_ROLES, READ_ROLES, WRITE_ROLES};
use crate::api::error::{ApiError, ApiJson, ApiPath};
use crate::api::validation::non_empty;
use crate::db::{
    CatalogueItem, CatalogueItemRequest, CreateInvoiceRequest, Customer, CustomerRequest, DbPool,
    Invoice, InvoiceLine, InvoiceResponse,
};
use crate::utils::round2;
use crate::AppState;

pub struct Invoicing;

impl Module for Invoicing {
    fn name(&self) -> &'static str {
        "nexora-invoice"
    }

    fn description(&self) -> &'static str {
        "Customers, item catalogue and invoices with line totals"
    }

    fn icon(&self) -> &'static str {
        "🧾"
    }

    fn endpoints(&self) -> &'static [&'static str] {
        &[
            "/api/items",
            "/api/invoice/customers",
            "/api/invoice/items",
            "/api/invoice/invoices",
        ]
    }

    fn routes(&self) -> Router<Arc<AppState>> {
        Router::new()
            .route("/api/invoice/customers", get(list_customers).post(create_customer))
            .route(
                "/api/invoice/customers/:id",
                get(get_customer).put(update_customer).delete(delete_customer),
            )
            .route("/api/invoice/items", get(list_catalogue).post(create_catalogue_item))
            .route(
                "/api/invoice/items/:id",
                get(get_catalogue_item)
                    .put(update_catalogue_item)
                    .delete(delete_catalogue_item),
            )
            .route("/api/invoice/invoices", get(list_invoices).post(create_invoice))
            .route("/api/invoice/invoices/:id", get(get_invoice).delete(delete_invoice))
    }
}

// -------------------------------------------------------------------------
// Customers
// -------------------------------------------------------------------------

async fn find_customer(db: &DbPool, id: i64) -> Result<Customer, ApiError> {
    sqlx::query_as("SELECT * FROM invoice_customers WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Customer not found"))
}

async fn list_customers(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<Customer>>, ApiError> {
    user.require(READ_ROLES)?;
    let customers = sqlx::query_as("SELECT * FROM invoice_customers ORDER BY created_at DESC, id DESC")
        .fetch_all(&state.db)
        .await?;
    Ok(Json(customers))
}

async fn get_customer(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Customer>, ApiError> {
    user.require(READ_ROLES)?;
    Ok(Json(find_customer(&state.db, id).await?))
}

async fn create_customer(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<CustomerRequest>,
) -> Result<(StatusCode, Json<Customer>), ApiError> {
    user.require(WRITE_ROLES)?;
    let name = non_empty(&request.name).ok_or_else(|| ApiError::bad_request("name required"))?;

    let customer: Customer = sqlx::query_as(
        "INSERT INTO invoice_customers (name, email, phone, address) VALUES (?, ?, ?, ?) RETURNING *",
    )
    .bind(name)
    .bind(&request.email)
    .bind(&request.phone)
    .bind(&request.address)
    .fetch_one(&state.db)
    .await?;
    Ok((StatusCode::CREATED, Json(customer)))
}

async fn update_customer(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<CustomerRequest>,
) -> Result<Json<Customer>, ApiError> {
    user.require(WRITE_ROLES)?;
    let existing = find_customer(&state.db, id).await?;

    let customer: Customer = sqlx::query_as(
        "UPDATE invoice_customers SET name = ?, email = ?, phone = ?, address = ? WHERE id = ? RETURNING *",
    )
    .bind(non_empty(&request.name).unwrap_or(&existing.name))
    .bind(request.email.as_ref().or(existing.email.as_ref()))
    .bind(request.phone.as_ref().or(existing.phone.as_ref()))
    .bind(request.address.as_ref().or(existing.address.as_ref()))
    .bind(id)
    .fetch_one(&state.db)
    .await?;
    Ok(Json(customer))
}

async fn delete_customer(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    user.require(DELETE_ROLES)?;
    find_customer(&state.db, id).await?;

    let invoices: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM invoices WHERE customer_id = ?")
        .bind(id)
        .fetch_one(&state.db)
        .await?;
    if invoices > 0 {
        return Err(ApiError::conflict(format!(
            "Customer has {} invoice(s) and cannot be deleted",
            invoices
        )));
    }

    sqlx::query("DELETE FROM invoice_customers WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await?;
    Ok(Json(json!({"message": "Customer deleted"})))
}

// -------------------------------------------------------------------------
// Catalogue items
// -------------------------------------------------------------------------

async fn find_catalogue_item(db: &DbPool, id: i64) -> Result<CatalogueItem, ApiError> {
    sqlx::query_as("SELECT * FROM invoice_items WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Item not found"))
}

async fn list_catalogue(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<CatalogueItem>>, ApiError> {
    user.require(READ_ROLES)?;
    let items = sqlx::query_as("SELECT * FROM invoice_items ORDER BY created_at DESC, id DESC")
        .fetch_all(&state.db)
        .await?;
    Ok(Json(items))
}

async fn get_catalogue_item(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<CatalogueItem>, ApiError> {
    user.require(READ_ROLES)?;
    Ok(Json(find_catalogue_item(&state.db, id).await?))
}

async fn create_catalogue_item(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<CatalogueItemRequest>,
) -> Result<(StatusCode, Json<CatalogueItem>), ApiError> {
    user.require(WRITE_ROLES)?;
    let name = non_empty(&request.name).ok_or_else(|| ApiError::bad_request("name required"))?;

    let item: CatalogueItem = sqlx::query_as(
        "INSERT INTO invoice_items (sku, name, description, unit_price) VALUES (?, ?, ?, ?) RETURNING *",
    )
    .bind(non_empty(&request.sku))
    .bind(name)
    .bind(&request.description)
    .bind(round2(request.unit_price.unwrap_or(0.0)))
    .fetch_one(&state.db)
    .await?;
    Ok((StatusCode::CREATED, Json(item)))
}

async fn update_catalogue_item(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<CatalogueItemRequest>,
) -> Result<Json<CatalogueItem>, ApiError> {
    user.require(WRITE_ROLES)?;
    let existing = find_catalogue_item(&state.db, id).await?;

    let item: CatalogueItem = sqlx::query_as(
        "UPDATE invoice_items SET sku = ?, name = ?, description = ?, unit_price = ? WHERE id = ? RETURNING *",
    )
    .bind(non_empty(&request.sku).or(existing.sku.as_deref()))
    .bind(non_empty(&request.name).unwrap_or(&existing.name))
    .bind(request.description.as_ref().or(existing.description.as_ref()))
    .bind(request.unit_price.map(round2).unwrap_or(existing.unit_price))
    .bind(id)
    .fetch_one(&state.db)
    .await?;
    Ok(Json(item))
}

async fn delete_catalogue_item(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    user.require(DELETE_ROLES)?;
    let result = sqlx::query("DELETE FROM invoice_items WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Item not found"));
    }
    Ok(Json(json!({"message": "Item deleted"})))
}

// -------------------------------------------------------------------------
// Invoices
// -------------------------------------------------------------------------

async fn load_invoice(db: &DbPool, invoice: Invoice) -> Result<InvoiceResponse, sqlx::Error> {
    let lines: Vec<InvoiceLine> = sqlx::query_as("SELECT * FROM invoice_lines WHERE invoice_id = ? ORDER BY id")
        .bind(invoice.id)
        .fetch_all(db)
        .await?;
    Ok(InvoiceResponse::new(invoice, lines))
}

async fn list_invoices(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<InvoiceResponse>>, ApiError> {
    user.require(READ_ROLES)?;

    let invoices: Vec<Invoice> = sqlx::query_as("SELECT * FROM invoices ORDER BY date DESC, id DESC")
        .fetch_all(&state.db)
        .await?;

    let mut responses = Vec::with_capacity(invoices.len());
    for invoice in invoices {
        responses.push(load_invoice(&state.db, invoice).await?);
    }
    Ok(Json(responses))
}

async fn get_invoice(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<InvoiceResponse>, ApiError> {
    user.require(READ_ROLES)?;

    let invoice: Invoice = sqlx::query_as("SELECT * FROM invoices WHERE id = ?")
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found("Invoice not found"))?;
    Ok(Json(load_invoice(&state.db, invoice).await?))
}

/// Insert an invoice and all of its lines in one transaction
async fn create_invoice(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<CreateInvoiceRequest>,
) -> Result<(StatusCode, Json<InvoiceResponse>), ApiError> {
    user.require(WRITE_ROLES)?;

    let (Some(invoice_number), Some(customer_id)) = (non_empty(&request.invoice_number), request.customer_id)
    else {
        return Err(ApiError::bad_request("invoice_number and customer_id required"));
    };
    if let Some(bad) = request.items.iter().position(|line| line.quantity.is_some_and(|q| q < 1)) {
        return Err(ApiError::validation_field(
            &format!("items[{}].quantity", bad),
            "quantity must be at least 1",
        ));
    }

    let mut tx = state.db.begin().await?;

    let invoice: Option<Invoice> = sqlx::query_as(
        r#"INSERT INTO invoices (invoice_number, customer_id, notes)
           SELECT ?, id, ? FROM invoice_customers WHERE id = ?
           RETURNING *"#,
    )
    .bind(invoice_number)
    .bind(&request.notes)
    .bind(customer_id)
    .fetch_optional(&mut *tx)
    .await?;
    let Some(invoice) = invoice else {
        return Err(ApiError::not_found("Customer not found"));
    };

    let mut lines = Vec::with_capacity(request.items.len());
    for line in &request.items {
        let line: InvoiceLine = sqlx::query_as(
            r#"INSERT INTO invoice_lines (invoice_id, item_id, description, quantity, unit_price)
               VALUES (?, ?, ?, ?, ?)
               RETURNING *"#,
        )
        .bind(invoice.id)
        .bind(line.item_id)
        .bind(line.resolved_description())
        .bind(line.quantity.unwrap_or(1))
        .bind(round2(line.unit_price.unwrap_or(0.0)))
        .fetch_one(&mut *tx)
        .await?;
        lines.push(line);
    }

    tx.commit().await?;

    tracing::info!(
        invoice_id = invoice.id,
        invoice_number = %invoice.invoice_number,
        lines = lines.len(),
        "Created invoice"
    );
    Ok((StatusCode::CREATED, Json(InvoiceResponse::new(invoice, lines))))
}

async fn delete_invoice(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    user.require(DELETE_ROLES)?;

    // Lines go with it via ON DELETE CASCADE
    let result = sqlx::query("DELETE FROM invoices WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Invoice not found"));
    }
    Ok(Json(json!({"message": "Invoice deleted"})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Role;
    use crate::testing::{send, TestApp};
    use axum::http::Method;

    const BASE: &str = "/module/nexora-invoice/api/invoice";

    async fn customer(app: &TestApp, token: &str) -> i64 {
        let res = send(
            &app.router,
            Method::POST,
            &format!("{}/customers", BASE),
            Some(token),
            Some(json!({"name": "Globex", "email": "ap@globex.test"})),
        )
        .await;
        assert_eq!(res.status, StatusCode::CREATED);
        res.body["id"].as_i64().unwrap()
    }

    #[tokio::test]
    async fn test_invoice_with_lines() {
        let app = TestApp::new().await;
        let (_, admin) = app.user("root", Role::Admin).await;
        let customer_id = customer(&app, &admin).await;

        let res = send(
            &app.router,
            Method::POST,
            &format!("{}/items", BASE),
            Some(&admin),
            Some(json!({"sku": "CONS", "name": "Consulting", "unit_price": "150"})),
        )
        .await;
        assert_eq!(res.body["unit_price"], 150.0);
        let item_id = res.body["id"].as_i64().unwrap();

        let res = send(
            &app.router,
            Method::POST,
            &format!("{}/invoices", BASE),
            Some(&admin),
            Some(json!({
                "invoice_number": "INV-001",
                "customer_id": customer_id,
                "items": [
                    {"item_id": item_id, "name": "Consulting", "quantity": 2, "unit_price": 150},
                    {"description": "Travel", "unit_price": "42.50"},
                    {"unit_price": "free"},
                ],
            })),
        )
        .await;
        assert_eq!(res.status, StatusCode::CREATED);
        assert_eq!(res.body["items"][0]["description"], "Consulting");
        assert_eq!(res.body["items"][0]["total"], 300.0);
        assert_eq!(res.body["items"][1]["quantity"], 1);
        assert_eq!(res.body["items"][2]["description"], "");
        assert_eq!(res.body["items"][2]["unit_price"], 0.0);
        assert_eq!(res.body["subtotal"], 342.5);
        let invoice_id = res.body["id"].as_i64().unwrap();

        let res = send(&app.router, Method::GET, &format!("{}/invoices/{}", BASE, invoice_id), Some(&admin), None).await;
        assert_eq!(res.body["items"].as_array().unwrap().len(), 3);

        // Customer with invoices cannot be removed
        let res = send(
            &app.router,
            Method::DELETE,
            &format!("{}/customers/{}", BASE, customer_id),
            Some(&admin),
            None,
        )
        .await;
        assert_eq!(res.status, StatusCode::CONFLICT);

        let res = send(&app.router, Method::DELETE, &format!("{}/invoices/{}", BASE, invoice_id), Some(&admin), None).await;
        assert_eq!(res.status, StatusCode::OK);
        let lines: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM invoice_lines")
            .fetch_one(&app.state.db)
            .await
            .unwrap();
        assert_eq!(lines, 0);

        let res = send(
            &app.router,
            Method::DELETE,
            &format!("{}/customers/{}", BASE, customer_id),
            Some(&admin),
            None,
        )
        .await;
        assert_eq!(res.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_invoice_validation() {
        let app = TestApp::new().await;
        let (_, admin) = app.user("root", Role::Admin).await;
        let customer_id = customer(&app, &admin).await;
        let uri = format!("{}/invoices", BASE);

        let res = send(&app.router, Method::POST, &uri, Some(&admin), Some(json!({"customer_id": customer_id}))).await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        assert_eq!(res.body["error"], "invoice_number and customer_id required");

        let res = send(
            &app.router,
            Method::POST,
            &uri,
            Some(&admin),
            Some(json!({"invoice_number": "INV-9", "customer_id": 999})),
        )
        .await;
        assert_eq!(res.status, StatusCode::NOT_FOUND);

        let body = json!({"invoice_number": "INV-1", "customer_id": customer_id});
        let res = send(&app.router, Method::POST, &uri, Some(&admin), Some(body.clone())).await;
        assert_eq!(res.status, StatusCode::CREATED);
        assert_eq!(res.body["subtotal"], 0.0);
        let res = send(&app.router, Method::POST, &uri, Some(&admin), Some(body)).await;
        assert_eq!(res.status, StatusCode::CONFLICT);

        // A failed line rolls back the whole invoice
        let res = send(
            &app.router,
            Method::POST,
            &uri,
            Some(&admin),
            Some(json!({"invoice_number": "INV-2", "customer_id": customer_id, "items": [{"item_id": 4040}]})),
        )
        .await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        let res = send(&app.router, Method::GET, &uri, Some(&admin), None).await;
        assert_eq!(res.body.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_catalogue_sku_unique() {
        let app = TestApp::new().await;
        let (_, admin) = app.user("root", Role::Admin).await;
        let uri = format!("{}/items", BASE);

        for expected in [StatusCode::CREATED, StatusCode::CONFLICT] {
            let res = send(&app.router, Method::POST, &uri, Some(&admin), Some(json!({"sku": "A", "name": "A"}))).await;
            assert_eq!(res.status, expected);
        }
        // Items without a SKU never collide
        for _ in 0..2 {
            let res = send(&app.router, Method::POST, &uri, Some(&admin), Some(json!({"name": "No sku"}))).await;
            assert_eq!(res.status, StatusCode::CREATED);
        }
    }
}
