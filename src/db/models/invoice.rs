//! Invoicing models: customers, catalogue items, invoices and lines.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::common::lenient;
use crate::utils::round2;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Customer {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CustomerRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CatalogueItem {
    pub id: i64,
    pub sku: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub unit_price: f64,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CatalogueItemRequest {
    pub sku: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient::amount_or_zero")]
    pub unit_price: Option<f64>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Invoice {
    pub id: i64,
    pub invoice_number: String,
    pub customer_id: i64,
    pub date: String,
    pub notes: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct InvoiceLine {
    pub id: i64,
    pub invoice_id: i64,
    pub item_id: Option<i64>,
    pub description: String,
    pub quantity: i64,
    pub unit_price: f64,
}

impl InvoiceLine {
    pub fn total(&self) -> f64 {
        round2(self.quantity as f64 * self.unit_price)
    }
}

#[derive(Debug, Serialize)]
pub struct InvoiceLineResponse {
    pub id: i64,
    pub invoice_id: i64,
    pub item_id: Option<i64>,
    pub description: String,
    pub quantity: i64,
    pub unit_price: f64,
    pub total: f64,
}

impl From<InvoiceLine> for InvoiceLineResponse {
    fn from(line: InvoiceLine) -> Self {
        Self {
            total: line.total(),
            id: line.id,
            invoice_id: line.invoice_id,
            item_id: line.item_id,
            description: line.description,
            quantity: line.quantity,
            unit_price: line.unit_price,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct InvoiceResponse {
    pub id: i64,
    pub invoice_number: String,
    pub customer_id: i64,
    pub date: String,
    pub notes: Option<String>,
    pub items: Vec<InvoiceLineResponse>,
    pub subtotal: f64,
    pub created_at: String,
}

impl InvoiceResponse {
    pub fn new(invoice: Invoice, lines: Vec<InvoiceLine>) -> Self {
        let subtotal = round2(lines.iter().map(InvoiceLine::total).sum());
        Self {
            id: invoice.id,
            invoice_number: invoice.invoice_number,
            customer_id: invoice.customer_id,
            date: invoice.date,
            notes: invoice.notes,
            items: lines.into_iter().map(InvoiceLineResponse::from).collect(),
            subtotal,
            created_at: invoice.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateInvoiceRequest {
    pub invoice_number: Option<String>,
    pub customer_id: Option<i64>,
    pub notes: Option<String>,
    #[serde(default)]
    pub items: Vec<InvoiceLineRequest>,
}

#[derive(Debug, Deserialize)]
pub struct InvoiceLineRequest {
    pub item_id: Option<i64>,
    pub description: Option<String>,
    pub name: Option<String>,
    pub quantity: Option<i64>,
    #[serde(default, deserialize_with = "lenient::amount_or_zero")]
    pub unit_price: Option<f64>,
}

impl InvoiceLineRequest {
    /// Line text: the description, else the item name, else empty
    pub fn resolved_description(&self) -> String {
        self.description
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.name.as_deref().filter(|s| !s.is_empty()))
            .unwrap_or_default()
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(quantity: i64, unit_price: f64) -> InvoiceLine {
        InvoiceLine {
            id: 1,
            invoice_id: 1,
            item_id: None,
            description: String::new(),
            quantity,
            unit_price,
        }
    }

    #[test]
    fn test_subtotal_sums_line_totals() {
        let invoice = Invoice {
            id: 1,
            invoice_number: "INV-1".to_string(),
            customer_id: 1,
            date: "2025-01-01T00:00:00Z".to_string(),
            notes: None,
            created_at: "2025-01-01T00:00:00Z".to_string(),
        };
        let response = InvoiceResponse::new(invoice, vec![line(3, 19.99), line(1, 0.02)]);
        assert_eq!(response.items[0].total, 59.97);
        assert_eq!(response.subtotal, 59.99);
    }

    #[test]
    fn test_line_description_fallback() {
        let req: InvoiceLineRequest =
            serde_json::from_str(r#"{"name": "Consulting", "unit_price": "n/a"}"#).unwrap();
        assert_eq!(req.resolved_description(), "Consulting");
        assert_eq!(req.unit_price, Some(0.0));

        let req: InvoiceLineRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.resolved_description(), "");
    }
}
