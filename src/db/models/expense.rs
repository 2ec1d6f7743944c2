//! Expense models: categories, expense reports and attachments.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::common::lenient;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ExpenseCategory {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct ExpenseCategoryRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ExpenseReport {
    pub id: i64,
    pub title: String,
    pub amount: f64,
    pub date: String,
    pub description: Option<String>,
    pub status: String,
    pub category_id: Option<i64>,
    pub created_by: Option<i64>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct Attachment {
    pub id: i64,
    pub filename: String,
    pub filepath: String,
    pub mimetype: Option<String>,
    pub expense_id: i64,
    pub uploaded_at: String,
}

/// Attachment as exposed to clients; the on-disk path stays private
#[derive(Debug, Serialize)]
pub struct AttachmentResponse {
    pub id: i64,
    pub filename: String,
    pub mimetype: Option<String>,
    pub url: String,
    pub uploaded_at: String,
}

impl From<Attachment> for AttachmentResponse {
    fn from(att: Attachment) -> Self {
        Self {
            url: format!("/api/attachments/{}", att.id),
            id: att.id,
            filename: att.filename,
            mimetype: att.mimetype,
            uploaded_at: att.uploaded_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ExpenseResponse {
    pub id: i64,
    pub title: String,
    pub amount: f64,
    pub date: String,
    pub description: Option<String>,
    pub status: String,
    pub category_id: Option<i64>,
    pub created_by: Option<i64>,
    pub attachments: Vec<AttachmentResponse>,
    pub created_at: String,
    pub updated_at: String,
}

impl ExpenseResponse {
    pub fn new(report: ExpenseReport, attachments: Vec<Attachment>) -> Self {
        Self {
            id: report.id,
            title: report.title,
            amount: report.amount,
            date: report.date,
            description: report.description,
            status: report.status,
            category_id: report.category_id,
            created_by: report.created_by,
            attachments: attachments.into_iter().map(AttachmentResponse::from).collect(),
            created_at: report.created_at,
            updated_at: report.updated_at,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ExpenseQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub status: Option<String>,
    pub category_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ExpenseRequest {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient::amount")]
    pub amount: Option<f64>,
    pub date: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub category_id: Option<i64>,
}
