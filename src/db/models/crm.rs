//! CRM models: leads, contacts, deals and tasks.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::common::lenient;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Lead {
    pub id: i64,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub source: Option<String>,
    pub status: String,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct LeadRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub source: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Contact {
    pub id: i64,
    pub lead_id: Option<i64>,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct ContactRequest {
    pub lead_id: Option<i64>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Deal {
    pub id: i64,
    pub title: String,
    pub contact_id: Option<i64>,
    pub amount: f64,
    pub stage: String,
    pub status: String,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct DealRequest {
    pub title: Option<String>,
    pub contact_id: Option<i64>,
    #[serde(default, deserialize_with = "lenient::amount")]
    pub amount: Option<f64>,
    pub stage: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DealQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub stage: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub assigned_to: Option<i64>,
    pub related_type: Option<String>,
    pub related_id: Option<i64>,
    pub due_date: Option<String>,
    pub status: String,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct TaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub assigned_to: Option<i64>,
    pub related_type: Option<String>,
    pub related_id: Option<i64>,
    pub due_date: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Serialize, FromRow)]
pub struct PipelineStage {
    pub stage: String,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct CrmAnalytics {
    pub total_leads: i64,
    pub total_contacts: i64,
    pub total_deals: i64,
    pub open_deals: i64,
    pub closed_deals: i64,
    pub pipeline: Vec<PipelineStage>,
}
