//! Bigin models: a lightweight deal pipeline with follow-up tasks.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::common::lenient;
use super::crm::PipelineStage;

pub const BIGIN_DEAL_STATUSES: &[&str] = &["open", "closed"];
pub const BIGIN_TASK_STATUSES: &[&str] = &["todo", "in_progress", "done"];

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BiginDeal {
    pub id: i64,
    pub title: String,
    pub amount: Option<f64>,
    pub stage: String,
    pub status: String,
    pub created_by: Option<i64>,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct BiginDealRequest {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient::amount")]
    pub amount: Option<f64>,
    pub stage: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BiginDealQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub stage: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BiginTask {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub related_deal_id: Option<i64>,
    pub due_date: Option<String>,
    pub status: String,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct BiginTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub related_deal_id: Option<i64>,
    pub due_date: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BiginTaskQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub related_deal_id: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct BiginPipeline {
    pub total_deals: i64,
    pub open_deals: i64,
    pub closed_deals: i64,
    pub stages: Vec<PipelineStage>,
}
