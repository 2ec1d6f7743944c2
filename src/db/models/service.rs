//! Field service models: technicians and job tickets.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::desk::StatusCount;

pub const JOB_PRIORITIES: &[&str] = &["low", "medium", "high"];
pub const JOB_STATUSES: &[&str] = &["open", "assigned", "in_progress", "completed", "cancelled"];

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Technician {
    pub id: i64,
    pub name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub skills: Option<String>,
    pub active: bool,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct TechnicianRequest {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub skills: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ServiceJob {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub customer_name: Option<String>,
    pub customer_address: Option<String>,
    pub scheduled_date: Option<String>,
    pub priority: String,
    pub status: String,
    pub technician_id: Option<i64>,
    pub created_at: String,
}

/// Job with its technician embedded
#[derive(Debug, Serialize)]
pub struct ServiceJobResponse {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub customer_name: Option<String>,
    pub customer_address: Option<String>,
    pub scheduled_date: Option<String>,
    pub priority: String,
    pub status: String,
    pub technician_id: Option<i64>,
    pub technician: Option<Technician>,
    pub created_at: String,
}

impl ServiceJobResponse {
    pub fn new(job: ServiceJob, technician: Option<Technician>) -> Self {
        Self {
            id: job.id,
            title: job.title,
            description: job.description,
            customer_name: job.customer_name,
            customer_address: job.customer_address,
            scheduled_date: job.scheduled_date,
            priority: job.priority,
            status: job.status,
            technician_id: job.technician_id,
            technician,
            created_at: job.created_at,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ServiceJobQuery {
    pub status: Option<String>,
    pub technician_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct ServiceJobRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub customer_name: Option<String>,
    pub customer_address: Option<String>,
    pub scheduled_date: Option<String>,
    pub priority: Option<String>,
    pub status: Option<String>,
    pub technician_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AssignJobRequest {
    pub technician_id: Option<i64>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct JobStatusRequest {
    pub status: Option<String>,
}

#[derive(Debug, Serialize, FromRow)]
pub struct TechnicianLoad {
    pub technician_id: i64,
    pub name: String,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct ServiceAnalytics {
    pub total_jobs: i64,
    pub by_status: Vec<StatusCount>,
    pub assignments: Vec<TechnicianLoad>,
}
