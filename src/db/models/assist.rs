//! Remote assistance models: support requests and their session logs.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

pub const REQUEST_SEVERITIES: &[&str] = &["low", "normal", "high", "critical"];
pub const REQUEST_STATUSES: &[&str] = &["open", "in_progress", "resolved", "closed"];
pub const LOG_ENTRY_TYPES: &[&str] = &["note", "system", "event"];

/// Parse a stored metadata blob, dropping anything that is not JSON
fn metadata(raw: Option<String>) -> Option<Value> {
    raw.and_then(|text| serde_json::from_str(&text).ok())
}

#[derive(Debug, Clone, FromRow)]
pub struct AssistRequest {
    pub id: i64,
    pub request_number: String,
    pub subject: String,
    pub description: Option<String>,
    pub customer_name: Option<String>,
    pub customer_contact: Option<String>,
    pub severity: String,
    pub status: String,
    pub assigned_to: Option<i64>,
    pub preferred_time: Option<String>,
    pub metadata: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize)]
pub struct AssistRequestResponse {
    pub id: i64,
    pub request_number: String,
    pub subject: String,
    pub description: Option<String>,
    pub customer_name: Option<String>,
    pub customer_contact: Option<String>,
    pub severity: String,
    pub status: String,
    pub assigned_to: Option<i64>,
    pub preferred_time: Option<String>,
    pub metadata: Option<Value>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<AssistRequest> for AssistRequestResponse {
    fn from(r: AssistRequest) -> Self {
        Self {
            id: r.id,
            request_number: r.request_number,
            subject: r.subject,
            description: r.description,
            customer_name: r.customer_name,
            customer_contact: r.customer_contact,
            severity: r.severity,
            status: r.status,
            assigned_to: r.assigned_to,
            preferred_time: r.preferred_time,
            metadata: metadata(r.metadata),
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AssistRequestBody {
    pub subject: Option<String>,
    pub description: Option<String>,
    pub customer_name: Option<String>,
    pub customer_contact: Option<String>,
    pub severity: Option<String>,
    pub status: Option<String>,
    pub assigned_to: Option<i64>,
    pub preferred_time: Option<String>,
    pub metadata: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AssistRequestQuery {
    pub status: Option<String>,
    pub assigned_to: Option<i64>,
}

#[derive(Debug, Clone, FromRow)]
pub struct SessionLog {
    pub id: i64,
    pub request_id: i64,
    pub timestamp: String,
    pub actor_id: Option<i64>,
    pub entry_type: String,
    pub message: String,
    pub metadata: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionLogResponse {
    pub id: i64,
    pub request_id: i64,
    pub timestamp: String,
    pub actor_id: Option<i64>,
    pub entry_type: String,
    pub message: String,
    pub metadata: Option<Value>,
}

impl From<SessionLog> for SessionLogResponse {
    fn from(log: SessionLog) -> Self {
        Self {
            id: log.id,
            request_id: log.request_id,
            timestamp: log.timestamp,
            actor_id: log.actor_id,
            entry_type: log.entry_type,
            message: log.message,
            metadata: metadata(log.metadata),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionLogRequest {
    pub message: Option<String>,
    pub entry_type: Option<String>,
    pub metadata: Option<Value>,
}
