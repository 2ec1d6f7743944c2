//! Live chat models: website visitors, chat sessions and messages.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const VISITOR_STATUSES: &[&str] = &["browsing", "waiting", "chatting", "ended"];
pub const SENDER_TYPES: &[&str] = &["visitor", "agent"];

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Visitor {
    pub id: i64,
    pub session_id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub page_url: Option<String>,
    pub status: String,
    pub created_at: String,
    pub last_seen: String,
}

#[derive(Debug, Deserialize)]
pub struct VisitorRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub page_url: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct VisitorQuery {
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChatSession {
    pub id: i64,
    pub visitor_id: i64,
    pub agent_id: Option<i64>,
    pub session_key: String,
    pub status: String,
    pub created_at: String,
    pub ended_at: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatSessionRequest {
    pub visitor_id: Option<i64>,
    pub agent_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChatMessage {
    pub id: i64,
    pub chat_session_id: i64,
    pub sender_type: String,
    pub sender_id: Option<i64>,
    pub message: String,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatMessageRequest {
    pub message: Option<String>,
    pub sender_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SalesIqAnalytics {
    pub total_visitors: i64,
    pub active_visitors: i64,
    pub total_chats: i64,
    pub open_chats: i64,
    pub total_messages: i64,
}
