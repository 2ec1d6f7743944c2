//! Support desk models: ticket categories, tickets and comments.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const TICKET_PRIORITIES: &[&str] = &["low", "medium", "high"];
pub const TICKET_STATUSES: &[&str] = &["open", "assigned", "in_progress", "resolved", "closed"];

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TicketCategory {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct TicketCategoryRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct SupportTicket {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub category_id: Option<i64>,
    pub priority: String,
    pub status: String,
    pub assigned_to: Option<i64>,
    pub created_by: Option<i64>,
    pub created_at: String,
}

/// Ticket with its category embedded
#[derive(Debug, Serialize)]
pub struct TicketResponse {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub category: Option<TicketCategory>,
    pub category_id: Option<i64>,
    pub priority: String,
    pub status: String,
    pub assigned_to: Option<i64>,
    pub created_by: Option<i64>,
    pub created_at: String,
}

impl TicketResponse {
    pub fn new(ticket: SupportTicket, category: Option<TicketCategory>) -> Self {
        Self {
            id: ticket.id,
            title: ticket.title,
            description: ticket.description,
            customer_name: ticket.customer_name,
            customer_email: ticket.customer_email,
            category,
            category_id: ticket.category_id,
            priority: ticket.priority,
            status: ticket.status,
            assigned_to: ticket.assigned_to,
            created_by: ticket.created_by,
            created_at: ticket.created_at,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TicketQuery {
    pub status: Option<String>,
    pub category_id: Option<i64>,
    pub assigned_to: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct TicketRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub category_id: Option<i64>,
    pub priority: Option<String>,
    pub status: Option<String>,
    pub assigned_to: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AssignTicketRequest {
    pub assigned_to: Option<i64>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TicketStatusRequest {
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TicketComment {
    pub id: i64,
    pub ticket_id: i64,
    pub user_id: Option<i64>,
    pub message: String,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct TicketCommentRequest {
    pub message: Option<String>,
}

#[derive(Debug, Serialize, FromRow)]
pub struct StatusCount {
    pub status: String,
    pub count: i64,
}

#[derive(Debug, Serialize, FromRow)]
pub struct CategoryCount {
    pub category: String,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct DeskAnalytics {
    pub total: i64,
    pub by_status: Vec<StatusCount>,
    pub by_category: Vec<CategoryCount>,
}
