//! Support desk: ticket categories, tickets, assignment and comments.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

use super::Module;
use crate::api::auth::{AuthUser, DELETE_ROLES, READ_ROLES, WRITE_ROLES};
use crate::api::error::{ApiError, ApiJson, ApiPath, ApiQuery, ValidationErrorBuilder};
use crate::api::validation::{non_empty, validate_one_of};
use crate::db::{
    fetch_filtered, AssignTicketRequest, CategoryCount, DbPool, DeskAnalytics, Filters, StatusCount,
    SupportTicket, TicketCategory, TicketCategoryRequest, TicketComment, TicketCommentRequest,
    TicketQuery, TicketRequest, TicketResponse, TicketStatusRequest, TICKET_PRIORITIES,
    TICKET_STATUSES,
};
use crate::AppState;

pub struct Desk;

impl Module for Desk {
    fn name(&self) -> &'static str {
        "nexora-desk"
    }

    fn description(&self) -> &'static str {
        "Support tickets with categories, assignment and comments"
    }

    fn icon(&self) -> &'static str {
        "🎧"
    }

    fn endpoints(&self) -> &'static [&'static str] {
        &["/api/items", "/api/desk/categories", "/api/desk/tickets", "/api/desk/analytics"]
    }

    fn routes(&self) -> Router<Arc<AppState>> {
        Router::new()
            .route("/api/desk/categories", get(list_categories).post(create_category))
            .route(
                "/api/desk/categories/:id",
                get(get_category).put(update_category).delete(delete_category),
            )
            .route("/api/desk/tickets", get(list_tickets).post(create_ticket))
            .route(
                "/api/desk/tickets/:id",
                get(get_ticket).put(update_ticket).delete(delete_ticket),
            )
            .route("/api/desk/tickets/:id/assign", post(assign_ticket))
            .route("/api/desk/tickets/:id/status", post(change_status))
            .route(
                "/api/desk/tickets/:id/comments",
                get(list_comments).post(add_comment),
            )
            .route("/api/desk/analytics", get(analytics))
    }
}

/// Reject priorities and statuses outside the known sets
fn check_ticket_fields(priority: Option<&str>, status: Option<&str>) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Some(priority) = priority {
        errors.check("priority", validate_one_of(priority, TICKET_PRIORITIES, "priority"));
    }
    if let Some(status) = status {
        errors.check("status", validate_one_of(status, TICKET_STATUSES, "status"));
    }
    errors.finish()
}

// -------------------------------------------------------------------------
// Categories
// -------------------------------------------------------------------------

async fn find_category(db: &DbPool, id: i64) -> Result<TicketCategory, ApiError> {
    sqlx::query_as("SELECT * FROM desk_categories WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Category not found"))
}

async fn list_categories(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<TicketCategory>>, ApiError> {
    user.require(READ_ROLES)?;
    let categories = sqlx::query_as("SELECT * FROM desk_categories ORDER BY name")
        .fetch_all(&state.db)
        .await?;
    Ok(Json(categories))
}

async fn get_category(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<TicketCategory>, ApiError> {
    user.require(READ_ROLES)?;
    Ok(Json(find_category(&state.db, id).await?))
}

async fn create_category(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<TicketCategoryRequest>,
) -> Result<(StatusCode, Json<TicketCategory>), ApiError> {
    user.require(WRITE_ROLES)?;
    let name = non_empty(&request.name).ok_or_else(|| ApiError::bad_request("name required"))?;

    let category: TicketCategory =
        sqlx::query_as("INSERT INTO desk_categories (name, description) VALUES (?, ?) RETURNING *")
            .bind(name)
            .bind(&request.description)
            .fetch_one(&state.db)
            .await?;
    Ok((StatusCode::CREATED, Json(category)))
}

async fn update_category(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<TicketCategoryRequest>,
) -> Result<Json<TicketCategory>, ApiError> {
    user.require(WRITE_ROLES)?;
    let existing = find_category(&state.db, id).await?;

    let category: TicketCategory = sqlx::query_as(
        "UPDATE desk_categories SET name = ?, description = ? WHERE id = ? RETURNING *",
    )
    .bind(non_empty(&request.name).unwrap_or(&existing.name))
    .bind(request.description.as_ref().or(existing.description.as_ref()))
    .bind(id)
    .fetch_one(&state.db)
    .await?;
    Ok(Json(category))
}

async fn delete_category(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    user.require(DELETE_ROLES)?;
    let result = sqlx::query("DELETE FROM desk_categories WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Category not found"));
    }
    Ok(Json(json!({"message": "Category deleted"})))
}

// -------------------------------------------------------------------------
// Tickets
// -------------------------------------------------------------------------

async fn find_ticket(db: &DbPool, id: i64) -> Result<SupportTicket, ApiError> {
    sqlx::query_as("SELECT * FROM support_tickets WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Ticket not found"))
}

async fn ticket_response(db: &DbPool, ticket: SupportTicket) -> Result<TicketResponse, ApiError> {
    let category = match ticket.category_id {
        Some(id) => sqlx::query_as("SELECT * FROM desk_categories WHERE id = ?")
            .bind(id)
            .fetch_optional(db)
            .await?,
        None => None,
    };
    Ok(TicketResponse::new(ticket, category))
}

async fn list_tickets(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiQuery(query): ApiQuery<TicketQuery>,
) -> Result<Json<Vec<TicketResponse>>, ApiError> {
    user.require(READ_ROLES)?;

    let mut filters = Filters::new();
    filters
        .eq("status", query.status.as_deref())
        .eq("category_id", query.category_id)
        .eq("assigned_to", query.assigned_to);
    let tickets: Vec<SupportTicket> = fetch_filtered(
        &state.db,
        "*",
        "support_tickets",
        &filters,
        "created_at DESC, id DESC",
    )
    .await?;

    let categories: HashMap<i64, TicketCategory> =
        sqlx::query_as::<_, TicketCategory>("SELECT * FROM desk_categories")
            .fetch_all(&state.db)
            .await?
            .into_iter()
            .map(|c| (c.id, c))
            .collect();

    let tickets = tickets
        .into_iter()
        .map(|t| {
            let category = t.category_id.and_then(|id| categories.get(&id).cloned());
            TicketResponse::new(t, category)
        })
        .collect();
    Ok(Json(tickets))
}

async fn get_ticket(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<TicketResponse>, ApiError> {
    user.require(READ_ROLES)?;
    let ticket = find_ticket(&state.db, id).await?;
    Ok(Json(ticket_response(&state.db, ticket).await?))
}

async fn create_ticket(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<TicketRequest>,
) -> Result<(StatusCode, Json<TicketResponse>), ApiError> {
    user.require(READ_ROLES)?;
    let title = non_empty(&request.title).ok_or_else(|| ApiError::bad_request("title required"))?;
    let priority = non_empty(&request.priority).unwrap_or("medium");
    let status = non_empty(&request.status).unwrap_or("open");
    check_ticket_fields(Some(priority), Some(status))?;

    let ticket: SupportTicket = sqlx::query_as(
        r#"INSERT INTO support_tickets
           (title, description, customer_name, customer_email, category_id, priority, status, assigned_to, created_by)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
           RETURNING *"#,
    )
    .bind(title)
    .bind(&request.description)
    .bind(&request.customer_name)
    .bind(&request.customer_email)
    .bind(request.category_id)
    .bind(priority)
    .bind(status)
    .bind(request.assigned_to)
    .bind(user.id)
    .fetch_one(&state.db)
    .await?;

    tracing::info!(ticket_id = ticket.id, priority = %ticket.priority, "Opened support ticket");
    Ok((StatusCode::CREATED, Json(ticket_response(&state.db, ticket).await?)))
}

async fn update_ticket(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<TicketRequest>,
) -> Result<Json<TicketResponse>, ApiError> {
    user.require(WRITE_ROLES)?;
    let existing = find_ticket(&state.db, id).await?;
    let priority = non_empty(&request.priority);
    // An empty status leaves the current one in place
    let status = non_empty(&request.status);
    check_ticket_fields(priority, status)?;

    let ticket: SupportTicket = sqlx::query_as(
        r#"UPDATE support_tickets
           SET title = ?, description = ?, customer_name = ?, customer_email = ?,
               category_id = ?, priority = ?, status = ?
           WHERE id = ?
           RETURNING *"#,
    )
    .bind(non_empty(&request.title).unwrap_or(&existing.title))
    .bind(request.description.as_ref().or(existing.description.as_ref()))
    .bind(request.customer_name.as_ref().or(existing.customer_name.as_ref()))
    .bind(request.customer_email.as_ref().or(existing.customer_email.as_ref()))
    .bind(request.category_id.or(existing.category_id))
    .bind(priority.unwrap_or(&existing.priority))
    .bind(status.unwrap_or(&existing.status))
    .bind(id)
    .fetch_one(&state.db)
    .await?;
    Ok(Json(ticket_response(&state.db, ticket).await?))
}

async fn delete_ticket(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    user.require(DELETE_ROLES)?;
    // Comments cascade with the ticket
    let result = sqlx::query("DELETE FROM support_tickets WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Ticket not found"));
    }
    Ok(Json(json!({"message": "Ticket deleted"})))
}

async fn assign_ticket(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<AssignTicketRequest>,
) -> Result<Json<TicketResponse>, ApiError> {
    user.require(WRITE_ROLES)?;
    find_ticket(&state.db, id).await?;

    let assignee = request
        .assigned_to
        .ok_or_else(|| ApiError::bad_request("assigned_to required"))?;
    let status = non_empty(&request.status).unwrap_or("assigned");
    check_ticket_fields(None, Some(status))?;

    let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE id = ?")
        .bind(assignee)
        .fetch_optional(&state.db)
        .await?;
    if exists.is_none() {
        return Err(ApiError::not_found("user not found"));
    }

    let ticket: SupportTicket = sqlx::query_as(
        "UPDATE support_tickets SET assigned_to = ?, status = ? WHERE id = ? RETURNING *",
    )
    .bind(assignee)
    .bind(status)
    .bind(id)
    .fetch_one(&state.db)
    .await?;

    tracing::info!(ticket_id = id, assigned_to = assignee, "Assigned ticket");
    Ok(Json(ticket_response(&state.db, ticket).await?))
}

async fn change_status(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<TicketStatusRequest>,
) -> Result<Json<TicketResponse>, ApiError> {
    user.require(WRITE_ROLES)?;
    find_ticket(&state.db, id).await?;
    let status = non_empty(&request.status).ok_or_else(|| ApiError::bad_request("status required"))?;
    check_ticket_fields(None, Some(status))?;

    let ticket: SupportTicket =
        sqlx::query_as("UPDATE support_tickets SET status = ? WHERE id = ? RETURNING *")
            .bind(status)
            .bind(id)
            .fetch_one(&state.db)
            .await?;
    Ok(Json(ticket_response(&state.db, ticket).await?))
}

// -------------------------------------------------------------------------
// Comments
// -------------------------------------------------------------------------

async fn list_comments(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Vec<TicketComment>>, ApiError> {
    user.require(READ_ROLES)?;
    find_ticket(&state.db, id).await?;
    let comments = sqlx::query_as("SELECT * FROM ticket_comments WHERE ticket_id = ? ORDER BY id")
        .bind(id)
        .fetch_all(&state.db)
        .await?;
    Ok(Json(comments))
}

async fn add_comment(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<TicketCommentRequest>,
) -> Result<(StatusCode, Json<TicketComment>), ApiError> {
    user.require(READ_ROLES)?;
    find_ticket(&state.db, id).await?;
    let message =
        non_empty(&request.message).ok_or_else(|| ApiError::bad_request("message required"))?;

    let comment: TicketComment = sqlx::query_as(
        "INSERT INTO ticket_comments (ticket_id, user_id, message) VALUES (?, ?, ?) RETURNING *",
    )
    .bind(id)
    .bind(user.id)
    .bind(message)
    .fetch_one(&state.db)
    .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

async fn analytics(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<DeskAnalytics>, ApiError> {
    user.require(READ_ROLES)?;

    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM support_tickets")
        .fetch_one(&state.db)
        .await?;
    let by_status: Vec<StatusCount> = sqlx::query_as(
        "SELECT status, COUNT(*) AS count FROM support_tickets GROUP BY status ORDER BY status",
    )
    .fetch_all(&state.db)
    .await?;
    let by_category: Vec<CategoryCount> = sqlx::query_as(
        r#"SELECT c.name AS category, COUNT(t.id) AS count
           FROM desk_categories c
           LEFT JOIN support_tickets t ON t.category_id = c.id
           GROUP BY c.id, c.name
           ORDER BY c.name"#,
    )
    .fetch_all(&state.db)
    .await?;

    Ok(Json(DeskAnalytics {
        total,
        by_status,
        by_category,
    }))
}
