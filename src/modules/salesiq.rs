//! Website visitor tracking and live chat.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

use super::Module;
use crate::api::auth::{AuthUser, READ_ROLES};
use crate::api::error::{ApiError, ApiJson, ApiPath, ApiQuery};
use crate::api::validation::{non_empty, validate_one_of};
use crate::db::{
    fetch_filtered, ChatMessage, ChatMessageRequest, ChatSession, ChatSessionRequest, DbPool,
    Filters, SalesIqAnalytics, Visitor, VisitorQuery, VisitorRequest, SENDER_TYPES,
    VISITOR_STATUSES,
};
use crate::utils::now_rfc3339;
use crate::AppState;

pub struct SalesIq;

impl Module for SalesIq {
    fn name(&self) -> &'static str {
        "nexora-salesiq"
    }

    fn description(&self) -> &'static str {
        "Website visitor tracking and live chat"
    }

    fn icon(&self) -> &'static str {
        "💬"
    }

    fn endpoints(&self) -> &'static [&'static str] {
        &[
            "/api/items",
            "/api/salesiq/visitors",
            "/api/salesiq/chat-sessions",
            "/api/salesiq/analytics",
        ]
    }

    fn routes(&self) -> Router<Arc<AppState>> {
        Router::new()
            .route("/api/salesiq/visitors", get(list_visitors).post(create_visitor))
            .route("/api/salesiq/visitors/:id", get(get_visitor).put(update_visitor))
            .route("/api/salesiq/chat-sessions", post(open_chat))
            .route("/api/salesiq/chat-sessions/:id", get(get_chat))
            .route(
                "/api/salesiq/chat-sessions/:id/messages",
                get(list_messages).post(post_message),
            )
            .route("/api/salesiq/chat-sessions/:id/close", post(close_chat))
            .route("/api/salesiq/analytics", get(analytics))
    }
}

fn new_session_key() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// First hop of `X-Forwarded-For`, if the proxy sent one
fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
}

async fn find_visitor(db: &DbPool, id: i64) -> Result<Visitor, ApiError> {
    sqlx::query_as("SELECT * FROM salesiq_visitors WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("visitor not found"))
}

async fn find_chat(db: &DbPool, id: i64) -> Result<ChatSession, ApiError> {
    sqlx::query_as("SELECT * FROM salesiq_chat_sessions WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("chat session not found"))
}

fn check_visitor_status(status: Option<&str>) -> Result<(), ApiError> {
    match status.map(|s| validate_one_of(s, VISITOR_STATUSES, "status")) {
        Some(Err(message)) => Err(ApiError::validation_field("status", message)),
        _ => Ok(()),
    }
}

// -------------------------------------------------------------------------
// Visitors
// -------------------------------------------------------------------------

async fn list_visitors(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiQuery(query): ApiQuery<VisitorQuery>,
) -> Result<Json<Vec<Visitor>>, ApiError> {
    user.require(READ_ROLES)?;
    let mut filters = Filters::new();
    filters.eq("status", query.status);
    let visitors = fetch_filtered(
        &state.db,
        "*",
        "salesiq_visitors",
        &filters,
        "last_seen DESC, id DESC",
    )
    .await?;
    Ok(Json(visitors))
}

async fn get_visitor(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Visitor>, ApiError> {
    user.require(READ_ROLES)?;
    Ok(Json(find_visitor(&state.db, id).await?))
}

async fn create_visitor(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    headers: HeaderMap,
    ApiJson(request): ApiJson<VisitorRequest>,
) -> Result<(StatusCode, Json<Visitor>), ApiError> {
    user.require(READ_ROLES)?;
    let status = non_empty(&request.status).unwrap_or("browsing");
    check_visitor_status(Some(status))?;
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok());

    let visitor: Visitor = sqlx::query_as(
        r#"INSERT INTO salesiq_visitors
           (session_id, name, email, phone, ip_address, user_agent, page_url, status)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?)
           RETURNING *"#,
    )
    .bind(new_session_key())
    .bind(&request.name)
    .bind(&request.email)
    .bind(&request.phone)
    .bind(client_ip(&headers))
    .bind(user_agent)
    .bind(&request.page_url)
    .bind(status)
    .fetch_one(&state.db)
    .await?;
    Ok((StatusCode::CREATED, Json(visitor)))
}

/// Any update counts as the visitor being seen
async fn update_visitor(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<VisitorRequest>,
) -> Result<Json<Visitor>, ApiError> {
    user.require(READ_ROLES)?;
    let existing = find_visitor(&state.db, id).await?;
    let status = non_empty(&request.status);
    check_visitor_status(status)?;

    let visitor: Visitor = sqlx::query_as(
        r#"UPDATE salesiq_visitors
           SET name = ?, email = ?, phone = ?, page_url = ?, status = ?, last_seen = ?
           WHERE id = ?
           RETURNING *"#,
    )
    .bind(request.name.as_ref().or(existing.name.as_ref()))
    .bind(request.email.as_ref().or(existing.email.as_ref()))
    .bind(request.phone.as_ref().or(existing.phone.as_ref()))
    .bind(request.page_url.as_ref().or(existing.page_url.as_ref()))
    .bind(status.unwrap_or(&existing.status))
    .bind(now_rfc3339())
    .bind(id)
    .fetch_one(&state.db)
    .await?;
    Ok(Json(visitor))
}

// -------------------------------------------------------------------------
// Chats
// -------------------------------------------------------------------------

async fn open_chat(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<ChatSessionRequest>,
) -> Result<(StatusCode, Json<ChatSession>), ApiError> {
    user.require(READ_ROLES)?;
    let visitor_id = request
        .visitor_id
        .ok_or_else(|| ApiError::bad_request("visitor_id required"))?;

    let mut tx = state.db.begin().await?;
    let chat: ChatSession = sqlx::query_as(
        r#"INSERT INTO salesiq_chat_sessions (visitor_id, agent_id, session_key)
           SELECT id, ?, ? FROM salesiq_visitors WHERE id = ?
           RETURNING *"#,
    )
    .bind(request.agent_id.unwrap_or(user.id))
    .bind(new_session_key())
    .bind(visitor_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| ApiError::not_found("visitor not found"))?;

    sqlx::query("UPDATE salesiq_visitors SET status = 'chatting', last_seen = ? WHERE id = ?")
        .bind(now_rfc3339())
        .bind(visitor_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    tracing::info!(chat_id = chat.id, visitor_id, "Opened chat session");
    Ok((StatusCode::CREATED, Json(chat)))
}

async fn get_chat(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<ChatSession>, ApiError> {
    user.require(READ_ROLES)?;
    Ok(Json(find_chat(&state.db, id).await?))
}

async fn list_messages(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    user.require(READ_ROLES)?;
    find_chat(&state.db, id).await?;
    let messages = sqlx::query_as(
        "SELECT * FROM salesiq_messages WHERE chat_session_id = ? ORDER BY created_at, id",
    )
    .bind(id)
    .fetch_all(&state.db)
    .await?;
    Ok(Json(messages))
}

async fn post_message(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<ChatMessageRequest>,
) -> Result<(StatusCode, Json<ChatMessage>), ApiError> {
    user.require(READ_ROLES)?;
    let chat = find_chat(&state.db, id).await?;
    let message =
        non_empty(&request.message).ok_or_else(|| ApiError::bad_request("message required"))?;
    let sender_type = non_empty(&request.sender_type).unwrap_or("visitor");
    if let Err(error) = validate_one_of(sender_type, SENDER_TYPES, "sender_type") {
        return Err(ApiError::validation_field("sender_type", error));
    }
    if chat.status != "open" {
        return Err(ApiError::conflict("chat session is closed"));
    }

    let sender_id = if sender_type == "agent" {
        user.id
    } else {
        chat.visitor_id
    };
    let message: ChatMessage = sqlx::query_as(
        r#"INSERT INTO salesiq_messages (chat_session_id, sender_type, sender_id, message)
           VALUES (?, ?, ?, ?)
           RETURNING *"#,
    )
    .bind(id)
    .bind(sender_type)
    .bind(sender_id)
    .bind(message)
    .fetch_one(&state.db)
    .await?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn close_chat(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<ChatSession>, ApiError> {
    user.require(READ_ROLES)?;

    let mut tx = state.db.begin().await?;
    let closed: Option<ChatSession> = sqlx::query_as(
        r#"UPDATE salesiq_chat_sessions SET status = 'closed', ended_at = ?
           WHERE id = ? AND status = 'open'
           RETURNING *"#,
    )
    .bind(now_rfc3339())
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(chat) = closed else {
        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM salesiq_chat_sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        return Err(match exists {
            Some(_) => ApiError::conflict("chat session is already closed"),
            None => ApiError::not_found("chat session not found"),
        });
    };

    sqlx::query("UPDATE salesiq_visitors SET status = 'ended', last_seen = ? WHERE id = ?")
        .bind(now_rfc3339())
        .bind(chat.visitor_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    tracing::info!(chat_id = id, "Closed chat session");
    Ok(Json(chat))
}

async fn analytics(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<SalesIqAnalytics>, ApiError> {
    user.require(READ_ROLES)?;

    let (total_visitors, active_visitors): (i64, i64) = sqlx::query_as(
        r#"SELECT COUNT(*),
                  COALESCE(SUM(CASE WHEN status IN ('browsing', 'chatting') THEN 1 ELSE 0 END), 0)
           FROM salesiq_visitors"#,
    )
    .fetch_one(&state.db)
    .await?;
    let (total_chats, open_chats): (i64, i64) = sqlx::query_as(
        r#"SELECT COUNT(*), COALESCE(SUM(CASE WHEN status = 'open' THEN 1 ELSE 0 END), 0)
           FROM salesiq_chat_sessions"#,
    )
    .fetch_one(&state.db)
    .await?;
    let total_messages: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM salesiq_messages")
        .fetch_one(&state.db)
        .await?;

    Ok(Json(SalesIqAnalytics {
        total_visitors,
        active_visitors,
        total_chats,
        open_chats,
        total_messages,
    }))
}
