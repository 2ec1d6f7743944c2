//! Leads, contacts, deals and follow-up tasks.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::Module;
use crate::api::auth::{AuthUser, DELETE_ROLES, READ_ROLES, WRITE_ROLES};
use crate::api::error::{ApiError, ApiJson, ApiPath, ApiQuery};
use crate::api::validation::{non_empty, validate_one_of};
use crate::db::{
    fetch_page, Contact, ContactRequest, CrmAnalytics, Deal, DealQuery, DealRequest, Filters, Lead,
    LeadRequest, Page, PageWindow, PipelineStage, Task, TaskRequest,
};
use crate::utils::{format_utc, parse_datetime, round2};
use crate::AppState;

const DEFAULT_PER_PAGE: i64 = 20;
const RELATED_TYPES: &[&str] = &["lead", "contact", "deal"];

pub struct Crm;

impl Module for Crm {
    fn name(&self) -> &'static str {
        "nexora-crm"
    }

    fn description(&self) -> &'static str {
        "Leads, contacts, deal pipeline and follow-up tasks"
    }

    fn icon(&self) -> &'static str {
        "🤝"
    }

    fn endpoints(&self) -> &'static [&'static str] {
        &["/api/items", "/api/leads", "/api/contacts", "/api/deals", "/api/tasks", "/api/crm/analytics"]
    }

    fn routes(&self) -> Router<Arc<AppState>> {
        Router::new()
            .route("/api/leads", get(list_leads).post(create_lead))
            .route("/api/leads/:id", get(get_lead).put(update_lead).delete(delete_lead))
            .route("/api/contacts", get(list_contacts).post(create_contact))
            .route(
                "/api/contacts/:id",
                get(get_contact).put(update_contact).delete(delete_contact),
            )
            .route("/api/deals", get(list_deals).post(create_deal))
            .route("/api/deals/:id", get(get_deal).put(update_deal).delete(delete_deal))
            .route("/api/tasks", get(list_tasks).post(create_task))
            .route("/api/tasks/:id", get(get_task).put(update_task).delete(delete_task))
            .route("/api/crm/analytics", get(analytics))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

/// Fetch one row by id from `table`, or 404 with `missing`
async fn find<T>(state: &AppState, table: &str, id: i64, missing: &str) -> Result<T, ApiError>
where
    T: for<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow> + Send + Unpin,
{
    sqlx::query_as(&format!("SELECT * FROM {} WHERE id = ?", table))
        .bind(id)
        .fetch_optional(&state.db)
        .await?
        .ok_or_else(|| ApiError::not_found(missing))
}

async fn delete_row(state: &AppState, table: &str, id: i64, missing: &str) -> Result<(), ApiError> {
    let result = sqlx::query(&format!("DELETE FROM {} WHERE id = ?", table))
        .bind(id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found(missing));
    }
    Ok(())
}

/// Normalize a due date; unparseable input is dropped
fn due_date(raw: &Option<String>) -> Option<String> {
    non_empty(raw)
        .and_then(parse_datetime)
        .map(format_utc)
}

// -------------------------------------------------------------------------
// Leads
// -------------------------------------------------------------------------

async fn list_leads(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<Json<Page<Lead>>, ApiError> {
    user.require(READ_ROLES)?;
    let window = PageWindow::new(query.page, query.per_page, DEFAULT_PER_PAGE);
    let page = fetch_page(
        &state.db,
        "leads",
        "*",
        "leads",
        &Filters::new(),
        "created_at DESC, id DESC",
        window,
    )
    .await?;
    Ok(Json(page))
}

async fn get_lead(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Lead>, ApiError> {
    user.require(READ_ROLES)?;
    Ok(Json(find(&state, "leads", id, "Lead not found").await?))
}

async fn create_lead(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<LeadRequest>,
) -> Result<(StatusCode, Json<Lead>), ApiError> {
    user.require(WRITE_ROLES)?;
    let name = non_empty(&request.name).ok_or_else(|| ApiError::bad_request("name required"))?;

    let lead: Lead = sqlx::query_as(
        "INSERT INTO leads (name, email, phone, source, status) VALUES (?, ?, ?, ?, ?) RETURNING *",
    )
    .bind(name)
    .bind(&request.email)
    .bind(&request.phone)
    .bind(&request.source)
    .bind(non_empty(&request.status).unwrap_or("new"))
    .fetch_one(&state.db)
    .await?;

    tracing::info!(lead_id = lead.id, "Created lead");
    Ok((StatusCode::CREATED, Json(lead)))
}

async fn update_lead(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<LeadRequest>,
) -> Result<Json<Lead>, ApiError> {
    user.require(WRITE_ROLES)?;
    let existing: Lead = find(&state, "leads", id, "Lead not found").await?;

    let lead: Lead = sqlx::query_as(
        "UPDATE leads SET name = ?, email = ?, phone = ?, source = ?, status = ? WHERE id = ? RETURNING *",
    )
    .bind(non_empty(&request.name).unwrap_or(&existing.name))
    .bind(request.email.as_ref().or(existing.email.as_ref()))
    .bind(request.phone.as_ref().or(existing.phone.as_ref()))
    .bind(request.source.as_ref().or(existing.source.as_ref()))
    .bind(non_empty(&request.status).unwrap_or(&existing.status))
    .bind(id)
    .fetch_one(&state.db)
    .await?;
    Ok(Json(lead))
}

async fn delete_lead(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    user.require(DELETE_ROLES)?;
    delete_row(&state, "leads", id, "Lead not found").await?;
    Ok(Json(json!({"message": "Lead deleted"})))
}

// -------------------------------------------------------------------------
// Contacts
// -------------------------------------------------------------------------

async fn list_contacts(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<Json<Page<Contact>>, ApiError> {
    user.require(READ_ROLES)?;
    let window = PageWindow::new(query.page, query.per_page, DEFAULT_PER_PAGE);
    let page = fetch_page(
        &state.db,
        "contacts",
        "*",
        "contacts",
        &Filters::new(),
        "created_at DESC, id DESC",
        window,
    )
    .await?;
    Ok(Json(page))
}

async fn get_contact(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Contact>, ApiError> {
    user.require(READ_ROLES)?;
    Ok(Json(find(&state, "contacts", id, "Contact not found").await?))
}

async fn create_contact(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<ContactRequest>,
) -> Result<(StatusCode, Json<Contact>), ApiError> {
    user.require(WRITE_ROLES)?;
    let name = non_empty(&request.name).ok_or_else(|| ApiError::bad_request("name required"))?;

    let contact: Contact = sqlx::query_as(
        "INSERT INTO contacts (lead_id, name, email, phone, company) VALUES (?, ?, ?, ?, ?) RETURNING *",
    )
    .bind(request.lead_id)
    .bind(name)
    .bind(&request.email)
    .bind(&request.phone)
    .bind(&request.company)
    .fetch_one(&state.db)
    .await?;
    Ok((StatusCode::CREATED, Json(contact)))
}

async fn update_contact(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<ContactRequest>,
) -> Result<Json<Contact>, ApiError> {
    user.require(WRITE_ROLES)?;
    let existing: Contact = find(&state, "contacts", id, "Contact not found").await?;

    let contact: Contact = sqlx::query_as(
        "UPDATE contacts SET lead_id = ?, name = ?, email = ?, phone = ?, company = ? WHERE id = ? RETURNING *",
    )
    .bind(request.lead_id.or(existing.lead_id))
    .bind(non_empty(&request.name).unwrap_or(&existing.name))
    .bind(request.email.as_ref().or(existing.email.as_ref()))
    .bind(request.phone.as_ref().or(existing.phone.as_ref()))
    .bind(request.company.as_ref().or(existing.company.as_ref()))
    .bind(id)
    .fetch_one(&state.db)
    .await?;
    Ok(Json(contact))
}

async fn delete_contact(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    user.require(DELETE_ROLES)?;
    delete_row(&state, "contacts", id, "Contact not found").await?;
    Ok(Json(json!({"message": "Contact deleted"})))
}

// -------------------------------------------------------------------------
// Deals
// -------------------------------------------------------------------------

async fn list_deals(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiQuery(query): ApiQuery<DealQuery>,
) -> Result<Json<Page<Deal>>, ApiError> {
    user.require(READ_ROLES)?;
    let window = PageWindow::new(query.page, query.per_page, DEFAULT_PER_PAGE);
    let mut filters = Filters::new();
    filters.eq("stage", query.stage);

    let page = fetch_page(&state.db, "deals", "*", "deals", &filters, "created_at DESC, id DESC", window).await?;
    Ok(Json(page))
}

async fn get_deal(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Deal>, ApiError> {
    user.require(READ_ROLES)?;
    Ok(Json(find(&state, "deals", id, "Deal not found").await?))
}

async fn create_deal(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<DealRequest>,
) -> Result<(StatusCode, Json<Deal>), ApiError> {
    user.require(WRITE_ROLES)?;
    let title = non_empty(&request.title).ok_or_else(|| ApiError::bad_request("title required"))?;

    let deal: Deal = sqlx::query_as(
        "INSERT INTO deals (title, contact_id, amount, stage, status) VALUES (?, ?, ?, ?, ?) RETURNING *",
    )
    .bind(title)
    .bind(request.contact_id)
    .bind(round2(request.amount.unwrap_or(0.0)))
    .bind(non_empty(&request.stage).unwrap_or("prospect"))
    .bind(non_empty(&request.status).unwrap_or("open"))
    .fetch_one(&state.db)
    .await?;

    tracing::info!(deal_id = deal.id, amount = deal.amount, "Created deal");
    Ok((StatusCode::CREATED, Json(deal)))
}

async fn update_deal(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<DealRequest>,
) -> Result<Json<Deal>, ApiError> {
    user.require(WRITE_ROLES)?;
    let existing: Deal = find(&state, "deals", id, "Deal not found").await?;

    let deal: Deal = sqlx::query_as(
        "UPDATE deals SET title = ?, contact_id = ?, amount = ?, stage = ?, status = ? WHERE id = ? RETURNING *",
    )
    .bind(non_empty(&request.title).unwrap_or(&existing.title))
    .bind(request.contact_id.or(existing.contact_id))
    .bind(request.amount.map(round2).unwrap_or(existing.amount))
    .bind(non_empty(&request.stage).unwrap_or(&existing.stage))
    .bind(non_empty(&request.status).unwrap_or(&existing.status))
    .bind(id)
    .fetch_one(&state.db)
    .await?;
    Ok(Json(deal))
}

async fn delete_deal(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    user.require(DELETE_ROLES)?;
    delete_row(&state, "deals", id, "Deal not found").await?;
    Ok(Json(json!({"message": "Deal deleted"})))
}

// -------------------------------------------------------------------------
// Tasks
// -------------------------------------------------------------------------

async fn list_tasks(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> Result<Json<Page<Task>>, ApiError> {
    user.require(READ_ROLES)?;
    let window = PageWindow::new(query.page, query.per_page, DEFAULT_PER_PAGE);
    let page = fetch_page(
        &state.db,
        "tasks",
        "*",
        "tasks",
        &Filters::new(),
        "due_date IS NULL, due_date ASC, id ASC",
        window,
    )
    .await?;
    Ok(Json(page))
}

async fn get_task(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Task>, ApiError> {
    user.require(READ_ROLES)?;
    Ok(Json(find(&state, "tasks", id, "Task not found").await?))
}

async fn create_task(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<TaskRequest>,
) -> Result<(StatusCode, Json<Task>), ApiError> {
    user.require(WRITE_ROLES)?;
    let title = non_empty(&request.title).ok_or_else(|| ApiError::bad_request("title required"))?;
    if let Some(related_type) = non_empty(&request.related_type) {
        validate_one_of(related_type, RELATED_TYPES, "related_type")
            .map_err(|e| ApiError::validation_field("related_type", e))?;
    }

    let task: Task = sqlx::query_as(
        r#"INSERT INTO tasks (title, description, assigned_to, related_type, related_id, due_date, status)
           VALUES (?, ?, ?, ?, ?, ?, ?)
           RETURNING *"#,
    )
    .bind(title)
    .bind(&request.description)
    .bind(request.assigned_to)
    .bind(non_empty(&request.related_type))
    .bind(request.related_id)
    .bind(due_date(&request.due_date))
    .bind(non_empty(&request.status).unwrap_or("todo"))
    .fetch_one(&state.db)
    .await?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn update_task(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<TaskRequest>,
) -> Result<Json<Task>, ApiError> {
    user.require(WRITE_ROLES)?;
    let existing: Task = find(&state, "tasks", id, "Task not found").await?;

    let task: Task = sqlx::query_as(
        r#"UPDATE tasks SET title = ?, description = ?, assigned_to = ?, due_date = ?, status = ?
           WHERE id = ?
           RETURNING *"#,
    )
    .bind(non_empty(&request.title).unwrap_or(&existing.title))
    .bind(request.description.as_ref().or(existing.description.as_ref()))
    .bind(request.assigned_to.or(existing.assigned_to))
    .bind(due_date(&request.due_date).or(existing.due_date))
    .bind(non_empty(&request.status).unwrap_or(&existing.status))
    .bind(id)
    .fetch_one(&state.db)
    .await?;
    Ok(Json(task))
}

async fn delete_task(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    user.require(DELETE_ROLES)?;
    delete_row(&state, "tasks", id, "Task not found").await?;
    Ok(Json(json!({"message": "Task deleted"})))
}

// -------------------------------------------------------------------------
// Analytics
// -------------------------------------------------------------------------

async fn analytics(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<CrmAnalytics>, ApiError> {
    user.require(READ_ROLES)?;

    let (total_leads,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM leads").fetch_one(&state.db).await?;
    let (total_contacts,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM contacts").fetch_one(&state.db).await?;
    let (total_deals, open_deals, closed_deals): (i64, i64, i64) = sqlx::query_as(
        r#"SELECT COUNT(*),
                  COALESCE(SUM(CASE WHEN status = 'open' THEN 1 ELSE 0 END), 0),
                  COALESCE(SUM(CASE WHEN status = 'closed' THEN 1 ELSE 0 END), 0)
           FROM deals"#,
    )
    .fetch_one(&state.db)
    .await?;
    let pipeline: Vec<PipelineStage> =
        sqlx::query_as("SELECT stage, COUNT(*) AS count FROM deals GROUP BY stage ORDER BY stage")
            .fetch_all(&state.db)
            .await?;

    Ok(Json(CrmAnalytics {
        total_leads,
        total_contacts,
        total_deals,
        open_deals,
        closed_deals,
        pipeline,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Role;
    use crate::testing::{send, TestApp};
    use axum::http::Method;

    const BASE: &str = "/module/nexora-crm";

    #[test]
    fn test_due_date_normalization() {
        assert_eq!(due_date(&Some("2026-05-01".to_string())).as_deref(), Some("2026-05-01T00:00:00Z"));
        assert_eq!(
            due_date(&Some("2026-05-01T09:30:00+02:00".to_string())).as_deref(),
            Some("2026-05-01T07:30:00Z")
        );
        assert_eq!(due_date(&Some("next tuesday".to_string())), None);
        assert_eq!(due_date(&None), None);
    }

    #[tokio::test]
    async fn test_lead_contact_deal_flow() {
        let app = TestApp::new().await;
        let (_, admin) = app.user("root", Role::Admin).await;

        let res = send(&app.router, Method::POST, &format!("{}/api/leads", BASE), Some(&admin), Some(json!({}))).await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
        assert_eq!(res.body["error"], "name required");

        let res = send(
            &app.router,
            Method::POST,
            &format!("{}/api/leads", BASE),
            Some(&admin),
            Some(json!({"name": "Ada", "source": "web"})),
        )
        .await;
        assert_eq!(res.status, StatusCode::CREATED);
        assert_eq!(res.body["status"], "new");
        let lead = res.body["id"].as_i64().unwrap();

        let res = send(
            &app.router,
            Method::POST,
            &format!("{}/api/contacts", BASE),
            Some(&admin),
            Some(json!({"name": "Ada Lovelace", "lead_id": lead, "company": "Engines"})),
        )
        .await;
        let contact = res.body["id"].as_i64().unwrap();

        let res = send(
            &app.router,
            Method::POST,
            &format!("{}/api/deals", BASE),
            Some(&admin),
            Some(json!({"title": "Engine order", "contact_id": contact, "amount": "1250.50"})),
        )
        .await;
        assert_eq!(res.status, StatusCode::CREATED);
        assert_eq!(res.body["amount"], 1250.5);
        assert_eq!(res.body["stage"], "prospect");
        assert_eq!(res.body["status"], "open");
        let deal = res.body["id"].as_i64().unwrap();

        // Deleting parents nulls the references
        let res = send(&app.router, Method::DELETE, &format!("{}/api/leads/{}", BASE, lead), Some(&admin), None).await;
        assert_eq!(res.body["message"], "Lead deleted");
        let res = send(&app.router, Method::GET, &format!("{}/api/contacts/{}", BASE, contact), Some(&admin), None).await;
        assert_eq!(res.body["lead_id"], Value::Null);

        send(&app.router, Method::DELETE, &format!("{}/api/contacts/{}", BASE, contact), Some(&admin), None).await;
        let res = send(&app.router, Method::GET, &format!("{}/api/deals/{}", BASE, deal), Some(&admin), None).await;
        assert_eq!(res.body["contact_id"], Value::Null);
        assert_eq!(res.body["title"], "Engine order");
    }

    #[tokio::test]
    async fn test_deals_pagination_and_stage_filter() {
        let app = TestApp::new().await;
        let (_, token) = app.user("mgr", Role::Manager).await;
        for n in 0..25 {
            let stage = if n % 5 == 0 { "won" } else { "prospect" };
            send(
                &app.router,
                Method::POST,
                &format!("{}/api/deals", BASE),
                Some(&token),
                Some(json!({"title": format!("Deal {}", n), "amount": n, "stage": stage})),
            )
            .await;
        }

        let res = send(&app.router, Method::GET, &format!("{}/api/deals", BASE), Some(&token), None).await;
        assert_eq!(res.body["total"], 25);
        assert_eq!(res.body["pages"], 2);
        assert_eq!(res.body["deals"].as_array().unwrap().len(), 20);
        // Newest first
        assert_eq!(res.body["deals"][0]["title"], "Deal 24");

        let res = send(&app.router, Method::GET, &format!("{}/api/deals?stage=won", BASE), Some(&token), None).await;
        assert_eq!(res.body["total"], 5);

        let res = send(&app.router, Method::GET, &format!("{}/api/crm/analytics", BASE), Some(&token), None).await;
        assert_eq!(res.body["total_deals"], 25);
        assert_eq!(res.body["open_deals"], 25);
        assert_eq!(res.body["closed_deals"], 0);
        assert_eq!(
            res.body["pipeline"],
            json!([{"stage": "prospect", "count": 20}, {"stage": "won", "count": 5}])
        );
    }

    #[tokio::test]
    async fn test_tasks_order_by_due_date() {
        let app = TestApp::new().await;
        let (_, token) = app.user("mgr", Role::Manager).await;
        for (title, due) in [("none", None), ("late", Some("2026-12-01")), ("soon", Some("2026-01-15")), ("bad", Some("whenever"))] {
            let res = send(
                &app.router,
                Method::POST,
                &format!("{}/api/tasks", BASE),
                Some(&token),
                Some(json!({"title": title, "due_date": due, "related_type": "lead", "related_id": 1})),
            )
            .await;
            assert_eq!(res.status, StatusCode::CREATED);
            assert_eq!(res.body["status"], "todo");
        }

        let res = send(&app.router, Method::GET, &format!("{}/api/tasks", BASE), Some(&token), None).await;
        let titles: Vec<&str> = res.body["tasks"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["title"].as_str().unwrap())
            .collect();
        assert_eq!(titles, vec!["soon", "late", "none", "bad"]);

        let res = send(
            &app.router,
            Method::POST,
            &format!("{}/api/tasks", BASE),
            Some(&token),
            Some(json!({"title": "x", "related_type": "invoice"})),
        )
        .await;
        assert_eq!(res.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_permissions() {
        let app = TestApp::new().await;
        let (_, manager) = app.user("mgr", Role::Manager).await;
        let (_, viewer) = app.user("viewer", Role::User).await;

        let res = send(
            &app.router,
            Method::POST,
            &format!("{}/api/leads", BASE),
            Some(&viewer),
            Some(json!({"name": "x"})),
        )
        .await;
        assert_eq!(res.status, StatusCode::FORBIDDEN);

        let res = send(
            &app.router,
            Method::POST,
            &format!("{}/api/leads", BASE),
            Some(&manager),
            Some(json!({"name": "x"})),
        )
        .await;
        let uri = format!("{}/api/leads/{}", BASE, res.body["id"]);
        let res = send(&app.router, Method::DELETE, &uri, Some(&manager), None).await;
        assert_eq!(res.status, StatusCode::FORBIDDEN);

        let res = send(&app.router, Method::GET, &uri, Some(&viewer), None).await;
        assert_eq!(res.status, StatusCode::OK);

        let res = send(&app.router, Method::GET, &format!("{}/api/leads/77", BASE), Some(&viewer), None).await;
        assert_eq!(res.status, StatusCode::NOT_FOUND);
    }
}
