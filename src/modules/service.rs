//! Field service jobs: technicians, job tickets, dispatch and workload.

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
    fetch_filtered, AssignJobRequest, DbPool, Filters, JobStatusRequest, ServiceAnalytics,
    ServiceJob, ServiceJobQuery, ServiceJobRequest, ServiceJobResponse, StatusCount, Technician,
    TechnicianLoad, TechnicianRequest, JOB_PRIORITIES, JOB_STATUSES,
};
use crate::utils::{format_utc, parse_datetime};
use crate::AppState;

pub struct Service;

impl Module for Service {
    fn name(&self) -> &'static str {
        "nexora-service"
    }

    fn description(&self) -> &'static str {
        "Field service jobs, technicians and dispatch"
    }

    fn icon(&self) -> &'static str {
        "🔧"
    }

    fn endpoints(&self) -> &'static [&'static str] {
        &[
            "/api/items",
            "/api/service/technicians",
            "/api/service/jobs",
            "/api/service/analytics",
        ]
    }

    fn routes(&self) -> Router<Arc<AppState>> {
        Router::new()
            .route(
                "/api/service/technicians",
                get(list_technicians).post(create_technician),
            )
            .route(
                "/api/service/technicians/:id",
                get(get_technician).put(update_technician).delete(delete_technician),
            )
            .route("/api/service/jobs", get(list_jobs).post(create_job))
            .route(
                "/api/service/jobs/:id",
                get(get_job).put(update_job).delete(delete_job),
            )
            .route("/api/service/jobs/:id/assign", post(assign_job))
            .route("/api/service/jobs/:id/status", post(change_status))
            .route("/api/service/analytics", get(analytics))
    }
}

fn check_job_fields(priority: Option<&str>, status: Option<&str>) -> Result<(), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    if let Some(priority) = priority {
        errors.check("priority", validate_one_of(priority, JOB_PRIORITIES, "priority"));
    }
    if let Some(status) = status {
        errors.check("status", validate_one_of(status, JOB_STATUSES, "status"));
    }
    errors.finish()
}

/// Scheduled dates are stored in UTC; unparseable input is dropped
fn scheduled(raw: &Option<String>) -> Option<String> {
    non_empty(raw).and_then(parse_datetime).map(format_utc)
}

// -------------------------------------------------------------------------
// Technicians
// -------------------------------------------------------------------------

async fn find_technician(db: &DbPool, id: i64) -> Result<Technician, ApiError> {
    sqlx::query_as("SELECT * FROM service_technicians WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("technician not found"))
}

async fn list_technicians(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<Technician>>, ApiError> {
    user.require(READ_ROLES)?;
    let technicians = sqlx::query_as("SELECT * FROM service_technicians ORDER BY name")
        .fetch_all(&state.db)
        .await?;
    Ok(Json(technicians))
}

async fn get_technician(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Technician>, ApiError> {
    user.require(READ_ROLES)?;
    Ok(Json(find_technician(&state.db, id).await?))
}

async fn create_technician(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<TechnicianRequest>,
) -> Result<(StatusCode, Json<Technician>), ApiError> {
    user.require(WRITE_ROLES)?;
    let name = non_empty(&request.name).ok_or_else(|| ApiError::bad_request("name required"))?;

    let technician: Technician = sqlx::query_as(
        r#"INSERT INTO service_technicians (name, phone, email, skills, active)
           VALUES (?, ?, ?, ?, ?)
           RETURNING *"#,
    )
    .bind(name)
    .bind(&request.phone)
    .bind(&request.email)
    .bind(&request.skills)
    .bind(request.active.unwrap_or(true))
    .fetch_one(&state.db)
    .await?;
    Ok((StatusCode::CREATED, Json(technician)))
}

async fn update_technician(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<TechnicianRequest>,
) -> Result<Json<Technician>, ApiError> {
    user.require(WRITE_ROLES)?;
    let existing = find_technician(&state.db, id).await?;

    let technician: Technician = sqlx::query_as(
        r#"UPDATE service_technicians
           SET name = ?, phone = ?, email = ?, skills = ?, active = ?
           WHERE id = ?
           RETURNING *"#,
    )
    .bind(non_empty(&request.name).unwrap_or(&existing.name))
    .bind(request.phone.as_ref().or(existing.phone.as_ref()))
    .bind(request.email.as_ref().or(existing.email.as_ref()))
    .bind(request.skills.as_ref().or(existing.skills.as_ref()))
    .bind(request.active.unwrap_or(existing.active))
    .bind(id)
    .fetch_one(&state.db)
    .await?;
    Ok(Json(technician))
}

async fn delete_technician(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    user.require(DELETE_ROLES)?;
    // Their jobs go back to unassigned
    let result = sqlx::query("DELETE FROM service_technicians WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("technician not found"));
    }
    Ok(Json(json!({"message": "technician deleted"})))
}

// -------------------------------------------------------------------------
// Jobs
// -------------------------------------------------------------------------

async fn find_job(db: &DbPool, id: i64) -> Result<ServiceJob, ApiError> {
    sqlx::query_as("SELECT * FROM service_jobs WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("job not found"))
}

async fn job_response(db: &DbPool, job: ServiceJob) -> Result<ServiceJobResponse, ApiError> {
    let technician = match job.technician_id {
        Some(id) => sqlx::query_as("SELECT * FROM service_technicians WHERE id = ?")
            .bind(id)
            .fetch_optional(db)
            .await?,
        None => None,
    };
    Ok(ServiceJobResponse::new(job, technician))
}

async fn list_jobs(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiQuery(query): ApiQuery<ServiceJobQuery>,
) -> Result<Json<Vec<ServiceJobResponse>>, ApiError> {
    user.require(READ_ROLES)?;

    let mut filters = Filters::new();
    filters
        .eq("status", query.status.as_deref())
        .eq("technician_id", query.technician_id);
    let jobs: Vec<ServiceJob> = fetch_filtered(
        &state.db,
        "*",
        "service_jobs",
        &filters,
        "created_at DESC, id DESC",
    )
    .await?;

    let technicians: HashMap<i64, Technician> =
        sqlx::query_as::<_, Technician>("SELECT * FROM service_technicians")
            .fetch_all(&state.db)
            .await?
            .into_iter()
            .map(|t| (t.id, t))
            .collect();

    let jobs = jobs
        .into_iter()
        .map(|job| {
            let technician = job.technician_id.and_then(|id| technicians.get(&id).cloned());
            ServiceJobResponse::new(job, technician)
        })
        .collect();
    Ok(Json(jobs))
}

async fn get_job(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<ServiceJobResponse>, ApiError> {
    user.require(READ_ROLES)?;
    let job = find_job(&state.db, id).await?;
    Ok(Json(job_response(&state.db, job).await?))
}

async fn create_job(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<ServiceJobRequest>,
) -> Result<(StatusCode, Json<ServiceJobResponse>), ApiError> {
    user.require(WRITE_ROLES)?;
    let title = non_empty(&request.title).ok_or_else(|| ApiError::bad_request("title required"))?;
    let priority = non_empty(&request.priority).unwrap_or("medium");
    let status = non_empty(&request.status).unwrap_or("open");
    check_job_fields(Some(priority), Some(status))?;

    let job: ServiceJob = sqlx::query_as(
        r#"INSERT INTO service_jobs
           (title, description, customer_name, customer_address, scheduled_date, priority, status, technician_id)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?)
           RETURNING *"#,
    )
    .bind(title)
    .bind(&request.description)
    .bind(&request.customer_name)
    .bind(&request.customer_address)
    .bind(scheduled(&request.scheduled_date))
    .bind(priority)
    .bind(status)
    .bind(request.technician_id)
    .fetch_one(&state.db)
    .await?;

    tracing::info!(job_id = job.id, priority = %job.priority, "Opened service job");
    Ok((StatusCode::CREATED, Json(job_response(&state.db, job).await?)))
}

async fn update_job(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<ServiceJobRequest>,
) -> Result<Json<ServiceJobResponse>, ApiError> {
    user.require(WRITE_ROLES)?;
    let existing = find_job(&state.db, id).await?;
    let priority = non_empty(&request.priority);
    let status = non_empty(&request.status);
    check_job_fields(priority, status)?;

    let job: ServiceJob = sqlx::query_as(
        r#"UPDATE service_jobs
           SET title = ?, description = ?, customer_name = ?, customer_address = ?,
               scheduled_date = ?, priority = ?, status = ?, technician_id = ?
           WHERE id = ?
           RETURNING *"#,
    )
    .bind(non_empty(&request.title).unwrap_or(&existing.title))
    .bind(request.description.as_ref().or(existing.description.as_ref()))
    .bind(request.customer_name.as_ref().or(existing.customer_name.as_ref()))
    .bind(request.customer_address.as_ref().or(existing.customer_address.as_ref()))
    .bind(scheduled(&request.scheduled_date).or(existing.scheduled_date))
    .bind(priority.unwrap_or(&existing.priority))
    .bind(status.unwrap_or(&existing.status))
    .bind(request.technician_id.or(existing.technician_id))
    .bind(id)
    .fetch_one(&state.db)
    .await?;
    Ok(Json(job_response(&state.db, job).await?))
}

async fn delete_job(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    user.require(DELETE_ROLES)?;
    let result = sqlx::query("DELETE FROM service_jobs WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("job not found"));
    }
    Ok(Json(json!({"message": "job deleted"})))
}

async fn assign_job(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<AssignJobRequest>,
) -> Result<Json<ServiceJobResponse>, ApiError> {
    user.require(WRITE_ROLES)?;
    find_job(&state.db, id).await?;

    let technician_id = request
        .technician_id
        .ok_or_else(|| ApiError::bad_request("technician_id required"))?;
    let status = non_empty(&request.status).unwrap_or("assigned");
    check_job_fields(None, Some(status))?;
    find_technician(&state.db, technician_id).await?;

    let job: ServiceJob = sqlx::query_as(
        "UPDATE service_jobs SET technician_id = ?, status = ? WHERE id = ? RETURNING *",
    )
    .bind(technician_id)
    .bind(status)
    .bind(id)
    .fetch_one(&state.db)
    .await?;

    tracing::info!(job_id = id, technician_id, "Dispatched service job");
    Ok(Json(job_response(&state.db, job).await?))
}

async fn change_status(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<JobStatusRequest>,
) -> Result<Json<ServiceJobResponse>, ApiError> {
    user.require(READ_ROLES)?;
    find_job(&state.db, id).await?;
    let status = non_empty(&request.status).ok_or_else(|| ApiError::bad_request("status required"))?;
    check_job_fields(None, Some(status))?;

    let job: ServiceJob = sqlx::query_as("UPDATE service_jobs SET status = ? WHERE id = ? RETURNING *")
        .bind(status)
        .bind(id)
        .fetch_one(&state.db)
        .await?;
    Ok(Json(job_response(&state.db, job).await?))
}

async fn analytics(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<ServiceAnalytics>, ApiError> {
    user.require(READ_ROLES)?;

    let total_jobs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM service_jobs")
        .fetch_one(&state.db)
        .await?;
    let by_status: Vec<StatusCount> = sqlx::query_as(
        "SELECT status, COUNT(*) AS count FROM service_jobs GROUP BY status ORDER BY status",
    )
    .fetch_all(&state.db)
    .await?;
    let assignments: Vec<TechnicianLoad> = sqlx::query_as(
        r#"SELECT t.id AS technician_id, t.name AS name, COUNT(j.id) AS count
           FROM service_technicians t
           LEFT JOIN service_jobs j ON j.technician_id = t.id
           GROUP BY t.id, t.name
           ORDER BY t.name, t.id"#,
    )
    .fetch_all(&state.db)
    .await?;

    Ok(Json(ServiceAnalytics {
        total_jobs,
        by_status,
        assignments,
    }))
}
