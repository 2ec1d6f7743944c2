//! Calendars, weekly availability slots and client appointments.

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::sync::Arc;

use super::Module;
use crate::api::auth::{AuthUser, DELETE_ROLES, READ_ROLES, WRITE_ROLES};
use crate::api::error::{ApiError, ApiJson, ApiPath, ApiQuery, ValidationErrorBuilder};
use crate::api::validation::{non_empty, validate_day_of_week, validate_one_of, validate_slot_times};
use crate::db::{
    fetch_filtered, Appointment, AppointmentQuery, AppointmentRequest, Availability, Calendar,
    CreateCalendarRequest, CreateTimeSlotRequest, DbPool, Filters, TimeSlot, UpdateTimeSlotRequest,
    APPOINTMENT_STATUSES,
};
use crate::utils::{format_utc, parse_datetime};
use crate::AppState;

pub struct Bookings;

impl Module for Bookings {
    fn name(&self) -> &'static str {
        "nexora-bookings"
    }

    fn description(&self) -> &'static str {
        "Calendars, time slots and appointment scheduling"
    }

    fn icon(&self) -> &'static str {
        "📅"
    }

    fn endpoints(&self) -> &'static [&'static str] {
        &["/api/items", "/api/bookings/calendars", "/api/bookings/appointments"]
    }

    fn routes(&self) -> Router<Arc<AppState>> {
        Router::new()
            .route("/api/bookings/calendars", get(list_calendars).post(create_calendar))
            .route("/api/bookings/calendars/:id", get(get_calendar))
            .route(
                "/api/bookings/calendars/:id/time-slots",
                get(list_time_slots).post(create_time_slot),
            )
            .route("/api/bookings/calendars/:id/availability", get(availability))
            .route("/api/bookings/time-slots/:id", put(update_time_slot))
            .route(
                "/api/bookings/appointments",
                get(list_appointments).post(create_appointment),
            )
            .route(
                "/api/bookings/appointments/:id",
                get(get_appointment)
                    .put(update_appointment)
                    .delete(delete_appointment),
            )
    }
}

/// Short public reference for an appointment
pub fn new_appointment_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..12].to_string()
}

async fn find_calendar(db: &DbPool, id: i64) -> Result<Calendar, ApiError> {
    sqlx::query_as("SELECT * FROM booking_calendars WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Calendar not found"))
}

// -------------------------------------------------------------------------
// Calendars and slots
// -------------------------------------------------------------------------

async fn list_calendars(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Json<Vec<Calendar>>, ApiError> {
    user.require(READ_ROLES)?;
    let calendars = sqlx::query_as("SELECT * FROM booking_calendars ORDER BY created_at DESC, id DESC")
        .fetch_all(&state.db)
        .await?;
    Ok(Json(calendars))
}

async fn get_calendar(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Calendar>, ApiError> {
    user.require(READ_ROLES)?;
    Ok(Json(find_calendar(&state.db, id).await?))
}

async fn create_calendar(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<CreateCalendarRequest>,
) -> Result<(StatusCode, Json<Calendar>), ApiError> {
    user.require(WRITE_ROLES)?;
    let name = non_empty(&request.name).ok_or_else(|| ApiError::bad_request("name required"))?;

    let calendar: Calendar = sqlx::query_as(
        "INSERT INTO booking_calendars (name, owner_id, description, timezone) VALUES (?, ?, ?, ?) RETURNING *",
    )
    .bind(name)
    .bind(request.owner_id.unwrap_or(user.id))
    .bind(&request.description)
    .bind(non_empty(&request.timezone).unwrap_or("UTC"))
    .fetch_one(&state.db)
    .await?;
    Ok((StatusCode::CREATED, Json(calendar)))
}

async fn list_time_slots(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Vec<TimeSlot>>, ApiError> {
    user.require(READ_ROLES)?;
    find_calendar(&state.db, id).await?;
    let slots = sqlx::query_as(
        "SELECT * FROM booking_time_slots WHERE calendar_id = ? ORDER BY day_of_week, start_time",
    )
    .bind(id)
    .fetch_all(&state.db)
    .await?;
    Ok(Json(slots))
}

async fn create_time_slot(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<CreateTimeSlotRequest>,
) -> Result<(StatusCode, Json<TimeSlot>), ApiError> {
    user.require(WRITE_ROLES)?;
    find_calendar(&state.db, id).await?;

    let (Some(day), Some(start), Some(end)) = (
        request.day_of_week,
        non_empty(&request.start_time),
        non_empty(&request.end_time),
    ) else {
        return Err(ApiError::bad_request("day_of_week, start_time, end_time required"));
    };

    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("day_of_week", validate_day_of_week(day))
        .check("end_time", validate_slot_times(start, end));
    errors.finish()?;

    let slot: TimeSlot = sqlx::query_as(
        r#"INSERT INTO booking_time_slots (calendar_id, day_of_week, start_time, end_time, is_available)
           VALUES (?, ?, ?, ?, ?)
           RETURNING *"#,
    )
    .bind(id)
    .bind(day)
    .bind(start)
    .bind(end)
    .bind(request.is_available.unwrap_or(true))
    .fetch_one(&state.db)
    .await?;
    Ok((StatusCode::CREATED, Json(slot)))
}

async fn update_time_slot(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<UpdateTimeSlotRequest>,
) -> Result<Json<TimeSlot>, ApiError> {
    user.require(WRITE_ROLES)?;
    let slot: TimeSlot = sqlx::query_as(
        r#"UPDATE booking_time_slots SET is_available = COALESCE(?, is_available)
           WHERE id = ?
           RETURNING *"#,
    )
    .bind(request.is_available)
    .bind(id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::not_found("Time slot not found"))?;
    Ok(Json(slot))
}

async fn availability(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Availability>, ApiError> {
    user.require(READ_ROLES)?;
    find_calendar(&state.db, id).await?;
    let available_slots = sqlx::query_as(
        r#"SELECT * FROM booking_time_slots
           WHERE calendar_id = ? AND is_available = 1
           ORDER BY day_of_week, start_time"#,
    )
    .bind(id)
    .fetch_all(&state.db)
    .await?;
    Ok(Json(Availability {
        calendar_id: id,
        available_slots,
    }))
}

// -------------------------------------------------------------------------
// Appointments
// -------------------------------------------------------------------------

fn check_window(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<(), ApiError> {
    if end <= start {
        return Err(ApiError::bad_request("end_time must be after start_time"));
    }
    Ok(())
}

fn check_status(status: Option<&str>) -> Result<(), ApiError> {
    match status {
        Some(status) => validate_one_of(status, APPOINTMENT_STATUSES, "status")
            .map_err(|msg| ApiError::validation_field("status", msg)),
        None => Ok(()),
    }
}

async fn find_appointment(db: &DbPool, id: i64) -> Result<Appointment, ApiError> {
    sqlx::query_as("SELECT * FROM booking_appointments WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| ApiError::not_found("Appointment not found"))
}

async fn list_appointments(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiQuery(query): ApiQuery<AppointmentQuery>,
) -> Result<Json<Vec<Appointment>>, ApiError> {
    user.require(READ_ROLES)?;
    let mut filters = Filters::new();
    filters
        .eq("calendar_id", query.calendar_id)
        .eq("status", query.status.as_deref());
    let appointments = fetch_filtered(
        &state.db,
        "*",
        "booking_appointments",
        &filters,
        "start_time ASC, id",
    )
    .await?;
    Ok(Json(appointments))
}

async fn get_appointment(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Appointment>, ApiError> {
    user.require(READ_ROLES)?;
    Ok(Json(find_appointment(&state.db, id).await?))
}

async fn create_appointment(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiJson(request): ApiJson<AppointmentRequest>,
) -> Result<(StatusCode, Json<Appointment>), ApiError> {
    user.require(READ_ROLES)?;

    let (Some(calendar_id), Some(title), Some(start), Some(end)) = (
        request.calendar_id,
        non_empty(&request.title),
        non_empty(&request.start_time),
        non_empty(&request.end_time),
    ) else {
        return Err(ApiError::bad_request(
            "calendar_id, title, start_time, end_time required",
        ));
    };
    find_calendar(&state.db, calendar_id).await?;

    let (Some(start), Some(end)) = (parse_datetime(start), parse_datetime(end)) else {
        return Err(ApiError::bad_request("invalid datetime format"));
    };
    check_window(start, end)?;
    let status = non_empty(&request.status).unwrap_or("pending");
    check_status(Some(status))?;

    let appointment: Appointment = sqlx::query_as(
        r#"INSERT INTO booking_appointments
           (appointment_id, calendar_id, client_name, client_email, client_phone, title,
            description, start_time, end_time, status, location, notes)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
           RETURNING *"#,
    )
    .bind(new_appointment_id())
    .bind(calendar_id)
    .bind(&request.client_name)
    .bind(&request.client_email)
    .bind(&request.client_phone)
    .bind(title)
    .bind(&request.description)
    .bind(format_utc(start))
    .bind(format_utc(end))
    .bind(status)
    .bind(&request.location)
    .bind(&request.notes)
    .fetch_one(&state.db)
    .await?;

    tracing::info!(
        appointment = %appointment.appointment_id,
        calendar_id,
        start = %appointment.start_time,
        "Booked appointment"
    );
    Ok((StatusCode::CREATED, Json(appointment)))
}

async fn update_appointment(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
    ApiJson(request): ApiJson<AppointmentRequest>,
) -> Result<Json<Appointment>, ApiError> {
    user.require(WRITE_ROLES)?;
    let existing = find_appointment(&state.db, id).await?;
    let status = non_empty(&request.status);
    check_status(status)?;

    // Unparseable datetimes keep the stored value
    let start = non_empty(&request.start_time)
        .and_then(parse_datetime)
        .or_else(|| parse_datetime(&existing.start_time));
    let end = non_empty(&request.end_time)
        .and_then(parse_datetime)
        .or_else(|| parse_datetime(&existing.end_time));
    if let (Some(start), Some(end)) = (start, end) {
        check_window(start, end)?;
    }

    let appointment: Appointment = sqlx::query_as(
        r#"UPDATE booking_appointments
           SET client_name = ?, client_email = ?, client_phone = ?, title = ?, description = ?,
               location = ?, notes = ?, status = ?, start_time = ?, end_time = ?
           WHERE id = ?
           RETURNING *"#,
    )
    .bind(request.client_name.as_ref().or(existing.client_name.as_ref()))
    .bind(request.client_email.as_ref().or(existing.client_email.as_ref()))
    .bind(request.client_phone.as_ref().or(existing.client_phone.as_ref()))
    .bind(non_empty(&request.title).unwrap_or(&existing.title))
    .bind(request.description.as_ref().or(existing.description.as_ref()))
    .bind(request.location.as_ref().or(existing.location.as_ref()))
    .bind(request.notes.as_ref().or(existing.notes.as_ref()))
    .bind(status.unwrap_or(&existing.status))
    .bind(start.map(format_utc).unwrap_or_else(|| existing.start_time.clone()))
    .bind(end.map(format_utc).unwrap_or_else(|| existing.end_time.clone()))
    .bind(id)
    .fetch_one(&state.db)
    .await?;
    Ok(Json(appointment))
}

async fn delete_appointment(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    ApiPath(id): ApiPath<i64>,
) -> Result<Json<Value>, ApiError> {
    user.require(DELETE_ROLES)?;
    let result = sqlx::query("DELETE FROM booking_appointments WHERE id = ?")
        .bind(id)
        .execute(&state.db)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ApiError::not_found("Appointment not found"));
    }
    Ok(Json(json!({"message": "Appointment deleted"})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Role;
    use crate::testing::{send, TestApp};
    use axum::http::Method;

    const BASE: &str = "/module/nexora-bookings/api/bookings";

    async fn calendar(app: &TestApp, token: &str) -> i64 {
        let res = send(
            &app.router,
            Method::POST,
            &format!("{}/calendars", BASE),
            Some(token),
            Some(json!({"name": "Clinic"})),
        )
        .await;
        assert_eq!(res.status, StatusCode::CREATED);
        res.body["id"].as_i64().unwrap()
    }

    #[test]
    fn test_appointment_id_shape() {
        let id = new_appointment_id();
        assert_eq!(id.len(), 12);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, new_appointment_id());
    }

    #[tokio::test]
    async fn test_calendar_defaults_and_slots() {
        let app = TestApp::new().await;
        let (manager_id, manager) = app.user("mgr", Role::Manager).await;
        let cal = calendar(&app, &manager).await;

        let res = send(&app.router, Method::GET, &format!("{}/calendars/{}", BASE, cal), Some(&manager), None).await;
        assert_eq!(res.body["owner_id"], manager_id);
        assert_eq!(res.body["timezone"], "UTC");

        let slots = format!("{}/calendars/{}/time-slots", BASE, cal);
        let res = send(&app.router, Method::POST, &slots, Some(&manager), Some(json!({"start_time": "09:00"}))).await;
        assert_eq!(res.body["error"], "day_of_week, start_time, end_time required");

        for (day, start, end) in [(7, "09:00", "10:00"), (1, "9:00", "10:00"), (1, "10:00", "09:00")] {
            let res = send(
                &app.router,
                Method::POST,
                &slots,
                Some(&manager),
                Some(json!({"day_of_week": day, "start_time": start, "end_time": end})),
            )
            .await;
            assert_eq!(res.status, StatusCode::BAD_REQUEST, "{} {}-{}", day, start, end);
        }

        let mut ids = Vec::new();
        for day in [0, 2] {
            let res = send(
                &app.router,
                Method::POST,
                &slots,
                Some(&manager),
                Some(json!({"day_of_week": day, "start_time": "09:00", "end_time": "17:00"})),
            )
            .await;
            assert_eq!(res.body["is_available"], true);
            ids.push(res.body["id"].as_i64().unwrap());
        }

        let res = send(
            &app.router,
            Method::PUT,
            &format!("{}/time-slots/{}", BASE, ids[0]),
            Some(&manager),
            Some(json!({"is_available": false})),
        )
        .await;
        assert_eq!(res.body["is_available"], false);

        let res = send(&app.router, Method::GET, &format!("{}/calendars/{}/availability", BASE, cal), Some(&manager), None).await;
        assert_eq!(res.body["calendar_id"], cal);
        let available = res.body["available_slots"].as_array().unwrap();
        assert_eq!(available.len(), 1);
        assert_eq!(available[0]["day_of_week"], 2);
    }

    #[tokio::test]
    async fn test_appointment_validation_and_update() {
        let app = TestApp::new().await;
        let (_, manager) = app.user("mgr", Role::Manager).await;
        let cal = calendar(&app, &manager).await;
        let uri = format!("{}/appointments", BASE);

        let res = send(&app.router, Method::POST, &uri, Some(&manager), Some(json!({"title": "Checkup"}))).await;
        assert_eq!(res.body["error"], "calendar_id, title, start_time, end_time required");

        let res = send(
            &app.router,
            Method::POST,
            &uri,
            Some(&manager),
            Some(json!({"calendar_id": cal, "title": "Checkup", "start_time": "tomorrow", "end_time": "later"})),
        )
        .await;
        assert_eq!(res.body["error"], "invalid datetime format");

        let res = send(
            &app.router,
            Method::POST,
            &uri,
            Some(&manager),
            Some(json!({
                "calendar_id": cal, "title": "Checkup",
                "start_time": "2030-05-01T10:00:00", "end_time": "2030-05-01T09:00:00"
            })),
        )
        .await;
        assert_eq!(res.body["error"], "end_time must be after start_time");

        let res = send(
            &app.router,
            Method::POST,
            &uri,
            Some(&manager),
            Some(json!({
                "calendar_id": cal, "title": "Checkup", "client_name": "Ada",
                "start_time": "2030-05-01T11:00:00+02:00", "end_time": "2030-05-01T10:00:00"
            })),
        )
        .await;
        assert_eq!(res.status, StatusCode::CREATED);
        assert_eq!(res.body["start_time"], "2030-05-01T09:00:00Z");
        assert_eq!(res.body["status"], "pending");
        assert_eq!(res.body["appointment_id"].as_str().unwrap().len(), 12);
        let id = res.body["id"].as_i64().unwrap();

        let res = send(
            &app.router,
            Method::PUT,
            &format!("{}/{}", uri, id),
            Some(&manager),
            Some(json!({"status": "confirmed", "start_time": "not a date", "location": "Room 4"})),
        )
        .await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.body["status"], "confirmed");
        assert_eq!(res.body["start_time"], "2030-05-01T09:00:00Z");
        assert_eq!(res.body["client_name"], "Ada");

        let res = send(&app.router, Method::GET, &format!("{}?status=confirmed", uri), Some(&manager), None).await;
        assert_eq!(res.body.as_array().unwrap().len(), 1);
        let res = send(&app.router, Method::GET, &format!("{}?calendar_id=999", uri), Some(&manager), None).await;
        assert_eq!(res.body.as_array().unwrap().len(), 0);
    }
}
