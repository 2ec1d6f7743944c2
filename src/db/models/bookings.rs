//! Booking models: calendars, weekly time slots and appointments.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const APPOINTMENT_STATUSES: &[&str] = &["pending", "confirmed", "cancelled", "completed"];

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Calendar {
    pub id: i64,
    pub name: String,
    pub owner_id: Option<i64>,
    pub description: Option<String>,
    pub timezone: String,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateCalendarRequest {
    pub name: Option<String>,
    pub owner_id: Option<i64>,
    pub description: Option<String>,
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TimeSlot {
    pub id: i64,
    pub calendar_id: i64,
    /// 0 = Monday .. 6 = Sunday
    pub day_of_week: i64,
    pub start_time: String,
    pub end_time: String,
    pub is_available: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateTimeSlotRequest {
    pub day_of_week: Option<i64>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub is_available: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTimeSlotRequest {
    pub is_available: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct Availability {
    pub calendar_id: i64,
    pub available_slots: Vec<TimeSlot>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Appointment {
    pub id: i64,
    /// Public reference, 12 lowercase hex characters
    pub appointment_id: String,
    pub calendar_id: i64,
    pub client_name: Option<String>,
    pub client_email: Option<String>,
    pub client_phone: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub start_time: String,
    pub end_time: String,
    pub status: String,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct AppointmentQuery {
    pub calendar_id: Option<i64>,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AppointmentRequest {
    pub calendar_id: Option<i64>,
    pub client_name: Option<String>,
    pub client_email: Option<String>,
    pub client_phone: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub status: Option<String>,
    pub location: Option<String>,
    pub notes: Option<String>,
}
