//! Input validation for API requests.
//!
//! This module provides validation functions for API request data,
//! ensuring all inputs meet the required format and constraints.
//!
//! For collecting multiple validation errors and returning them as an ApiError,
//! use the `ValidationErrorBuilder` from the `error` module.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Loose email check: something@something.tld
    static ref EMAIL_REGEX: Regex = Regex::new(
        r"^[^@\s]+@[^@\s]+\.[^@\s]+$"
    ).unwrap();

    /// Usernames: letters, digits, dot, dash and underscore
    static ref USERNAME_REGEX: Regex = Regex::new(
        r"^[A-Za-z0-9._-]+$"
    ).unwrap();

    /// 24-hour wall clock time, HH:MM
    static ref HHMM_REGEX: Regex = Regex::new(
        r"^([01]\d|2[0-3]):[0-5]\d$"
    ).unwrap();

    /// Characters kept when storing an uploaded file name
    static ref UNSAFE_FILENAME_CHARS: Regex = Regex::new(
        r"[^A-Za-z0-9._-]"
    ).unwrap();
}

/// Extensions accepted for expense attachments
pub const ALLOWED_ATTACHMENT_EXTENSIONS: &[&str] =
    &["png", "jpg", "jpeg", "gif", "pdf", "doc", "docx", "xls", "xlsx"];

/// The trimmed value if present and not blank
pub fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

pub fn validate_username(username: &str) -> Result<(), String> {
    if username.len() > 80 {
        return Err("Username is too long (max 80 characters)".to_string());
    }
    if !USERNAME_REGEX.is_match(username) {
        return Err(
            "Username may only contain letters, digits, '.', '-' and '_'".to_string(),
        );
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), String> {
    if email.len() > 120 {
        return Err("Email is too long (max 120 characters)".to_string());
    }
    if !EMAIL_REGEX.is_match(email) {
        return Err("Invalid email format".to_string());
    }
    Ok(())
}

/// Validate a value against a closed set of options
pub fn validate_one_of(value: &str, allowed: &[&str], field: &str) -> Result<(), String> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(format!("{} must be one of: {}", field, allowed.join(", ")))
    }
}

pub fn validate_day_of_week(day: i64) -> Result<(), String> {
    if !(0..=6).contains(&day) {
        return Err("day_of_week must be between 0 (Monday) and 6 (Sunday)".to_string());
    }
    Ok(())
}

pub fn validate_hhmm(time: &str) -> Result<(), String> {
    if !HHMM_REGEX.is_match(time) {
        return Err("Time must use 24-hour HH:MM format".to_string());
    }
    Ok(())
}

/// Validate a time slot; both ends must be HH:MM and end after start
pub fn validate_slot_times(start: &str, end: &str) -> Result<(), String> {
    validate_hhmm(start)?;
    validate_hhmm(end)?;
    // Zero-padded HH:MM compares correctly as text
    if end <= start {
        return Err("end_time must be after start_time".to_string());
    }
    Ok(())
}

/// Validate a `[lat, lon]` pair
pub fn validate_coordinate(point: &[f64]) -> Result<(), String> {
    let [lat, lon] = point else {
        return Err("Coordinates must be [lat, lon] pairs".to_string());
    };
    if !lat.is_finite() || !(-90.0..=90.0).contains(lat) {
        return Err(format!("Latitude {} is out of range", lat));
    }
    if !lon.is_finite() || !(-180.0..=180.0).contains(lon) {
        return Err(format!("Longitude {} is out of range", lon));
    }
    Ok(())
}

/// Whether an uploaded file name carries an accepted extension
pub fn is_allowed_attachment(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ALLOWED_ATTACHMENT_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Reduce an uploaded file name to a safe basename
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .replace(' ', "_");
    let cleaned = UNSAFE_FILENAME_CHARS.replace_all(&base, "");
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "upload".to_string()
    } else {
        trimmed.to_string()
    }
}
