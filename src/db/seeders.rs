//! Demo data seeded at startup when demo mode is enabled.

use anyhow::Result;
use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use tracing::info;

use crate::api::auth::hash_password;
use crate::modules::bookings::new_appointment_id;
use crate::utils::format_utc;

pub const DEMO_USERNAME: &str = "demo";
pub const DEMO_EMAIL: &str = "demo@nexora.com";
pub const DEMO_PASSWORD: &str = "Demo1234";
const DEMO_CALENDAR: &str = "Demo Calendar";

/// Create the demo account and a bookable calendar. Safe to run on every start.
pub async fn seed_demo_data(pool: &SqlitePool) -> Result<()> {
    let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE username = ?")
        .bind(DEMO_USERNAME)
        .fetch_optional(pool)
        .await?;

    let user_id = match existing {
        Some(id) => id,
        None => {
            let password_hash = hash_password(DEMO_PASSWORD)
                .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;
            let id: i64 = sqlx::query_scalar(
                "INSERT INTO users (username, email, password_hash, role) VALUES (?, ?, ?, 'demo') RETURNING id",
            )
            .bind(DEMO_USERNAME)
            .bind(DEMO_EMAIL)
            .bind(&password_hash)
            .fetch_one(pool)
            .await?;
            info!(username = DEMO_USERNAME, "Created demo user");
            id
        }
    };

    let calendar: Option<i64> = sqlx::query_scalar("SELECT id FROM booking_calendars WHERE name = ?")
        .bind(DEMO_CALENDAR)
        .fetch_optional(pool)
        .await?;
    if calendar.is_some() {
        return Ok(());
    }

    let mut tx = pool.begin().await?;

    let calendar_id: i64 = sqlx::query_scalar(
        "INSERT INTO booking_calendars (name, owner_id, description, timezone) VALUES (?, ?, ?, 'UTC') RETURNING id",
    )
    .bind(DEMO_CALENDAR)
    .bind(user_id)
    .bind("Demo calendar for Nexora demo")
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(
        "INSERT INTO booking_time_slots (calendar_id, day_of_week, start_time, end_time) VALUES (?, 1, '09:00', '17:00')",
    )
    .bind(calendar_id)
    .execute(&mut *tx)
    .await?;

    let start = Utc::now() + Duration::hours(1);
    let end = start + Duration::hours(1);
    sqlx::query(
        r#"INSERT INTO booking_appointments
           (appointment_id, calendar_id, client_name, client_email, title, start_time, end_time, status, location)
           VALUES (?, ?, 'Demo User', ?, 'Demo Appointment', ?, ?, 'confirmed', 'Demo Location')"#,
    )
    .bind(new_appointment_id())
    .bind(calendar_id)
    .bind(DEMO_EMAIL)
    .bind(format_utc(start))
    .bind(format_utc(end))
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    info!(calendar_id, "Seeded demo calendar");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::auth::verify_password;
    use crate::db::init_memory;

    #[tokio::test]
    async fn test_seed_demo_data_is_idempotent() {
        let pool = init_memory().await.unwrap();
        seed_demo_data(&pool).await.unwrap();
        seed_demo_data(&pool).await.unwrap();

        let (role, hash): (String, String) =
            sqlx::query_as("SELECT role, password_hash FROM users WHERE username = 'demo'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(role, "demo");
        assert!(verify_password(DEMO_PASSWORD, &hash));

        for (table, expected) in [
            ("booking_calendars", 1),
            ("booking_time_slots", 1),
            ("booking_appointments", 1),
        ] {
            let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
                .fetch_one(&pool)
                .await
                .unwrap();
            assert_eq!(count, expected, "{}", table);
        }
    }
}
