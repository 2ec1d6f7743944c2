//! Stock-level bookkeeping: low-stock and expiry alerts.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::db::{AlertType, DbPool, BATCH_EXPIRED};
use crate::utils::parse_datetime;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StockCheckReport {
    pub low_stock_alerts: u64,
    pub expired_alerts: u64,
    pub expired_batches: u64,
}

impl StockCheckReport {
    pub fn alerts_created(&self) -> u64 {
        self.low_stock_alerts + self.expired_alerts
    }
}

#[derive(Debug, FromRow)]
struct BatchExpiry {
    id: i64,
    batch_number: String,
    item_id: i64,
    item_name: String,
    expiry_date: String,
}

const LOW_STOCK_INSERT: &str = r#"
    INSERT INTO stock_alerts (item_id, alert_type, message, current_stock, threshold)
    SELECT i.id, 'low_stock', 'Stock level for ' || i.name || ' is below reorder level',
           i.current_stock, i.reorder_level
    FROM inventory_items i
    WHERE i.current_stock <= i.reorder_level
      AND NOT EXISTS (
          SELECT 1 FROM stock_alerts a
          WHERE a.item_id = i.id AND a.alert_type = 'low_stock' AND a.is_resolved = 0
      )"#;

/// Raise a low-stock alert for one item if it needs one
pub async fn check_item_stock(db: &DbPool, item_id: i64) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(&format!("{} AND i.id = ?", LOW_STOCK_INSERT))
        .bind(item_id)
        .execute(db)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Scan every item and batch, creating any missing alerts.
///
/// Never creates a second unresolved alert of the same type for an item, so
/// running it repeatedly is safe.
pub async fn check_stock_levels(db: &DbPool, now: DateTime<Utc>) -> Result<StockCheckReport, sqlx::Error> {
    let candidates: Vec<BatchExpiry> = sqlx::query_as(
        r#"SELECT b.id, b.batch_number, b.item_id, i.name AS item_name, b.expiry_date
           FROM stock_batches b
           JOIN inventory_items i ON i.id = b.item_id
           WHERE b.status != ? AND b.expiry_date IS NOT NULL
           ORDER BY b.id"#,
    )
    .bind(BATCH_EXPIRED)
    .fetch_all(db)
    .await?;

    let mut report = StockCheckReport::default();
    let mut tx = db.begin().await?;

    report.low_stock_alerts = sqlx::query(LOW_STOCK_INSERT)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    for batch in candidates {
        let Some(expiry) = parse_datetime(&batch.expiry_date) else {
            tracing::debug!(batch_id = batch.id, expiry = %batch.expiry_date, "Unparseable expiry date");
            continue;
        };
        if expiry >= now {
            continue;
        }

        let created = sqlx::query(
            r#"INSERT INTO stock_alerts (item_id, alert_type, message)
               SELECT ?, ?, ?
               WHERE NOT EXISTS (
                   SELECT 1 FROM stock_alerts
                   WHERE item_id = ? AND alert_type = ? AND is_resolved = 0
               )"#,
        )
        .bind(batch.item_id)
        .bind(AlertType::Expired.as_str())
        .bind(format!("Batch {} for {} has expired", batch.batch_number, batch.item_name))
        .bind(batch.item_id)
        .bind(AlertType::Expired.as_str())
        .execute(&mut *tx)
        .await?;
        report.expired_alerts += created.rows_affected();

        sqlx::query("UPDATE stock_batches SET status = ? WHERE id = ?")
            .bind(BATCH_EXPIRED)
            .bind(batch.id)
            .execute(&mut *tx)
            .await?;
        report.expired_batches += 1;
    }

    tx.commit().await?;

    if report.alerts_created() > 0 || report.expired_batches > 0 {
        tracing::info!(
            low_stock = report.low_stock_alerts,
            expired = report.expired_alerts,
            expired_batches = report.expired_batches,
            "Stock check created alerts"
        );
    }
    Ok(report)
}
