//! Inventory stock monitoring
//!
//! Runs the stock check once at startup and, when an interval is configured,
//! periodically afterwards:
//! - Raises `low_stock` alerts for items at or below their reorder level
//! - Raises `expired` alerts and marks batches past their expiry date

use chrono::Utc;
use tokio::time::{interval, Duration};

use crate::config::InventoryConfig;
use crate::db::DbPool;
use crate::modules::inventory::stock::{check_stock_levels, StockCheckReport};

/// Run one stock check and log what it found
pub async fn run_stock_check(db: &DbPool) -> Result<StockCheckReport, sqlx::Error> {
    let report = check_stock_levels(db, Utc::now()).await?;
    if report.alerts_created() > 0 || report.expired_batches > 0 {
        tracing::warn!(
            low_stock = report.low_stock_alerts,
            expired = report.expired_alerts,
            expired_batches = report.expired_batches,
            "Stock check raised alerts"
        );
    } else {
        tracing::debug!("Stock check found nothing to report");
    }
    Ok(report)
}

/// Spawn the stock monitor. An interval of 0 runs the check once.
pub fn spawn_stock_monitor_task(db: DbPool, config: InventoryConfig) {
    let interval_secs = config.alert_check_interval_seconds;
    tracing::info!(interval_secs, "Starting stock monitoring task");

    tokio::spawn(async move {
        if let Err(e) = run_stock_check(&db).await {
            tracing::warn!(error = %e, "Initial stock check failed");
        }

        if interval_secs == 0 {
            return;
        }

        let mut tick = interval(Duration::from_secs(interval_secs));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately
        tick.tick().await;

        loop {
            tick.tick().await;
            if let Err(e) = run_stock_check(&db).await {
                tracing::error!(error = %e, "Stock monitoring check failed");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_memory;

    #[tokio::test]
    async fn test_run_stock_check_flags_low_stock_once() {
        let db = init_memory().await.unwrap();
        sqlx::query("INSERT INTO inventory_items (sku, name, unit_price, reorder_level, current_stock) VALUES ('S1', 'Bolt', 1.0, 10, 3)")
            .execute(&db)
            .await
            .unwrap();

        let first = run_stock_check(&db).await.unwrap();
        assert_eq!(first.low_stock_alerts, 1);

        let second = run_stock_check(&db).await.unwrap();
        assert_eq!(second.alerts_created(), 0);
    }
}
