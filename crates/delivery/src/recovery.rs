//! Queue recovery: reclaim abandoned items, dead-letter repeat failures.

use std::time::Duration;

use sqlx::PgPool;
use tracing::{info, warn};

use postbote_core::config::RecoveryConfig;
use postbote_store::queue::{self, LEGACY_QUEUE_TABLE, QUEUE_TABLE};

use crate::supervisor::Shutdown;

/// Run both sweeps over both queue tables, once.
///
/// Transitions are independent per table; a missing legacy table is
/// tolerated with a warning.
pub async fn sweep_once(pool: &PgPool, config: &RecoveryConfig) {
    let stale_age = Duration::from_secs(config.stale_age_secs);

    for table in [QUEUE_TABLE, LEGACY_QUEUE_TABLE] {
        match queue::requeue_stale(pool, table, stale_age, config.max_retries).await {
            Ok(0) => {}
            Ok(requeued) => info!(table, requeued, "recovery requeued stale items"),
            Err(e) if e.is_undefined_table() => {
                warn!(table, "queue table missing, skipping recovery sweep");
                continue;
            }
            Err(e) => warn!(table, error = %e, "requeue sweep failed"),
        }

        match queue::dead_letter(pool, table, config.max_retries).await {
            Ok(0) => {}
            Ok(dead) => info!(table, dead, "recovery dead-lettered items"),
            Err(e) if e.is_undefined_table() => {
                warn!(table, "queue table missing, skipping dead-letter sweep");
            }
            Err(e) => warn!(table, error = %e, "dead-letter sweep failed"),
        }
    }
}

/// Timer loop around [`sweep_once`].
pub async fn run(pool: PgPool, config: RecoveryConfig, shutdown: std::sync::Arc<Shutdown>) {
    let interval = Duration::from_secs(config.interval_secs);
    info!(
        interval_secs = config.interval_secs,
        stale_age_secs = config.stale_age_secs,
        max_retries = config.max_retries,
        "queue recovery started"
    );

    loop {
        if shutdown.sleep_or_shutdown(interval).await {
            break;
        }
        sweep_once(&pool, &config).await;
    }
    info!("queue recovery stopped");
}
