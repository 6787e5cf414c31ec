//! Worker registry heartbeats.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tracing::{info, warn};

use postbote_store::workers::{self, WorkerHeartbeat};

use crate::supervisor::Shutdown;
use crate::worker::WorkerCounters;

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

/// Write a heartbeat row every `interval`; mark the worker stopped on
/// shutdown.
pub async fn run(
    pool: PgPool,
    worker_id: String,
    max_concurrent: u32,
    counters: Arc<WorkerCounters>,
    interval: Duration,
    shutdown: Arc<Shutdown>,
) {
    let hostname = hostname();
    info!(worker = %worker_id, interval_secs = interval.as_secs(), "heartbeat loop started");

    loop {
        let hb = WorkerHeartbeat {
            id: worker_id.clone(),
            worker_type: "batch_sender".to_string(),
            hostname: hostname.clone(),
            status: "running".to_string(),
            max_concurrent: max_concurrent as i32,
            total_processed: counters.processed() as i64,
            total_errors: counters.errors() as i64,
            metadata: serde_json::json!({}),
        };
        if let Err(e) = workers::upsert_heartbeat(&pool, &hb).await {
            warn!(worker = %worker_id, error = %e, "heartbeat write failed");
        }

        if shutdown.sleep_or_shutdown(interval).await {
            break;
        }
    }

    if let Err(e) = workers::mark_stopped(&pool, &worker_id).await {
        warn!(worker = %worker_id, error = %e, "final heartbeat failed");
    }
    info!(worker = %worker_id, "heartbeat loop stopped");
}
