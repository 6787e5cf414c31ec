//! Worker registry heartbeats.

use sqlx::PgPool;

use crate::error::StoreError;

/// One heartbeat snapshot for a send worker process.
#[derive(Debug, Clone)]
pub struct WorkerHeartbeat {
    pub id: String,
    pub worker_type: String,
    pub hostname: String,
    pub status: String,
    pub max_concurrent: i32,
    pub total_processed: i64,
    pub total_errors: i64,
    pub metadata: serde_json::Value,
}

/// Insert or refresh a worker's heartbeat row.
pub async fn upsert_heartbeat(pool: &PgPool, hb: &WorkerHeartbeat) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO workers \
           (id, worker_type, hostname, status, max_concurrent, started_at, \
            last_heartbeat_at, total_processed, total_errors, metadata) \
         VALUES ($1, $2, $3, $4, $5, now(), now(), $6, $7, $8) \
         ON CONFLICT (id) DO UPDATE SET \
           status = EXCLUDED.status, \
           last_heartbeat_at = now(), \
           total_processed = EXCLUDED.total_processed, \
           total_errors = EXCLUDED.total_errors, \
           metadata = EXCLUDED.metadata",
    )
    .bind(&hb.id)
    .bind(&hb.worker_type)
    .bind(&hb.hostname)
    .bind(&hb.status)
    .bind(hb.max_concurrent)
    .bind(hb.total_processed)
    .bind(hb.total_errors)
    .bind(&hb.metadata)
    .execute(pool)
    .await?;
    Ok(())
}

/// Mark a worker stopped during graceful shutdown.
pub async fn mark_stopped(pool: &PgPool, worker_id: &str) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE workers SET status = 'stopped', last_heartbeat_at = now() WHERE id = $1",
    )
    .bind(worker_id)
    .execute(pool)
    .await?;
    Ok(())
}
