//! Webhook staging table: raw provider telemetry awaiting aggregation.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::StoreError;

/// A normalized provider event headed for staging.
#[derive(Debug, Clone)]
pub struct StagedEvent {
    pub esp_type: String,
    pub event_type: String,
    pub message_id: String,
    pub payload: Vec<u8>,
    pub event_timestamp: DateTime<Utc>,
}

/// A staged row claimed by the aggregator.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ClaimedEvent {
    pub id: i64,
    pub esp_type: String,
    pub event_type: String,
    pub message_id: String,
    pub event_timestamp: DateTime<Utc>,
}

/// Stage a batch of events from one webhook POST.
pub async fn stage(pool: &PgPool, events: &[StagedEvent]) -> Result<u64, StoreError> {
    if events.is_empty() {
        return Ok(0);
    }

    let esp_types: Vec<String> = events.iter().map(|e| e.esp_type.clone()).collect();
    let event_types: Vec<String> = events.iter().map(|e| e.event_type.clone()).collect();
    let message_ids: Vec<String> = events.iter().map(|e| e.message_id.clone()).collect();
    let payloads: Vec<Vec<u8>> = events.iter().map(|e| e.payload.clone()).collect();
    let timestamps: Vec<DateTime<Utc>> = events.iter().map(|e| e.event_timestamp).collect();

    let result = sqlx::query(
        "INSERT INTO webhook_events \
           (esp_type, event_type, message_id, payload, event_timestamp, received_at, processed) \
         SELECT u.esp_type, u.event_type, u.message_id, u.payload, u.event_timestamp, \
                now(), false \
         FROM UNNEST($1::text[], $2::text[], $3::text[], $4::bytea[], $5::timestamptz[]) \
           AS u(esp_type, event_type, message_id, payload, event_timestamp)",
    )
    .bind(esp_types)
    .bind(event_types)
    .bind(message_ids)
    .bind(payloads)
    .bind(timestamps)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Atomically claim up to `limit` unprocessed events.
///
/// Marks them processed and returns the old rows; competing aggregator
/// instances skip each other's locks.
pub async fn claim_batch(pool: &PgPool, limit: u32) -> Result<Vec<ClaimedEvent>, StoreError> {
    let rows: Vec<ClaimedEvent> = sqlx::query_as(
        "UPDATE webhook_events w \
         SET processed = true, processed_at = now() \
         WHERE w.id IN ( \
             SELECT id FROM webhook_events \
             WHERE processed = false \
             ORDER BY id \
             LIMIT $1 \
             FOR UPDATE SKIP LOCKED \
         ) \
         RETURNING w.id, w.esp_type, w.event_type, w.message_id, w.event_timestamp",
    )
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
