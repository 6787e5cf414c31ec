//! Message log: one row per accepted send, enriched by telemetry.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::StoreError;

/// A freshly accepted send, keyed by the provider message id.
#[derive(Debug, Clone)]
pub struct MessageLogEntry {
    pub message_id: String,
    pub campaign_id: Uuid,
    pub subscriber_id: Uuid,
    pub email: String,
    pub esp_type: String,
    pub sent_at: DateTime<Utc>,
}

/// Append message-log rows for a batch of successful sends.
///
/// Duplicate message ids (at-least-once re-sends) are ignored.
pub async fn bulk_append(pool: &PgPool, entries: &[MessageLogEntry]) -> Result<u64, StoreError> {
    if entries.is_empty() {
        return Ok(0);
    }

    let message_ids: Vec<String> = entries.iter().map(|e| e.message_id.clone()).collect();
    let campaign_ids: Vec<Uuid> = entries.iter().map(|e| e.campaign_id).collect();
    let subscriber_ids: Vec<Uuid> = entries.iter().map(|e| e.subscriber_id).collect();
    let emails: Vec<String> = entries.iter().map(|e| e.email.clone()).collect();
    let esp_types: Vec<String> = entries.iter().map(|e| e.esp_type.clone()).collect();
    let sent_ats: Vec<DateTime<Utc>> = entries.iter().map(|e| e.sent_at).collect();

    let result = sqlx::query(
        "INSERT INTO message_log \
           (message_id, campaign_id, subscriber_id, email, esp_type, sent_at, updated_at) \
         SELECT u.message_id, u.campaign_id, u.subscriber_id, u.email, u.esp_type, \
                u.sent_at, now() \
         FROM UNNEST($1::text[], $2::uuid[], $3::uuid[], $4::text[], $5::text[], \
                     $6::timestamptz[]) \
           AS u(message_id, campaign_id, subscriber_id, email, esp_type, sent_at) \
         ON CONFLICT (message_id) DO NOTHING",
    )
    .bind(message_ids)
    .bind(campaign_ids)
    .bind(subscriber_ids)
    .bind(emails)
    .bind(esp_types)
    .bind(sent_ats)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Earliest-seen telemetry timestamps for one message id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventRollup {
    pub message_id: String,
    pub delivered_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub clicked_at: Option<DateTime<Utc>>,
    pub bounced_at: Option<DateTime<Utc>>,
    pub complained_at: Option<DateTime<Utc>>,
}

impl EventRollup {
    pub fn new(message_id: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            ..Self::default()
        }
    }
}

/// Fold a rollup into the message log. `COALESCE` keeps the first
/// stored timestamp per event family; a miss (unknown message id)
/// matches zero rows and is not an error.
pub async fn apply_rollup(pool: &PgPool, rollup: &EventRollup) -> Result<u64, StoreError> {
    let result = sqlx::query(
        "UPDATE message_log SET \
           delivered_at = COALESCE(delivered_at, $2), \
           opened_at = COALESCE(opened_at, $3), \
           clicked_at = COALESCE(clicked_at, $4), \
           bounced_at = COALESCE(bounced_at, $5), \
           complained_at = COALESCE(complained_at, $6), \
           updated_at = now() \
         WHERE message_id = $1",
    )
    .bind(&rollup.message_id)
    .bind(rollup.delivered_at)
    .bind(rollup.opened_at)
    .bind(rollup.clicked_at)
    .bind(rollup.bounced_at)
    .bind(rollup.complained_at)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
