//! Queue repository: bulk enqueue, claiming, finalization, recovery.
//!
//! All claiming relies on `FOR UPDATE SKIP LOCKED` so competing worker
//! processes never hand out the same row twice.

use std::str::FromStr;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use postbote_core::model::{QueueItem, QueueStatus, SubstValue, SubstitutionData};

use crate::error::StoreError;

/// The primary queue table.
pub const QUEUE_TABLE: &str = "queue_v2";
/// Legacy queue table, swept by recovery only.
pub const LEGACY_QUEUE_TABLE: &str = "queue_v1";

const KNOWN_TABLES: &[&str] = &[QUEUE_TABLE, LEGACY_QUEUE_TABLE];
const ENQUEUE_CHUNK: usize = 1000;
const PROGRESS_EVERY: u64 = 50_000;
const ERROR_CODE_MAX: usize = 50;

fn check_table(table: &str) -> Result<(), StoreError> {
    if KNOWN_TABLES.contains(&table) {
        Ok(())
    } else {
        Err(StoreError::Config(format!("unknown queue table: {table}")))
    }
}

/// Clamp a provider error code to the column budget.
pub fn truncate_error_code(code: &str) -> String {
    if code.len() <= ERROR_CODE_MAX {
        code.to_string()
    } else {
        let mut end = ERROR_CODE_MAX;
        while !code.is_char_boundary(end) {
            end -= 1;
        }
        code[..end].to_string()
    }
}

// ── Row mapping ───────────────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
struct QueueRow {
    id: Uuid,
    campaign_id: Uuid,
    subscriber_id: Uuid,
    email: String,
    substitution_data: serde_json::Value,
    priority: i32,
    scheduled_at: DateTime<Utc>,
    status: String,
    claimed_at: Option<DateTime<Utc>>,
    worker_id: Option<String>,
    sent_at: Option<DateTime<Utc>>,
    message_id: Option<String>,
    error_code: Option<String>,
    retry_count: i32,
}

impl QueueRow {
    fn into_item(self) -> Result<QueueItem, StoreError> {
        let status = QueueStatus::from_str(&self.status)
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        let substitution_data: SubstitutionData =
            serde_json::from_value(self.substitution_data)
                .map_err(|e| StoreError::Decode(format!("substitution_data: {e}")))?;
        Ok(QueueItem {
            id: self.id,
            campaign_id: self.campaign_id,
            subscriber_id: self.subscriber_id,
            email: self.email,
            substitution_data,
            priority: self.priority,
            scheduled_at: self.scheduled_at,
            status,
            claimed_at: self.claimed_at,
            worker_id: self.worker_id,
            sent_at: self.sent_at,
            message_id: self.message_id,
            error_code: self.error_code,
            retry_count: self.retry_count,
        })
    }
}

// ── Bulk enqueue ──────────────────────────────────────────────

/// One subscriber emitted by a segment query.
#[derive(Debug, Clone)]
pub struct SubscriberRow {
    pub subscriber_id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    /// Subscriber custom fields; only string/number/bool values carry over.
    pub custom_fields: serde_json::Value,
}

/// Outcome of a bulk enqueue call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnqueueReport {
    pub enqueued: u64,
    pub skipped: u64,
}

struct EncodedRow {
    id: Uuid,
    subscriber_id: Uuid,
    email: String,
    substitution_data: serde_json::Value,
}

/// Build the queue-row tuple for one subscriber.
///
/// Fails on an empty recipient address or unencodable custom fields;
/// the caller skips such rows without aborting the transaction.
fn encode_row(row: &SubscriberRow) -> Result<EncodedRow, StoreError> {
    if row.email.trim().is_empty() {
        return Err(StoreError::Decode("empty recipient address".into()));
    }

    let mut data: SubstitutionData = SubstitutionData::new();
    data.insert("first_name".into(), SubstValue::Str(row.first_name.clone()));
    data.insert("last_name".into(), SubstValue::Str(row.last_name.clone()));
    data.insert("email".into(), SubstValue::Str(row.email.clone()));

    if let Some(fields) = row.custom_fields.as_object() {
        for (key, value) in fields {
            let value = match value {
                serde_json::Value::String(s) => SubstValue::Str(s.clone()),
                serde_json::Value::Number(n) => match n.as_f64() {
                    Some(f) => SubstValue::Num(f),
                    None => continue,
                },
                serde_json::Value::Bool(b) => SubstValue::Bool(*b),
                _ => continue,
            };
            data.insert(key.clone(), value);
        }
    } else if !row.custom_fields.is_null() {
        return Err(StoreError::Decode(format!(
            "custom fields for {} are not an object",
            row.email
        )));
    }

    let substitution_data = serde_json::to_value(&data)
        .map_err(|e| StoreError::Decode(e.to_string()))?;

    Ok(EncodedRow {
        id: Uuid::new_v4(),
        subscriber_id: row.subscriber_id,
        email: row.email.clone(),
        substitution_data,
    })
}

/// Append queue rows for a campaign in one transaction.
///
/// All rows become visible on commit. Rows that fail to encode are
/// skipped and counted, never aborting the batch. Progress is logged
/// every 50 000 rows.
pub async fn bulk_enqueue(
    pool: &PgPool,
    campaign_id: Uuid,
    rows: impl IntoIterator<Item = SubscriberRow>,
    priority: i32,
) -> Result<EnqueueReport, StoreError> {
    let scheduled_at = Utc::now();
    let mut report = EnqueueReport::default();
    let mut tx = pool.begin().await?;

    let mut ids: Vec<Uuid> = Vec::with_capacity(ENQUEUE_CHUNK);
    let mut subscriber_ids: Vec<Uuid> = Vec::with_capacity(ENQUEUE_CHUNK);
    let mut emails: Vec<String> = Vec::with_capacity(ENQUEUE_CHUNK);
    let mut subst: Vec<serde_json::Value> = Vec::with_capacity(ENQUEUE_CHUNK);

    for row in rows {
        match encode_row(&row) {
            Ok(encoded) => {
                ids.push(encoded.id);
                subscriber_ids.push(encoded.subscriber_id);
                emails.push(encoded.email);
                subst.push(encoded.substitution_data);
            }
            Err(e) => {
                warn!(campaign = %campaign_id, error = %e, "skipping queue row");
                report.skipped += 1;
                continue;
            }
        }

        if ids.len() >= ENQUEUE_CHUNK {
            report.enqueued += flush_chunk(
                &mut tx,
                campaign_id,
                priority,
                scheduled_at,
                &mut ids,
                &mut subscriber_ids,
                &mut emails,
                &mut subst,
            )
            .await?;
            if report.enqueued % PROGRESS_EVERY < ENQUEUE_CHUNK as u64 {
                info!(
                    campaign = %campaign_id,
                    enqueued = report.enqueued,
                    skipped = report.skipped,
                    "bulk enqueue progress"
                );
            }
        }
    }

    if !ids.is_empty() {
        report.enqueued += flush_chunk(
            &mut tx,
            campaign_id,
            priority,
            scheduled_at,
            &mut ids,
            &mut subscriber_ids,
            &mut emails,
            &mut subst,
        )
        .await?;
    }

    tx.commit().await?;
    info!(
        campaign = %campaign_id,
        enqueued = report.enqueued,
        skipped = report.skipped,
        "bulk enqueue committed"
    );
    Ok(report)
}

#[allow(clippy::too_many_arguments)]
async fn flush_chunk(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    campaign_id: Uuid,
    priority: i32,
    scheduled_at: DateTime<Utc>,
    ids: &mut Vec<Uuid>,
    subscriber_ids: &mut Vec<Uuid>,
    emails: &mut Vec<String>,
    subst: &mut Vec<serde_json::Value>,
) -> Result<u64, StoreError> {
    let result = sqlx::query(
        "INSERT INTO queue_v2 \
           (id, campaign_id, subscriber_id, email, substitution_data, priority, \
            scheduled_at, status, retry_count) \
         SELECT u.id, $1, u.subscriber_id, u.email, u.substitution_data, $2, $3, 'queued', 0 \
         FROM UNNEST($4::uuid[], $5::uuid[], $6::text[], $7::jsonb[]) \
           AS u(id, subscriber_id, email, substitution_data)",
    )
    .bind(campaign_id)
    .bind(priority)
    .bind(scheduled_at)
    .bind(std::mem::take(ids))
    .bind(std::mem::take(subscriber_ids))
    .bind(std::mem::take(emails))
    .bind(std::mem::take(subst))
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected())
}

#[derive(Debug, sqlx::FromRow)]
struct SubscriberQueryRow {
    id: Uuid,
    email: String,
    first_name: Option<String>,
    last_name: Option<String>,
    custom_fields: Option<serde_json::Value>,
}

impl SubscriberQueryRow {
    fn into_subscriber(self) -> SubscriberRow {
        SubscriberRow {
            subscriber_id: self.id,
            email: self.email,
            first_name: self.first_name.unwrap_or_default(),
            last_name: self.last_name.unwrap_or_default(),
            custom_fields: self.custom_fields.unwrap_or(serde_json::Value::Null),
        }
    }
}

/// Stream a segment query straight into the queue.
///
/// The query must select `id, email, first_name, last_name,
/// custom_fields` from the subscriber store. Rows stream through the
/// same transactional insert path as [`bulk_enqueue`].
pub async fn enqueue_from_query(
    pool: &PgPool,
    campaign_id: Uuid,
    segment_query: &str,
    priority: i32,
) -> Result<EnqueueReport, StoreError> {
    use futures::TryStreamExt;

    let scheduled_at = Utc::now();
    let mut report = EnqueueReport::default();
    let mut tx = pool.begin().await?;

    let mut ids: Vec<Uuid> = Vec::with_capacity(ENQUEUE_CHUNK);
    let mut subscriber_ids: Vec<Uuid> = Vec::with_capacity(ENQUEUE_CHUNK);
    let mut emails: Vec<String> = Vec::with_capacity(ENQUEUE_CHUNK);
    let mut subst: Vec<serde_json::Value> = Vec::with_capacity(ENQUEUE_CHUNK);

    let mut rows = sqlx::query_as::<_, SubscriberQueryRow>(segment_query).fetch(pool);
    while let Some(row) = rows.try_next().await? {
        match encode_row(&row.into_subscriber()) {
            Ok(encoded) => {
                ids.push(encoded.id);
                subscriber_ids.push(encoded.subscriber_id);
                emails.push(encoded.email);
                subst.push(encoded.substitution_data);
            }
            Err(e) => {
                warn!(campaign = %campaign_id, error = %e, "skipping queue row");
                report.skipped += 1;
                continue;
            }
        }

        if ids.len() >= ENQUEUE_CHUNK {
            report.enqueued += flush_chunk(
                &mut tx,
                campaign_id,
                priority,
                scheduled_at,
                &mut ids,
                &mut subscriber_ids,
                &mut emails,
                &mut subst,
            )
            .await?;
            if report.enqueued % PROGRESS_EVERY < ENQUEUE_CHUNK as u64 {
                info!(
                    campaign = %campaign_id,
                    enqueued = report.enqueued,
                    skipped = report.skipped,
                    "bulk enqueue progress"
                );
            }
        }
    }
    drop(rows);

    if !ids.is_empty() {
        report.enqueued += flush_chunk(
            &mut tx,
            campaign_id,
            priority,
            scheduled_at,
            &mut ids,
            &mut subscriber_ids,
            &mut emails,
            &mut subst,
        )
        .await?;
    }

    tx.commit().await?;
    info!(
        campaign = %campaign_id,
        enqueued = report.enqueued,
        skipped = report.skipped,
        "bulk enqueue committed"
    );
    Ok(report)
}

// ── Claiming ──────────────────────────────────────────────────

/// Atomically move up to `limit` due items to `processing` for this worker.
///
/// Admits only status=queued rows whose scheduled_at has passed and whose
/// campaign is in a sendable state; rows locked by other workers are
/// skipped. Returns the claimed items ordered by priority then schedule.
pub async fn claim(
    pool: &PgPool,
    worker_id: &str,
    limit: u32,
) -> Result<Vec<QueueItem>, StoreError> {
    let rows: Vec<QueueRow> = sqlx::query_as(
        "UPDATE queue_v2 q \
         SET status = 'processing', worker_id = $1, claimed_at = now() \
         WHERE q.id IN ( \
             SELECT qi.id FROM queue_v2 qi \
             JOIN campaigns c ON c.id = qi.campaign_id \
             WHERE qi.status = 'queued' \
               AND qi.scheduled_at <= now() \
               AND c.status IN ('scheduled', 'sending') \
             ORDER BY qi.priority DESC, qi.scheduled_at ASC \
             LIMIT $2 \
             FOR UPDATE OF qi SKIP LOCKED \
         ) \
         RETURNING q.id, q.campaign_id, q.subscriber_id, q.email, q.substitution_data, \
                   q.priority, q.scheduled_at, q.status, q.claimed_at, q.worker_id, \
                   q.sent_at, q.message_id, q.error_code, q.retry_count",
    )
    .bind(worker_id)
    .bind(limit as i64)
    .fetch_all(pool)
    .await?;

    let mut items = Vec::with_capacity(rows.len());
    for row in rows {
        items.push(row.into_item()?);
    }
    // The UPDATE does not preserve subquery order; restore it.
    items.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(a.scheduled_at.cmp(&b.scheduled_at))
    });
    Ok(items)
}

/// Return items to the queue untouched (rate-limit / throttle / pause path).
/// Clears the claim without counting a retry.
pub async fn release(pool: &PgPool, ids: &[Uuid]) -> Result<u64, StoreError> {
    if ids.is_empty() {
        return Ok(0);
    }
    let result = sqlx::query(
        "UPDATE queue_v2 \
         SET status = 'queued', worker_id = NULL, claimed_at = NULL \
         WHERE id = ANY($1)",
    )
    .bind(ids)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

// ── Finalization ──────────────────────────────────────────────

/// Terminal outcome for one claimed item.
#[derive(Debug, Clone)]
pub struct ItemUpdate {
    pub id: Uuid,
    pub status: QueueStatus,
    pub message_id: Option<String>,
    pub error_code: Option<String>,
}

impl ItemUpdate {
    pub fn sent(id: Uuid, message_id: String) -> Self {
        Self {
            id,
            status: QueueStatus::Sent,
            message_id: Some(message_id),
            error_code: None,
        }
    }

    pub fn failed(id: Uuid, code: &str) -> Self {
        Self {
            id,
            status: QueueStatus::Failed,
            message_id: None,
            error_code: Some(truncate_error_code(code)),
        }
    }
}

/// Apply all terminal outcomes of a batch in one vectorized UPDATE.
///
/// Successes stamp sent_at and the provider message id; failures store
/// the truncated error code and increment retry_count.
pub async fn bulk_finalize(pool: &PgPool, updates: &[ItemUpdate]) -> Result<u64, StoreError> {
    if updates.is_empty() {
        return Ok(0);
    }

    let ids: Vec<Uuid> = updates.iter().map(|u| u.id).collect();
    let statuses: Vec<String> = updates.iter().map(|u| u.status.as_str().to_string()).collect();
    let message_ids: Vec<Option<String>> = updates.iter().map(|u| u.message_id.clone()).collect();
    let error_codes: Vec<Option<String>> = updates
        .iter()
        .map(|u| u.error_code.as_deref().map(truncate_error_code))
        .collect();

    let result = sqlx::query(
        "UPDATE queue_v2 q SET \
           status = u.status, \
           message_id = COALESCE(u.message_id, q.message_id), \
           error_code = u.error_code, \
           sent_at = CASE WHEN u.status = 'sent' THEN now() ELSE q.sent_at END, \
           retry_count = q.retry_count + CASE WHEN u.status = 'failed' THEN 1 ELSE 0 END \
         FROM UNNEST($1::uuid[], $2::text[], $3::text[], $4::text[]) \
           AS u(id, status, message_id, error_code) \
         WHERE q.id = u.id",
    )
    .bind(ids)
    .bind(statuses)
    .bind(message_ids)
    .bind(error_codes)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

// ── Recovery sweeps ───────────────────────────────────────────

/// Requeue items abandoned by crashed workers or parked in `failed`.
///
/// Items whose claim is older than `stale_age` and whose retry budget
/// is not exhausted go back to `queued` with retry_count incremented.
pub async fn requeue_stale(
    pool: &PgPool,
    table: &str,
    stale_age: std::time::Duration,
    max_retries: i32,
) -> Result<u64, StoreError> {
    check_table(table)?;
    let cutoff = Utc::now()
        - ChronoDuration::from_std(stale_age)
            .map_err(|e| StoreError::Config(e.to_string()))?;

    let sql = format!(
        "UPDATE {table} \
         SET status = 'queued', worker_id = NULL, claimed_at = NULL, \
             retry_count = retry_count + 1 \
         WHERE status IN ('claimed', 'processing', 'sending', 'failed') \
           AND claimed_at < $1 \
           AND retry_count < $2"
    );
    let result = sqlx::query(&sql)
        .bind(cutoff)
        .bind(max_retries)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Dead-letter items that exhausted their retry budget.
pub async fn dead_letter(
    pool: &PgPool,
    table: &str,
    max_retries: i32,
) -> Result<u64, StoreError> {
    check_table(table)?;
    let sql = format!(
        "UPDATE {table} \
         SET status = 'dead_letter' \
         WHERE status IN ('claimed', 'processing', 'sending', 'failed') \
           AND retry_count >= $1"
    );
    let result = sqlx::query(&sql)
        .bind(max_retries)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn subscriber(email: &str, custom: serde_json::Value) -> SubscriberRow {
        SubscriberRow {
            subscriber_id: Uuid::new_v4(),
            email: email.to_string(),
            first_name: "Ada".to_string(),
            last_name: "Lovelace".to_string(),
            custom_fields: custom,
        }
    }

    #[test]
    fn encode_row_builds_substitutions() {
        let encoded = encode_row(&subscriber(
            "a@x.y",
            json!({"plan": "pro", "seats": 4, "trial": false, "nested": {"x": 1}}),
        ))
        .unwrap();

        let data = encoded.substitution_data.as_object().unwrap();
        assert_eq!(data["first_name"], json!("Ada"));
        assert_eq!(data["last_name"], json!("Lovelace"));
        assert_eq!(data["email"], json!("a@x.y"));
        assert_eq!(data["plan"], json!("pro"));
        assert_eq!(data["seats"], json!(4.0));
        assert_eq!(data["trial"], json!(false));
        // Nested objects are not substitutable and are dropped.
        assert!(!data.contains_key("nested"));
    }

    #[test]
    fn encode_row_rejects_empty_email() {
        assert!(encode_row(&subscriber("  ", json!({}))).is_err());
    }

    #[test]
    fn encode_row_rejects_non_object_custom_fields() {
        assert!(encode_row(&subscriber("a@x.y", json!([1, 2, 3]))).is_err());
        assert!(encode_row(&subscriber("a@x.y", serde_json::Value::Null)).is_ok());
    }

    #[test]
    fn error_code_truncation() {
        assert_eq!(truncate_error_code("short"), "short");
        let long = "x".repeat(80);
        assert_eq!(truncate_error_code(&long).len(), 50);
        // Truncation respects UTF-8 boundaries.
        let uni = "ü".repeat(40);
        let cut = truncate_error_code(&uni);
        assert!(cut.len() <= 50);
        assert!(uni.starts_with(&cut));
    }

    #[test]
    fn unknown_table_is_rejected() {
        assert!(check_table("queue_v2").is_ok());
        assert!(check_table("queue_v1").is_ok());
        assert!(check_table("users; DROP TABLE users").is_err());
    }

    #[test]
    fn item_update_helpers() {
        let id = Uuid::new_v4();
        let sent = ItemUpdate::sent(id, "msg-1".into());
        assert_eq!(sent.status, QueueStatus::Sent);
        assert_eq!(sent.message_id.as_deref(), Some("msg-1"));

        let failed = ItemUpdate::failed(id, &"e".repeat(99));
        assert_eq!(failed.status, QueueStatus::Failed);
        assert_eq!(failed.error_code.unwrap().len(), 50);
    }
}
