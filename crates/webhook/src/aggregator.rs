//! Telemetry aggregator: staged events → message-log rollups.
//!
//! Claims staged rows in bulk, folds them into one rollup per provider
//! message id (earliest timestamp per event family, synonym names
//! mapped), and coalesces into the message log so the first stored
//! timestamp always wins.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tracing::{debug, info, warn};

use postbote_core::config::WebhookConfig;
use postbote_delivery::Shutdown;
use postbote_store::webhook_events::{self, ClaimedEvent};
use postbote_store::{message_log, EventRollup};

use crate::error::WebhookError;

/// The five telemetry families tracked on the message log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFamily {
    Delivered,
    Opened,
    Clicked,
    Bounced,
    Complained,
}

/// Map a provider event name onto a family, accepting each vendor's
/// synonyms. Unknown names map to `None` and are dropped.
pub fn family_for(kind: &str) -> Option<EventFamily> {
    match kind.to_ascii_lowercase().as_str() {
        "delivered" | "delivery" => Some(EventFamily::Delivered),
        "opened" | "open" => Some(EventFamily::Opened),
        "clicked" | "click" => Some(EventFamily::Clicked),
        "bounced" | "bounce" => Some(EventFamily::Bounced),
        "complained" | "complaint" | "spam" | "spam_report" => Some(EventFamily::Complained),
        _ => None,
    }
}

/// Fold claimed events into one rollup per message id, keeping the
/// earliest timestamp per family.
pub fn rollup(events: &[ClaimedEvent]) -> Vec<EventRollup> {
    let mut by_message: HashMap<&str, EventRollup> = HashMap::new();

    for event in events {
        let Some(family) = family_for(&event.event_type) else {
            debug!(event_type = %event.event_type, "unmapped event family, dropping");
            continue;
        };

        let entry = by_message
            .entry(event.message_id.as_str())
            .or_insert_with(|| EventRollup::new(event.message_id.clone()));

        let slot = match family {
            EventFamily::Delivered => &mut entry.delivered_at,
            EventFamily::Opened => &mut entry.opened_at,
            EventFamily::Clicked => &mut entry.clicked_at,
            EventFamily::Bounced => &mut entry.bounced_at,
            EventFamily::Complained => &mut entry.complained_at,
        };
        match slot {
            Some(existing) if *existing <= event.event_timestamp => {}
            _ => *slot = Some(event.event_timestamp),
        }
    }

    let mut rollups: Vec<EventRollup> = by_message.into_values().collect();
    rollups.sort_by(|a, b| a.message_id.cmp(&b.message_id));
    rollups
}

/// One aggregator pass: claim, fold, coalesce. Returns how many staged
/// rows were consumed.
pub async fn aggregate_once(pool: &PgPool, claim_limit: u32) -> Result<usize, WebhookError> {
    let events = webhook_events::claim_batch(pool, claim_limit).await?;
    if events.is_empty() {
        return Ok(0);
    }

    let rollups = rollup(&events);
    let mut matched = 0u64;
    for r in &rollups {
        // Zero matched rows is a correlation miss, not an error.
        matched += message_log::apply_rollup(pool, r).await?;
    }

    info!(
        claimed = events.len(),
        messages = rollups.len(),
        matched,
        "aggregator pass complete"
    );
    Ok(events.len())
}

/// Timer loop around [`aggregate_once`].
pub async fn run(pool: PgPool, config: WebhookConfig, shutdown: Arc<Shutdown>) {
    let interval = Duration::from_secs(config.aggregate_interval_secs);
    info!(
        interval_secs = config.aggregate_interval_secs,
        claim = config.aggregate_claim,
        "webhook aggregator started"
    );

    loop {
        if shutdown.sleep_or_shutdown(interval).await {
            break;
        }
        if let Err(e) = aggregate_once(&pool, config.aggregate_claim).await {
            warn!(error = %e, "aggregator pass failed");
        }
    }
    info!("webhook aggregator stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn event(id: i64, message_id: &str, kind: &str, ts: DateTime<Utc>) -> ClaimedEvent {
        ClaimedEvent {
            id,
            esp_type: "sparkpost".into(),
            event_type: kind.into(),
            message_id: message_id.into(),
            event_timestamp: ts,
        }
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn synonyms_map_to_families() {
        for kind in ["delivered", "delivery", "Delivery"] {
            assert_eq!(family_for(kind), Some(EventFamily::Delivered));
        }
        for kind in ["opened", "open", "Open"] {
            assert_eq!(family_for(kind), Some(EventFamily::Opened));
        }
        for kind in ["clicked", "click", "Click"] {
            assert_eq!(family_for(kind), Some(EventFamily::Clicked));
        }
        for kind in ["bounced", "bounce", "Bounce"] {
            assert_eq!(family_for(kind), Some(EventFamily::Bounced));
        }
        for kind in ["complained", "complaint", "spam", "Complaint", "spam_report"] {
            assert_eq!(family_for(kind), Some(EventFamily::Complained));
        }
        assert_eq!(family_for("unsubscribed"), None);
    }

    #[test]
    fn rollup_takes_earliest_per_family() {
        let events = vec![
            event(1, "m1", "open", ts(300)),
            event(2, "m1", "Open", ts(100)),
            event(3, "m1", "opened", ts(200)),
            event(4, "m1", "delivery", ts(50)),
        ];
        let rollups = rollup(&events);
        assert_eq!(rollups.len(), 1);
        assert_eq!(rollups[0].opened_at, Some(ts(100)));
        assert_eq!(rollups[0].delivered_at, Some(ts(50)));
        assert_eq!(rollups[0].clicked_at, None);
    }

    #[test]
    fn rollup_groups_by_message_id() {
        let events = vec![
            event(1, "m1", "delivered", ts(10)),
            event(2, "m2", "bounce", ts(20)),
            event(3, "m2", "complaint", ts(30)),
        ];
        let rollups = rollup(&events);
        assert_eq!(rollups.len(), 2);
        assert_eq!(rollups[0].message_id, "m1");
        assert_eq!(rollups[0].delivered_at, Some(ts(10)));
        assert_eq!(rollups[1].bounced_at, Some(ts(20)));
        assert_eq!(rollups[1].complained_at, Some(ts(30)));
    }

    #[test]
    fn rollup_drops_unmapped_kinds() {
        let events = vec![
            event(1, "m1", "unsubscribed", ts(10)),
            event(2, "m1", "deferred", ts(20)),
        ];
        assert!(rollup(&events).is_empty());
    }

    #[test]
    fn rollup_is_deterministic_over_reruns() {
        let events = vec![
            event(1, "m2", "click", ts(40)),
            event(2, "m1", "open", ts(10)),
            event(3, "m2", "Click", ts(20)),
        ];
        let first = rollup(&events);
        let second = rollup(&events);
        assert_eq!(first, second);
        assert_eq!(first[1].clicked_at, Some(ts(20)));
    }
}
