//! Provider envelope decoders.
//!
//! Each vendor wraps telemetry differently; these decoders are the
//! only polymorphic spot. Everything downstream works on
//! [`NormalizedEvent`].

use chrono::{DateTime, Utc};
use serde_json::Value;

use postbote_core::model::EspKind;

use crate::error::WebhookError;

/// One provider event, reduced to what staging needs.
#[derive(Debug, Clone)]
pub struct NormalizedEvent {
    pub provider: EspKind,
    pub kind: String,
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
    pub raw: Value,
}

/// Outcome of decoding one webhook POST.
#[derive(Debug)]
pub enum ParsedWebhook {
    Events(Vec<NormalizedEvent>),
    /// SNS handshake: the receiver must GET this URL to confirm.
    SubscriptionConfirmation { url: String },
}

fn body_json(body: &[u8]) -> Result<Value, WebhookError> {
    serde_json::from_slice(body).map_err(|e| WebhookError::Parse(e.to_string()))
}

/// Accepts RFC 3339 strings, epoch seconds (number or string), or
/// fractional epoch seconds.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                return Some(ts.with_timezone(&Utc));
            }
            s.parse::<f64>().ok().and_then(from_epoch)
        }
        Value::Number(n) => n.as_f64().and_then(from_epoch),
        _ => None,
    }
}

fn from_epoch(secs: f64) -> Option<DateTime<Utc>> {
    let whole = secs.trunc() as i64;
    let nanos = (secs.fract() * 1e9) as u32;
    DateTime::from_timestamp(whole, nanos)
}

// ── SparkPost ─────────────────────────────────────────────────

/// Array of objects, each carrying a `msys` wrapper with named
/// event-category sub-objects (`message_event`, `track_event`, ...).
pub fn parse_sparkpost(body: &[u8]) -> Result<Vec<NormalizedEvent>, WebhookError> {
    let root = body_json(body)?;
    let items = root
        .as_array()
        .ok_or_else(|| WebhookError::Parse("sparkpost payload is not an array".into()))?;

    let mut events = Vec::new();
    for item in items {
        let Some(msys) = item.get("msys").and_then(Value::as_object) else {
            continue;
        };
        for event in msys.values() {
            let Some(kind) = event.get("type").and_then(Value::as_str) else {
                continue;
            };
            let Some(message_id) = event.get("message_id").and_then(Value::as_str) else {
                continue;
            };
            let Some(timestamp) = event.get("timestamp").and_then(parse_timestamp) else {
                continue;
            };
            events.push(NormalizedEvent {
                provider: EspKind::Sparkpost,
                kind: kind.to_string(),
                message_id: message_id.to_string(),
                timestamp,
                raw: event.clone(),
            });
        }
    }
    Ok(events)
}

// ── SES (SNS envelope) ────────────────────────────────────────

/// SNS wrapper whose `Message` field is a JSON string carrying the SES
/// notification. Subscription handshakes surface as their own variant.
pub fn parse_ses(body: &[u8]) -> Result<ParsedWebhook, WebhookError> {
    let root = body_json(body)?;

    if root.get("Type").and_then(Value::as_str) == Some("SubscriptionConfirmation") {
        let url = root
            .get("SubscribeURL")
            .and_then(Value::as_str)
            .ok_or_else(|| WebhookError::Parse("confirmation without SubscribeURL".into()))?;
        return Ok(ParsedWebhook::SubscriptionConfirmation {
            url: url.to_string(),
        });
    }

    let message_raw = root
        .get("Message")
        .and_then(Value::as_str)
        .ok_or_else(|| WebhookError::Parse("sns envelope without Message".into()))?;
    let message: Value = serde_json::from_str(message_raw)
        .map_err(|e| WebhookError::Parse(format!("sns Message is not JSON: {e}")))?;

    let Some(kind) = message.get("notificationType").and_then(Value::as_str) else {
        return Ok(ParsedWebhook::Events(Vec::new()));
    };
    let Some(message_id) = message
        .pointer("/mail/messageId")
        .and_then(Value::as_str)
    else {
        return Ok(ParsedWebhook::Events(Vec::new()));
    };

    // Event detail objects carry their own timestamp; the SNS envelope
    // timestamp is the fallback.
    let detail_key = kind.to_ascii_lowercase();
    let timestamp = message
        .pointer(&format!("/{detail_key}/timestamp"))
        .and_then(parse_timestamp)
        .or_else(|| root.get("Timestamp").and_then(parse_timestamp))
        .unwrap_or_else(Utc::now);

    Ok(ParsedWebhook::Events(vec![NormalizedEvent {
        provider: EspKind::Ses,
        kind: kind.to_string(),
        message_id: message_id.to_string(),
        timestamp,
        raw: message,
    }]))
}

// ── Mailgun ───────────────────────────────────────────────────

/// Single `event-data` object with epoch-seconds timestamp.
pub fn parse_mailgun(body: &[u8]) -> Result<Vec<NormalizedEvent>, WebhookError> {
    let root = body_json(body)?;
    let Some(data) = root.get("event-data") else {
        return Ok(Vec::new());
    };

    let Some(kind) = data.get("event").and_then(Value::as_str) else {
        return Ok(Vec::new());
    };
    let message_id = data
        .get("message-id")
        .and_then(Value::as_str)
        .or_else(|| {
            data.pointer("/message/headers/message-id")
                .and_then(Value::as_str)
        });
    let Some(message_id) = message_id else {
        return Ok(Vec::new());
    };
    let Some(timestamp) = data.get("timestamp").and_then(parse_timestamp) else {
        return Ok(Vec::new());
    };

    Ok(vec![NormalizedEvent {
        provider: EspKind::Mailgun,
        kind: kind.to_string(),
        message_id: message_id.to_string(),
        timestamp,
        raw: data.clone(),
    }])
}

// ── SendGrid ──────────────────────────────────────────────────

/// Array of flat event objects with `sg_message_id` and epoch seconds.
pub fn parse_sendgrid(body: &[u8]) -> Result<Vec<NormalizedEvent>, WebhookError> {
    let root = body_json(body)?;
    let items = root
        .as_array()
        .ok_or_else(|| WebhookError::Parse("sendgrid payload is not an array".into()))?;

    let mut events = Vec::new();
    for item in items {
        let Some(kind) = item.get("event").and_then(Value::as_str) else {
            continue;
        };
        let Some(sg_id) = item.get("sg_message_id").and_then(Value::as_str) else {
            continue;
        };
        let Some(timestamp) = item.get("timestamp").and_then(parse_timestamp) else {
            continue;
        };
        // sg_message_id carries a ".filter..." routing suffix.
        let message_id = sg_id.split(".filter").next().unwrap_or(sg_id);
        events.push(NormalizedEvent {
            provider: EspKind::Sendgrid,
            kind: kind.to_string(),
            message_id: message_id.to_string(),
            timestamp,
            raw: item.clone(),
        });
    }
    Ok(events)
}
