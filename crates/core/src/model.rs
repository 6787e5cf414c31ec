//! Domain model shared across the worker tier.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

// ── Queue ─────────────────────────────────────────────────────

/// Lifecycle of a queue item.
///
/// Transitions: queued → claimed → processing → {sent | failed};
/// failed → queued on requeue, or → dead_letter past the retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Queued,
    Claimed,
    Processing,
    Sending,
    Sent,
    Failed,
    DeadLetter,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Claimed => "claimed",
            Self::Processing => "processing",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::DeadLetter => "dead_letter",
        }
    }

    /// Whether an item in this status still holds a worker claim.
    pub fn is_claimed(&self) -> bool {
        matches!(self, Self::Claimed | Self::Processing | Self::Sending)
    }
}

impl FromStr for QueueStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "claimed" => Ok(Self::Claimed),
            "processing" => Ok(Self::Processing),
            "sending" => Ok(Self::Sending),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            "dead_letter" => Ok(Self::DeadLetter),
            other => Err(CoreError::UnknownStatus(other.to_string())),
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single durable queue row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub subscriber_id: Uuid,
    pub email: String,
    pub substitution_data: SubstitutionData,
    pub priority: i32,
    pub scheduled_at: DateTime<Utc>,
    pub status: QueueStatus,
    pub claimed_at: Option<DateTime<Utc>>,
    pub worker_id: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub message_id: Option<String>,
    pub error_code: Option<String>,
    pub retry_count: i32,
}

// ── Campaign ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Sending,
    Paused,
    Cancelled,
    Completed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Scheduled => "scheduled",
            Self::Sending => "sending",
            Self::Paused => "paused",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        }
    }

    /// Whether claimed items of this campaign should be sent.
    pub fn is_sendable(&self) -> bool {
        matches!(self, Self::Scheduled | Self::Sending)
    }
}

impl FromStr for CampaignStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "scheduled" => Ok(Self::Scheduled),
            "sending" => Ok(Self::Sending),
            "paused" => Ok(Self::Paused),
            "cancelled" => Ok(Self::Cancelled),
            "completed" => Ok(Self::Completed),
            other => Err(CoreError::UnknownStatus(other.to_string())),
        }
    }
}

/// Campaign content plus sending identity, as cached by the send workers.
#[derive(Debug, Clone)]
pub struct CampaignContent {
    pub campaign_id: Uuid,
    pub subject: String,
    pub html_content: String,
    pub plain_content: String,
    pub from_name: String,
    pub from_email: String,
    pub reply_to: Option<String>,
    pub status: CampaignStatus,
    pub profile: Option<SendingProfile>,
}

// ── Sending profiles ──────────────────────────────────────────

/// Which outbound vendor a sending profile speaks to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EspKind {
    Sparkpost,
    Ses,
    Mailgun,
    Sendgrid,
    Pmta,
    Other(String),
}

impl EspKind {
    /// Parse a vendor string. An empty string defaults to SES.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "ses" => Self::Ses,
            "sparkpost" => Self::Sparkpost,
            "mailgun" => Self::Mailgun,
            "sendgrid" => Self::Sendgrid,
            "pmta" => Self::Pmta,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Sparkpost => "sparkpost",
            Self::Ses => "ses",
            Self::Mailgun => "mailgun",
            Self::Sendgrid => "sendgrid",
            Self::Pmta => "pmta",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for EspKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named credential/identity of an ESP relationship.
///
/// Credentials are opaque to the core; only the adapter for the
/// matching vendor interprets them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendingProfile {
    pub id: Uuid,
    pub kind: EspKind,
    pub from_name: String,
    pub from_email: String,
    pub credentials: serde_json::Value,
    pub ip_pool: Option<String>,
}

/// One entry of a campaign's ESP quota list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EspQuota {
    pub profile_id: Uuid,
    pub percent: i32,
}

impl EspQuota {
    pub fn new(profile_id: Uuid, percent: i32) -> Self {
        Self {
            profile_id,
            percent,
        }
    }
}

// ── Substitution values ───────────────────────────────────────

/// A substitution value: string, number, or bool.
///
/// Serializes untagged so `{"first_name": "Ada", "score": 7}` round-trips
/// through the queue's jsonb column unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubstValue {
    Str(String),
    Num(f64),
    Bool(bool),
}

impl SubstValue {
    /// The string view used by template substitution.
    pub fn render(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            Self::Num(n) => {
                if n.fract() == 0.0 && n.abs() < 9e15 {
                    format!("{}", *n as i64)
                } else {
                    n.to_string()
                }
            }
            Self::Bool(b) => b.to_string(),
        }
    }
}

impl From<&str> for SubstValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

pub type SubstitutionData = HashMap<String, SubstValue>;
