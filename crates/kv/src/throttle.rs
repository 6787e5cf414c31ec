//! Per-campaign throttle configuration.
//!
//! Serialized into the KV store under `campaign:throttle:{campaign}`
//! with a 24-hour TTL so stale campaigns fall back to the gentle
//! default without manual cleanup.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::KvError;
use crate::store::KvStore;

const THROTTLE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

fn throttle_key(campaign: Uuid) -> String {
    format!("campaign:throttle:{}", campaign)
}

/// Named speed profiles for a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrottleTier {
    Instant,
    Gentle,
    Moderate,
    Careful,
    Custom,
}

impl ThrottleTier {
    /// Messages per minute for the non-custom tiers.
    pub fn default_rpm(&self) -> u64 {
        match self {
            Self::Instant => 1000,
            Self::Gentle => 100,
            Self::Moderate => 50,
            Self::Careful => 20,
            Self::Custom => Self::Gentle.default_rpm(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    pub tier: ThrottleTier,
    pub rpm: u64,
}

impl ThrottleConfig {
    /// Resolve a tier plus optional custom rate into a concrete config.
    /// Custom without a rate falls back to the gentle default.
    pub fn resolve(tier: ThrottleTier, custom_rpm: Option<u64>) -> Self {
        let rpm = match tier {
            ThrottleTier::Custom => custom_rpm.unwrap_or_else(|| tier.default_rpm()),
            _ => tier.default_rpm(),
        };
        Self { tier, rpm }
    }

    pub fn gentle() -> Self {
        Self {
            tier: ThrottleTier::Gentle,
            rpm: ThrottleTier::Gentle.default_rpm(),
        }
    }
}

/// KV-backed throttle config store.
pub struct ThrottleStore {
    kv: Arc<dyn KvStore>,
}

impl ThrottleStore {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// Persist a campaign's throttle with the 24 h TTL.
    pub async fn set(
        &self,
        campaign: Uuid,
        tier: ThrottleTier,
        custom_rpm: Option<u64>,
    ) -> Result<ThrottleConfig, KvError> {
        let config = ThrottleConfig::resolve(tier, custom_rpm);
        let raw = serde_json::to_string(&config)
            .map_err(|e| KvError::Decode(e.to_string()))?;
        self.kv
            .set_ex(&throttle_key(campaign), &raw, THROTTLE_TTL)
            .await?;
        Ok(config)
    }

    /// Read a campaign's throttle; absent or unreadable entries fall
    /// back to the gentle default.
    pub async fn get(&self, campaign: Uuid) -> Result<ThrottleConfig, KvError> {
        match self.kv.get(&throttle_key(campaign)).await? {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(config) => Ok(config),
                Err(e) => {
                    tracing::warn!(
                        campaign = %campaign,
                        error = %e,
                        "unreadable throttle config, using gentle default"
                    );
                    Ok(ThrottleConfig::gentle())
                }
            },
            None => Ok(ThrottleConfig::gentle()),
        }
    }

    pub async fn clear(&self, campaign: Uuid) -> Result<(), KvError> {
        self.kv.del(&[throttle_key(campaign)]).await
    }
}
