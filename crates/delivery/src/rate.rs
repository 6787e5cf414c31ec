//! Token-bucket admission for the send path.
//!
//! Two gates run in sequence for every batch: the campaign throttle
//! (rpm from the KV throttle config) and the per-ESP ceiling. A batch
//! is admitted only when both buckets can cover it, so a denial never
//! half-consumes tokens.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;
use uuid::Uuid;

use postbote_core::model::EspKind;
use postbote_kv::{KvError, ThrottleStore};

/// Continuous-refill token bucket. Capacity is one minute of tokens.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(rpm: u64) -> Self {
        let capacity = rpm.max(1) as f64;
        Self {
            capacity,
            tokens: capacity,
            refill_per_sec: capacity / 60.0,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let elapsed = self.last_refill.elapsed().as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = Instant::now();
    }

    fn available(&mut self, n: u64) -> bool {
        self.refill();
        self.tokens >= n as f64
    }

    fn deduct(&mut self, n: u64) {
        self.tokens -= n as f64;
    }

    /// How long until `n` tokens will be available.
    fn wait_for(&self, n: u64) -> Duration {
        let missing = (n as f64 - self.tokens).max(0.0);
        Duration::from_secs_f64(missing / self.refill_per_sec)
    }

    /// Take `n` tokens, or return how long to wait for them.
    pub fn try_take(&mut self, n: u64) -> Result<(), Duration> {
        if self.available(n) {
            self.deduct(n);
            Ok(())
        } else {
            Err(self.wait_for(n))
        }
    }
}

struct CampaignGate {
    bucket: TokenBucket,
    rpm: u64,
    fetched_at: Instant,
}

struct GateState {
    campaigns: HashMap<Uuid, CampaignGate>,
    esps: HashMap<EspKind, TokenBucket>,
}

/// Batch admission across campaign throttles and ESP ceilings.
pub struct RateGate {
    throttles: ThrottleStore,
    esp_rpm: u64,
    config_ttl: Duration,
    state: Mutex<GateState>,
}

impl RateGate {
    pub fn new(throttles: ThrottleStore, esp_rpm: u64, config_ttl: Duration) -> Self {
        Self {
            throttles,
            esp_rpm,
            config_ttl,
            state: Mutex::new(GateState {
                campaigns: HashMap::new(),
                esps: HashMap::new(),
            }),
        }
    }

    /// Admit `n` messages for (campaign, esp), or return the backoff
    /// to sleep before retrying.
    pub async fn admit(
        &self,
        campaign: Uuid,
        esp: &EspKind,
        n: u64,
    ) -> Result<Result<(), Duration>, KvError> {
        let rpm = self.campaign_rpm(campaign).await?;

        let mut state = self.state.lock().unwrap();

        let gate = state
            .campaigns
            .entry(campaign)
            .or_insert_with(|| CampaignGate {
                bucket: TokenBucket::new(rpm),
                rpm,
                fetched_at: Instant::now(),
            });
        if gate.rpm != rpm {
            gate.bucket = TokenBucket::new(rpm);
            gate.rpm = rpm;
        }
        if !gate.bucket.available(n) {
            let wait = gate.bucket.wait_for(n);
            debug!(campaign = %campaign, n, wait_ms = wait.as_millis() as u64, "campaign throttle denied batch");
            return Ok(Err(wait));
        }

        let esp_rpm = self.esp_rpm;
        let esp_bucket = state
            .esps
            .entry(esp.clone())
            .or_insert_with(|| TokenBucket::new(esp_rpm));
        if !esp_bucket.available(n) {
            let wait = esp_bucket.wait_for(n);
            debug!(esp = %esp, n, wait_ms = wait.as_millis() as u64, "esp ceiling denied batch");
            return Ok(Err(wait));
        }

        esp_bucket.deduct(n);
        if let Some(gate) = state.campaigns.get_mut(&campaign) {
            gate.bucket.deduct(n);
        }
        Ok(Ok(()))
    }

    /// Resolve the campaign's rpm, refreshing the KV config past its
    /// freshness window.
    async fn campaign_rpm(&self, campaign: Uuid) -> Result<u64, KvError> {
        {
            let state = self.state.lock().unwrap();
            if let Some(gate) = state.campaigns.get(&campaign) {
                if gate.fetched_at.elapsed() < self.config_ttl {
                    return Ok(gate.rpm);
                }
            }
        }

        let config = self.throttles.get(campaign).await?;
        let mut state = self.state.lock().unwrap();
        let entry = state
            .campaigns
            .entry(campaign)
            .or_insert_with(|| CampaignGate {
                bucket: TokenBucket::new(config.rpm),
                rpm: config.rpm,
                fetched_at: Instant::now(),
            });
        entry.fetched_at = Instant::now();
        Ok(config.rpm)
    }
}
