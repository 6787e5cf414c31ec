//! Per-profile ESP health tracking.
//!
//! Process-local table guarded by a reader/writer lock, with a
//! best-effort healthy-flag mirror in the KV store for a cross-process
//! view. Selection correctness depends only on the KV counters;
//! conflicting mirrors are eventually consistent.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tracing::{info, warn};
use uuid::Uuid;

use postbote_kv::KvStore;

const MIRROR_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy)]
pub struct HealthSettings {
    /// Consecutive failures before a profile is marked unhealthy.
    pub failure_threshold: u32,
    /// After this long since the last failure, an unhealthy profile
    /// is probed again (half-open).
    pub recovery: Duration,
    /// Failure counters older than this window are reset before
    /// counting a new failure, so short bursts don't haunt a profile.
    pub burst_window: Duration,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery: Duration::from_secs(120),
            burst_window: Duration::from_secs(60),
        }
    }
}

#[derive(Debug)]
struct EspHealth {
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    window_start: Instant,
    healthy: bool,
}

impl EspHealth {
    fn fresh() -> Self {
        Self {
            consecutive_failures: 0,
            last_failure: None,
            window_start: Instant::now(),
            healthy: true,
        }
    }
}

/// Tracks send health per sending profile.
pub struct HealthTracker {
    settings: HealthSettings,
    table: RwLock<HashMap<Uuid, EspHealth>>,
    kv: Option<Arc<dyn KvStore>>,
}

impl HealthTracker {
    pub fn new(settings: HealthSettings) -> Self {
        Self {
            settings,
            table: RwLock::new(HashMap::new()),
            kv: None,
        }
    }

    /// Mirror healthy-flag flips into the KV store.
    pub fn with_kv_mirror(mut self, kv: Arc<dyn KvStore>) -> Self {
        self.kv = Some(kv);
        self
    }

    /// Whether a profile currently accepts traffic: marked healthy, or
    /// unhealthy but past the recovery interval (half-open probe).
    pub fn is_healthy(&self, profile: Uuid) -> bool {
        let table = self.table.read().unwrap();
        match table.get(&profile) {
            None => true,
            Some(h) if h.healthy => true,
            Some(h) => h
                .last_failure
                .map(|t| t.elapsed() > self.settings.recovery)
                .unwrap_or(true),
        }
    }

    /// Count a failed send. Returns the new consecutive-failure count.
    pub async fn record_failure(&self, profile: Uuid) -> u32 {
        let (count, flipped) = {
            let mut table = self.table.write().unwrap();
            let entry = table.entry(profile).or_insert_with(EspHealth::fresh);

            if entry.window_start.elapsed() > self.settings.burst_window {
                entry.consecutive_failures = 0;
                entry.window_start = Instant::now();
            }

            entry.consecutive_failures += 1;
            entry.last_failure = Some(Instant::now());

            let tripping = entry.healthy
                && entry.consecutive_failures >= self.settings.failure_threshold;
            if tripping {
                entry.healthy = false;
            }
            (entry.consecutive_failures, tripping)
        };

        if flipped {
            warn!(profile = %profile, failures = count, "esp profile marked unhealthy");
            self.mirror(profile, false).await;
        }
        count
    }

    /// Count a successful send: clears the failure streak.
    pub async fn record_success(&self, profile: Uuid) {
        let flipped = {
            let mut table = self.table.write().unwrap();
            let entry = table.entry(profile).or_insert_with(EspHealth::fresh);
            entry.consecutive_failures = 0;
            entry.window_start = Instant::now();
            let recovering = !entry.healthy;
            entry.healthy = true;
            recovering
        };

        if flipped {
            info!(profile = %profile, "esp profile recovered");
            self.mirror(profile, true).await;
        }
    }

    /// Manual override: force a profile healthy.
    pub async fn reset(&self, profile: Uuid) {
        {
            let mut table = self.table.write().unwrap();
            table.insert(profile, EspHealth::fresh());
        }
        info!(profile = %profile, "esp profile health reset");
        self.mirror(profile, true).await;
    }

    async fn mirror(&self, profile: Uuid, healthy: bool) {
        if let Some(kv) = &self.kv {
            let key = format!("esp:health:{}", profile);
            let value = if healthy { "1" } else { "0" };
            if let Err(e) = kv.set_ex(&key, value, MIRROR_TTL).await {
                warn!(profile = %profile, error = %e, "health mirror write failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use postbote_kv::MemoryKv;

    fn tracker(threshold: u32, recovery_ms: u64) -> HealthTracker {
        HealthTracker::new(HealthSettings {
            failure_threshold: threshold,
            recovery: Duration::from_millis(recovery_ms),
            burst_window: Duration::from_secs(60),
        })
    }

    #[tokio::test]
    async fn unknown_profiles_are_healthy() {
        let t = tracker(5, 100);
        assert!(t.is_healthy(Uuid::new_v4()));
    }

    #[tokio::test]
    async fn threshold_trips_health() {
        let t = tracker(3, 60_000);
        let p = Uuid::new_v4();

        t.record_failure(p).await;
        t.record_failure(p).await;
        assert!(t.is_healthy(p));
        t.record_failure(p).await;
        assert!(!t.is_healthy(p));
    }

    #[tokio::test]
    async fn success_clears_streak() {
        let t = tracker(3, 60_000);
        let p = Uuid::new_v4();

        t.record_failure(p).await;
        t.record_failure(p).await;
        t.record_success(p).await;
        t.record_failure(p).await;
        t.record_failure(p).await;
        assert!(t.is_healthy(p));
    }

    #[tokio::test]
    async fn half_open_after_recovery_interval() {
        let t = tracker(2, 50);
        let p = Uuid::new_v4();

        t.record_failure(p).await;
        t.record_failure(p).await;
        assert!(!t.is_healthy(p));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(t.is_healthy(p));
    }

    #[tokio::test]
    async fn burst_window_resets_stale_streaks() {
        let t = HealthTracker::new(HealthSettings {
            failure_threshold: 2,
            recovery: Duration::from_secs(60),
            burst_window: Duration::from_millis(30),
        });
        let p = Uuid::new_v4();

        t.record_failure(p).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        // The old failure no longer counts; this is a new streak of one.
        let count = t.record_failure(p).await;
        assert_eq!(count, 1);
        assert!(t.is_healthy(p));
    }

    #[tokio::test]
    async fn reset_forces_healthy() {
        let t = tracker(1, 60_000);
        let p = Uuid::new_v4();

        t.record_failure(p).await;
        assert!(!t.is_healthy(p));
        t.reset(p).await;
        assert!(t.is_healthy(p));
    }

    #[tokio::test]
    async fn mirror_records_flips() {
        let kv = Arc::new(MemoryKv::new());
        let t = tracker(1, 60_000).with_kv_mirror(kv.clone());
        let p = Uuid::new_v4();

        t.record_failure(p).await;
        let key = format!("esp:health:{}", p);
        assert_eq!(kv.get(&key).await.unwrap().as_deref(), Some("0"));

        t.record_success(p).await;
        assert_eq!(kv.get(&key).await.unwrap().as_deref(), Some("1"));
    }
}
