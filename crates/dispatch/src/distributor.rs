//! Quota-weighted ESP selection.
//!
//! Selection computes, for every healthy profile, its deficit: the
//! volume the quota says it should have sent minus what it actually
//! sent. The profile with the largest deficit wins, so repeated
//! selections trend to the configured percentages even under
//! contention — counters are monotonic and shared through KV.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use postbote_core::model::EspQuota;
use postbote_kv::{DistributionStats, KvStore};

use crate::error::DispatchError;
use crate::health::HealthTracker;

pub struct Distributor {
    stats: DistributionStats,
    health: Arc<HealthTracker>,
}

impl Distributor {
    pub fn new(kv: Arc<dyn KvStore>, health: Arc<HealthTracker>) -> Self {
        Self {
            stats: DistributionStats::new(kv),
            health,
        }
    }

    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    /// Pick the sending profile for the next batch of a campaign.
    pub async fn select_esp(
        &self,
        campaign: Uuid,
        quotas: &[EspQuota],
    ) -> Result<Uuid, DispatchError> {
        validate_quotas(quotas)?;

        let healthy: Vec<EspQuota> = quotas
            .iter()
            .filter(|q| self.health.is_healthy(q.profile_id))
            .cloned()
            .collect();
        if healthy.is_empty() {
            return Err(DispatchError::NoHealthyEsp);
        }
        if healthy.len() == 1 {
            return Ok(healthy[0].profile_id);
        }

        let effective = normalize(&healthy);
        let profile_ids: Vec<Uuid> = effective.iter().map(|q| q.profile_id).collect();
        let stats = self.stats.read(campaign, &profile_ids).await?;

        let total_sent: i64 = stats.iter().map(|s| s.sent).sum();
        let target = total_sent + 1;

        // deficit·100 = target·pct − 100·sent; same ordering, no division.
        let mut best = effective[0].profile_id;
        let mut best_score = i64::MIN;
        for (quota, stat) in effective.iter().zip(stats.iter()) {
            let score = target * quota.percent as i64 - 100 * stat.sent;
            if score > best_score {
                best_score = score;
                best = quota.profile_id;
            }
        }

        debug!(campaign = %campaign, profile = %best, "esp selected");
        Ok(best)
    }

    /// Count a successful send for quota accounting and health.
    pub async fn record_send(&self, campaign: Uuid, profile: Uuid) -> Result<(), DispatchError> {
        self.stats.record_sent(campaign, profile).await?;
        self.health.record_success(profile).await;
        Ok(())
    }

    /// Count a failed send for quota accounting and health.
    pub async fn record_failure(&self, campaign: Uuid, profile: Uuid) -> Result<(), DispatchError> {
        self.stats.record_failed(campaign, profile).await?;
        self.health.record_failure(profile).await;
        Ok(())
    }

    /// Remove a campaign's distribution counters.
    pub async fn clear_stats(&self, campaign: Uuid) -> Result<usize, DispatchError> {
        Ok(self.stats.clear(campaign).await?)
    }
}

/// Quotas must be non-empty, each percentage in [0, 100], summing to 100.
pub fn validate_quotas(quotas: &[EspQuota]) -> Result<(), DispatchError> {
    if quotas.is_empty() {
        return Err(DispatchError::InvalidQuotas("no quota entries".into()));
    }
    for q in quotas {
        if !(0..=100).contains(&q.percent) {
            return Err(DispatchError::InvalidQuotas(format!(
                "percentage {} for profile {} out of range",
                q.percent, q.profile_id
            )));
        }
    }
    let sum: i32 = quotas.iter().map(|q| q.percent).sum();
    if sum != 100 {
        return Err(DispatchError::InvalidQuotas(format!(
            "percentages sum to {sum}, expected 100"
        )));
    }
    Ok(())
}

/// Rescale a healthy subset whose percentages no longer sum to 100.
/// Integer division; the remainder is absorbed by the first entry.
fn normalize(quotas: &[EspQuota]) -> Vec<EspQuota> {
    let sum: i32 = quotas.iter().map(|q| q.percent).sum();
    if sum == 100 || sum == 0 {
        return quotas.to_vec();
    }

    let mut scaled: Vec<EspQuota> = quotas
        .iter()
        .map(|q| EspQuota::new(q.profile_id, q.percent * 100 / sum))
        .collect();
    let scaled_sum: i32 = scaled.iter().map(|q| q.percent).sum();
    scaled[0].percent += 100 - scaled_sum;
    scaled
}

#[cfg(test)]
mod tests {
    use super::*;
    use postbote_kv::MemoryKv;

    use crate::health::HealthSettings;
    use std::time::Duration;

    fn distributor(settings: HealthSettings) -> Distributor {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        Distributor::new(kv, Arc::new(HealthTracker::new(settings)))
    }

    fn quotas(entries: &[(Uuid, i32)]) -> Vec<EspQuota> {
        entries
            .iter()
            .map(|(id, pct)| EspQuota::new(*id, *pct))
            .collect()
    }

    #[test]
    fn validation_accepts_exact_hundred() {
        let q = quotas(&[
            (Uuid::new_v4(), 33),
            (Uuid::new_v4(), 33),
            (Uuid::new_v4(), 34),
        ]);
        assert!(validate_quotas(&q).is_ok());
    }

    #[test]
    fn validation_rejects_wrong_sums() {
        let under = quotas(&[(Uuid::new_v4(), 50), (Uuid::new_v4(), 30)]);
        assert!(matches!(
            validate_quotas(&under),
            Err(DispatchError::InvalidQuotas(_))
        ));
        let over = quotas(&[(Uuid::new_v4(), 70), (Uuid::new_v4(), 50)]);
        assert!(validate_quotas(&over).is_err());
    }

    #[test]
    fn validation_rejects_negative_and_empty() {
        let negative = quotas(&[(Uuid::new_v4(), -10), (Uuid::new_v4(), 110)]);
        assert!(validate_quotas(&negative).is_err());
        assert!(validate_quotas(&[]).is_err());
    }

    #[test]
    fn normalize_scales_with_remainder_to_first() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        // Healthy subset of a [50,30,20] split after losing the 20.
        let scaled = normalize(&quotas(&[(a, 50), (b, 30)]));
        // 50·100/80 = 62, 30·100/80 = 37, remainder 1 → first entry.
        assert_eq!(scaled[0].percent, 63);
        assert_eq!(scaled[1].percent, 37);
        assert_eq!(scaled.iter().map(|q| q.percent).sum::<i32>(), 100);
    }

    #[tokio::test]
    async fn deficit_selection_follows_quota() {
        let d = distributor(HealthSettings::default());
        let campaign = Uuid::new_v4();
        let sp = Uuid::new_v4();
        let ses = Uuid::new_v4();
        let q = quotas(&[(sp, 60), (ses, 40)]);

        // Empty stats: the 60% profile has the larger deficit.
        assert_eq!(d.select_esp(campaign, &q).await.unwrap(), sp);

        for _ in 0..10 {
            d.record_send(campaign, sp).await.unwrap();
        }
        // sp is now over quota; ses has the deficit.
        assert_eq!(d.select_esp(campaign, &q).await.unwrap(), ses);
    }

    #[tokio::test]
    async fn all_unhealthy_is_an_error_until_recovery() {
        let d = distributor(HealthSettings {
            failure_threshold: 2,
            recovery: Duration::from_millis(100),
            burst_window: Duration::from_secs(60),
        });
        let campaign = Uuid::new_v4();
        let sp = Uuid::new_v4();
        let backup = Uuid::new_v4();
        let q = quotas(&[(sp, 80), (backup, 20)]);

        d.record_failure(campaign, sp).await.unwrap();
        d.record_failure(campaign, sp).await.unwrap();
        // sp is out; only backup remains.
        assert_eq!(d.select_esp(campaign, &q).await.unwrap(), backup);

        d.record_failure(campaign, backup).await.unwrap();
        d.record_failure(campaign, backup).await.unwrap();
        assert!(matches!(
            d.select_esp(campaign, &q).await,
            Err(DispatchError::NoHealthyEsp)
        ));

        // Past the recovery interval both probe healthy again, and the
        // 80% profile wins on deficit.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(d.select_esp(campaign, &q).await.unwrap(), sp);
    }

    #[tokio::test]
    async fn ties_break_by_quota_order() {
        let d = distributor(HealthSettings::default());
        let campaign = Uuid::new_v4();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let q = quotas(&[(first, 50), (second, 50)]);

        // Identical deficits: the earlier quota entry wins.
        assert_eq!(d.select_esp(campaign, &q).await.unwrap(), first);
    }

    #[tokio::test]
    async fn selection_converges_to_quota_fractions() {
        let d = distributor(HealthSettings::default());
        let campaign = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let q = quotas(&[(a, 60), (b, 30), (c, 10)]);

        let mut counts = std::collections::HashMap::new();
        for _ in 0..200 {
            let selected = d.select_esp(campaign, &q).await.unwrap();
            *counts.entry(selected).or_insert(0u32) += 1;
            d.record_send(campaign, selected).await.unwrap();
        }

        assert_eq!(counts[&a], 120);
        assert_eq!(counts[&b], 60);
        assert_eq!(counts[&c], 20);
    }

    #[tokio::test]
    async fn clear_stats_resets_distribution() {
        let d = distributor(HealthSettings::default());
        let campaign = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let q = quotas(&[(a, 60), (b, 40)]);

        for _ in 0..10 {
            d.record_send(campaign, a).await.unwrap();
        }
        assert_eq!(d.select_esp(campaign, &q).await.unwrap(), b);

        let removed = d.clear_stats(campaign).await.unwrap();
        assert!(removed > 0);
        // Counters gone: selection restarts from the quota head.
        assert_eq!(d.select_esp(campaign, &q).await.unwrap(), a);
    }
}
