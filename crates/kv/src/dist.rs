//! Per-(campaign, profile) send/failure counters.
//!
//! Counters live in the KV store so every worker process sees the
//! same distribution picture. They are monotonic; only an explicit
//! `clear` removes them.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::KvError;
use crate::store::KvStore;

fn sent_key(campaign: Uuid, profile: Uuid) -> String {
    format!("esp:dist:{}:{}:sent", campaign, profile)
}

fn failed_key(campaign: Uuid, profile: Uuid) -> String {
    format!("esp:dist:{}:{}:failed", campaign, profile)
}

/// Counter snapshot for one sending profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileStats {
    pub profile_id: Uuid,
    pub sent: i64,
    pub failed: i64,
}

/// KV-backed distribution counters.
pub struct DistributionStats {
    kv: Arc<dyn KvStore>,
}

impl DistributionStats {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub async fn record_sent(&self, campaign: Uuid, profile: Uuid) -> Result<i64, KvError> {
        self.kv.incr_by(&sent_key(campaign, profile), 1).await
    }

    pub async fn record_failed(&self, campaign: Uuid, profile: Uuid) -> Result<i64, KvError> {
        self.kv.incr_by(&failed_key(campaign, profile), 1).await
    }

    /// Read counters for the given profiles, in the given order.
    /// Absent counters read as zero.
    pub async fn read(
        &self,
        campaign: Uuid,
        profiles: &[Uuid],
    ) -> Result<Vec<ProfileStats>, KvError> {
        let mut stats = Vec::with_capacity(profiles.len());
        for &profile in profiles {
            let sent = self.read_counter(&sent_key(campaign, profile)).await?;
            let failed = self.read_counter(&failed_key(campaign, profile)).await?;
            stats.push(ProfileStats {
                profile_id: profile,
                sent,
                failed,
            });
        }
        Ok(stats)
    }

    /// Remove every counter for a campaign.
    pub async fn clear(&self, campaign: Uuid) -> Result<usize, KvError> {
        let keys = self
            .kv
            .scan_prefix(&format!("esp:dist:{}:", campaign))
            .await?;
        let count = keys.len();
        self.kv.del(&keys).await?;
        Ok(count)
    }

    async fn read_counter(&self, key: &str) -> Result<i64, KvError> {
        match self.kv.get(key).await? {
            Some(raw) => raw.parse().map_err(|e: std::num::ParseIntError| {
                KvError::Decode(format!("counter {key}: {e}"))
            }),
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryKv;

    fn stats() -> DistributionStats {
        DistributionStats::new(Arc::new(MemoryKv::new()))
    }

    #[tokio::test]
    async fn counters_are_monotonic() {
        let s = stats();
        let campaign = Uuid::new_v4();
        let profile = Uuid::new_v4();

        for _ in 0..3 {
            s.record_sent(campaign, profile).await.unwrap();
        }
        s.record_failed(campaign, profile).await.unwrap();

        let read = s.read(campaign, &[profile]).await.unwrap();
        assert_eq!(read[0].sent, 3);
        assert_eq!(read[0].failed, 1);
    }

    #[tokio::test]
    async fn absent_counters_read_zero() {
        let s = stats();
        let read = s
            .read(Uuid::new_v4(), &[Uuid::new_v4(), Uuid::new_v4()])
            .await
            .unwrap();
        assert!(read.iter().all(|p| p.sent == 0 && p.failed == 0));
    }

    #[tokio::test]
    async fn clear_removes_campaign_keys_only() {
        let s = stats();
        let c1 = Uuid::new_v4();
        let c2 = Uuid::new_v4();
        let p = Uuid::new_v4();

        s.record_sent(c1, p).await.unwrap();
        s.record_failed(c1, p).await.unwrap();
        s.record_sent(c2, p).await.unwrap();

        let removed = s.clear(c1).await.unwrap();
        assert_eq!(removed, 2);

        let read1 = s.read(c1, &[p]).await.unwrap();
        assert_eq!(read1[0].sent, 0);
        let read2 = s.read(c2, &[p]).await.unwrap();
        assert_eq!(read2[0].sent, 1);
    }
}
