//! In-process campaign content cache.
//!
//! Readers are hot (every claimed item resolves its campaign), writers
//! are rare (cache fill), so entries sit behind a reader/writer lock.
//! The cache owns its content copies; a background sweep evicts
//! entries older than the freshness window.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use postbote_core::model::CampaignContent;
use postbote_store::{QueueBackend, StoreError};

struct Entry {
    content: Arc<CampaignContent>,
    fetched_at: Instant,
}

pub struct ContentCache {
    entries: RwLock<HashMap<Uuid, Entry>>,
    ttl: Duration,
}

impl ContentCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Resolve campaign content, fetching through `backend` on miss or
    /// staleness. Unknown campaigns resolve to `None` (not cached).
    pub async fn get_or_fetch(
        &self,
        backend: &dyn QueueBackend,
        campaign_id: Uuid,
    ) -> Result<Option<Arc<CampaignContent>>, StoreError> {
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(&campaign_id) {
                if entry.fetched_at.elapsed() < self.ttl {
                    return Ok(Some(entry.content.clone()));
                }
            }
        }

        let Some(content) = backend.fetch_content(campaign_id).await? else {
            return Ok(None);
        };
        let content = Arc::new(content);

        let mut entries = self.entries.write().await;
        entries.insert(
            campaign_id,
            Entry {
                content: content.clone(),
                fetched_at: Instant::now(),
            },
        );
        Ok(Some(content))
    }

    /// Drop one campaign's entry (e.g. after a content edit).
    pub async fn invalidate(&self, campaign_id: Uuid) {
        self.entries.write().await.remove(&campaign_id);
    }

    /// Evict entries older than the freshness window. Returns how many
    /// were dropped.
    pub async fn sweep(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.fetched_at.elapsed() < self.ttl);
        let evicted = before - entries.len();
        if evicted > 0 {
            debug!(evicted, remaining = entries.len(), "content cache swept");
        }
        evicted
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// Background sweep loop evicting stale entries on a timer.
pub async fn run_sweeper(
    cache: Arc<ContentCache>,
    interval: Duration,
    shutdown: Arc<crate::supervisor::Shutdown>,
) {
    tracing::info!(interval_secs = interval.as_secs(), "content cache sweeper started");
    loop {
        if shutdown.sleep_or_shutdown(interval).await {
            break;
        }
        cache.sweep().await;
    }
    tracing::info!("content cache sweeper stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use postbote_core::model::{CampaignStatus, EspQuota, QueueItem, SendingProfile};
    use postbote_store::{EnqueueReport, ItemUpdate, MessageLogEntry};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingBackend {
        fetches: AtomicUsize,
        known: Uuid,
    }

    fn content(campaign_id: Uuid) -> CampaignContent {
        CampaignContent {
            campaign_id,
            subject: "Hello {{ first_name }}".into(),
            html_content: "<p>Hello</p>".into(),
            plain_content: "Hello".into(),
            from_name: "Post Bote".into(),
            from_email: "bote@example.com".into(),
            reply_to: None,
            status: CampaignStatus::Sending,
            profile: None,
        }
    }

    #[async_trait]
    impl QueueBackend for CountingBackend {
        async fn claim(&self, _: &str, _: u32) -> Result<Vec<QueueItem>, StoreError> {
            Ok(Vec::new())
        }
        async fn release(&self, _: &[Uuid]) -> Result<u64, StoreError> {
            Ok(0)
        }
        async fn finalize(&self, _: &[ItemUpdate]) -> Result<u64, StoreError> {
            Ok(0)
        }
        async fn append_message_log(&self, _: &[MessageLogEntry]) -> Result<u64, StoreError> {
            Ok(0)
        }
        async fn fetch_content(
            &self,
            campaign_id: Uuid,
        ) -> Result<Option<CampaignContent>, StoreError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if campaign_id == self.known {
                Ok(Some(content(campaign_id)))
            } else {
                Ok(None)
            }
        }
        async fn fetch_quotas(&self, _: Uuid) -> Result<Vec<EspQuota>, StoreError> {
            Ok(Vec::new())
        }
        async fn fetch_profile(&self, _: Uuid) -> Result<Option<SendingProfile>, StoreError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn second_read_hits_cache() {
        let campaign = Uuid::new_v4();
        let backend = CountingBackend {
            fetches: AtomicUsize::new(0),
            known: campaign,
        };
        let cache = ContentCache::new(Duration::from_secs(600));

        let first = cache.get_or_fetch(&backend, campaign).await.unwrap().unwrap();
        let second = cache.get_or_fetch(&backend, campaign).await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(backend.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_campaigns_are_not_cached() {
        let backend = CountingBackend {
            fetches: AtomicUsize::new(0),
            known: Uuid::new_v4(),
        };
        let cache = ContentCache::new(Duration::from_secs(600));
        let missing = Uuid::new_v4();

        assert!(cache.get_or_fetch(&backend, missing).await.unwrap().is_none());
        assert!(cache.get_or_fetch(&backend, missing).await.unwrap().is_none());
        // Both lookups reached the backend.
        assert_eq!(backend.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stale_entries_refetch() {
        let campaign = Uuid::new_v4();
        let backend = CountingBackend {
            fetches: AtomicUsize::new(0),
            known: campaign,
        };
        let cache = ContentCache::new(Duration::from_millis(10));

        cache.get_or_fetch(&backend, campaign).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.get_or_fetch(&backend, campaign).await.unwrap();
        assert_eq!(backend.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn sweep_evicts_only_stale() {
        let fresh_campaign = Uuid::new_v4();
        let backend = CountingBackend {
            fetches: AtomicUsize::new(0),
            known: fresh_campaign,
        };
        let cache = ContentCache::new(Duration::from_millis(50));

        cache.get_or_fetch(&backend, fresh_campaign).await.unwrap();
        assert_eq!(cache.sweep().await, 0);
        assert_eq!(cache.len().await, 1);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(cache.sweep().await, 1);
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let campaign = Uuid::new_v4();
        let backend = CountingBackend {
            fetches: AtomicUsize::new(0),
            known: campaign,
        };
        let cache = ContentCache::new(Duration::from_secs(600));

        cache.get_or_fetch(&backend, campaign).await.unwrap();
        cache.invalidate(campaign).await;
        cache.get_or_fetch(&backend, campaign).await.unwrap();
        assert_eq!(backend.fetches.load(Ordering::SeqCst), 2);
    }
}
