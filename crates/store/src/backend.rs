//! Queue backend trait.
//!
//! The send workers talk to the durable queue through this seam so
//! their loop logic is testable against an in-memory double.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use postbote_core::model::{CampaignContent, EspQuota, QueueItem, SendingProfile};

use crate::error::StoreError;
use crate::message_log::MessageLogEntry;
use crate::queue::ItemUpdate;
use crate::{campaigns, message_log, queue, quotas};

/// Durable-queue operations required by a send worker.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Claim up to `limit` due items for `worker_id` (§ claiming contract).
    async fn claim(&self, worker_id: &str, limit: u32) -> Result<Vec<QueueItem>, StoreError>;

    /// Return items to `queued` untouched, clearing the claim.
    async fn release(&self, ids: &[Uuid]) -> Result<u64, StoreError>;

    /// Apply terminal outcomes in one vectorized statement.
    async fn finalize(&self, updates: &[ItemUpdate]) -> Result<u64, StoreError>;

    /// Append message-log rows for successful sends.
    async fn append_message_log(&self, entries: &[MessageLogEntry]) -> Result<u64, StoreError>;

    /// Fetch campaign content for the in-process cache.
    async fn fetch_content(&self, campaign_id: Uuid)
        -> Result<Option<CampaignContent>, StoreError>;

    /// Fetch a campaign's ESP quota list; empty means single-profile.
    async fn fetch_quotas(&self, campaign_id: Uuid) -> Result<Vec<EspQuota>, StoreError>;

    /// Fetch a quota-selected sending profile.
    async fn fetch_profile(
        &self,
        profile_id: Uuid,
    ) -> Result<Option<SendingProfile>, StoreError>;
}

/// Postgres-backed implementation.
pub struct PgQueueBackend {
    pool: PgPool,
}

impl PgQueueBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueueBackend for PgQueueBackend {
    async fn claim(&self, worker_id: &str, limit: u32) -> Result<Vec<QueueItem>, StoreError> {
        queue::claim(&self.pool, worker_id, limit).await
    }

    async fn release(&self, ids: &[Uuid]) -> Result<u64, StoreError> {
        queue::release(&self.pool, ids).await
    }

    async fn finalize(&self, updates: &[ItemUpdate]) -> Result<u64, StoreError> {
        queue::bulk_finalize(&self.pool, updates).await
    }

    async fn append_message_log(&self, entries: &[MessageLogEntry]) -> Result<u64, StoreError> {
        message_log::bulk_append(&self.pool, entries).await
    }

    async fn fetch_content(
        &self,
        campaign_id: Uuid,
    ) -> Result<Option<CampaignContent>, StoreError> {
        campaigns::fetch_content(&self.pool, campaign_id).await
    }

    async fn fetch_quotas(&self, campaign_id: Uuid) -> Result<Vec<EspQuota>, StoreError> {
        quotas::fetch_quotas(&self.pool, campaign_id).await
    }

    async fn fetch_profile(
        &self,
        profile_id: Uuid,
    ) -> Result<Option<SendingProfile>, StoreError> {
        campaigns::fetch_profile(&self.pool, profile_id).await
    }
}
