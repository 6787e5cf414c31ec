//! Batch send worker: claim → group → send → reconcile.
//!
//! Workers coordinate only through the durable queue; a batch that
//! cannot be sent right now (rate limit, unhealthy ESPs, paused
//! campaign) is returned to `queued` and picked up by a later poll.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use postbote_core::model::{CampaignContent, EspKind, EspQuota, QueueItem, SendingProfile};
use postbote_core::template::substitute;
use postbote_dispatch::{DispatchError, Distributor};
use postbote_esp::grouper::split_batches;
use postbote_esp::{AdapterSource, BatchRequest, OutboundMessage, SendOutcome};
use postbote_store::{ItemUpdate, MessageLogEntry, QueueBackend};

use crate::cache::ContentCache;
use crate::domains::DomainThrottle;
use crate::error::DeliveryError;
use crate::rate::RateGate;
use crate::supervisor::Shutdown;

const CODE_BATCH_SEND_FAILED: &str = "batch_send_failed";
const CODE_CAMPAIGN_NOT_FOUND: &str = "campaign_not_found";
const CODE_NO_PROFILE: &str = "no_sending_profile";

#[derive(Debug, Clone)]
pub struct SendWorkerConfig {
    pub worker_id: String,
    pub claim_size: u32,
    pub poll_interval: Duration,
    /// Cap on the sleep after a rate-limit denial.
    pub max_backoff: Duration,
}

/// Monotonic counters shared with the heartbeat loop.
#[derive(Default)]
pub struct WorkerCounters {
    processed: AtomicU64,
    errors: AtomicU64,
}

impl WorkerCounters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_processed(&self, n: u64) {
        self.processed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_errors(&self, n: u64) {
        self.errors.fetch_add(n, Ordering::Relaxed);
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

/// Accumulated outcomes of one claim cycle, flushed in bulk.
#[derive(Default)]
struct CycleOutcome {
    updates: Vec<ItemUpdate>,
    log_entries: Vec<MessageLogEntry>,
    released: Vec<Uuid>,
}

pub struct SendWorker {
    backend: Arc<dyn QueueBackend>,
    cache: Arc<ContentCache>,
    adapters: Arc<dyn AdapterSource>,
    distributor: Arc<Distributor>,
    gate: Arc<RateGate>,
    domains: Arc<DomainThrottle>,
    counters: Arc<WorkerCounters>,
    config: SendWorkerConfig,
}

impl SendWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        backend: Arc<dyn QueueBackend>,
        cache: Arc<ContentCache>,
        adapters: Arc<dyn AdapterSource>,
        distributor: Arc<Distributor>,
        gate: Arc<RateGate>,
        domains: Arc<DomainThrottle>,
        counters: Arc<WorkerCounters>,
        config: SendWorkerConfig,
    ) -> Self {
        Self {
            backend,
            cache,
            adapters,
            distributor,
            gate,
            domains,
            counters,
            config,
        }
    }

    /// Run the claim/send loop until shutdown.
    pub async fn run(self, shutdown: Arc<Shutdown>) {
        info!(worker = %self.config.worker_id, "send worker started");
        loop {
            if shutdown.is_triggered() {
                break;
            }
            match self.process_once(&shutdown).await {
                Ok(0) => {
                    if shutdown.sleep_or_shutdown(self.config.poll_interval).await {
                        break;
                    }
                }
                Ok(count) => {
                    debug!(worker = %self.config.worker_id, count, "claim cycle complete");
                }
                Err(e) => {
                    warn!(worker = %self.config.worker_id, error = %e, "claim cycle failed");
                    if shutdown.sleep_or_shutdown(self.config.poll_interval).await {
                        break;
                    }
                }
            }
        }
        info!(worker = %self.config.worker_id, "send worker stopped");
    }

    /// One claim cycle. Returns how many items were claimed.
    pub async fn process_once(&self, shutdown: &Shutdown) -> Result<usize, DeliveryError> {
        let items = self
            .backend
            .claim(&self.config.worker_id, self.config.claim_size)
            .await?;
        if items.is_empty() {
            return Ok(0);
        }
        let claimed = items.len();

        // Per-campaign grouping preserves the claim order inside each
        // campaign, which is the only ordering the queue promises.
        let mut by_campaign: HashMap<Uuid, Vec<QueueItem>> = HashMap::new();
        for item in items {
            by_campaign.entry(item.campaign_id).or_default().push(item);
        }

        let mut outcome = CycleOutcome::default();
        for (campaign_id, campaign_items) in by_campaign {
            self.process_campaign(campaign_id, campaign_items, &mut outcome, shutdown)
                .await?;
        }

        if !outcome.released.is_empty() {
            self.backend.release(&outcome.released).await?;
        }
        if !outcome.updates.is_empty() {
            let updated = self.backend.finalize(&outcome.updates).await?;
            debug!(worker = %self.config.worker_id, updated, "queue rows finalized");
        }
        if !outcome.log_entries.is_empty() {
            self.backend.append_message_log(&outcome.log_entries).await?;
        }

        Ok(claimed)
    }

    async fn process_campaign(
        &self,
        campaign_id: Uuid,
        items: Vec<QueueItem>,
        outcome: &mut CycleOutcome,
        shutdown: &Shutdown,
    ) -> Result<(), DeliveryError> {
        let content = match self.cache.get_or_fetch(&*self.backend, campaign_id).await {
            Ok(Some(content)) => content,
            Ok(None) => {
                warn!(campaign = %campaign_id, items = items.len(), "campaign missing, failing items");
                self.counters.add_errors(items.len() as u64);
                self.counters.add_processed(items.len() as u64);
                outcome
                    .updates
                    .extend(items.iter().map(|i| ItemUpdate::failed(i.id, CODE_CAMPAIGN_NOT_FOUND)));
                return Ok(());
            }
            Err(e) => {
                // Transient store trouble: leave the items for a later poll.
                warn!(campaign = %campaign_id, error = %e, "content fetch failed, releasing items");
                outcome.released.extend(items.iter().map(|i| i.id));
                return Ok(());
            }
        };

        if !content.status.is_sendable() {
            debug!(
                campaign = %campaign_id,
                status = content.status.as_str(),
                items = items.len(),
                "campaign not sendable, requeueing"
            );
            outcome.released.extend(items.iter().map(|i| i.id));
            return Ok(());
        }

        let quotas = match self.backend.fetch_quotas(campaign_id).await {
            Ok(quotas) => quotas,
            Err(e) => {
                warn!(campaign = %campaign_id, error = %e, "quota fetch failed, using default profile");
                Vec::new()
            }
        };

        let base_kind = content
            .profile
            .as_ref()
            .map(|p| p.kind.clone())
            .unwrap_or(EspKind::Ses);

        for batch in split_batches(items, &base_kind) {
            self.send_batch(&content, &quotas, batch, outcome, shutdown)
                .await?;
        }
        Ok(())
    }

    async fn send_batch(
        &self,
        content: &CampaignContent,
        quotas: &[EspQuota],
        batch: Vec<QueueItem>,
        outcome: &mut CycleOutcome,
        shutdown: &Shutdown,
    ) -> Result<(), DeliveryError> {
        let campaign_id = content.campaign_id;

        let profile = match self.resolve_profile(content, quotas, &batch, outcome).await? {
            Some(profile) => profile,
            None => return Ok(()),
        };
        let kind = profile.kind.clone();

        // Advanced throttle: per-item, throttled items are not failures.
        let mut allowed = Vec::with_capacity(batch.len());
        for item in batch {
            if self.domains.admit(&item.email) {
                allowed.push(item);
            } else {
                outcome.released.push(item.id);
            }
        }
        if allowed.is_empty() {
            return Ok(());
        }

        let adapter = match self.adapters.adapter_for(&profile) {
            Ok(adapter) => adapter,
            Err(e) => {
                // Configuration problem: surface loudly, change nothing.
                error!(profile = %profile.id, error = %e, "esp adapter unavailable, releasing batch");
                outcome.released.extend(allowed.iter().map(|i| i.id));
                return Ok(());
            }
        };

        // Rate check, charged for the items actually going out. Runs
        // after the domain filter and adapter lookup so a release on
        // those paths never spends rate budget the batch won't use.
        match self.gate.admit(campaign_id, &kind, allowed.len() as u64).await? {
            Ok(()) => {}
            Err(backoff) => {
                debug!(
                    campaign = %campaign_id,
                    esp = %kind,
                    items = allowed.len(),
                    backoff_ms = backoff.as_millis() as u64,
                    "rate limited, requeueing batch"
                );
                outcome.released.extend(allowed.iter().map(|i| i.id));
                shutdown
                    .sleep_or_shutdown(backoff.min(self.config.max_backoff))
                    .await;
                return Ok(());
            }
        }

        // The grouper used the campaign's base kind; a quota-selected
        // profile may carry a tighter count limit.
        let chunk_size = adapter.max_batch_size().max(1);
        for chunk in allowed.chunks(chunk_size) {
            let request = self.assemble(content, &profile, chunk);
            match adapter.send_batch(&request).await {
                Ok(response) => {
                    self.reconcile(campaign_id, &profile, chunk, &response.results, outcome)
                        .await;
                }
                Err(e) => {
                    warn!(
                        campaign = %campaign_id,
                        profile = %profile.id,
                        items = chunk.len(),
                        error = %e,
                        "batch send failed"
                    );
                    for item in chunk {
                        outcome
                            .updates
                            .push(ItemUpdate::failed(item.id, CODE_BATCH_SEND_FAILED));
                    }
                    self.counters.add_errors(chunk.len() as u64);
                    self.counters.add_processed(chunk.len() as u64);
                    for _ in chunk {
                        self.record_failure(campaign_id, profile.id).await;
                    }
                }
            }
        }
        Ok(())
    }

    /// Pick the sending profile for a batch: quota-weighted when quotas
    /// exist, the campaign's own profile otherwise. `None` means the
    /// batch was already dispositioned into `outcome`.
    async fn resolve_profile(
        &self,
        content: &CampaignContent,
        quotas: &[EspQuota],
        batch: &[QueueItem],
        outcome: &mut CycleOutcome,
    ) -> Result<Option<SendingProfile>, DeliveryError> {
        if quotas.is_empty() {
            return match &content.profile {
                Some(profile) => Ok(Some(profile.clone())),
                None => {
                    warn!(campaign = %content.campaign_id, "campaign has no sending profile");
                    self.counters.add_errors(batch.len() as u64);
                    self.counters.add_processed(batch.len() as u64);
                    outcome
                        .updates
                        .extend(batch.iter().map(|i| ItemUpdate::failed(i.id, CODE_NO_PROFILE)));
                    Ok(None)
                }
            };
        }

        match self.distributor.select_esp(content.campaign_id, quotas).await {
            Ok(profile_id) => match self.backend.fetch_profile(profile_id).await? {
                Some(profile) => Ok(Some(profile)),
                None => {
                    warn!(
                        campaign = %content.campaign_id,
                        profile = %profile_id,
                        "quota names unknown profile, requeueing batch"
                    );
                    outcome.released.extend(batch.iter().map(|i| i.id));
                    Ok(None)
                }
            },
            Err(DispatchError::NoHealthyEsp) => {
                warn!(campaign = %content.campaign_id, "no healthy esp, requeueing batch");
                outcome.released.extend(batch.iter().map(|i| i.id));
                Ok(None)
            }
            Err(DispatchError::InvalidQuotas(reason)) => {
                warn!(
                    campaign = %content.campaign_id,
                    reason,
                    "invalid quotas, falling back to campaign profile"
                );
                match &content.profile {
                    Some(profile) => Ok(Some(profile.clone())),
                    None => {
                        outcome.released.extend(batch.iter().map(|i| i.id));
                        Ok(None)
                    }
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    fn assemble(
        &self,
        content: &CampaignContent,
        profile: &SendingProfile,
        items: &[QueueItem],
    ) -> BatchRequest {
        let messages = items
            .iter()
            .map(|item| OutboundMessage {
                queue_id: item.id,
                recipient: item.email.clone(),
                subject: substitute(&content.subject, &item.substitution_data),
                html: substitute(&content.html_content, &item.substitution_data),
                text: substitute(&content.plain_content, &item.substitution_data),
            })
            .collect();

        BatchRequest {
            from_name: content.from_name.clone(),
            from_email: content.from_email.clone(),
            reply_to: content.reply_to.clone(),
            ip_pool: profile.ip_pool.clone(),
            messages,
        }
    }

    /// Map per-index provider outcomes back onto queue items.
    async fn reconcile(
        &self,
        campaign_id: Uuid,
        profile: &SendingProfile,
        items: &[QueueItem],
        results: &[SendOutcome],
        outcome: &mut CycleOutcome,
    ) {
        let now = Utc::now();
        for (i, item) in items.iter().enumerate() {
            match results.get(i) {
                Some(SendOutcome::Accepted { message_id }) => {
                    outcome
                        .updates
                        .push(ItemUpdate::sent(item.id, message_id.clone()));
                    outcome.log_entries.push(MessageLogEntry {
                        message_id: message_id.clone(),
                        campaign_id,
                        subscriber_id: item.subscriber_id,
                        email: item.email.clone(),
                        esp_type: profile.kind.as_str().to_string(),
                        sent_at: now,
                    });
                    self.record_send(campaign_id, profile.id).await;
                }
                Some(SendOutcome::Rejected { code }) => {
                    outcome.updates.push(ItemUpdate::failed(item.id, code));
                    self.counters.add_errors(1);
                    self.record_failure(campaign_id, profile.id).await;
                }
                None => {
                    outcome
                        .updates
                        .push(ItemUpdate::failed(item.id, "missing_result"));
                    self.counters.add_errors(1);
                    self.record_failure(campaign_id, profile.id).await;
                }
            }
        }
        self.counters.add_processed(items.len() as u64);
    }

    async fn record_send(&self, campaign: Uuid, profile: Uuid) {
        if let Err(e) = self.distributor.record_send(campaign, profile).await {
            warn!(profile = %profile, error = %e, "record_send failed");
        }
    }

    async fn record_failure(&self, campaign: Uuid, profile: Uuid) {
        if let Err(e) = self.distributor.record_failure(campaign, profile).await {
            warn!(profile = %profile, error = %e, "record_failure failed");
        }
    }
}
