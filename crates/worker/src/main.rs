//! postbote-worker — the send tier of the bulk delivery platform.
//!
//! Hosts the batch send worker pool plus its background loops (queue
//! recovery, webhook aggregator, heartbeat, cache sweep) and the
//! webhook ingest listener, all under one supervisor with a bounded
//! graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use postbote_core::config::load_dotenv;
use postbote_core::Config;
use postbote_delivery::{
    cache, heartbeat, recovery, ContentCache, DomainThrottle, RateGate, SendWorker,
    SendWorkerConfig, Supervisor, WorkerCounters,
};
use postbote_dispatch::{Distributor, HealthSettings, HealthTracker};
use postbote_esp::AdapterRegistry;
use postbote_kv::{KvStore, RedisKv, ThrottleStore};
use postbote_store::{pg, PgQueueBackend};
use postbote_webhook::receiver::{self, PgEventSink, ReceiverState};
use postbote_webhook::aggregator;

// ── CLI ─────────────────────────────────────────────────────────────

/// Batch send worker: drains the queue, dispatches through ESPs, and
/// ingests delivery telemetry.
#[derive(Parser, Debug)]
#[command(name = "postbote-worker", version, about)]
struct Cli {
    /// Number of concurrent send workers (overrides SEND_WORKERS).
    #[arg(long)]
    workers: Option<u32>,

    /// Items claimed per poll (overrides CLAIM_SIZE).
    #[arg(long)]
    claim_size: Option<u32>,

    /// Sleep between empty polls, in milliseconds (overrides POLL_INTERVAL_MS).
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// Webhook listener port (overrides WEBHOOK_PORT).
    #[arg(long)]
    webhook_port: Option<u16>,

    /// Disable the webhook listener and aggregator in this process.
    #[arg(long, default_value_t = false)]
    no_webhooks: bool,
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(workers) = cli.workers {
        config.sender.workers = workers;
    }
    if let Some(claim_size) = cli.claim_size {
        config.sender.claim_size = claim_size;
    }
    if let Some(poll) = cli.poll_interval_ms {
        config.sender.poll_interval_ms = poll;
    }
    if let Some(port) = cli.webhook_port {
        config.webhook.port = port;
    }
    config.log_summary();

    // ── Stores ──
    let pool = pg::init_pool(&config.database).await?;
    let kv: Arc<dyn KvStore> = Arc::new(RedisKv::connect(&config.kv.url).await?);

    // ── Send machinery ──
    let health = Arc::new(
        HealthTracker::new(HealthSettings {
            failure_threshold: config.health.failure_threshold,
            recovery: Duration::from_secs(config.health.recovery_secs),
            burst_window: Duration::from_secs(config.health.burst_window_secs),
        })
        .with_kv_mirror(kv.clone()),
    );
    let distributor = Arc::new(Distributor::new(kv.clone(), health));
    let gate = Arc::new(RateGate::new(
        ThrottleStore::new(kv.clone()),
        config.rate.esp_rpm,
        Duration::from_secs(config.rate.throttle_cache_secs),
    ));
    let domains = Arc::new(DomainThrottle::new(config.rate.domain_rules.clone()));
    if domains.is_configured() {
        info!(rules = config.rate.domain_rules.len(), "domain throttles active");
    }
    let content_cache = Arc::new(ContentCache::new(Duration::from_secs(
        config.sender.cache_ttl_secs,
    )));
    let registry = Arc::new(AdapterRegistry::new());
    let backend = Arc::new(PgQueueBackend::new(pool.clone()));
    let counters = WorkerCounters::new();

    let process_id = format!(
        "{}-{}",
        std::env::var("HOSTNAME").unwrap_or_else(|_| "postbote".to_string()),
        &uuid::Uuid::new_v4().to_string()[..8]
    );
    info!(process = %process_id, workers = config.sender.workers, "starting send workers");

    // ── Background loops ──
    let mut supervisor = Supervisor::new(Duration::from_secs(
        config.sender.shutdown_timeout_secs,
    ));
    let shutdown = supervisor.shutdown_signal();

    for n in 0..config.sender.workers {
        let worker = SendWorker::new(
            backend.clone(),
            content_cache.clone(),
            registry.clone(),
            distributor.clone(),
            gate.clone(),
            domains.clone(),
            counters.clone(),
            SendWorkerConfig {
                worker_id: format!("{process_id}-{n}"),
                claim_size: config.sender.claim_size,
                poll_interval: Duration::from_millis(config.sender.poll_interval_ms),
                max_backoff: Duration::from_secs(5),
            },
        );
        supervisor.spawn(format!("send-worker-{n}"), worker.run(shutdown.clone()));
    }

    supervisor.spawn(
        "queue-recovery",
        recovery::run(pool.clone(), config.recovery.clone(), shutdown.clone()),
    );
    supervisor.spawn(
        "heartbeat",
        heartbeat::run(
            pool.clone(),
            process_id.clone(),
            config.sender.workers,
            counters.clone(),
            Duration::from_secs(config.sender.heartbeat_secs),
            shutdown.clone(),
        ),
    );
    supervisor.spawn(
        "cache-sweeper",
        cache::run_sweeper(
            content_cache.clone(),
            Duration::from_secs(config.sender.cache_sweep_secs),
            shutdown.clone(),
        ),
    );

    if !cli.no_webhooks {
        supervisor.spawn(
            "webhook-aggregator",
            aggregator::run(pool.clone(), config.webhook.clone(), shutdown.clone()),
        );

        let sink = Arc::new(PgEventSink::new(pool.clone()));
        let app = receiver::router(Arc::new(ReceiverState::new(sink)));
        let addr = format!("{}:{}", config.webhook.host, config.webhook.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!(addr = %addr, "webhook listener bound");

        let server_shutdown = shutdown.clone();
        supervisor.spawn("webhook-server", async move {
            let graceful = async move { server_shutdown.wait().await };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(graceful)
                .await
            {
                warn!(error = %e, "webhook server exited with error");
            }
        });
    }

    // ── Wait for a shutdown signal ──
    wait_for_signal().await;
    info!("shutdown signal received, draining");
    supervisor.shutdown_and_wait().await;
    info!("postbote-worker exited cleanly");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sig) => sig,
        Err(e) => {
            warn!(error = %e, "cannot install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
