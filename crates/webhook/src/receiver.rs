//! HTTP ingest for provider telemetry.
//!
//! One POST endpoint per vendor. A request is 400 only when the body
//! is unreadable or not valid JSON; once parsing succeeded the
//! response is 200 even if nothing was recognized or staging failed,
//! so providers never build retry storms against us.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use sqlx::PgPool;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use postbote_store::webhook_events::{self, StagedEvent};
use postbote_store::StoreError;

use crate::parse::{self, NormalizedEvent, ParsedWebhook};
use crate::WebhookError;

/// Staging sink for normalized events.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn stage(&self, events: &[NormalizedEvent]) -> Result<u64, StoreError>;
}

/// Postgres staging table sink.
pub struct PgEventSink {
    pool: PgPool,
}

impl PgEventSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventSink for PgEventSink {
    async fn stage(&self, events: &[NormalizedEvent]) -> Result<u64, StoreError> {
        let staged: Vec<StagedEvent> = events
            .iter()
            .map(|e| StagedEvent {
                esp_type: e.provider.as_str().to_string(),
                event_type: e.kind.clone(),
                message_id: e.message_id.clone(),
                payload: serde_json::to_vec(&e.raw).unwrap_or_default(),
                event_timestamp: e.timestamp,
            })
            .collect();
        webhook_events::stage(&self.pool, &staged).await
    }
}

pub struct ReceiverState {
    sink: Arc<dyn EventSink>,
    http: reqwest::Client,
}

impl ReceiverState {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            http: reqwest::Client::new(),
        }
    }
}

/// Build the webhook router.
pub fn router(state: Arc<ReceiverState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/sparkpost", post(sparkpost))
        .route("/webhooks/ses", post(ses))
        .route("/webhooks/mailgun", post(mailgun))
        .route("/webhooks/sendgrid", post(sendgrid))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn stage_events(state: &ReceiverState, provider: &str, events: Vec<NormalizedEvent>) {
    if events.is_empty() {
        return;
    }
    match state.sink.stage(&events).await {
        Ok(staged) => info!(provider, staged, "webhook events staged"),
        // Still 200: the provider already delivered; re-posting the
        // same payload would not help a broken staging table.
        Err(e) => error!(provider, error = %e, "failed to stage webhook events"),
    }
}

fn parse_failure(provider: &str, e: &WebhookError) -> StatusCode {
    warn!(provider, error = %e, "webhook parse failed");
    StatusCode::BAD_REQUEST
}

async fn sparkpost(State(state): State<Arc<ReceiverState>>, body: String) -> StatusCode {
    match parse::parse_sparkpost(body.as_bytes()) {
        Ok(events) => {
            stage_events(&state, "sparkpost", events).await;
            StatusCode::OK
        }
        Err(e) => parse_failure("sparkpost", &e),
    }
}

async fn ses(State(state): State<Arc<ReceiverState>>, body: String) -> StatusCode {
    match parse::parse_ses(body.as_bytes()) {
        Ok(ParsedWebhook::Events(events)) => {
            stage_events(&state, "ses", events).await;
            StatusCode::OK
        }
        Ok(ParsedWebhook::SubscriptionConfirmation { url }) => {
            info!(url = %url, "confirming sns subscription");
            if let Err(e) = state.http.get(&url).send().await {
                warn!(error = %e, "sns subscription confirmation failed");
            }
            StatusCode::OK
        }
        Err(e) => parse_failure("ses", &e),
    }
}

async fn mailgun(State(state): State<Arc<ReceiverState>>, body: String) -> StatusCode {
    match parse::parse_mailgun(body.as_bytes()) {
        Ok(events) => {
            stage_events(&state, "mailgun", events).await;
            StatusCode::OK
        }
        Err(e) => parse_failure("mailgun", &e),
    }
}

async fn sendgrid(State(state): State<Arc<ReceiverState>>, body: String) -> StatusCode {
    match parse::parse_sendgrid(body.as_bytes()) {
        Ok(events) => {
            stage_events(&state, "sendgrid", events).await;
            StatusCode::OK
        }
        Err(e) => parse_failure("sendgrid", &e),
    }
}
