//! SparkPost transmissions adapter.
//!
//! Per-recipient content rides in `substitution_data` against a
//! passthrough content wrapper, so one transmission carries the whole
//! batch. SparkPost acknowledges a batch with a single transmission
//! id; per-recipient message ids are derived from it.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use postbote_core::model::EspKind;

use crate::adapter::{derived_message_id, BatchRequest, BatchResponse, EspAdapter, SendOutcome};
use crate::error::EspError;
use crate::limits::{max_batch_bytes, max_batch_size};

const DEFAULT_BASE_URL: &str = "https://api.sparkpost.com";

#[derive(Debug, Deserialize)]
struct SparkpostCredentials {
    api_key: String,
    #[serde(default)]
    base_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TransmissionResults {
    id: String,
    #[serde(default)]
    total_accepted_recipients: Option<usize>,
    #[serde(default)]
    total_rejected_recipients: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct TransmissionResponse {
    results: TransmissionResults,
}

#[derive(Debug)]
pub struct SparkpostAdapter {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl SparkpostAdapter {
    pub fn new(client: reqwest::Client, credentials: &serde_json::Value) -> Result<Self, EspError> {
        let creds: SparkpostCredentials = serde_json::from_value(credentials.clone())
            .map_err(|e| EspError::Config(format!("sparkpost credentials: {e}")))?;
        Ok(Self {
            client,
            api_key: creds.api_key,
            base_url: creds
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }

    fn build_payload(batch: &BatchRequest) -> serde_json::Value {
        let recipients: Vec<serde_json::Value> = batch
            .messages
            .iter()
            .map(|m| {
                json!({
                    "address": { "email": m.recipient },
                    "metadata": { "queue_id": m.queue_id },
                    "substitution_data": {
                        "subject": m.subject,
                        "html": m.html,
                        "text": m.text,
                    },
                })
            })
            .collect();

        let mut payload = json!({
            "content": {
                "from": { "name": batch.from_name, "email": batch.from_email },
                "subject": "{{subject}}",
                "html": "{{html}}",
                "text": "{{text}}",
            },
            "recipients": recipients,
        });
        if let Some(reply_to) = &batch.reply_to {
            payload["content"]["reply_to"] = json!(reply_to);
        }
        if let Some(ip_pool) = &batch.ip_pool {
            payload["options"] = json!({ "ip_pool": ip_pool });
        }
        payload
    }
}

#[async_trait]
impl EspAdapter for SparkpostAdapter {
    fn kind(&self) -> EspKind {
        EspKind::Sparkpost
    }

    fn max_batch_size(&self) -> usize {
        max_batch_size(&EspKind::Sparkpost)
    }

    fn max_payload_bytes(&self) -> Option<usize> {
        Some(max_batch_bytes(&EspKind::Sparkpost))
    }

    async fn send_batch(&self, batch: &BatchRequest) -> Result<BatchResponse, EspError> {
        let payload = Self::build_payload(batch);
        let body = serde_json::to_vec(&payload)
            .map_err(|e| EspError::Config(e.to_string()))?;

        // SparkPost hard-caps the transmission payload; refuse rather
        // than burn an API call that will be rejected.
        let budget = max_batch_bytes(&EspKind::Sparkpost);
        if body.len() > budget {
            return Err(EspError::OverBudget(format!(
                "transmission payload {} bytes exceeds {}",
                body.len(),
                budget
            )));
        }

        let response = self
            .client
            .post(format!("{}/api/v1/transmissions", self.base_url))
            .header("Authorization", self.api_key.as_str())
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EspError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: TransmissionResponse = response.json().await?;
        debug!(
            transmission_id = %parsed.results.id,
            accepted = parsed.results.total_accepted_recipients,
            rejected = parsed.results.total_rejected_recipients,
            "sparkpost transmission accepted"
        );

        let results = batch
            .messages
            .iter()
            .enumerate()
            .map(|(i, _)| SendOutcome::Accepted {
                message_id: derived_message_id(&parsed.results.id, i),
            })
            .collect();
        Ok(BatchResponse::from_results(Some(parsed.results.id), results))
    }
}
