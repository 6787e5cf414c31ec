//! SendGrid v3 mail/send adapter.
//!
//! Per-recipient content uses one personalization per recipient with
//! legacy substitutions replacing `%html%` / `%text%` tokens in the
//! shared content blocks. SendGrid acknowledges with 202 and an
//! `X-Message-Id` header; per-recipient ids are derived from it.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use postbote_core::model::EspKind;

use crate::adapter::{derived_message_id, BatchRequest, BatchResponse, EspAdapter, SendOutcome};
use crate::error::EspError;
use crate::limits::max_batch_size;

const DEFAULT_BASE_URL: &str = "https://api.sendgrid.com";

#[derive(Debug, Deserialize)]
struct SendgridCredentials {
    api_key: String,
    #[serde(default)]
    base_url: Option<String>,
}

pub struct SendgridAdapter {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl SendgridAdapter {
    pub fn new(client: reqwest::Client, credentials: &serde_json::Value) -> Result<Self, EspError> {
        let creds: SendgridCredentials = serde_json::from_value(credentials.clone())
            .map_err(|e| EspError::Config(format!("sendgrid credentials: {e}")))?;
        Ok(Self {
            client,
            api_key: creds.api_key,
            base_url: creds
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }

    fn build_payload(batch: &BatchRequest) -> serde_json::Value {
        let personalizations: Vec<serde_json::Value> = batch
            .messages
            .iter()
            .map(|m| {
                json!({
                    "to": [{ "email": m.recipient }],
                    "subject": m.subject,
                    "substitutions": {
                        "%html%": m.html,
                        "%text%": m.text,
                    },
                })
            })
            .collect();

        let mut payload = json!({
            "personalizations": personalizations,
            "from": { "email": batch.from_email, "name": batch.from_name },
            "content": [
                { "type": "text/plain", "value": "%text%" },
                { "type": "text/html", "value": "%html%" },
            ],
        });
        if let Some(reply_to) = &batch.reply_to {
            payload["reply_to"] = json!({ "email": reply_to });
        }
        payload
    }
}

#[async_trait]
impl EspAdapter for SendgridAdapter {
    fn kind(&self) -> EspKind {
        EspKind::Sendgrid
    }

    fn max_batch_size(&self) -> usize {
        max_batch_size(&EspKind::Sendgrid)
    }

    async fn send_batch(&self, batch: &BatchRequest) -> Result<BatchResponse, EspError> {
        let payload = Self::build_payload(batch);

        let response = self
            .client
            .post(format!("{}/v3/mail/send", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&payload)
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

        let transmission_id = response
            .headers()
            .get("X-Message-Id")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        debug!(id = %transmission_id, recipients = batch.messages.len(), "sendgrid batch accepted");

        let results = batch
            .messages
            .iter()
            .enumerate()
            .map(|(i, _)| SendOutcome::Accepted {
                message_id: derived_message_id(&transmission_id, i),
            })
            .collect();
        Ok(BatchResponse::from_results(Some(transmission_id), results))
    }
}
