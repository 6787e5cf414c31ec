//! Mailgun batch-sending adapter.
//!
//! Uses Mailgun's recipient-variables mechanism: the form body carries
//! `%recipient.*%` placeholders and a JSON map of per-recipient
//! values. One API call, one returned id; per-recipient message ids
//! are derived from it.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use postbote_core::model::EspKind;

use crate::adapter::{derived_message_id, BatchRequest, BatchResponse, EspAdapter, SendOutcome};
use crate::error::EspError;
use crate::limits::max_batch_size;

const DEFAULT_BASE_URL: &str = "https://api.mailgun.net";

#[derive(Debug, Deserialize)]
struct MailgunCredentials {
    api_key: String,
    domain: String,
    #[serde(default)]
    base_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MailgunResponse {
    id: String,
}

#[derive(Debug)]
pub struct MailgunAdapter {
    client: reqwest::Client,
    api_key: String,
    domain: String,
    base_url: String,
}

impl MailgunAdapter {
    pub fn new(client: reqwest::Client, credentials: &serde_json::Value) -> Result<Self, EspError> {
        let creds: MailgunCredentials = serde_json::from_value(credentials.clone())
            .map_err(|e| EspError::Config(format!("mailgun credentials: {e}")))?;
        Ok(Self {
            client,
            api_key: creds.api_key,
            domain: creds.domain,
            base_url: creds
                .base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }

    fn build_form(batch: &BatchRequest) -> Result<Vec<(String, String)>, EspError> {
        let mut recipient_variables = serde_json::Map::new();
        for m in &batch.messages {
            recipient_variables.insert(
                m.recipient.clone(),
                json!({
                    "subject": m.subject,
                    "html": m.html,
                    "text": m.text,
                }),
            );
        }
        let variables = serde_json::to_string(&recipient_variables)
            .map_err(|e| EspError::Config(e.to_string()))?;

        let mut form = vec![
            ("from".to_string(), batch.formatted_from()),
            ("subject".to_string(), "%recipient.subject%".to_string()),
            ("html".to_string(), "%recipient.html%".to_string()),
            ("text".to_string(), "%recipient.text%".to_string()),
            ("recipient-variables".to_string(), variables),
        ];
        if let Some(reply_to) = &batch.reply_to {
            form.push(("h:Reply-To".to_string(), reply_to.clone()));
        }
        for m in &batch.messages {
            form.push(("to".to_string(), m.recipient.clone()));
        }
        Ok(form)
    }
}

#[async_trait]
impl EspAdapter for MailgunAdapter {
    fn kind(&self) -> EspKind {
        EspKind::Mailgun
    }

    fn max_batch_size(&self) -> usize {
        max_batch_size(&EspKind::Mailgun)
    }

    async fn send_batch(&self, batch: &BatchRequest) -> Result<BatchResponse, EspError> {
        let form = Self::build_form(batch)?;

        let response = self
            .client
            .post(format!("{}/v3/{}/messages", self.base_url, self.domain))
            .basic_auth("api", Some(&self.api_key))
            .form(&form)
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

        let parsed: MailgunResponse = response.json().await?;
        let transmission_id = parsed.id.trim_matches(['<', '>']).to_string();
        debug!(id = %transmission_id, recipients = batch.messages.len(), "mailgun batch queued");

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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::OutboundMessage;
    use uuid::Uuid;

    fn message(recipient: &str, subject: &str) -> OutboundMessage {
        OutboundMessage {
            queue_id: Uuid::new_v4(),
            recipient: recipient.into(),
            subject: subject.into(),
            html: format!("<p>{subject}</p>"),
            text: subject.into(),
        }
    }

    #[test]
    fn form_lists_every_recipient() {
        let batch = BatchRequest {
            from_name: "Post Bote".into(),
            from_email: "bote@example.com".into(),
            reply_to: None,
            ip_pool: None,
            messages: vec![message("a@x.y", "Hi A"), message("b@x.y", "Hi B")],
        };
        let form = MailgunAdapter::build_form(&batch).unwrap();

        let tos: Vec<&str> = form
            .iter()
            .filter(|(k, _)| k == "to")
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(tos, vec!["a@x.y", "b@x.y"]);

        let variables = form
            .iter()
            .find(|(k, _)| k == "recipient-variables")
            .map(|(_, v)| v.clone())
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&variables).unwrap();
        assert_eq!(parsed["a@x.y"]["subject"], "Hi A");
        assert_eq!(parsed["b@x.y"]["subject"], "Hi B");
    }

    #[test]
    fn form_uses_recipient_placeholders() {
        let batch = BatchRequest {
            from_name: String::new(),
            from_email: "bote@example.com".into(),
            reply_to: Some("replies@example.com".into()),
            ip_pool: None,
            messages: vec![message("a@x.y", "Hi")],
        };
        let form = MailgunAdapter::build_form(&batch).unwrap();
        assert!(form.contains(&("subject".to_string(), "%recipient.subject%".to_string())));
        assert!(form.contains(&("h:Reply-To".to_string(), "replies@example.com".to_string())));
    }

    #[test]
    fn missing_domain_is_config_error() {
        let err = MailgunAdapter::new(
            reqwest::Client::new(),
            &serde_json::json!({ "api_key": "key-123" }),
        )
        .unwrap_err();
        assert!(matches!(err, EspError::Config(_)));
    }
}
