//! Amazon SES v2 bulk adapter.
//!
//! Sends through `SendBulkEmail` with an inline passthrough template;
//! each entry's replacement data carries its final subject/html/text.
//! SES reports per-entry results, so this is the one vendor with real
//! per-recipient message ids.

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_sesv2::config::BehaviorVersion;
use aws_sdk_sesv2::types::{
    BulkEmailContent, BulkEmailEntry, BulkEmailStatus, Destination, EmailTemplateContent,
    ReplacementEmailContent, ReplacementTemplate, Template,
};
use aws_sdk_sesv2::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use postbote_core::model::EspKind;

use crate::adapter::{BatchRequest, BatchResponse, EspAdapter, OutboundMessage, SendOutcome};
use crate::error::EspError;
use crate::limits::max_batch_size;

#[derive(Debug, Deserialize)]
struct SesCredentials {
    region: String,
    #[serde(default)]
    access_key_id: Option<String>,
    #[serde(default)]
    secret_access_key: Option<String>,
    #[serde(default)]
    endpoint_url: Option<String>,
}

#[derive(Debug)]
pub struct SesAdapter {
    client: Client,
}

impl SesAdapter {
    /// Build the SES client directly from profile credentials — no
    /// ambient environment lookup, so one process can hold clients
    /// for several AWS accounts.
    pub fn new(credentials: &serde_json::Value) -> Result<Self, EspError> {
        let creds: SesCredentials = serde_json::from_value(credentials.clone())
            .map_err(|e| EspError::Config(format!("ses credentials: {e}")))?;

        let region = aws_sdk_sesv2::config::Region::new(creds.region.clone());
        let mut config = aws_sdk_sesv2::Config::builder()
            .region(region)
            .behavior_version(BehaviorVersion::latest());

        if let (Some(key_id), Some(secret)) = (&creds.access_key_id, &creds.secret_access_key) {
            config = config.credentials_provider(Credentials::new(
                key_id,
                secret,
                None,
                None,
                "postbote-ses-static",
            ));
        }
        if let Some(endpoint) = &creds.endpoint_url {
            if !endpoint.is_empty() {
                config = config.endpoint_url(endpoint);
            }
        }

        Ok(Self {
            client: Client::from_conf(config.build()),
        })
    }

    fn replacement_data(message: &OutboundMessage) -> Result<String, EspError> {
        serde_json::to_string(&json!({
            "subject": message.subject,
            "html": message.html,
            "text": message.text,
        }))
        .map_err(|e| EspError::Config(e.to_string()))
    }
}

#[async_trait]
impl EspAdapter for SesAdapter {
    fn kind(&self) -> EspKind {
        EspKind::Ses
    }

    fn max_batch_size(&self) -> usize {
        max_batch_size(&EspKind::Ses)
    }

    async fn send_batch(&self, batch: &BatchRequest) -> Result<BatchResponse, EspError> {
        let template_content = EmailTemplateContent::builder()
            .subject("{{subject}}")
            .html("{{html}}")
            .text("{{text}}")
            .build();
        let template = Template::builder()
            .template_content(template_content)
            .template_data("{}")
            .build();
        let default_content = BulkEmailContent::builder().template(template).build();

        let mut entries = Vec::with_capacity(batch.messages.len());
        for message in &batch.messages {
            let destination = Destination::builder()
                .to_addresses(&message.recipient)
                .build();
            let replacement = ReplacementEmailContent::builder()
                .replacement_template(
                    ReplacementTemplate::builder()
                        .replacement_template_data(Self::replacement_data(message)?)
                        .build(),
                )
                .build();
            let entry = BulkEmailEntry::builder()
                .destination(destination)
                .replacement_email_content(replacement)
                .build();
            entries.push(entry);
        }

        let mut request = self
            .client
            .send_bulk_email()
            .from_email_address(batch.formatted_from())
            .default_content(default_content)
            .set_bulk_email_entries(Some(entries));
        if let Some(reply_to) = &batch.reply_to {
            request = request.reply_to_addresses(reply_to);
        }

        let output = request
            .send()
            .await
            .map_err(|e| EspError::Provider(format!("ses send_bulk_email: {e}")))?;

        let entry_results = output.bulk_email_entry_results();
        let mut results = Vec::with_capacity(batch.messages.len());
        for (i, _) in batch.messages.iter().enumerate() {
            let outcome = match entry_results.get(i) {
                Some(r) if r.status() == Some(&BulkEmailStatus::Success) => {
                    match r.message_id() {
                        Some(id) => SendOutcome::Accepted {
                            message_id: id.to_string(),
                        },
                        None => SendOutcome::Rejected {
                            code: "ses_missing_message_id".to_string(),
                        },
                    }
                }
                Some(r) => SendOutcome::Rejected {
                    code: r
                        .error()
                        .map(|e| e.to_string())
                        .or_else(|| r.status().map(|s| s.as_str().to_string()))
                        .unwrap_or_else(|| "ses_rejected".to_string()),
                },
                None => SendOutcome::Rejected {
                    code: "ses_missing_result".to_string(),
                },
            };
            results.push(outcome);
        }

        let response = BatchResponse::from_results(None, results);
        debug!(
            accepted = response.accepted,
            rejected = response.rejected,
            "ses bulk send complete"
        );
        Ok(response)
    }
}
