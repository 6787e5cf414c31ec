//! PowerMTA adapter: SMTP injection with VMTA rotation.
//!
//! PMTA has no batch API; a batch is injected one message at a time
//! over a pooled SMTP connection. The virtual MTA for each message is
//! picked least-recently-used by last-sent timestamp and carried in
//! the `X-Virtual-MTA` header.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;
use lettre::message::header::{Header, HeaderName, HeaderValue};
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use postbote_core::model::EspKind;

use crate::adapter::{BatchRequest, BatchResponse, EspAdapter, SendOutcome};
use crate::error::EspError;
use crate::limits::max_batch_size;

#[derive(Debug, Clone)]
struct XVirtualMta(String);

impl Header for XVirtualMta {
    fn name() -> HeaderName {
        HeaderName::new_from_ascii_str("X-Virtual-MTA")
    }

    fn parse(s: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Self(s.to_string()))
    }

    fn display(&self) -> HeaderValue {
        HeaderValue::new(Self::name(), self.0.clone())
    }
}

#[derive(Debug, Deserialize)]
struct PmtaCredentials {
    host: String,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    vmtas: Vec<String>,
}

/// Least-recently-used rotation over the configured VMTAs.
/// Unused VMTAs go first, in configuration order.
#[derive(Debug)]
struct VmtaRotation {
    vmtas: Vec<String>,
    last_sent: Mutex<HashMap<String, Instant>>,
}

impl VmtaRotation {
    fn new(vmtas: Vec<String>) -> Self {
        Self {
            vmtas,
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    fn next(&self) -> Option<String> {
        if self.vmtas.is_empty() {
            return None;
        }
        let mut last_sent = self.last_sent.lock().unwrap();

        let pick = self
            .vmtas
            .iter()
            .find(|v| !last_sent.contains_key(*v))
            .cloned()
            .or_else(|| {
                self.vmtas
                    .iter()
                    .min_by_key(|v| last_sent.get(*v).copied())
                    .cloned()
            });

        if let Some(ref vmta) = pick {
            last_sent.insert(vmta.clone(), Instant::now());
        }
        pick
    }
}

#[derive(Debug)]
pub struct PmtaAdapter {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    host: String,
    rotation: VmtaRotation,
}

impl PmtaAdapter {
    pub fn new(credentials: &serde_json::Value) -> Result<Self, EspError> {
        let creds: PmtaCredentials = serde_json::from_value(credentials.clone())
            .map_err(|e| EspError::Config(format!("pmta credentials: {e}")))?;

        // PMTA injection ports are plain SMTP inside the network.
        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&creds.host)
                .port(creds.port.unwrap_or(25));
        if let (Some(username), Some(password)) = (&creds.username, &creds.password) {
            builder = builder.credentials(Credentials::new(
                username.clone(),
                password.clone(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
            host: creds.host,
            rotation: VmtaRotation::new(creds.vmtas),
        })
    }
}

#[async_trait]
impl EspAdapter for PmtaAdapter {
    fn kind(&self) -> EspKind {
        EspKind::Pmta
    }

    fn max_batch_size(&self) -> usize {
        max_batch_size(&EspKind::Pmta)
    }

    async fn send_batch(&self, batch: &BatchRequest) -> Result<BatchResponse, EspError> {
        let from: Mailbox = batch
            .formatted_from()
            .parse()
            .map_err(|e: lettre::address::AddressError| EspError::Config(e.to_string()))?;
        let reply_to: Option<Mailbox> = match &batch.reply_to {
            Some(addr) => Some(addr.parse().map_err(
                |e: lettre::address::AddressError| EspError::Config(e.to_string()),
            )?),
            None => None,
        };

        let mut results = Vec::with_capacity(batch.messages.len());
        for message in &batch.messages {
            let to: Mailbox = match message.recipient.parse() {
                Ok(mb) => mb,
                Err(e) => {
                    results.push(SendOutcome::Rejected {
                        code: format!("bad_address: {e}"),
                    });
                    continue;
                }
            };

            let message_id = format!("{}@{}", Uuid::new_v4(), self.host);
            let mut builder = Message::builder()
                .from(from.clone())
                .to(to)
                .subject(message.subject.clone())
                .message_id(Some(message_id.clone()));
            if let Some(reply) = &reply_to {
                builder = builder.reply_to(reply.clone());
            }
            if let Some(vmta) = self.rotation.next() {
                builder = builder.header(XVirtualMta(vmta));
            }

            let email = match builder.multipart(MultiPart::alternative_plain_html(
                message.text.clone(),
                message.html.clone(),
            )) {
                Ok(email) => email,
                Err(e) => {
                    results.push(SendOutcome::Rejected {
                        code: format!("build_failed: {e}"),
                    });
                    continue;
                }
            };

            match self.transport.send(email).await {
                Ok(_) => {
                    debug!(recipient = %message.recipient, "pmta injected");
                    results.push(SendOutcome::Accepted { message_id });
                }
                Err(e) => results.push(SendOutcome::Rejected {
                    code: format!("smtp: {e}"),
                }),
            }
        }

        Ok(BatchResponse::from_results(None, results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_prefers_unused_in_config_order() {
        let rotation = VmtaRotation::new(vec!["vmta-a".into(), "vmta-b".into(), "vmta-c".into()]);
        assert_eq!(rotation.next().as_deref(), Some("vmta-a"));
        assert_eq!(rotation.next().as_deref(), Some("vmta-b"));
        assert_eq!(rotation.next().as_deref(), Some("vmta-c"));
    }

    #[test]
    fn rotation_is_least_recently_used() {
        let rotation = VmtaRotation::new(vec!["vmta-a".into(), "vmta-b".into()]);
        rotation.next(); // a
        rotation.next(); // b
        assert_eq!(rotation.next().as_deref(), Some("vmta-a"));
        assert_eq!(rotation.next().as_deref(), Some("vmta-b"));
    }

    #[test]
    fn empty_rotation_yields_none() {
        let rotation = VmtaRotation::new(Vec::new());
        assert_eq!(rotation.next(), None);
    }

    #[test]
    fn adapter_builds_from_minimal_credentials() {
        let adapter = PmtaAdapter::new(&serde_json::json!({ "host": "pmta.internal" }));
        assert!(adapter.is_ok());
    }

    #[test]
    fn missing_host_is_config_error() {
        let err = PmtaAdapter::new(&serde_json::json!({ "port": 2525 })).unwrap_err();
        assert!(matches!(err, EspError::Config(_)));
    }
}
