//! ESP adapter trait and batch types.

use async_trait::async_trait;
use uuid::Uuid;

use postbote_core::model::EspKind;

use crate::error::EspError;

/// One recipient of a batch, content already substituted.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub queue_id: Uuid,
    pub recipient: String,
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// A single ESP API call carrying multiple recipients.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub from_name: String,
    pub from_email: String,
    pub reply_to: Option<String>,
    pub ip_pool: Option<String>,
    pub messages: Vec<OutboundMessage>,
}

impl BatchRequest {
    pub fn formatted_from(&self) -> String {
        if self.from_name.is_empty() {
            self.from_email.clone()
        } else {
            format!("{} <{}>", self.from_name, self.from_email)
        }
    }
}

/// Per-recipient outcome of a batch call, in request order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Accepted { message_id: String },
    Rejected { code: String },
}

/// Result of one batch call. `results` always matches the request's
/// message count and order.
#[derive(Debug, Clone)]
pub struct BatchResponse {
    pub transmission_id: Option<String>,
    pub accepted: usize,
    pub rejected: usize,
    pub results: Vec<SendOutcome>,
}

impl BatchResponse {
    /// Tally a result vector into a response.
    pub fn from_results(transmission_id: Option<String>, results: Vec<SendOutcome>) -> Self {
        let accepted = results
            .iter()
            .filter(|r| matches!(r, SendOutcome::Accepted { .. }))
            .count();
        let rejected = results.len() - accepted;
        Self {
            transmission_id,
            accepted,
            rejected,
            results,
        }
    }
}

/// Per-provider batch send primitive.
///
/// Adapters may fail the whole batch (error return) or report
/// per-recipient outcomes; callers handle both.
#[async_trait]
pub trait EspAdapter: Send + Sync {
    fn kind(&self) -> EspKind;

    /// Maximum recipients per batch call.
    fn max_batch_size(&self) -> usize;

    /// Optional payload-byte budget enforced before sending.
    fn max_payload_bytes(&self) -> Option<usize> {
        None
    }

    async fn send_batch(&self, batch: &BatchRequest) -> Result<BatchResponse, EspError>;
}

/// Derive a per-recipient message id from a provider's single batch id.
///
/// Several vendors acknowledge a batch with one transmission id; the
/// message log needs one id per recipient.
pub fn derived_message_id(transmission_id: &str, index: usize) -> String {
    format!("{}#{}", transmission_id, index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formatted_from_variants() {
        let mut batch = BatchRequest {
            from_name: "Post Bote".into(),
            from_email: "bote@example.com".into(),
            reply_to: None,
            ip_pool: None,
            messages: vec![],
        };
        assert_eq!(batch.formatted_from(), "Post Bote <bote@example.com>");
        batch.from_name.clear();
        assert_eq!(batch.formatted_from(), "bote@example.com");
    }

    #[test]
    fn from_results_tallies() {
        let response = BatchResponse::from_results(
            Some("t-1".into()),
            vec![
                SendOutcome::Accepted {
                    message_id: "a".into(),
                },
                SendOutcome::Rejected {
                    code: "bad_address".into(),
                },
                SendOutcome::Accepted {
                    message_id: "b".into(),
                },
            ],
        );
        assert_eq!(response.accepted, 2);
        assert_eq!(response.rejected, 1);
    }

    #[test]
    fn derived_ids_are_unique_per_index() {
        assert_eq!(derived_message_id("t-1", 0), "t-1#0");
        assert_ne!(derived_message_id("t-1", 0), derived_message_id("t-1", 1));
    }
}
