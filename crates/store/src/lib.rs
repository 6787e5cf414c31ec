pub mod backend;
pub mod campaigns;
pub mod error;
pub mod message_log;
pub mod pg;
pub mod queue;
pub mod quotas;
pub mod webhook_events;
pub mod workers;

pub use backend::{PgQueueBackend, QueueBackend};
pub use error::StoreError;
pub use message_log::{EventRollup, MessageLogEntry};
pub use queue::{EnqueueReport, ItemUpdate, SubscriberRow};
