pub mod adapter;
pub mod error;
pub mod grouper;
pub mod limits;
pub mod mailgun;
pub mod pmta;
pub mod registry;
pub mod sendgrid;
pub mod ses;
pub mod sparkpost;

pub use adapter::{BatchRequest, BatchResponse, EspAdapter, OutboundMessage, SendOutcome};
pub use error::EspError;
pub use grouper::{split_batches, validate_batch};
pub use registry::{AdapterRegistry, AdapterSource};
