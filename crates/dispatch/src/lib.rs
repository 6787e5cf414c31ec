pub mod distributor;
pub mod error;
pub mod health;

pub use distributor::Distributor;
pub use error::DispatchError;
pub use health::{HealthSettings, HealthTracker};
