pub mod cache;
pub mod domains;
pub mod error;
pub mod heartbeat;
pub mod rate;
pub mod recovery;
pub mod supervisor;
pub mod worker;

pub use cache::ContentCache;
pub use domains::DomainThrottle;
pub use error::DeliveryError;
pub use rate::RateGate;
pub use supervisor::{Shutdown, Supervisor};
pub use worker::{SendWorker, SendWorkerConfig, WorkerCounters};
