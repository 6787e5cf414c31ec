pub mod dist;
pub mod error;
pub mod memory;
pub mod redis;
pub mod store;
pub mod throttle;

pub use dist::{DistributionStats, ProfileStats};
pub use error::KvError;
pub use memory::MemoryKv;
pub use self::redis::RedisKv;
pub use store::KvStore;
pub use throttle::{ThrottleConfig, ThrottleStore, ThrottleTier};
