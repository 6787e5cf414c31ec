use thiserror::Error;

#[derive(Error, Debug)]
pub enum KvError {
    #[error("KV connection error: {0}")]
    Connection(String),

    #[error("KV command failed: {0}")]
    Command(String),

    #[error("KV value decode failed: {0}")]
    Decode(String),
}

impl From<::redis::RedisError> for KvError {
    fn from(e: ::redis::RedisError) -> Self {
        if e.is_connection_refusal() || e.is_connection_dropped() || e.is_timeout() {
            Self::Connection(e.to_string())
        } else {
            Self::Command(e.to_string())
        }
    }
}
