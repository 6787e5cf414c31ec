use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Unknown status: {0}")]
    UnknownStatus(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialize(String),
}
