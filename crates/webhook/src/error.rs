use thiserror::Error;

use postbote_store::StoreError;

#[derive(Error, Debug)]
pub enum WebhookError {
    #[error("Invalid webhook payload: {0}")]
    Parse(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
