use thiserror::Error;

use postbote_kv::KvError;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Invalid ESP quotas: {0}")]
    InvalidQuotas(String),

    #[error("No healthy ESP profile available")]
    NoHealthyEsp,

    #[error(transparent)]
    Kv(#[from] KvError),
}
