use thiserror::Error;

use postbote_dispatch::DispatchError;
use postbote_esp::EspError;
use postbote_kv::KvError;
use postbote_store::StoreError;

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Kv(#[from] KvError),

    #[error(transparent)]
    Esp(#[from] EspError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}
