use cinder_crypto::CryptoError;
use cinder_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Bad key, failed tag, mismatched keypair. Never retried.
    #[error("Crypto error: {0}")]
    Crypto(CryptoError),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation on a message or session that has reached a terminal state.
    #[error("Invalid state: {0}")]
    State(String),

    #[error("Scheduling error: {0}")]
    Scheduling(String),

    #[error("Store error: {0}")]
    Store(StoreError),
}

impl From<CryptoError> for EngineError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::SessionNotFound(id) => Self::NotFound(format!("session {id}")),
            CryptoError::SessionDestroyed(id) => Self::State(format!("session {id} destroyed")),
            other => Self::Crypto(other),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound(id),
            other => Self::Store(other),
        }
    }
}
