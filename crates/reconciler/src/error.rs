use crate::client::EstimationError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReconcileError>;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("fingerprint error: {0}")]
    Fingerprint(#[from] rightsizer_fingerprint::FingerprintError),

    #[error("store error: {0}")]
    Store(#[from] rightsizer_store::StoreError),

    #[error("estimation failed after {attempts} attempts: {last}")]
    EstimationFailed { attempts: u32, last: EstimationError },

    #[error("reconciliation already in progress for {0}")]
    ReconciliationInProgress(String),

    #[error("reconciliation cancelled")]
    Cancelled,

    #[error("{0}")]
    Other(String),
}
