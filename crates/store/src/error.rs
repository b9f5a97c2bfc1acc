use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("commit conflict: draft parent {expected:?} but store head is {found:?}")]
    CommitConflict {
        expected: Option<u64>,
        found: Option<u64>,
    },

    #[error("corrupt configuration record {path}: {detail}")]
    Corrupt { path: String, detail: String },

    #[error("{0}")]
    Other(String),
}
