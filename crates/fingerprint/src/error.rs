use thiserror::Error;

pub type Result<T> = std::result::Result<T, FingerprintError>;

#[derive(Error, Debug)]
pub enum FingerprintError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("{0}")]
    Other(String),
}
