use async_trait::async_trait;
use rightsizer_fingerprint::SourceSnapshot;
use rightsizer_store::ResourceEstimate;
use std::time::Duration;
use thiserror::Error;

/// Why an estimation attempt failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EstimationError {
    #[error("estimation timed out after {0:?}")]
    Timeout(Duration),

    #[error("estimation quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("malformed estimation response: {0}")]
    MalformedResponse(String),

    #[error("estimation transport failed: {0}")]
    Transport(String),
}

impl EstimationError {
    /// Whether a fresh attempt has a realistic chance of succeeding soon.
    ///
    /// The loop retries every reason up to its attempt budget (estimation
    /// failures are transient by default); this classification exists for
    /// callers that want to give up earlier on malformed responses.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EstimationError::Timeout(_)
                | EstimationError::Transport(_)
                | EstimationError::QuotaExhausted(_)
        )
    }
}

/// External estimation collaborator boundary.
///
/// Implementations may be slow (seconds to minutes) and unreliable. The
/// reconciler owns the timeout and retry policy; at most one call is in
/// flight per source, and no store lock is held while awaiting it.
#[async_trait]
pub trait EstimationClient: Send + Sync {
    async fn estimate(
        &self,
        snapshot: &SourceSnapshot,
    ) -> std::result::Result<ResourceEstimate, EstimationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_and_timeout_are_transient() {
        assert!(EstimationError::Timeout(Duration::from_secs(60)).is_transient());
        assert!(EstimationError::Transport("connection reset".into()).is_transient());
        assert!(EstimationError::QuotaExhausted("429".into()).is_transient());
    }

    #[test]
    fn malformed_response_is_not_transient() {
        assert!(!EstimationError::MalformedResponse("not JSON".into()).is_transient());
    }
}
