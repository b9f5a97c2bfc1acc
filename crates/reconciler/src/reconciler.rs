use crate::client::{EstimationClient, EstimationError};
use crate::lease::ReconcileLease;
use crate::merge::merge_estimate;
use crate::retry::RetryPolicy;
use crate::status::{append_failure_reason, write_status_snapshot};
use crate::{ReconcileError, Result};
use rightsizer_fingerprint::{SourceFingerprinter, SourceSnapshot};
use rightsizer_store::{
    artifact_path, assess_drift, write_artifact, ConfigStore, Configuration, DriftReason,
    ResourceEstimate, StoreError,
};
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::timeout;

/// Where a reconciliation pass currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcilePhase {
    Idle,
    Checking,
    Estimating,
    Merging,
    Committed,
    Failed,
}

/// Cooperative cancellation, checked between states and never mid-commit.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Budget for a single estimation call; an elapsed budget counts as a
    /// failed attempt and takes the retry edge.
    pub estimation_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            estimation_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    /// Fingerprint unchanged; the estimation adapter was not consulted.
    NoChange {
        version: Option<u64>,
        digest: String,
    },
    /// A new configuration version was committed.
    Committed(Configuration),
}

/// One logical reconciliation process for one monitored source.
pub struct Reconciler {
    fingerprinter: SourceFingerprinter,
    store: ConfigStore,
    client: Arc<dyn EstimationClient>,
    config: ReconcilerConfig,
    phase_tx: watch::Sender<ReconcilePhase>,
}

impl Reconciler {
    pub fn new(
        fingerprinter: SourceFingerprinter,
        store: ConfigStore,
        client: Arc<dyn EstimationClient>,
        config: ReconcilerConfig,
    ) -> Self {
        let (phase_tx, _) = watch::channel(ReconcilePhase::Idle);
        Self {
            fingerprinter,
            store,
            client,
            config,
            phase_tx,
        }
    }

    #[must_use]
    pub fn source_id(&self) -> &str {
        self.fingerprinter.source_id()
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        self.fingerprinter.root()
    }

    #[must_use]
    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    #[must_use]
    pub fn phase_stream(&self) -> watch::Receiver<ReconcilePhase> {
        self.phase_tx.subscribe()
    }

    /// One full reconciliation pass.
    ///
    /// Acquires the per-source lease before entering `CHECKING` and releases
    /// it on return; a concurrent pass for the same source is rejected with
    /// [`ReconcileError::ReconciliationInProgress`].
    pub async fn run_once(&self, cancel: &CancelFlag) -> Result<ReconcileOutcome> {
        let lease = ReconcileLease::try_acquire(self.store.state_dir(), self.source_id())?;
        let result = self.run_leased(cancel).await;
        drop(lease);

        match &result {
            Ok(_) | Err(ReconcileError::Cancelled) => self.set_phase(ReconcilePhase::Idle),
            Err(_) => self.set_phase(ReconcilePhase::Failed),
        }
        result
    }

    async fn run_leased(&self, cancel: &CancelFlag) -> Result<ReconcileOutcome> {
        self.set_phase(ReconcilePhase::Checking);
        let snapshot = match self.fingerprinter.capture().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                self.record_failure("fingerprint", &err.to_string(), &[]).await;
                return Err(err.into());
            }
        };
        let digest = snapshot.digest();

        let committed = self.store.load().await?;
        let drift = assess_drift(&digest, committed.as_ref());
        if !drift.drifted {
            // Steady state: the common path must stay cheap, so the
            // estimation adapter is never consulted here.
            let version = committed.as_ref().map(|c| c.version);
            log::debug!("{} unchanged at {digest} (v{version:?})", self.source_id());
            self.persist_success(version, &digest, "no_change").await;
            return Ok(ReconcileOutcome::NoChange { version, digest });
        }
        log::info!(
            "Drift detected for {}: {:?} (now {digest})",
            self.source_id(),
            drift.reasons
        );

        if cancel.is_cancelled() {
            return Err(ReconcileError::Cancelled);
        }

        self.set_phase(ReconcilePhase::Estimating);
        let estimate = self
            .estimate_with_retry(&snapshot, cancel, &drift.reasons)
            .await?;

        if cancel.is_cancelled() {
            return Err(ReconcileError::Cancelled);
        }

        self.set_phase(ReconcilePhase::Merging);
        let draft = merge_estimate(committed.as_ref(), &estimate, &snapshot);

        let config = match self.store.commit(draft).await {
            Ok(config) => config,
            // The lease makes store-level races rare; re-merge once against
            // the new head, then surface.
            Err(StoreError::CommitConflict { expected, found }) => {
                log::warn!(
                    "Commit conflict for {} (merged against {expected:?}, head {found:?}); re-merging",
                    self.source_id()
                );
                let head = self.store.load().await?;
                let draft = merge_estimate(head.as_ref(), &estimate, &snapshot);
                self.store.commit(draft).await?
            }
            Err(err) => {
                self.record_failure("commit", &err.to_string(), &drift.reasons)
                    .await;
                return Err(err.into());
            }
        };

        self.set_phase(ReconcilePhase::Committed);
        if let Err(err) = write_artifact(&artifact_path(self.store.state_dir()), &config).await {
            log::warn!("Failed to write configuration artifact: {err}");
        }
        self.persist_success(Some(config.version), &config.source_digest, "committed")
            .await;

        Ok(ReconcileOutcome::Committed(config))
    }

    async fn estimate_with_retry(
        &self,
        snapshot: &SourceSnapshot,
        cancel: &CancelFlag,
        drift_reasons: &[DriftReason],
    ) -> Result<ResourceEstimate> {
        let policy = &self.config.retry;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let outcome = timeout(
                self.config.estimation_timeout,
                self.client.estimate(snapshot),
            )
            .await;

            let err = match outcome {
                Ok(Ok(estimate)) => {
                    if estimate.source_digest == snapshot.digest() {
                        return Ok(estimate);
                    }
                    EstimationError::MalformedResponse(format!(
                        "estimate is for digest {} but the snapshot is {}",
                        estimate.source_digest,
                        snapshot.digest()
                    ))
                }
                Ok(Err(err)) => err,
                Err(_) => EstimationError::Timeout(self.config.estimation_timeout),
            };

            if attempt >= policy.max_attempts {
                self.record_failure("estimation", &err.to_string(), drift_reasons)
                    .await;
                return Err(ReconcileError::EstimationFailed {
                    attempts: attempt,
                    last: err,
                });
            }

            let delay = policy.delay_for_attempt(attempt - 1);
            log::warn!(
                "Estimation attempt {attempt}/{} failed for {}: {err}; retrying in {delay:?}",
                policy.max_attempts,
                self.source_id()
            );
            tokio::time::sleep(delay).await;

            if cancel.is_cancelled() {
                return Err(ReconcileError::Cancelled);
            }
        }
    }

    async fn persist_success(&self, version: Option<u64>, digest: &str, reason: &str) {
        if let Err(err) =
            write_status_snapshot(self.store.state_dir(), version, Some(digest), reason).await
        {
            log::warn!("Failed to persist status snapshot: {err}");
        }
    }

    async fn record_failure(&self, reason: &str, detail: &str, stale_reasons: &[DriftReason]) {
        if let Err(err) =
            append_failure_reason(self.store.state_dir(), reason, detail, stale_reasons).await
        {
            log::warn!("Failed to persist failure reason: {err}");
        }
    }

    fn set_phase(&self, phase: ReconcilePhase) {
        let _ = self.phase_tx.send(phase);
    }
}
