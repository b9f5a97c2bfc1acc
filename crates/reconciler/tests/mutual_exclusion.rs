use async_trait::async_trait;
use pretty_assertions::assert_eq;
use rightsizer_fingerprint::{unix_now_ms, SourceFingerprinter, SourceSnapshot};
use rightsizer_reconciler::{
    CancelFlag, EstimationClient, EstimationError, ReconcileError, ReconcileOutcome, Reconciler,
    ReconcilerConfig, RetryPolicy,
};
use rightsizer_store::{state_dir_for_source_root, ConfigStore, EstimateOrigin, ResourceEstimate};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Deliberately slow client so one pass reliably overlaps the other.
struct SlowEstimator {
    delay: Duration,
    calls: AtomicUsize,
}

#[async_trait]
impl EstimationClient for SlowEstimator {
    async fn estimate(
        &self,
        snapshot: &SourceSnapshot,
    ) -> Result<ResourceEstimate, EstimationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(ResourceEstimate {
            memory_bytes: 512 * 1024 * 1024,
            cpu_millis: 1000,
            bandwidth_bytes_per_sec: 1_000_000,
            source_digest: snapshot.digest(),
            estimated_at_unix_ms: unix_now_ms(),
            origin: EstimateOrigin::Llm,
            confidence: Some(0.9),
        })
    }
}

async fn seed_source(temp: &TempDir) {
    tokio::fs::write(temp.path().join("main.rs"), "fn main() {}\n")
        .await
        .expect("write main");
}

fn config() -> ReconcilerConfig {
    ReconcilerConfig {
        estimation_timeout: Duration::from_secs(10),
        retry: RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: false,
        },
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_triggers_yield_one_commit_and_one_rejection() {
    let temp = TempDir::new().expect("tempdir");
    seed_source(&temp).await;

    let estimator = Arc::new(SlowEstimator {
        delay: Duration::from_millis(400),
        calls: AtomicUsize::new(0),
    });
    let fingerprinter = SourceFingerprinter::new("demo", temp.path()).expect("fingerprinter");
    let store = ConfigStore::open(state_dir_for_source_root(temp.path()));
    let reconciler = Arc::new(Reconciler::new(
        fingerprinter,
        store,
        estimator.clone(),
        config(),
    ));

    let first = tokio::spawn({
        let reconciler = reconciler.clone();
        async move { reconciler.run_once(&CancelFlag::new()).await }
    });

    // Give the spawned pass time to take the lease and enter estimation.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let second = reconciler.run_once(&CancelFlag::new()).await;
    match second {
        Err(ReconcileError::ReconciliationInProgress(source)) => assert_eq!(source, "demo"),
        other => panic!("expected ReconciliationInProgress, got {other:?}"),
    }

    let first = first.await.expect("join").expect("first pass");
    match first {
        ReconcileOutcome::Committed(committed) => assert_eq!(committed.version, 1),
        other => panic!("expected a commit, got {other:?}"),
    }

    // Exactly one estimation call: the rejected trigger never reached the
    // adapter, and no second version was committed.
    assert_eq!(estimator.calls.load(Ordering::SeqCst), 1);
    let store = ConfigStore::open(state_dir_for_source_root(temp.path()));
    assert_eq!(store.history().await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn lease_is_released_after_the_pass_completes() {
    let temp = TempDir::new().expect("tempdir");
    seed_source(&temp).await;

    let estimator = Arc::new(SlowEstimator {
        delay: Duration::from_millis(10),
        calls: AtomicUsize::new(0),
    });
    let fingerprinter = SourceFingerprinter::new("demo", temp.path()).expect("fingerprinter");
    let store = ConfigStore::open(state_dir_for_source_root(temp.path()));
    let reconciler = Arc::new(Reconciler::new(
        fingerprinter,
        store,
        estimator,
        config(),
    ));

    match reconciler.run_once(&CancelFlag::new()).await.unwrap() {
        ReconcileOutcome::Committed(committed) => assert_eq!(committed.version, 1),
        other => panic!("expected a commit, got {other:?}"),
    }

    // The lease from the finished pass is gone; a follow-up pass runs and
    // lands on the cheap no-op path.
    match reconciler.run_once(&CancelFlag::new()).await.unwrap() {
        ReconcileOutcome::NoChange { version, .. } => assert_eq!(version, Some(1)),
        other => panic!("expected a no-op, got {other:?}"),
    }
}
