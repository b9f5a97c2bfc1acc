//! # Rightsizer Reconciler
//!
//! The reconciliation loop: detect drift between a monitored source and its
//! committed resource configuration, re-estimate through the external
//! adapter, merge under the override conflict policy, and commit a new
//! configuration version.
//!
//! ## State machine
//!
//! ```text
//! IDLE ──> CHECKING ──> ESTIMATING ──> MERGING ──> COMMITTED ──> IDLE
//!             │              │
//!             │ (no drift)   │ (retries exhausted)
//!             └──> IDLE      └──> FAILED
//! ```
//!
//! One pass holds a per-source lease from `CHECKING` until it returns to
//! idle; a concurrent trigger for the same source is rejected with
//! [`ReconcileError::ReconciliationInProgress`], never queued. The stored
//! configuration is only touched by the atomic commit in `MERGING →
//! COMMITTED`; every failure path leaves the last-good version active.

mod client;
mod daemon;
mod error;
mod lease;
mod merge;
mod profile;
mod reconciler;
mod retry;
mod status;

pub use client::{EstimationClient, EstimationError};
pub use daemon::{DaemonHealth, ReconcileUpdate, WatchConfig, WatchDaemon};
pub use error::{ReconcileError, Result};
pub use lease::ReconcileLease;
pub use merge::merge_estimate;
pub use profile::StaticProfileEstimator;
pub use reconciler::{
    CancelFlag, ReconcileOutcome, ReconcilePhase, Reconciler, ReconcilerConfig,
};
pub use retry::RetryPolicy;
pub use status::{
    append_failure_reason, read_status_snapshot, write_status_snapshot, StatusSnapshot,
};
