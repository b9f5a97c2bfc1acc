//! # Rightsizer Store
//!
//! Versioned persistence for resource configurations.
//!
//! The store owns the active [`Configuration`]: commits are serialized
//! through a lock file, versions are store-assigned and monotonically
//! increasing, and every committed version is retained in `history/` for
//! audit. Readers always observe either the previous or the new record,
//! never a partial write.

mod artifact;
mod error;
mod model;
mod paths;
mod store;
mod usage;

pub use artifact::{artifact_from_config, render_kubernetes, write_artifact, ConfigArtifact};
pub use error::{Result, StoreError};
pub use model::{
    assess_drift, ConfigDraft, Configuration, DriftAssessment, DriftReason, EstimateOrigin,
    ResourceEstimate, ResourceOverrides, CONFIG_SCHEMA_VERSION,
};
pub use paths::{
    artifact_path, config_path, history_dir, reconcile_lock_path, state_dir_for_source_root,
    status_path, store_lock_path, usage_log_path, STATE_DIR_NAME,
};
pub use store::ConfigStore;
pub use usage::{append_usage, read_usage, UsageSample};
