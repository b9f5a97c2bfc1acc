use crate::Result;
use rightsizer_fingerprint::unix_now_ms;
use rightsizer_store::{status_path, DriftReason};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

const MAX_FAILURES: usize = 5;

/// Snapshot persisted to `.rightsizer/status.json` so other processes can
/// see the loop's last outcome without replaying it.
///
/// `stale` is the observable "source moved on" marker: committed
/// configuration records are immutable, so drift and terminal failures are
/// reported here instead of being patched into the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub last_success_unix_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_version: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_digest: Option<String>,
    pub stale: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stale_reasons: Vec<DriftReason>,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failure_reasons: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_unix_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_count: Option<usize>,
}

pub async fn write_status_snapshot(
    state_dir: &Path,
    last_version: Option<u64>,
    last_digest: Option<&str>,
    reason: &str,
) -> Result<StatusSnapshot> {
    let snapshot = StatusSnapshot {
        last_success_unix_ms: unix_now_ms(),
        last_version,
        last_digest: last_digest.map(str::to_string),
        stale: false,
        stale_reasons: Vec::new(),
        reason: reason.to_string(),
        failure_reasons: Vec::new(),
        last_failure_unix_ms: None,
        last_failure_reason: None,
        failure_count: Some(0),
    };

    persist(state_dir, &snapshot).await?;
    Ok(snapshot)
}

/// Record a terminal failure without discarding the last-success fields.
pub async fn append_failure_reason(
    state_dir: &Path,
    reason: &str,
    detail: &str,
    stale_reasons: &[DriftReason],
) -> Result<()> {
    let mut snapshot = read_status_snapshot(state_dir)
        .await?
        .unwrap_or_else(|| StatusSnapshot {
            last_success_unix_ms: 0,
            last_version: None,
            last_digest: None,
            stale: false,
            stale_reasons: Vec::new(),
            reason: "failure".to_string(),
            failure_reasons: Vec::new(),
            last_failure_unix_ms: None,
            last_failure_reason: None,
            failure_count: None,
        });

    snapshot.failure_reasons.push(format!("{reason}: {detail}"));
    snapshot.last_failure_unix_ms = Some(unix_now_ms());
    snapshot.last_failure_reason = Some(detail.to_string());
    if !stale_reasons.is_empty() {
        snapshot.stale = true;
        snapshot.stale_reasons = stale_reasons.to_vec();
    }
    if snapshot.failure_reasons.len() > MAX_FAILURES {
        let start = snapshot.failure_reasons.len() - MAX_FAILURES;
        snapshot.failure_reasons = snapshot.failure_reasons.split_off(start);
    }
    snapshot.failure_count = Some(snapshot.failure_reasons.len());

    persist(state_dir, &snapshot).await
}

pub async fn read_status_snapshot(state_dir: &Path) -> Result<Option<StatusSnapshot>> {
    let path = status_path(state_dir);
    match fs::read(&path).await {
        Ok(bytes) => {
            let snapshot = serde_json::from_slice(&bytes)?;
            Ok(Some(snapshot))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

async fn persist(state_dir: &Path, snapshot: &StatusSnapshot) -> Result<()> {
    let path = status_path(state_dir);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let data = serde_json::to_vec_pretty(snapshot)?;
    fs::write(&path, data).await?;
    Ok(())
}
