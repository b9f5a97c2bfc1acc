use crate::{ReconcileError, Result};
use fs2::FileExt;
use once_cell::sync::Lazy;
use rightsizer_store::reconcile_lock_path;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

// In-process registry of sources with an active pass; the lock file below
// extends the same guarantee across processes.
static ACTIVE_SOURCES: Lazy<Mutex<HashSet<String>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// Exclusive per-source reconciliation lease.
///
/// Held from `CHECKING` until the pass returns to idle or fails. Acquisition
/// never blocks: a second trigger for the same source is rejected with
/// [`ReconcileError::ReconciliationInProgress`] rather than queued, so a
/// manual trigger racing a scheduled tick cannot double-invoke the
/// estimation adapter or commit out of order.
pub struct ReconcileLease {
    key: String,
    file: Option<std::fs::File>,
}

impl ReconcileLease {
    pub fn try_acquire(state_dir: &Path, source_id: &str) -> Result<Self> {
        let key = format!("{}\u{1f}{}", state_dir.display(), source_id);

        {
            let mut active = ACTIVE_SOURCES
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if !active.insert(key.clone()) {
                return Err(ReconcileError::ReconciliationInProgress(
                    source_id.to_string(),
                ));
            }
        }

        match try_lock_file(state_dir, source_id) {
            Ok(file) => Ok(Self {
                key,
                file: Some(file),
            }),
            Err(err) => {
                release_key(&key);
                Err(err)
            }
        }
    }
}

impl Drop for ReconcileLease {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = file.unlock();
        }
        release_key(&self.key);
    }
}

fn release_key(key: &str) {
    let mut active = ACTIVE_SOURCES
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    active.remove(key);
}

fn try_lock_file(state_dir: &Path, source_id: &str) -> Result<std::fs::File> {
    use std::fs::OpenOptions;

    let path = reconcile_lock_path(state_dir);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(&path)
        .map_err(|err| {
            ReconcileError::Other(format!("open reconcile lock {}: {err}", path.display()))
        })?;

    match file.try_lock_exclusive() {
        Ok(()) => Ok(file),
        Err(err) if err.raw_os_error() == fs2::lock_contended_error().raw_os_error() => Err(
            ReconcileError::ReconciliationInProgress(source_id.to_string()),
        ),
        Err(err) => Err(ReconcileError::Other(format!(
            "acquire reconcile lock {}: {err}",
            path.display()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn second_acquire_is_rejected_until_release() {
        let temp = TempDir::new().unwrap();

        let lease = ReconcileLease::try_acquire(temp.path(), "demo").unwrap();
        let second = ReconcileLease::try_acquire(temp.path(), "demo");
        assert!(matches!(
            second,
            Err(ReconcileError::ReconciliationInProgress(_))
        ));

        drop(lease);
        ReconcileLease::try_acquire(temp.path(), "demo").unwrap();
    }

    #[test]
    fn distinct_sources_do_not_contend() {
        let temp_a = TempDir::new().unwrap();
        let temp_b = TempDir::new().unwrap();

        let _lease_a = ReconcileLease::try_acquire(temp_a.path(), "a").unwrap();
        let _lease_b = ReconcileLease::try_acquire(temp_b.path(), "b").unwrap();
    }
}
