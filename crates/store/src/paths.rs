use std::path::{Path, PathBuf};

pub const STATE_DIR_NAME: &str = ".rightsizer";

const CONFIG_FILE_NAME: &str = "config.json";
const HISTORY_DIR_NAME: &str = "history";
const ARTIFACT_FILE_NAME: &str = "artifact.json";
const USAGE_LOG_FILE_NAME: &str = "usage.jsonl";
const STATUS_FILE_NAME: &str = "status.json";
const STORE_LOCK_FILE_NAME: &str = "store.lock";
const RECONCILE_LOCK_FILE_NAME: &str = "reconcile.lock";

#[must_use]
pub fn state_dir_for_source_root(root: &Path) -> PathBuf {
    root.join(STATE_DIR_NAME)
}

#[must_use]
pub fn config_path(state_dir: &Path) -> PathBuf {
    state_dir.join(CONFIG_FILE_NAME)
}

#[must_use]
pub fn history_dir(state_dir: &Path) -> PathBuf {
    state_dir.join(HISTORY_DIR_NAME)
}

#[must_use]
pub fn artifact_path(state_dir: &Path) -> PathBuf {
    state_dir.join(ARTIFACT_FILE_NAME)
}

#[must_use]
pub fn usage_log_path(state_dir: &Path) -> PathBuf {
    state_dir.join(USAGE_LOG_FILE_NAME)
}

#[must_use]
pub fn status_path(state_dir: &Path) -> PathBuf {
    state_dir.join(STATUS_FILE_NAME)
}

#[must_use]
pub fn store_lock_path(state_dir: &Path) -> PathBuf {
    state_dir.join(STORE_LOCK_FILE_NAME)
}

#[must_use]
pub fn reconcile_lock_path(state_dir: &Path) -> PathBuf {
    state_dir.join(RECONCILE_LOCK_FILE_NAME)
}
