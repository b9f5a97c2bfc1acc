use crate::model::{ConfigDraft, Configuration, CONFIG_SCHEMA_VERSION};
use crate::paths::{config_path, history_dir, store_lock_path};
use crate::{Result, StoreError};
use fs2::FileExt;
use rightsizer_fingerprint::unix_now_ms;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Versioned configuration store rooted at a source's state directory.
pub struct ConfigStore {
    state_dir: PathBuf,
}

impl ConfigStore {
    pub fn open(state_dir: impl AsRef<Path>) -> Self {
        Self {
            state_dir: state_dir.as_ref().to_path_buf(),
        }
    }

    #[must_use]
    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// The committed head, or `None` before the first commit.
    pub async fn load(&self) -> Result<Option<Configuration>> {
        read_config(&config_path(&self.state_dir)).await
    }

    /// Commit a draft as the next configuration version.
    ///
    /// Commits are serialized through an exclusive lock file. The store
    /// assigns the version from the committed head; a draft whose
    /// `parent_version` no longer matches that head is rejected with
    /// [`StoreError::CommitConflict`].
    pub async fn commit(&self, draft: ConfigDraft) -> Result<Configuration> {
        let lock = acquire_store_lock(&self.state_dir).await?;

        let head = self.load().await?;
        let head_version = head.as_ref().map(|c| c.version);
        if draft.parent_version != head_version {
            return Err(StoreError::CommitConflict {
                expected: draft.parent_version,
                found: head_version,
            });
        }

        let version = head_version.map_or(1, |v| v + 1);
        let config = Configuration {
            schema_version: CONFIG_SCHEMA_VERSION,
            version,
            source_id: draft.source_id,
            source_digest: draft.fingerprint.digest(),
            fingerprint: draft.fingerprint,
            memory_bytes: draft.memory_bytes,
            cpu_millis: draft.cpu_millis,
            bandwidth_bytes_per_sec: draft.bandwidth_bytes_per_sec,
            overrides: draft.overrides,
            derived_from: draft.derived_from,
            estimate_confidence: draft.estimate_confidence,
            committed_at_unix_ms: unix_now_ms(),
        };

        // History first: the moment config.json is renamed into place the new
        // version is live, and its audit record must already exist.
        let history_path = history_dir(&self.state_dir).join(history_file_name(version));
        write_json_atomic(&history_path, &config).await?;
        write_json_atomic(&config_path(&self.state_dir), &config).await?;

        log::info!(
            "Committed configuration v{} for {} ({})",
            config.version,
            config.source_id,
            config.source_digest
        );
        drop(lock);
        Ok(config)
    }

    /// All committed configurations, oldest first by version.
    pub async fn history(&self) -> Result<Vec<Configuration>> {
        let dir = history_dir(&self.state_dir);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut configs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<Configuration>(&bytes) {
                Ok(config) => configs.push(config),
                Err(err) => {
                    return Err(StoreError::Corrupt {
                        path: path.display().to_string(),
                        detail: err.to_string(),
                    })
                }
            }
        }

        configs.sort_by_key(|c| c.version);
        Ok(configs)
    }
}

fn history_file_name(version: u64) -> String {
    format!("v{version:06}.json")
}

async fn read_config(path: &Path) -> Result<Option<Configuration>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(config) => Ok(Some(config)),
            Err(err) => Err(StoreError::Corrupt {
                path: path.display().to_string(),
                detail: err.to_string(),
            }),
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

pub(crate) async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

struct StoreLock {
    file: std::fs::File,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = self.file.unlock();
    }
}

async fn acquire_store_lock(state_dir: &Path) -> Result<StoreLock> {
    let path = store_lock_path(state_dir);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let lock = tokio::task::spawn_blocking(move || -> Result<StoreLock> {
        use std::fs::OpenOptions;

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&path)
            .map_err(|err| StoreError::Other(format!("open store lock {}: {err}", path.display())))?;

        file.lock_exclusive().map_err(|err| {
            StoreError::Other(format!("acquire store lock {}: {err}", path.display()))
        })?;

        Ok(StoreLock { file })
    })
    .await
    .map_err(|err| StoreError::Other(format!("join store lock task: {err}")))??;

    Ok(lock)
}
