use crate::git_probe::probe_git_fingerprint;
use crate::scanner::SourceScanner;
use crate::{FingerprintError, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Content signature for a monitored source.
///
/// Two captures over byte-identical source content produce equal fingerprints;
/// any content change produces, with overwhelming probability, a different one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Fingerprint {
    Git {
        git_head: String,
        git_dirty: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        dirty_digest: Option<String>,
    },
    Content {
        digest: String,
        file_count: u64,
        total_bytes: u64,
    },
}

impl Fingerprint {
    /// Stable string signature used for drift comparison and persistence.
    #[must_use]
    pub fn digest(&self) -> String {
        match self {
            Fingerprint::Git {
                git_head,
                git_dirty: false,
                ..
            } => git_head.clone(),
            Fingerprint::Git {
                git_head,
                git_dirty: true,
                dirty_digest,
            } => match dirty_digest {
                Some(dirty) => format!("{git_head}+{dirty}"),
                None => format!("{git_head}+dirty"),
            },
            Fingerprint::Content { digest, .. } => digest.clone(),
        }
    }
}

/// Immutable capture of a source at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct SourceSnapshot {
    pub source_id: String,
    pub fingerprint: Fingerprint,
    pub captured_at_unix_ms: u64,
}

impl SourceSnapshot {
    #[must_use]
    pub fn digest(&self) -> String {
        self.fingerprint.digest()
    }
}

/// Computes [`SourceSnapshot`]s for one monitored source root.
#[derive(Debug)]
pub struct SourceFingerprinter {
    source_id: String,
    root: PathBuf,
}

impl SourceFingerprinter {
    pub fn new(source_id: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(FingerprintError::SourceUnavailable(format!(
                "{} is not a readable directory",
                root.display()
            )));
        }
        Ok(Self {
            source_id: source_id.into(),
            root,
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Capture the source as it exists right now.
    ///
    /// Tries the git probe first; working trees without git (or where the
    /// probe times out) fall back to hashing the scanned file contents.
    pub async fn capture(&self) -> Result<SourceSnapshot> {
        // The root may vanish between polls.
        if !self.root.is_dir() {
            return Err(FingerprintError::SourceUnavailable(format!(
                "{} disappeared",
                self.root.display()
            )));
        }

        let fingerprint = match probe_git_fingerprint(&self.root).await {
            Some(mark) => mark,
            None => content_fingerprint(&self.root).await?,
        };

        Ok(SourceSnapshot {
            source_id: self.source_id.clone(),
            fingerprint,
            captured_at_unix_ms: unix_now_ms(),
        })
    }
}

async fn content_fingerprint(root: &Path) -> Result<Fingerprint> {
    let root = root.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let scanner = SourceScanner::new(&root);
        let files = scanner.scan();

        let mut hasher = Sha256::new();
        let mut file_count = 0u64;
        let mut total_bytes = 0u64;

        for path in files {
            let Ok(relative) = path.strip_prefix(&root) else {
                continue;
            };
            let bytes = match std::fs::read(&path) {
                Ok(bytes) => bytes,
                // Files can disappear mid-scan; a deleted file simply drops
                // out of the signature.
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            hasher.update(relative.to_string_lossy().as_bytes());
            hasher.update([0u8]);
            hasher.update((bytes.len() as u64).to_be_bytes());
            hasher.update(&bytes);
            file_count += 1;
            total_bytes = total_bytes.saturating_add(bytes.len() as u64);
        }

        Ok::<_, FingerprintError>(Fingerprint::Content {
            digest: hex_digest(hasher),
            file_count,
            total_bytes,
        })
    })
    .await
    .map_err(|e| FingerprintError::Other(format!("failed to hash source contents: {e}")))?
}

pub(crate) fn hex_digest(hasher: Sha256) -> String {
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[must_use]
pub fn unix_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
