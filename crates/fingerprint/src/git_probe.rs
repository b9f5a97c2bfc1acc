use crate::fingerprint::{hex_digest, Fingerprint};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::time::{timeout, Duration};

// Probing must stay cheap and bounded. Working trees with many untracked files
// can make `git status` very slow; when a probe times out we fall back to the
// content walk instead of blocking the check path.
const GIT_HEAD_TIMEOUT: Duration = Duration::from_millis(1_000);
const GIT_STATUS_TIMEOUT: Duration = Duration::from_millis(2_000);
const MAX_DIRTY_PATHS_FOR_DIGEST: usize = 512;
const MAX_DIRTY_FILE_BYTES: u64 = 1_048_576;

pub(crate) async fn probe_git_fingerprint(root: &Path) -> Option<Fingerprint> {
    let head = timeout(
        GIT_HEAD_TIMEOUT,
        tokio::process::Command::new("git")
            .arg("-C")
            .arg(root)
            .arg("rev-parse")
            .arg("HEAD")
            .output(),
    )
    .await
    .ok()?
    .ok()?;
    if !head.status.success() {
        return None;
    }
    let git_head = String::from_utf8_lossy(&head.stdout).trim().to_string();
    if git_head.is_empty() {
        return None;
    }

    let status = timeout(
        GIT_STATUS_TIMEOUT,
        tokio::process::Command::new("git")
            .arg("-C")
            .arg(root)
            .arg("status")
            .arg("--porcelain")
            .arg("-z")
            .output(),
    )
    .await
    .ok()?
    .ok()?;
    if !status.status.success() {
        return None;
    }

    let git_dirty = !status.stdout.is_empty();
    let dirty_digest = if git_dirty {
        Some(dirty_digest(root, &status.stdout).await)
    } else {
        None
    };

    Some(Fingerprint::Git {
        git_head,
        git_dirty,
        dirty_digest,
    })
}

async fn dirty_digest(root: &Path, porcelain: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(porcelain);

    // The raw porcelain output does not change when an already-dirty file is
    // edited again (the entry stays "M file"), so the digest mixes in the
    // current contents of each dirty path (bounded).
    for path in parse_dirty_paths(porcelain) {
        hasher.update(path.to_string_lossy().as_bytes());

        let candidate = root.join(&path);
        match tokio::fs::metadata(&candidate).await {
            Ok(meta) if meta.len() <= MAX_DIRTY_FILE_BYTES => {
                match tokio::fs::read(&candidate).await {
                    Ok(bytes) => {
                        hasher.update((bytes.len() as u64).to_be_bytes());
                        hasher.update(&bytes);
                    }
                    Err(_) => hasher.update(0u64.to_be_bytes()),
                }
            }
            // Oversized files contribute their size only.
            Ok(meta) => hasher.update(meta.len().to_be_bytes()),
            // Deleted paths still show up in porcelain output.
            Err(_) => hasher.update(0u64.to_be_bytes()),
        }
    }

    hex_digest(hasher)
}

fn parse_dirty_paths(porcelain: &[u8]) -> Vec<PathBuf> {
    let tokens: Vec<&[u8]> = porcelain
        .split(|b| *b == 0)
        .filter(|s| !s.is_empty())
        .collect();

    let mut paths: Vec<PathBuf> = Vec::new();
    let mut idx = 0usize;
    while idx < tokens.len() && paths.len() < MAX_DIRTY_PATHS_FOR_DIGEST {
        let token = tokens[idx];
        if token.len() < 4 || token.get(2) != Some(&b' ') {
            idx = idx.saturating_add(1);
            continue;
        }
        let status0 = token[0];
        let path1 = String::from_utf8_lossy(&token[3..]);
        paths.push(PathBuf::from(path1.as_ref()));

        // For renames/copies, porcelain emits: `R  old\0new\0`.
        if (status0 == b'R' || status0 == b'C') && idx + 1 < tokens.len() {
            let path2 = String::from_utf8_lossy(tokens[idx + 1]);
            paths.push(PathBuf::from(path2.as_ref()));
            idx = idx.saturating_add(2);
        } else {
            idx = idx.saturating_add(1);
        }
    }

    paths
}
