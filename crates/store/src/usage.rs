use crate::paths::usage_log_path;
use crate::Result;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::io::AsyncWriteExt;

/// Observed actual resource usage, appended by operators or monitoring glue
/// so later estimates can be compared against reality.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct UsageSample {
    pub observed_at_unix_ms: u64,
    pub memory_bytes: u64,
    pub cpu_millis: u64,
    pub bandwidth_bytes_per_sec: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_version: Option<u64>,
}

/// Append one sample to the usage log (one JSON record per line).
pub async fn append_usage(state_dir: &Path, sample: &UsageSample) -> Result<()> {
    let path = usage_log_path(state_dir);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut line = serde_json::to_vec(sample)?;
    line.push(b'\n');

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await?;
    file.write_all(&line).await?;
    Ok(())
}

/// Read all recorded samples, oldest first.
pub async fn read_usage(state_dir: &Path) -> Result<Vec<UsageSample>> {
    let path = usage_log_path(state_dir);
    let contents = match tokio::fs::read_to_string(&path).await {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut samples = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<UsageSample>(line) {
            Ok(sample) => samples.push(sample),
            // A torn tail from a crashed writer should not poison the log.
            Err(err) => log::warn!("Skipping unreadable usage record: {err}"),
        }
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[tokio::test]
    async fn append_and_read_round_trip() {
        let temp = TempDir::new().unwrap();
        let sample = UsageSample {
            observed_at_unix_ms: 1_700_000_000_000,
            memory_bytes: 300 * 1024 * 1024,
            cpu_millis: 1500,
            bandwidth_bytes_per_sec: 2_000_000,
            config_version: Some(2),
        };

        append_usage(temp.path(), &sample).await.unwrap();
        append_usage(temp.path(), &sample).await.unwrap();

        let samples = read_usage(temp.path()).await.unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0], sample);
    }

    #[tokio::test]
    async fn torn_tail_is_skipped() {
        let temp = TempDir::new().unwrap();
        let sample = UsageSample {
            observed_at_unix_ms: 1,
            memory_bytes: 1,
            cpu_millis: 1,
            bandwidth_bytes_per_sec: 1,
            config_version: None,
        };
        append_usage(temp.path(), &sample).await.unwrap();

        let path = usage_log_path(temp.path());
        let mut contents = tokio::fs::read_to_string(&path).await.unwrap();
        contents.push_str("{\"observed_at_unix_ms\": 2, \"memo");
        tokio::fs::write(&path, contents).await.unwrap();

        let samples = read_usage(temp.path()).await.unwrap();
        assert_eq!(samples.len(), 1);
    }

    #[tokio::test]
    async fn missing_log_reads_empty() {
        let temp = TempDir::new().unwrap();
        let samples = read_usage(temp.path()).await.unwrap();
        assert!(samples.is_empty());
    }
}
