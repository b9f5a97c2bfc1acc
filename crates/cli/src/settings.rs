use anyhow::{bail, Context, Result};
use rightsizer_reconciler::{ReconcilerConfig, RetryPolicy, WatchConfig};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Operator-tunable knobs, read from `<state-dir>/settings.toml` when
/// present. Every field falls back to the built-in default.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub estimation_timeout_secs: u64,
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub debounce_ms: u64,
    pub max_batch_wait_secs: u64,
    pub poll_interval_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            estimation_timeout_secs: 60,
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            debounce_ms: 750,
            max_batch_wait_secs: 3,
            poll_interval_secs: 300,
        }
    }
}

impl Settings {
    /// Load from an explicit `--settings` path (must exist) or the source's
    /// default location (missing file means defaults).
    pub fn load(explicit: Option<&Path>, state_dir: &Path) -> Result<Self> {
        let path = match explicit {
            Some(path) => {
                if !path.exists() {
                    bail!("settings file {} not found", path.display());
                }
                path.to_path_buf()
            }
            None => {
                let default_path = state_dir.join("settings.toml");
                if !default_path.exists() {
                    return Ok(Self::default());
                }
                default_path
            }
        };

        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("read settings {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parse settings {}", path.display()))
    }

    #[must_use]
    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            estimation_timeout: Duration::from_secs(self.estimation_timeout_secs),
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                initial_delay: Duration::from_millis(self.initial_delay_ms),
                max_delay: Duration::from_millis(self.max_delay_ms),
                ..RetryPolicy::default()
            },
        }
    }

    #[must_use]
    pub fn watch_config(&self) -> WatchConfig {
        WatchConfig {
            debounce: Duration::from_millis(self.debounce_ms),
            max_batch_wait: Duration::from_secs(self.max_batch_wait_secs),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            ..WatchConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn missing_default_file_yields_defaults() {
        let temp = TempDir::new().unwrap();
        let settings = Settings::load(None, temp.path()).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn file_values_override_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("settings.toml");
        std::fs::write(&path, "max_attempts = 5\npoll_interval_secs = 30\n").unwrap();

        let settings = Settings::load(Some(&path), temp.path()).unwrap();
        assert_eq!(settings.max_attempts, 5);
        assert_eq!(settings.poll_interval_secs, 30);
        // Untouched fields keep their defaults.
        assert_eq!(settings.estimation_timeout_secs, 60);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("settings.toml");
        std::fs::write(&path, "max_atempts = 5\n").unwrap();

        assert!(Settings::load(Some(&path), temp.path()).is_err());
    }

    #[test]
    fn explicit_missing_path_is_an_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nope.toml");
        assert!(Settings::load(Some(&path), temp.path()).is_err());
    }

    #[test]
    fn durations_map_through() {
        let settings = Settings::default();
        let config = settings.reconciler_config();
        assert_eq!(config.estimation_timeout, Duration::from_secs(60));
        assert_eq!(config.retry.max_attempts, 3);

        let watch = settings.watch_config();
        assert_eq!(watch.poll_interval, Duration::from_secs(300));
    }
}
