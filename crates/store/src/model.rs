use rightsizer_fingerprint::Fingerprint;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Where a committed resource value came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EstimateOrigin {
    Llm,
    StaticProfile,
    ManualOverride,
}

/// A proposed resource configuration from an estimation collaborator.
///
/// Immutable; re-estimation produces a new record, never an edit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct ResourceEstimate {
    pub memory_bytes: u64,
    /// Millicores; 1000 = one full core.
    pub cpu_millis: u64,
    pub bandwidth_bytes_per_sec: u64,
    pub source_digest: String,
    pub estimated_at_unix_ms: u64,
    pub origin: EstimateOrigin,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

/// Manually pinned values that resist automatic updates until cleared.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct ResourceOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_millis: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bandwidth_bytes_per_sec: Option<u64>,
}

impl ResourceOverrides {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.memory_bytes.is_none()
            && self.cpu_millis.is_none()
            && self.bandwidth_bytes_per_sec.is_none()
    }
}

/// The active resource configuration for one source.
///
/// Owned exclusively by the [`crate::ConfigStore`]; replaced atomically on
/// commit, never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct Configuration {
    pub schema_version: u32,
    pub version: u64,
    pub source_id: String,
    pub source_digest: String,
    pub fingerprint: Fingerprint,
    pub memory_bytes: u64,
    pub cpu_millis: u64,
    pub bandwidth_bytes_per_sec: u64,
    #[serde(default)]
    pub overrides: ResourceOverrides,
    pub derived_from: EstimateOrigin,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimate_confidence: Option<f32>,
    pub committed_at_unix_ms: u64,
}

/// What a reconciliation hands to the store for commit.
///
/// The store assigns the committed version itself; the draft only carries
/// the head it was merged against so stale merges are rejected.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigDraft {
    pub source_id: String,
    pub fingerprint: Fingerprint,
    pub memory_bytes: u64,
    pub cpu_millis: u64,
    pub bandwidth_bytes_per_sec: u64,
    pub overrides: ResourceOverrides,
    pub derived_from: EstimateOrigin,
    pub estimate_confidence: Option<f32>,
    pub parent_version: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DriftReason {
    NoConfiguration,
    FingerprintMismatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriftAssessment {
    pub drifted: bool,
    pub reasons: Vec<DriftReason>,
}

/// Compare the freshly captured digest against the committed head.
#[must_use]
pub fn assess_drift(current_digest: &str, committed: Option<&Configuration>) -> DriftAssessment {
    let mut reasons = Vec::new();

    match committed {
        None => reasons.push(DriftReason::NoConfiguration),
        Some(config) => {
            if config.source_digest != current_digest {
                reasons.push(DriftReason::FingerprintMismatch);
            }
        }
    }

    let drifted = !reasons.is_empty();
    DriftAssessment { drifted, reasons }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config(digest: &str) -> Configuration {
        Configuration {
            schema_version: CONFIG_SCHEMA_VERSION,
            version: 1,
            source_id: "demo".to_string(),
            source_digest: digest.to_string(),
            fingerprint: Fingerprint::Content {
                digest: digest.to_string(),
                file_count: 1,
                total_bytes: 10,
            },
            memory_bytes: 256 * 1024 * 1024,
            cpu_millis: 1000,
            bandwidth_bytes_per_sec: 1_000_000,
            overrides: ResourceOverrides::default(),
            derived_from: EstimateOrigin::Llm,
            estimate_confidence: None,
            committed_at_unix_ms: 0,
        }
    }

    #[test]
    fn drift_when_no_configuration() {
        let out = assess_drift("abc123", None);
        assert_eq!(out.drifted, true);
        assert_eq!(out.reasons, vec![DriftReason::NoConfiguration]);
    }

    #[test]
    fn drift_when_fingerprint_mismatch() {
        let committed = config("abc123");
        let out = assess_drift("def456", Some(&committed));
        assert_eq!(out.drifted, true);
        assert_eq!(out.reasons, vec![DriftReason::FingerprintMismatch]);
    }

    #[test]
    fn fresh_when_digest_matches() {
        let committed = config("abc123");
        let out = assess_drift("abc123", Some(&committed));
        assert_eq!(out.drifted, false);
        assert_eq!(out.reasons, Vec::<DriftReason>::new());
    }

    #[test]
    fn overrides_emptiness() {
        assert!(ResourceOverrides::default().is_empty());
        let pinned = ResourceOverrides {
            cpu_millis: Some(4000),
            ..ResourceOverrides::default()
        };
        assert!(!pinned.is_empty());
    }
}
