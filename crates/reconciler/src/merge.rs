use rightsizer_fingerprint::SourceSnapshot;
use rightsizer_store::{ConfigDraft, Configuration, ResourceEstimate};

/// Apply the conflict policy to a fresh estimate.
///
/// A manually pinned dimension survives re-estimation even when the new
/// estimate disagrees; unset dimensions adopt the estimate's value. The
/// draft carries the head version it was merged against so the store can
/// reject stale merges.
#[must_use]
pub fn merge_estimate(
    prior: Option<&Configuration>,
    estimate: &ResourceEstimate,
    snapshot: &SourceSnapshot,
) -> ConfigDraft {
    let overrides = prior.map(|c| c.overrides.clone()).unwrap_or_default();

    ConfigDraft {
        source_id: snapshot.source_id.clone(),
        fingerprint: snapshot.fingerprint.clone(),
        memory_bytes: overrides.memory_bytes.unwrap_or(estimate.memory_bytes),
        cpu_millis: overrides.cpu_millis.unwrap_or(estimate.cpu_millis),
        bandwidth_bytes_per_sec: overrides
            .bandwidth_bytes_per_sec
            .unwrap_or(estimate.bandwidth_bytes_per_sec),
        overrides,
        derived_from: estimate.origin,
        estimate_confidence: estimate.confidence,
        parent_version: prior.map(|c| c.version),
    }
}
