use crate::client::{EstimationClient, EstimationError};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use rightsizer_fingerprint::{unix_now_ms, SourceScanner, SourceSnapshot};
use rightsizer_store::{EstimateOrigin, ResourceEstimate};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

const MB: u64 = 1024 * 1024;
const BASE_MEMORY_MB: u64 = 50;
const MIN_MEMORY_MB: u64 = 256;
const MIN_BANDWIDTH_BYTES_PER_SEC: u64 = 12_500; // 0.1 Mbps
const BANDWIDTH_PER_CALL_BYTES_PER_SEC: u64 = 62_500; // 0.5 Mbps per observed call site

/// Per-library memory footprint in MB (base, peak); heavyweight runtimes
/// dominate a service's memory floor long before its own code does.
const LIBRARY_IMPACTS: &[(&str, u64, u64)] = &[
    ("pandas", 50, 100),
    ("numpy", 30, 60),
    ("tensorflow", 200, 500),
    ("torch", 200, 500),
    ("sklearn", 100, 200),
    ("flask", 50, 100),
    ("django", 75, 150),
    ("rayon", 30, 60),
    ("tokio", 20, 40),
];

static LOOP_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(for|while)\b").expect("loop pattern"));

static PARALLEL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"multiprocessing\.|concurrent\.|threading\.|asyncio\.|std::thread|rayon::|tokio::spawn")
        .expect("parallel pattern")
});

static NETWORK_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"requests\.(get|post|put|delete)|urllib|aiohttp|httpx|websockets?|reqwest::|hyper::|fetch\(")
        .expect("network pattern")
});

#[derive(Debug, Default)]
struct ProfileTotals {
    base_memory_mb: u64,
    peak_memory_mb: u64,
    cpu_score: u64,
    network_calls: u64,
    files_analyzed: u64,
    libraries: BTreeSet<&'static str>,
}

/// Heuristic estimator that profiles the source tree directly.
///
/// Stands in for the remote estimation collaborator when none is wired up:
/// detects heavyweight library imports, CPU-bound code patterns and network
/// call sites, and aggregates them into a conservative estimate with
/// `origin = static_profile` and low confidence.
pub struct StaticProfileEstimator {
    root: PathBuf,
}

impl StaticProfileEstimator {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn profile(root: &Path) -> ProfileTotals {
        let scanner = SourceScanner::new(root);
        let mut totals = ProfileTotals::default();

        for path in scanner.scan() {
            // Binary or vanished files do not profile.
            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };
            totals.files_analyzed += 1;

            for &(lib, _, _) in LIBRARY_IMPACTS {
                if !totals.libraries.contains(lib) && imports_library(&content, lib) {
                    totals.libraries.insert(lib);
                }
            }

            let loops = LOOP_PATTERN.find_iter(&content).count() as u64;
            let parallel = PARALLEL_PATTERN.find_iter(&content).count() as u64;
            totals.cpu_score += loops / 4 + parallel;
            totals.network_calls += NETWORK_PATTERN.find_iter(&content).count() as u64;
        }

        for &(lib, base, peak) in LIBRARY_IMPACTS {
            if totals.libraries.contains(lib) {
                totals.base_memory_mb += base;
                totals.peak_memory_mb += peak;
            }
        }

        totals
    }
}

fn imports_library(content: &str, lib: &str) -> bool {
    content.lines().any(|line| {
        let line = line.trim_start();
        (line.starts_with("use ")
            || line.starts_with("import ")
            || line.starts_with("from ")
            || line.contains("require("))
            && line.contains(lib)
    })
}

fn estimate_from_totals(totals: &ProfileTotals, source_digest: String) -> ResourceEstimate {
    let memory_mb =
        (BASE_MEMORY_MB + totals.base_memory_mb + totals.peak_memory_mb).max(MIN_MEMORY_MB);

    // CPU-bound score thresholds: over 5 wants a second core, over 10 a quad.
    let cores: u64 = if totals.cpu_score > 10 {
        4
    } else if totals.cpu_score > 5 {
        2
    } else {
        1
    };

    let bandwidth = (totals.network_calls * BANDWIDTH_PER_CALL_BYTES_PER_SEC)
        .max(MIN_BANDWIDTH_BYTES_PER_SEC);

    ResourceEstimate {
        memory_bytes: memory_mb * MB,
        cpu_millis: cores * 1000,
        bandwidth_bytes_per_sec: bandwidth,
        source_digest,
        estimated_at_unix_ms: unix_now_ms(),
        origin: EstimateOrigin::StaticProfile,
        confidence: Some(0.35),
    }
}

#[async_trait]
impl EstimationClient for StaticProfileEstimator {
    async fn estimate(
        &self,
        snapshot: &SourceSnapshot,
    ) -> std::result::Result<ResourceEstimate, EstimationError> {
        let root = self.root.clone();
        let totals = tokio::task::spawn_blocking(move || StaticProfileEstimator::profile(&root))
            .await
            .map_err(|err| EstimationError::Transport(format!("profile task failed: {err}")))?;

        log::debug!(
            "Profiled {} files: cpu_score={} network_calls={} libraries={:?}",
            totals.files_analyzed,
            totals.cpu_score,
            totals.network_calls,
            totals.libraries
        );
        Ok(estimate_from_totals(&totals, snapshot.digest()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rightsizer_fingerprint::Fingerprint;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn import_detection_covers_common_forms() {
        assert!(imports_library("use tokio::spawn;\n", "tokio"));
        assert!(imports_library("import pandas as pd\n", "pandas"));
        assert!(imports_library("from numpy import array\n", "numpy"));
        assert!(imports_library("const torch = require(\"torch\");\n", "torch"));
        assert!(!imports_library("let pandas_like = 1;\n", "pandas"));
    }

    #[test]
    fn cpu_thresholds_scale_cores() {
        let quiet = ProfileTotals::default();
        assert_eq!(estimate_from_totals(&quiet, "d".into()).cpu_millis, 1000);

        let busy = ProfileTotals {
            cpu_score: 7,
            ..ProfileTotals::default()
        };
        assert_eq!(estimate_from_totals(&busy, "d".into()).cpu_millis, 2000);

        let hot = ProfileTotals {
            cpu_score: 12,
            ..ProfileTotals::default()
        };
        assert_eq!(estimate_from_totals(&hot, "d".into()).cpu_millis, 4000);
    }

    #[test]
    fn memory_floor_holds_for_trivial_sources() {
        let totals = ProfileTotals::default();
        let estimate = estimate_from_totals(&totals, "d".into());
        assert_eq!(estimate.memory_bytes, MIN_MEMORY_MB * MB);
        assert_eq!(estimate.bandwidth_bytes_per_sec, MIN_BANDWIDTH_BYTES_PER_SEC);
    }

    #[test]
    fn ml_imports_raise_the_memory_estimate() {
        let temp = tempdir().unwrap();
        fs::write(
            temp.path().join("train.py"),
            "import torch\nimport pandas as pd\n\nfor epoch in range(10):\n    pass\n",
        )
        .unwrap();

        let totals = StaticProfileEstimator::profile(temp.path());
        assert!(totals.libraries.contains("torch"));
        assert!(totals.libraries.contains("pandas"));

        let estimate = estimate_from_totals(&totals, "d".into());
        // 50 base + torch (200+500) + pandas (50+100) MB, well above the floor.
        assert!(estimate.memory_bytes > MIN_MEMORY_MB * MB);
    }

    #[tokio::test]
    async fn estimate_is_tagged_with_the_snapshot_digest() {
        let temp = tempdir().unwrap();
        fs::write(temp.path().join("main.rs"), "fn main() {}\n").unwrap();

        let estimator = StaticProfileEstimator::new(temp.path());
        let snapshot = SourceSnapshot {
            source_id: "demo".to_string(),
            fingerprint: Fingerprint::Content {
                digest: "abc123".to_string(),
                file_count: 1,
                total_bytes: 12,
            },
            captured_at_unix_ms: 0,
        };

        let estimate = estimator.estimate(&snapshot).await.unwrap();
        assert_eq!(estimate.source_digest, "abc123");
        assert_eq!(estimate.origin, EstimateOrigin::StaticProfile);
    }
}
