use crate::model::Configuration;
use crate::store::write_json_atomic;
use crate::Result;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Downstream-facing record emitted after every accepted reconciliation:
/// resource-dimension name → numeric value, with the fingerprint digest and
/// version the values were reconciled against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct ConfigArtifact {
    pub version: u64,
    pub source_id: String,
    pub source_digest: String,
    pub resources: BTreeMap<String, u64>,
}

#[must_use]
pub fn artifact_from_config(config: &Configuration) -> ConfigArtifact {
    let mut resources = BTreeMap::new();
    resources.insert("memory_bytes".to_string(), config.memory_bytes);
    resources.insert("cpu_millis".to_string(), config.cpu_millis);
    resources.insert(
        "bandwidth_bytes_per_sec".to_string(),
        config.bandwidth_bytes_per_sec,
    );

    ConfigArtifact {
        version: config.version,
        source_id: config.source_id.clone(),
        source_digest: config.source_digest.clone(),
        resources,
    }
}

/// Write the artifact for downstream provisioning consumers (atomic).
pub async fn write_artifact(path: &Path, config: &Configuration) -> Result<()> {
    let artifact = artifact_from_config(config);
    write_json_atomic(path, &artifact).await?;
    log::debug!("Wrote configuration artifact v{} to {}", artifact.version, path.display());
    Ok(())
}

/// Kubernetes Deployment manifest carrying the configuration's resource
/// limits. Emitted as JSON; `kubectl apply` accepts JSON manifests directly.
#[must_use]
pub fn render_kubernetes(config: &Configuration, app_name: &str) -> serde_json::Value {
    let memory_mi = config.memory_bytes.div_ceil(1024 * 1024).max(1);
    let memory = format!("{memory_mi}Mi");
    let cpu = format!("{}m", config.cpu_millis.max(1));
    let bandwidth = config.bandwidth_bytes_per_sec.to_string();

    serde_json::json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {
            "name": format!("{app_name}-deployment"),
            "labels": { "app": app_name },
        },
        "spec": {
            "replicas": 1,
            "selector": { "matchLabels": { "app": app_name } },
            "template": {
                "metadata": { "labels": { "app": app_name } },
                "spec": {
                    "containers": [
                        {
                            "name": app_name,
                            "image": format!("{app_name}:latest"),
                            "resources": {
                                "limits": { "memory": memory, "cpu": cpu },
                                "requests": { "memory": memory, "cpu": cpu },
                            },
                            "env": [
                                {
                                    "name": "NETWORK_BANDWIDTH_BYTES_PER_SEC",
                                    "value": bandwidth,
                                }
                            ],
                        }
                    ],
                },
            },
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EstimateOrigin, ResourceOverrides, CONFIG_SCHEMA_VERSION};
    use pretty_assertions::assert_eq;
    use rightsizer_fingerprint::Fingerprint;

    fn config() -> Configuration {
        Configuration {
            schema_version: CONFIG_SCHEMA_VERSION,
            version: 3,
            source_id: "billing".to_string(),
            source_digest: "abc123".to_string(),
            fingerprint: Fingerprint::Content {
                digest: "abc123".to_string(),
                file_count: 4,
                total_bytes: 2048,
            },
            memory_bytes: 512 * 1024 * 1024,
            cpu_millis: 2000,
            bandwidth_bytes_per_sec: 12_500_000,
            overrides: ResourceOverrides::default(),
            derived_from: EstimateOrigin::Llm,
            estimate_confidence: Some(0.8),
            committed_at_unix_ms: 0,
        }
    }

    #[test]
    fn artifact_maps_all_three_dimensions() {
        let artifact = artifact_from_config(&config());
        assert_eq!(artifact.version, 3);
        assert_eq!(artifact.source_digest, "abc123");
        assert_eq!(
            artifact.resources.get("memory_bytes"),
            Some(&(512 * 1024 * 1024))
        );
        assert_eq!(artifact.resources.get("cpu_millis"), Some(&2000));
        assert_eq!(
            artifact.resources.get("bandwidth_bytes_per_sec"),
            Some(&12_500_000)
        );
    }

    #[test]
    fn kubernetes_rendering_uses_mi_and_millicores() {
        let manifest = render_kubernetes(&config(), "billing");
        let limits = &manifest["spec"]["template"]["spec"]["containers"][0]["resources"]["limits"];
        assert_eq!(limits["memory"], "512Mi");
        assert_eq!(limits["cpu"], "2000m");
        let requests =
            &manifest["spec"]["template"]["spec"]["containers"][0]["resources"]["requests"];
        assert_eq!(limits, requests);
    }
}
