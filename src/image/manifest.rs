//! Manifest summaries and the layer comparison behind the skip decision

use serde::{Deserialize, Serialize};

pub const DOCKER_MANIFEST_V2: &str = "application/vnd.docker.distribution.manifest.v2+json";
pub const DOCKER_MANIFEST_LIST_V2: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
pub const OCI_MANIFEST_V1: &str = "application/vnd.oci.image.manifest.v1+json";
pub const OCI_INDEX_V1: &str = "application/vnd.oci.image.index.v1+json";

/// Accept header sent when fetching manifests
pub const MANIFEST_ACCEPT: &str = "application/vnd.docker.distribution.manifest.v2+json, \
application/vnd.docker.distribution.manifest.list.v2+json, \
application/vnd.oci.image.manifest.v1+json, \
application/vnd.oci.image.index.v1+json";

/// Content descriptor: media type, size and digest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    #[serde(default)]
    pub media_type: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub digest: String,
}

/// Single-image manifest as stored in `manifest.json` or served by a registry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestSummary {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub media_type: String,
    #[serde(default)]
    pub config: Descriptor,
    #[serde(default)]
    pub layers: Vec<Descriptor>,
}

impl ManifestSummary {
    pub fn from_slice(data: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(data)
    }

    pub fn layer_digests(&self) -> Vec<String> {
        self.layers.iter().map(|l| l.digest.clone()).collect()
    }

    /// Every blob the image needs, config first
    pub fn blobs(&self) -> Vec<&Descriptor> {
        let mut blobs = Vec::with_capacity(self.layers.len() + 1);
        if !self.config.digest.is_empty() {
            blobs.push(&self.config);
        }
        blobs.extend(self.layers.iter());
        blobs
    }

    /// Media type to send with the manifest, falling back to Docker v2
    pub fn content_type(&self) -> &str {
        if self.media_type.is_empty() {
            DOCKER_MANIFEST_V2
        } else {
            &self.media_type
        }
    }
}

/// Platform of one entry in a manifest list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Platform {
    pub fn new(architecture: impl Into<String>, os: impl Into<String>) -> Self {
        Self {
            architecture: architecture.into(),
            os: os.into(),
            variant: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    #[serde(default)]
    pub media_type: String,
    #[serde(default)]
    pub size: u64,
    pub digest: String,
    #[serde(default)]
    pub platform: Option<Platform>,
}

/// Docker manifest list or OCI image index
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestIndex {
    #[serde(default)]
    pub schema_version: u32,
    #[serde(default)]
    pub media_type: String,
    #[serde(default)]
    pub manifests: Vec<IndexEntry>,
}

impl ManifestIndex {
    /// Pick the entry matching `platform`
    pub fn select(&self, platform: &Platform) -> Option<&IndexEntry> {
        self.manifests.iter().find(|entry| {
            entry.platform.as_ref().is_some_and(|p| {
                p.architecture == platform.architecture
                    && p.os == platform.os
                    && (platform.variant.is_none() || p.variant == platform.variant)
            })
        })
    }
}

/// Whether a media type (or an untyped body) denotes a manifest list
pub fn is_index(media_type: &str, body: &[u8]) -> bool {
    match media_type {
        DOCKER_MANIFEST_LIST_V2 | OCI_INDEX_V1 => true,
        DOCKER_MANIFEST_V2 | OCI_MANIFEST_V1 => false,
        _ => serde_json::from_slice::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v.get("manifests").map(|m| m.is_array()))
            .unwrap_or(false),
    }
}

/// Subset of the image configuration blob
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ImageConfig {
    #[serde(default)]
    pub architecture: String,
    #[serde(default)]
    pub os: String,
}

/// Inspection metadata of a source image
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageInspectInfo {
    pub architecture: String,
    pub os: String,
    /// Layer digests in manifest order
    pub layers: Vec<String>,
    pub digest: Option<String>,
}

/// True when the destination already holds the source's layers.
///
/// Requires equal layer counts and every source digest to be present among
/// the destination digests. Order is ignored and duplicates are not counted
/// separately.
pub fn layers_unchanged(source_layers: &[String], destination: &ManifestSummary) -> bool {
    if source_layers.len() != destination.layers.len() {
        return false;
    }
    source_layers
        .iter()
        .all(|digest| destination.layers.iter().any(|layer| &layer.digest == digest))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest_with(digests: &[&str]) -> ManifestSummary {
        ManifestSummary {
            schema_version: 2,
            media_type: DOCKER_MANIFEST_V2.to_string(),
            config: Descriptor {
                media_type: "application/vnd.docker.container.image.v1+json".to_string(),
                size: 1469,
                digest: "sha256:cfg".to_string(),
            },
            layers: digests
                .iter()
                .map(|d| Descriptor {
                    media_type: "application/vnd.docker.image.rootfs.diff.tar.gzip".to_string(),
                    size: 100,
                    digest: d.to_string(),
                })
                .collect(),
        }
    }

    fn digests(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn test_reordered_layers_are_unchanged() {
        let destination = manifest_with(&["A", "B", "C"]);
        assert!(layers_unchanged(&digests(&["B", "A", "C"]), &destination));
    }

    #[test]
    fn test_missing_layer_is_changed() {
        let destination = manifest_with(&["A", "B", "C"]);
        assert!(!layers_unchanged(&digests(&["A", "B", "D"]), &destination));
    }

    #[test]
    fn test_layer_count_mismatch_is_changed() {
        let destination = manifest_with(&["A", "B", "C"]);
        assert!(!layers_unchanged(&digests(&["A", "B"]), &destination));
        assert!(!layers_unchanged(&digests(&["A", "B", "C", "D"]), &destination));
    }

    #[test]
    fn test_duplicates_use_membership_only() {
        let destination = manifest_with(&["A", "B", "C"]);
        assert!(layers_unchanged(&digests(&["A", "A", "B"]), &destination));
    }

    #[test]
    fn test_parse_manifest_json() {
        let json = br#"{
            "schemaVersion": 2,
            "mediaType": "application/vnd.docker.distribution.manifest.v2+json",
            "config": {"mediaType": "application/vnd.docker.container.image.v1+json", "size": 7023, "digest": "sha256:b5b2"},
            "layers": [
                {"mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip", "size": 32654, "digest": "sha256:e692"},
                {"mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip", "size": 16724, "digest": "sha256:3c3a"}
            ]
        }"#;
        let manifest = ManifestSummary::from_slice(json).unwrap();
        assert_eq!(manifest.schema_version, 2);
        assert_eq!(manifest.config.size, 7023);
        assert_eq!(manifest.layer_digests(), digests(&["sha256:e692", "sha256:3c3a"]));
        assert_eq!(manifest.blobs().len(), 3);
    }

    #[test]
    fn test_index_selection() {
        let json = br#"{
            "schemaVersion": 2,
            "mediaType": "application/vnd.oci.image.index.v1+json",
            "manifests": [
                {"mediaType": "application/vnd.oci.image.manifest.v1+json", "size": 1, "digest": "sha256:amd", "platform": {"architecture": "amd64", "os": "linux"}},
                {"mediaType": "application/vnd.oci.image.manifest.v1+json", "size": 1, "digest": "sha256:arm", "platform": {"architecture": "arm64", "os": "linux", "variant": "v8"}}
            ]
        }"#;
        assert!(is_index("", json));
        let index: ManifestIndex = serde_json::from_slice(json).unwrap();
        assert_eq!(index.select(&Platform::new("arm64", "linux")).unwrap().digest, "sha256:arm");
        assert_eq!(index.select(&Platform::new("amd64", "linux")).unwrap().digest, "sha256:amd");
        assert!(index.select(&Platform::new("s390x", "linux")).is_none());
    }
}
