//! Shared Kubernetes utilities using kube-rs
//!
//! Metadata for generated child resources, `ApiResource` construction for
//! third-party CRDs, and a deterministic content hash.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::discovery::ApiResource;
use tracing::{info, warn};

// =============================================================================
// ObjectMeta - metadata for generated child resources
// =============================================================================

/// Kubernetes metadata for generated child resources.
///
/// Desired objects never carry a name: they use `generateName` and are paired
/// with cluster objects by identity key. Objects read back from the cluster
/// carry `name` and `resourceVersion`, which updates must preserve.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Resource name (empty for desired objects)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    /// Name prefix used by the API server to generate a name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub generate_name: String,
    /// Resource namespace
    #[serde(default)]
    pub namespace: String,
    /// Labels
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Annotations
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Owner references
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
    /// Optimistic concurrency token, owned by the API server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<String>,
}

impl ObjectMeta {
    /// Metadata for a desired object whose name the API server generates
    pub fn generated(prefix: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            generate_name: prefix.into(),
            namespace: namespace.into(),
            ..Default::default()
        }
    }

    /// Add a label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Add several labels
    pub fn with_labels<'a>(mut self, labels: impl IntoIterator<Item = (&'a String, &'a String)>) -> Self {
        for (k, v) in labels {
            self.labels.insert(k.clone(), v.clone());
        }
        self
    }

    /// Add an annotation
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Add an owner reference
    pub fn with_owner(mut self, owner: Option<OwnerReference>) -> Self {
        self.owner_references.extend(owner);
        self
    }

    /// Display name for logs: the real name, or the generate-name prefix
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.generate_name
        } else {
            &self.name
        }
    }
}

// =============================================================================
// HasApiResource Trait
// =============================================================================

/// Trait for types that have a known API group, version, and kind.
///
/// The compile-time version is a fallback; the `CrdRegistry` supplies the
/// version the server actually serves.
pub trait HasApiResource {
    /// Full API version (e.g., "security.istio.io/v1beta1")
    const API_VERSION: &'static str;
    /// Resource kind (e.g., "AuthorizationPolicy")
    const KIND: &'static str;

    /// Build an ApiResource from the type's constants.
    fn api_resource() -> ApiResource {
        build_api_resource(Self::API_VERSION, Self::KIND)
    }
}

/// Build an ApiResource from a known apiVersion and kind.
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Look up a resource in pre-computed API discovery results.
///
/// Returns `None` if the CRD is not installed (not an error).
pub fn find_discovered_resource(
    discovery: &kube::discovery::Discovery,
    group: &str,
    kind: &str,
) -> Option<ApiResource> {
    for api_group in discovery.groups() {
        if api_group.name() != group {
            continue;
        }
        for (ar, _caps) in api_group.resources_by_stability() {
            if ar.kind == kind {
                info!(
                    group = %group,
                    kind = %kind,
                    api_version = %ar.api_version,
                    "discovered CRD version"
                );
                return Some(ar);
            }
        }
    }
    warn!(group = %group, kind = %kind, "CRD not found in API discovery");
    None
}

/// Split an apiVersion into (group, version). Core types have an empty group.
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Pluralize a Kubernetes resource kind
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();
    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

/// Compute a deterministic hash of the input string, returning a 16-char hex digest.
///
/// Uses truncated SHA-256 for stability across Rust toolchain versions.
/// `DefaultHasher` is NOT guaranteed stable across Rust releases, so this
/// function should be used whenever the hash is persisted (e.g., labels).
pub fn deterministic_hash(input: &str) -> String {
    use aws_lc_rs::digest;
    let hash = digest::digest(&digest::SHA256, input.as_bytes());
    hash.as_ref()[..8]
        .iter()
        .fold(String::with_capacity(16), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        })
}
