//! Common types for apigate: the APIRule CRD, child resource types, errors,
//! and Kubernetes utilities

#![deny(missing_docs)]

pub mod crd;
pub mod crd_registry;
pub mod error;
pub mod kube_utils;
pub mod policy;
pub mod telemetry;

pub use crd_registry::{CrdKind, CrdRegistry};
pub use error::{Error, ReconcileError};
pub use kube_utils::deterministic_hash;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Label binding every child object to exactly one APIRule (`<name>.<namespace>`)
pub const OWNER_LABEL: &str = "apirule.gateway.kyma-project.io/v1beta1";

/// Content hash label on AuthorizationPolicies
pub const HASH_LABEL: &str = "gateway.kyma-project.io/hash";

/// Position-in-sequence label on AuthorizationPolicies
pub const INDEX_LABEL: &str = "gateway.kyma-project.io/index";

/// Annotation set once a v2alpha1-authored APIRule may route straight to its backend
pub const MIGRATION_ANNOTATION: &str = "gateway.kyma-project.io/migration";

/// Value of [`MIGRATION_ANNOTATION`] that counts as the marker
pub const MIGRATION_MARKER_VALUE: &str = "v2alpha1";

/// Annotation recording the schema version an APIRule was authored in
pub const ORIGINAL_VERSION_ANNOTATION: &str = "gateway.kyma-project.io/original-version";

/// Finalizer guarding child cleanup on APIRule deletion
pub const SUBRESOURCES_FINALIZER: &str = "gateway.kyma-project.io/subresources";

/// Owner label value for an APIRule
pub fn owner_label_value(name: &str, namespace: &str) -> String {
    format!("{name}.{namespace}")
}

/// Label selector matching every child of an APIRule
pub fn owner_selector(name: &str, namespace: &str) -> String {
    format!("{OWNER_LABEL}={}", owner_label_value(name, namespace))
}
