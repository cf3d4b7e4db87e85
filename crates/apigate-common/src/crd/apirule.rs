//! APIRule CRD (gateway.kyma-project.io/v1beta1)
//!
//! An APIRule exposes a backend service on a gateway host. Each rule binds a
//! path and a set of HTTP methods to an ordered list of access strategies.
//! The controller derives VirtualServices, Oathkeeper Rules,
//! AuthorizationPolicies and RequestAuthentications from it.

use std::fmt;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// CRD
// =============================================================================

/// Spec for an APIRule
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "gateway.kyma-project.io",
    version = "v1beta1",
    kind = "APIRule",
    plural = "apirules",
    namespaced,
    status = "APIRuleStatus",
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.APIRuleStatus.code"}"#,
    printcolumn = r#"{"name":"Host","type":"string","jsonPath":".spec.host"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct APIRuleSpec {
    /// Exposed host. A bare subdomain is completed with the default domain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Backend service for all rules without their own service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<Service>,

    /// Gateway reference in `namespace/name` form
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,

    /// CORS policy applied to every route. Falls back to controller defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cors_policy: Option<CorsPolicy>,

    /// Ordered rules
    #[serde(default)]
    pub rules: Vec<Rule>,

    /// Timeout in seconds for all rules without their own timeout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u16>,
}

/// Backend service reference
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    /// Service name
    pub name: String,
    /// Service namespace; defaults to the APIRule namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Service port
    pub port: u32,
    /// Whether the service lives outside the cluster
    #[serde(default, rename = "external", skip_serializing_if = "Option::is_none")]
    pub is_external: Option<bool>,
}

/// A single exposure rule
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    /// Path regex, or `/*` for everything
    pub path: String,

    /// Rule-level backend override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<Service>,

    /// Allowed HTTP methods
    #[serde(default)]
    pub methods: Vec<String>,

    /// Ordered access strategies (authenticators)
    #[serde(default)]
    pub access_strategies: Vec<Handler>,

    /// Ordered mutators
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mutators: Vec<Handler>,

    /// Timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u16>,
}

/// A named handler with an opaque, handler-specific config blob.
///
/// Used for both access strategies and mutators.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Handler {
    /// Handler name (e.g. `jwt`, `no_auth`, `oauth2_introspection`)
    pub handler: String,
    /// Handler config, decoded on demand
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub config: Option<serde_json::Value>,
}

impl Handler {
    /// Create a handler without config
    pub fn named(handler: impl Into<String>) -> Self {
        Self {
            handler: handler.into(),
            config: None,
        }
    }

    /// Create a handler with config
    pub fn with_config(handler: impl Into<String>, config: serde_json::Value) -> Self {
        Self {
            handler: handler.into(),
            config: Some(config),
        }
    }
}

/// CORS policy
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CorsPolicy {
    /// Allowed headers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_headers: Vec<String>,
    /// Allowed methods
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_methods: Vec<String>,
    /// Allowed origins as Istio string matches (`exact`, `prefix`, `regex`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_origins: Vec<std::collections::BTreeMap<String, String>>,
    /// Whether credentials are allowed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_credentials: Option<bool>,
    /// Exposed headers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expose_headers: Vec<String>,
    /// Max age in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<u64>,
}

fn preserve_unknown_fields(_: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
    use schemars::schema::{InstanceType, Schema, SchemaObject};

    let mut schema = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    schema.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".to_string(),
        serde_json::Value::Bool(true),
    );
    Schema::Object(schema)
}

// =============================================================================
// Status
// =============================================================================

/// Status code of the APIRule or one of its child kinds
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum StatusCode {
    /// Everything applied
    #[default]
    #[serde(rename = "OK")]
    Ok,
    /// Not processed because of an earlier failure
    #[serde(rename = "SKIPPED")]
    Skipped,
    /// Processing failed
    #[serde(rename = "ERROR")]
    Error,
    /// Processing was not possible but may become possible without user action
    #[serde(rename = "WARNING")]
    Warning,
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::Skipped => write!(f, "SKIPPED"),
            Self::Error => write!(f, "ERROR"),
            Self::Warning => write!(f, "WARNING"),
        }
    }
}

/// Code and description for one resource
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct ResourceStatus {
    /// Status code
    pub code: StatusCode,
    /// Human-readable description
    #[serde(default, rename = "desc", skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl ResourceStatus {
    /// Create a status with the given code and description
    pub fn new(code: StatusCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }

    /// Create a status with the given code and no description
    pub fn code(code: StatusCode) -> Self {
        Self::new(code, "")
    }
}

/// Status for an APIRule
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct APIRuleStatus {
    /// When the APIRule was last processed (RFC 3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_processed_time: Option<String>,

    /// Generation observed by the last reconcile
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Overall status
    #[serde(
        default,
        rename = "APIRuleStatus",
        skip_serializing_if = "Option::is_none"
    )]
    pub api_rule_status: Option<ResourceStatus>,

    /// VirtualService status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub virtual_service_status: Option<ResourceStatus>,

    /// Oathkeeper Rule status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_rule_status: Option<ResourceStatus>,

    /// RequestAuthentication status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_authentication_status: Option<ResourceStatus>,

    /// AuthorizationPolicy status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_policy_status: Option<ResourceStatus>,
}

// =============================================================================
// Helpers
// =============================================================================

impl APIRuleSpec {
    /// Whether two or more rules share a path.
    ///
    /// Oathkeeper Rule identity includes the methods when this is true.
    pub fn has_path_duplicates(&self) -> bool {
        let mut seen = std::collections::BTreeSet::new();
        self.rules.iter().any(|r| !seen.insert(r.path.as_str()))
    }
}

impl Rule {
    /// Effective backend for this rule: the rule override or the spec service
    pub fn effective_service<'a>(&'a self, spec: &'a APIRuleSpec) -> Option<&'a Service> {
        self.service.as_ref().or(spec.service.as_ref())
    }
}
