//! Istio security policy types
//!
//! Types for generating Istio security resources:
//! - AuthorizationPolicy: which request principals may call which paths
//! - RequestAuthentication: which issuers and JWKS endpoints validate tokens

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::crd::JwtHeader;
use crate::kube_utils::{HasApiResource, ObjectMeta};

/// Istio AuthorizationPolicy
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationPolicy {
    /// API version
    #[serde(default = "AuthorizationPolicy::api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "AuthorizationPolicy::kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    #[serde(default)]
    pub spec: AuthorizationPolicySpec,
}

impl HasApiResource for AuthorizationPolicy {
    const API_VERSION: &'static str = "security.istio.io/v1beta1";
    const KIND: &'static str = "AuthorizationPolicy";
}

impl AuthorizationPolicy {
    fn api_version() -> String {
        <Self as HasApiResource>::API_VERSION.to_string()
    }
    fn kind() -> String {
        <Self as HasApiResource>::KIND.to_string()
    }

    /// Create a new AuthorizationPolicy
    pub fn new(metadata: ObjectMeta, spec: AuthorizationPolicySpec) -> Self {
        Self {
            api_version: Self::api_version(),
            kind: Self::kind(),
            metadata,
            spec,
        }
    }
}

/// AuthorizationPolicy spec
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationPolicySpec {
    /// Selector for workloads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<WorkloadSelector>,

    /// Action: ALLOW, DENY, AUDIT, CUSTOM (empty = ALLOW)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub action: String,

    /// Rules defining who can access
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<AuthorizationRule>,
}

/// Workload selector
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadSelector {
    /// Match labels
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

impl WorkloadSelector {
    /// Stable textual form, e.g. `app=httpbin,version=v1`
    pub fn key(&self) -> String {
        self.match_labels
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Authorization rule
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct AuthorizationRule {
    /// Source conditions (who is calling)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub from: Vec<AuthorizationSource>,
    /// Destination conditions (what operation)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to: Vec<AuthorizationOperation>,
    /// Additional conditions on request attributes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub when: Vec<AuthorizationCondition>,
}

/// Authorization source (caller identity)
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct AuthorizationSource {
    /// Source specification
    pub source: SourceSpec,
}

/// Source specification
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SourceSpec {
    /// SPIFFE principals
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub principals: Vec<String>,
    /// JWT request principals (`<issuer>/<subject>`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub request_principals: Vec<String>,
}

/// Authorization operation (what's being accessed)
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct AuthorizationOperation {
    /// Operation specification
    pub operation: OperationSpec,
}

/// Operation specification
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct OperationSpec {
    /// Allowed HTTP methods
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,
    /// Allowed paths
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<String>,
}

/// Condition on a request attribute
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct AuthorizationCondition {
    /// Attribute key, e.g. `request.auth.claims[scp]`
    pub key: String,
    /// Accepted values
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

/// Istio RequestAuthentication
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequestAuthentication {
    /// API version
    #[serde(default = "RequestAuthentication::api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "RequestAuthentication::kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    #[serde(default)]
    pub spec: RequestAuthenticationSpec,
}

impl HasApiResource for RequestAuthentication {
    const API_VERSION: &'static str = "security.istio.io/v1beta1";
    const KIND: &'static str = "RequestAuthentication";
}

impl RequestAuthentication {
    fn api_version() -> String {
        <Self as HasApiResource>::API_VERSION.to_string()
    }
    fn kind() -> String {
        <Self as HasApiResource>::KIND.to_string()
    }

    /// Create a new RequestAuthentication
    pub fn new(metadata: ObjectMeta, spec: RequestAuthenticationSpec) -> Self {
        Self {
            api_version: Self::api_version(),
            kind: Self::kind(),
            metadata,
            spec,
        }
    }
}

/// RequestAuthentication spec
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequestAuthenticationSpec {
    /// Selector for workloads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<WorkloadSelector>,
    /// Accepted token issuers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub jwt_rules: Vec<JwtRule>,
}

/// One accepted issuer
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JwtRule {
    /// Issuer
    pub issuer: String,
    /// JWKS endpoint
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub jwks_uri: String,
    /// Headers carrying the token
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub from_headers: Vec<JwtHeader>,
    /// Query parameters carrying the token
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub from_params: Vec<String>,
    /// Forward the token to the backend
    #[serde(default)]
    pub forward_original_token: bool,
}
