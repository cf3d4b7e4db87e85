//! APIRule v2alpha1 spec snapshot
//!
//! The newer APIRule shape: several hosts, and rules that state `noAuth` or
//! `jwt` directly instead of listing access strategies. Only the snapshot
//! types live here; conversion to and from v1beta1 lives in the controller.

use serde::{Deserialize, Serialize};

use super::apirule::{CorsPolicy, Handler, Service};
use super::jwt::JwtConfig;

/// v2alpha1 APIRule spec
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct APIRuleSpecV2Alpha1 {
    /// Exposed hosts
    #[serde(default)]
    pub hosts: Vec<String>,
    /// Backend service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<Service>,
    /// Gateway reference
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    /// CORS policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cors_policy: Option<CorsPolicy>,
    /// Rules
    #[serde(default)]
    pub rules: Vec<RuleV2Alpha1>,
    /// Timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u16>,
}

/// v2alpha1 rule
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuleV2Alpha1 {
    /// Path
    pub path: String,
    /// Rule-level backend override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<Service>,
    /// Allowed HTTP methods
    #[serde(default)]
    pub methods: Vec<String>,
    /// Expose without authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_auth: Option<bool>,
    /// JWT requirements
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt: Option<JwtConfig>,
    /// Mutators
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mutators: Vec<Handler>,
    /// Timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u16>,
}

/// v2alpha1 overall state
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub enum State {
    /// Reconciled successfully
    Ready,
    /// Not yet reconciled
    #[default]
    Processing,
    /// Reconcile failed
    Error,
    /// Reconcile finished with warnings
    Warning,
}

/// v2alpha1 status
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct APIRuleStatusV2Alpha1 {
    /// Overall state
    pub state: State,
    /// Description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// When the APIRule was last processed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_processed_time: Option<String>,
}
