//! Ory Oathkeeper access rule types
//!
//! Legacy auth-proxy rules. Each secured APIRule rule maps to one
//! `rules.oathkeeper.ory.sh` object that the Oathkeeper maester turns into
//! proxy configuration.

use serde::{Deserialize, Serialize};

use crate::crd::Handler;
use crate::kube_utils::{HasApiResource, ObjectMeta};

/// Oathkeeper access rule
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccessRule {
    /// API version
    #[serde(default = "AccessRule::api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "AccessRule::kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    #[serde(default)]
    pub spec: AccessRuleSpec,
}

impl HasApiResource for AccessRule {
    const API_VERSION: &'static str = "oathkeeper.ory.sh/v1alpha1";
    const KIND: &'static str = "Rule";
}

impl AccessRule {
    fn api_version() -> String {
        <Self as HasApiResource>::API_VERSION.to_string()
    }
    fn kind() -> String {
        <Self as HasApiResource>::KIND.to_string()
    }

    /// Create a new access rule
    pub fn new(metadata: ObjectMeta, spec: AccessRuleSpec) -> Self {
        Self {
            api_version: Self::api_version(),
            kind: Self::kind(),
            metadata,
            spec,
        }
    }
}

/// Access rule spec
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct AccessRuleSpec {
    /// Where matched requests are forwarded
    pub upstream: Upstream,
    /// Which requests the rule applies to
    #[serde(rename = "match")]
    pub matcher: Match,
    /// Authenticators, tried in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authenticators: Vec<Handler>,
    /// Authorizer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorizer: Option<Handler>,
    /// Mutators
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mutators: Vec<Handler>,
}

/// Upstream
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Upstream {
    /// Upstream URL
    pub url: String,
    /// Path prefix to strip
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strip_path: Option<String>,
    /// Preserve the original Host header
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preserve_host: Option<bool>,
}

/// Request matcher
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Match {
    /// URL pattern, e.g. `<http|https>://host</path>`
    pub url: String,
    /// HTTP methods
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn access_rule_wire_format() {
        let rule = AccessRule::new(
            ObjectMeta::generated("httpbin-", "default"),
            AccessRuleSpec {
                upstream: Upstream {
                    url: "http://httpbin.default.svc.cluster.local:8000".to_string(),
                    ..Default::default()
                },
                matcher: Match {
                    url: "<http|https>://httpbin.example.com</headers>".to_string(),
                    methods: vec!["GET".to_string()],
                },
                authenticators: vec![Handler::named("oauth2_introspection")],
                authorizer: Some(Handler::named("allow")),
                mutators: vec![],
            },
        );
        let json = serde_json::to_value(&rule).expect("serializable");
        assert_eq!(json["apiVersion"], "oathkeeper.ory.sh/v1alpha1");
        assert_eq!(json["kind"], "Rule");
        assert_eq!(json["spec"]["match"]["methods"][0], "GET");
        assert_eq!(json["spec"]["authorizer"]["handler"], "allow");
        assert!(json["spec"].get("mutators").is_none());
    }
}
