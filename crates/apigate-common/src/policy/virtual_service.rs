//! Istio VirtualService types

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::kube_utils::{HasApiResource, ObjectMeta};

/// Istio VirtualService routing one APIRule host through a gateway
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualService {
    /// API version
    #[serde(default = "VirtualService::api_version")]
    pub api_version: String,
    /// Kind
    #[serde(default = "VirtualService::kind")]
    pub kind: String,
    /// Metadata
    pub metadata: ObjectMeta,
    /// Spec
    #[serde(default)]
    pub spec: VirtualServiceSpec,
}

impl HasApiResource for VirtualService {
    const API_VERSION: &'static str = "networking.istio.io/v1beta1";
    const KIND: &'static str = "VirtualService";
}

impl VirtualService {
    fn api_version() -> String {
        <Self as HasApiResource>::API_VERSION.to_string()
    }
    fn kind() -> String {
        <Self as HasApiResource>::KIND.to_string()
    }

    /// Create a new VirtualService
    pub fn new(metadata: ObjectMeta, spec: VirtualServiceSpec) -> Self {
        Self {
            api_version: Self::api_version(),
            kind: Self::kind(),
            metadata,
            spec,
        }
    }
}

/// VirtualService spec
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct VirtualServiceSpec {
    /// Hosts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hosts: Vec<String>,
    /// Gateways
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gateways: Vec<String>,
    /// HTTP routes, evaluated in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub http: Vec<HttpRoute>,
}

/// A single HTTP route
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HttpRoute {
    /// Match conditions (any of)
    #[serde(default, rename = "match", skip_serializing_if = "Vec::is_empty")]
    pub matches: Vec<HttpMatchRequest>,
    /// Destinations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub route: Vec<HttpRouteDestination>,
    /// CORS policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cors_policy: Option<CorsPolicy>,
    /// Header manipulation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Headers>,
    /// Request timeout, e.g. `180s`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

/// Match condition on a request
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct HttpMatchRequest {
    /// URI match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<StringMatch>,
    /// Method match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<StringMatch>,
}

/// Istio string match
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StringMatch {
    /// Exact match
    Exact(String),
    /// Prefix match
    Prefix(String),
    /// RE2 regex match
    Regex(String),
}

/// A routed destination
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct HttpRouteDestination {
    /// Destination
    pub destination: Destination,
    /// Weight
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<i32>,
}

/// Destination service
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Destination {
    /// Host (FQDN)
    pub host: String,
    /// Port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<PortSelector>,
}

/// Port selector
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PortSelector {
    /// Port number
    pub number: u32,
}

/// VirtualService CORS policy
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CorsPolicy {
    /// Allowed origins
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_origins: Vec<StringMatch>,
    /// Allowed methods
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_methods: Vec<String>,
    /// Allowed headers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_headers: Vec<String>,
    /// Exposed headers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub expose_headers: Vec<String>,
    /// Whether credentials are allowed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_credentials: Option<bool>,
    /// Max age, e.g. `300s`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<String>,
}

/// Header operations
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Headers {
    /// Operations on the request headers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<HeaderOperations>,
}

/// Header set/remove operations
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct HeaderOperations {
    /// Headers to overwrite
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub set: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_match_is_externally_tagged() {
        let json = serde_json::to_value(StringMatch::Prefix("/".to_string())).expect("serializable");
        assert_eq!(json, serde_json::json!({"prefix": "/"}));
    }

    #[test]
    fn route_match_serializes_as_match() {
        let route = HttpRoute {
            matches: vec![HttpMatchRequest {
                uri: Some(StringMatch::Regex("/headers".to_string())),
                method: None,
            }],
            timeout: Some("180s".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(&route).expect("serializable");
        assert_eq!(json["match"][0]["uri"]["regex"], "/headers");
        assert_eq!(json["timeout"], "180s");
        assert!(json.get("corsPolicy").is_none());
    }
}
