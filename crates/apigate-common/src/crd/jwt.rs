//! JWT access strategy configuration shapes
//!
//! The `jwt` handler config comes in two shapes: the Istio shape
//! (`authentications` + `authorizations`) and the legacy Oathkeeper shape
//! (`trusted_issuers`, `jwks_urls`, ...). Both are decoded from the opaque
//! handler config on demand.

use serde::{Deserialize, Serialize};

/// Istio-style JWT config
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JwtConfig {
    /// Accepted token issuers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authentications: Vec<JwtAuthentication>,
    /// Claim requirements; each entry becomes its own AuthorizationPolicy
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authorizations: Vec<JwtAuthorization>,
}

impl JwtConfig {
    /// True when neither authentications nor authorizations are set.
    ///
    /// An empty decode usually means the config is in the Oathkeeper shape.
    pub fn is_empty(&self) -> bool {
        self.authentications.is_empty() && self.authorizations.is_empty()
    }
}

/// A trusted issuer
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JwtAuthentication {
    /// Issuer (`iss` claim)
    pub issuer: String,
    /// JWKS endpoint
    pub jwks_uri: String,
    /// Headers to read the token from
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub from_headers: Vec<JwtHeader>,
    /// Query parameters to read the token from
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub from_params: Vec<String>,
}

/// Header carrying a token
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct JwtHeader {
    /// Header name
    pub name: String,
    /// Value prefix, e.g. `Bearer `
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prefix: String,
}

/// Claim requirements for one authorization
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JwtAuthorization {
    /// Scopes that must all be present
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_scopes: Vec<String>,
    /// Audiences of which the token must carry all
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub audiences: Vec<String>,
}

/// Legacy Oathkeeper JWT authenticator config
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct OryJwtConfig {
    /// Trusted issuers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trusted_issuers: Vec<String>,
    /// JWKS URLs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub jwks_urls: Vec<String>,
    /// Required scopes
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required_scope: Vec<String>,
    /// Target audiences
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub target_audience: Vec<String>,
}

impl OryJwtConfig {
    /// Build the Oathkeeper shape from an Istio-shaped config.
    ///
    /// Used while migrating between handlers so Oathkeeper keeps accepting
    /// the same tokens until the Istio resources take over.
    pub fn from_istio(config: &JwtConfig) -> Self {
        let mut out = Self::default();
        for authn in &config.authentications {
            out.trusted_issuers.push(authn.issuer.clone());
            out.jwks_urls.push(authn.jwks_uri.clone());
        }
        for authz in &config.authorizations {
            out.required_scope.extend(authz.required_scopes.iter().cloned());
            out.target_audience.extend(authz.audiences.iter().cloned());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn istio_config_decodes_camel_case() {
        let config: JwtConfig = serde_json::from_value(serde_json::json!({
            "authentications": [{
                "issuer": "https://issuer.example/",
                "jwksUri": "https://issuer.example/jwks",
                "fromHeaders": [{"name": "x-token", "prefix": "Bearer "}]
            }],
            "authorizations": [{"requiredScopes": ["read"], "audiences": ["app"]}]
        }))
        .expect("valid config");

        assert_eq!(config.authentications[0].jwks_uri, "https://issuer.example/jwks");
        assert_eq!(config.authentications[0].from_headers[0].prefix, "Bearer ");
        assert_eq!(config.authorizations[0].required_scopes, vec!["read"]);
    }

    #[test]
    fn oathkeeper_shape_decodes_as_empty_istio_config() {
        let raw = serde_json::json!({
            "trusted_issuers": ["https://issuer.example/"],
            "jwks_urls": ["https://issuer.example/jwks"]
        });
        let istio: JwtConfig = serde_json::from_value(raw.clone()).expect("lenient decode");
        assert!(istio.is_empty());

        let ory: OryJwtConfig = serde_json::from_value(raw).expect("valid config");
        assert_eq!(ory.jwks_urls.len(), 1);
    }

    #[test]
    fn istio_config_converts_to_oathkeeper_shape() {
        let config = JwtConfig {
            authentications: vec![JwtAuthentication {
                issuer: "https://a/".to_string(),
                jwks_uri: "https://a/jwks".to_string(),
                ..Default::default()
            }],
            authorizations: vec![JwtAuthorization {
                required_scopes: vec!["read".to_string()],
                audiences: vec!["app".to_string()],
            }],
        };
        let ory = OryJwtConfig::from_istio(&config);
        assert_eq!(ory.trusted_issuers, vec!["https://a/"]);
        assert_eq!(ory.jwks_urls, vec!["https://a/jwks"]);
        assert_eq!(ory.required_scope, vec!["read"]);
        assert_eq!(ory.target_audience, vec!["app"]);
    }
}
