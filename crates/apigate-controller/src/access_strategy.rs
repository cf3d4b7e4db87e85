//! Access strategies decoded from APIRule handlers
//!
//! Handler configs are opaque JSON on the APIRule. They are decoded into a
//! tagged union on demand; unknown handlers pass through as [`AccessStrategy::Opaque`].

use apigate_common::crd::{Handler, JwtConfig, OryJwtConfig, Rule};
use apigate_common::Error;

/// `no_auth` handler
pub const NO_AUTH: &str = "no_auth";
/// `allow` handler
pub const ALLOW: &str = "allow";
/// `noop` handler
pub const NOOP: &str = "noop";
/// `unauthorized` handler
pub const UNAUTHORIZED: &str = "unauthorized";
/// `anonymous` handler
pub const ANONYMOUS: &str = "anonymous";
/// `cookie_session` handler
pub const COOKIE_SESSION: &str = "cookie_session";
/// `oauth2_client_credentials` handler
pub const OAUTH2_CLIENT_CREDENTIALS: &str = "oauth2_client_credentials";
/// `oauth2_introspection` handler
pub const OAUTH2_INTROSPECTION: &str = "oauth2_introspection";
/// `jwt` handler
pub const JWT: &str = "jwt";

/// All handler names the controller understands
pub const KNOWN_HANDLERS: &[&str] = &[
    NO_AUTH,
    ALLOW,
    NOOP,
    UNAUTHORIZED,
    ANONYMOUS,
    COOKIE_SESSION,
    OAUTH2_CLIENT_CREDENTIALS,
    OAUTH2_INTROSPECTION,
    JWT,
];

/// Whether a handler authenticates callers
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Security {
    /// Requires credentials
    Secure,
    /// Lets anonymous callers through
    Unsecure,
}

/// `jwt` handler config in one of its two shapes
#[derive(Clone, Debug, PartialEq)]
pub enum JwtStrategy {
    /// `authentications` + `authorizations`
    Istio(JwtConfig),
    /// `trusted_issuers`, `jwks_urls`, ...
    Ory(OryJwtConfig),
}

/// A decoded access strategy
#[derive(Clone, Debug, PartialEq)]
pub enum AccessStrategy {
    /// Expose without authentication
    NoAuth,
    /// Oathkeeper `allow`
    Allow,
    /// Oathkeeper `noop`
    Noop,
    /// Oathkeeper `unauthorized`
    Unauthorized,
    /// Oathkeeper `anonymous`
    Anonymous,
    /// Oathkeeper `cookie_session`
    CookieSession(Option<serde_json::Value>),
    /// Oathkeeper `oauth2_client_credentials`
    OAuth2ClientCredentials(Option<serde_json::Value>),
    /// Oathkeeper `oauth2_introspection`
    OAuth2Introspection(Option<serde_json::Value>),
    /// JWT validation
    Jwt(JwtStrategy),
    /// Unknown handler, kept as-is
    Opaque {
        /// Handler name
        handler: String,
        /// Raw config
        config: Option<serde_json::Value>,
    },
}

impl AccessStrategy {
    /// Decode a handler. Only `jwt` configs are interpreted, so only they can fail.
    pub fn decode(handler: &Handler) -> Result<Self, Error> {
        let config = handler.config.clone();
        Ok(match handler.handler.as_str() {
            NO_AUTH => Self::NoAuth,
            ALLOW => Self::Allow,
            NOOP => Self::Noop,
            UNAUTHORIZED => Self::Unauthorized,
            ANONYMOUS => Self::Anonymous,
            COOKIE_SESSION => Self::CookieSession(config),
            OAUTH2_CLIENT_CREDENTIALS => Self::OAuth2ClientCredentials(config),
            OAUTH2_INTROSPECTION => Self::OAuth2Introspection(config),
            JWT => Self::Jwt(decode_jwt(config)?),
            other => Self::Opaque {
                handler: other.to_string(),
                config,
            },
        })
    }

    /// Handler name
    pub fn name(&self) -> &str {
        match self {
            Self::NoAuth => NO_AUTH,
            Self::Allow => ALLOW,
            Self::Noop => NOOP,
            Self::Unauthorized => UNAUTHORIZED,
            Self::Anonymous => ANONYMOUS,
            Self::CookieSession(_) => COOKIE_SESSION,
            Self::OAuth2ClientCredentials(_) => OAUTH2_CLIENT_CREDENTIALS,
            Self::OAuth2Introspection(_) => OAUTH2_INTROSPECTION,
            Self::Jwt(_) => JWT,
            Self::Opaque { handler, .. } => handler,
        }
    }

    /// Security class; `None` for unknown handlers
    pub fn security(&self) -> Option<Security> {
        match self {
            Self::CookieSession(_)
            | Self::OAuth2ClientCredentials(_)
            | Self::OAuth2Introspection(_)
            | Self::Jwt(_) => Some(Security::Secure),
            Self::NoAuth | Self::Allow | Self::Noop | Self::Unauthorized | Self::Anonymous => {
                Some(Security::Unsecure)
            }
            Self::Opaque { .. } => None,
        }
    }
}

fn decode_jwt(config: Option<serde_json::Value>) -> Result<JwtStrategy, Error> {
    let Some(config) = config else {
        return Ok(JwtStrategy::Ory(OryJwtConfig::default()));
    };
    let istio: JwtConfig = serde_json::from_value(config.clone())
        .map_err(|e| Error::serialization_for_kind(JWT, e.to_string()))?;
    if !istio.is_empty() {
        return Ok(JwtStrategy::Istio(istio));
    }
    let ory: OryJwtConfig = serde_json::from_value(config)
        .map_err(|e| Error::serialization_for_kind(JWT, e.to_string()))?;
    Ok(JwtStrategy::Ory(ory))
}

// =============================================================================
// Rule-level helpers
// =============================================================================

/// A rule goes through Oathkeeper when it has mutators or any handler
/// other than `allow` and `no_auth`
pub fn is_secured(rule: &Rule) -> bool {
    !rule.mutators.is_empty()
        || rule
            .access_strategies
            .iter()
            .any(|s| s.handler != ALLOW && s.handler != NO_AUTH)
}

/// The rule exposes its path without authentication
pub fn is_no_auth(rule: &Rule) -> bool {
    rule.access_strategies.iter().any(|s| s.handler == NO_AUTH)
}

/// The rule has a `jwt` strategy
pub fn is_jwt_secured(rule: &Rule) -> bool {
    rule.access_strategies.iter().any(|s| s.handler == JWT)
}

/// Strategies Oathkeeper keeps serving under the Istio handler
pub fn oathkeeper_strategies(rule: &Rule) -> Vec<Handler> {
    rule.access_strategies
        .iter()
        .filter(|s| s.handler == NOOP || s.handler == OAUTH2_INTROSPECTION)
        .cloned()
        .collect()
}

/// Istio-shaped JWT config of the first `jwt` strategy, if any
pub fn istio_jwt(rule: &Rule) -> Option<JwtConfig> {
    rule.access_strategies
        .iter()
        .filter(|s| s.handler == JWT)
        .find_map(|s| match AccessStrategy::decode(s) {
            Ok(AccessStrategy::Jwt(JwtStrategy::Istio(config))) => Some(config),
            _ => None,
        })
}
