//! Controller configuration
//!
//! Static settings come from CLI flags. The JWT handler is cluster state: it
//! lives in the `kyma-system/api-gateway-config` ConfigMap and is re-read once
//! per reconcile, so every pass works on one consistent snapshot.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{Api, Client};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use apigate_common::policy::StringMatch;
use apigate_common::Error;

/// Namespace of the gateway ConfigMap
pub const CONFIG_MAP_NAMESPACE: &str = "kyma-system";
/// Name of the gateway ConfigMap
pub const CONFIG_MAP_NAME: &str = "api-gateway-config";
/// Data key holding the YAML document
pub const CONFIG_MAP_KEY: &str = "api-gateway-config";

/// Default requeue period after a successful pass
pub const DEFAULT_RECONCILIATION_PERIOD: Duration = Duration::from_secs(30 * 60);
/// Requeue period after a failed pass
pub const ERROR_RECONCILIATION_PERIOD: Duration = Duration::from_secs(60);
/// Requeue period while a migration is in progress
pub const MIGRATION_RECONCILIATION_PERIOD: Duration = Duration::from_secs(60);

/// Default Oathkeeper proxy service
pub const DEFAULT_OATHKEEPER_SVC: &str = "ory-oathkeeper-proxy.kyma-system.svc.cluster.local";
/// Default Oathkeeper proxy port
pub const DEFAULT_OATHKEEPER_PORT: u32 = 4455;

/// Which component validates JWTs
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JwtHandler {
    /// Ory Oathkeeper
    #[default]
    Ory,
    /// Istio RequestAuthentication + AuthorizationPolicy
    Istio,
}

/// CORS policy applied to routes of APIRules without their own
#[derive(Clone, Debug, PartialEq)]
pub struct CorsDefaults {
    /// Allowed origins
    pub allow_origins: Vec<StringMatch>,
    /// Allowed methods
    pub allow_methods: Vec<String>,
    /// Allowed headers
    pub allow_headers: Vec<String>,
}

impl Default for CorsDefaults {
    fn default() -> Self {
        Self {
            allow_origins: vec![StringMatch::Regex(".*".to_string())],
            allow_methods: ["GET", "POST", "PUT", "DELETE", "PATCH"]
                .map(String::from)
                .to_vec(),
            allow_headers: ["Authorization", "Content-Type", "*"]
                .map(String::from)
                .to_vec(),
        }
    }
}

impl CorsDefaults {
    /// Parse origins in `regex:.*,exact:https://a.b` form.
    ///
    /// Entries without a prefix are treated as regexes.
    pub fn parse_origins(raw: &str) -> Result<Vec<StringMatch>, Error> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|entry| match entry.split_once(':') {
                Some(("regex", v)) => Ok(StringMatch::Regex(v.to_string())),
                Some(("exact", v)) => Ok(StringMatch::Exact(v.to_string())),
                Some(("prefix", v)) => Ok(StringMatch::Prefix(v.to_string())),
                Some((kind, _)) if !kind.contains('/') && !kind.starts_with("http") => Err(
                    Error::validation_for_field(
                        "cors-allow-origins",
                        format!("unknown match type {kind}"),
                    ),
                ),
                _ => Ok(StringMatch::Regex(entry.to_string())),
            })
            .collect()
    }
}

/// Settings for one reconcile pass
#[derive(Clone, Debug, PartialEq)]
pub struct ReconcileConfig {
    /// JWT handler read from the cluster
    pub handler: JwtHandler,
    /// Oathkeeper proxy service host
    pub oathkeeper_svc: String,
    /// Oathkeeper proxy service port
    pub oathkeeper_port: u32,
    /// Default CORS policy
    pub cors: CorsDefaults,
    /// Domain appended to bare hosts
    pub default_domain: Option<String>,
    /// Requeue period after a successful pass
    pub default_period: Duration,
    /// Requeue period after a failed pass
    pub error_period: Duration,
    /// Requeue period while migrating
    pub migration_period: Duration,
    /// Labels added to every generated object
    pub extra_labels: BTreeMap<String, String>,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            handler: JwtHandler::default(),
            oathkeeper_svc: DEFAULT_OATHKEEPER_SVC.to_string(),
            oathkeeper_port: DEFAULT_OATHKEEPER_PORT,
            cors: CorsDefaults::default(),
            default_domain: None,
            default_period: DEFAULT_RECONCILIATION_PERIOD,
            error_period: ERROR_RECONCILIATION_PERIOD,
            migration_period: MIGRATION_RECONCILIATION_PERIOD,
            extra_labels: BTreeMap::new(),
        }
    }
}

impl ReconcileConfig {
    /// Snapshot with the given handler
    pub fn with_handler(&self, handler: JwtHandler) -> Self {
        Self {
            handler,
            ..self.clone()
        }
    }
}

/// Parse `k=v,k2=v2` into labels
pub fn parse_labels(raw: &str) -> Result<BTreeMap<String, String>, Error> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|pair| {
            pair.split_once('=')
                .filter(|(k, _)| !k.is_empty())
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .ok_or_else(|| {
                    Error::validation_for_field(
                        "generated-objects-labels",
                        format!("label {pair} is not in k=v form"),
                    )
                })
        })
        .collect()
}

// =============================================================================
// Cluster config source
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GatewayConfig {
    #[serde(default)]
    jwt_handler: Option<JwtHandler>,
}

/// Parse the YAML document stored in the gateway ConfigMap
pub fn parse_gateway_config(yaml: &str) -> Result<JwtHandler, Error> {
    if yaml.trim().is_empty() {
        return Ok(JwtHandler::default());
    }
    let config: GatewayConfig = serde_yaml::from_str(yaml)
        .map_err(|e| Error::serialization_for_kind("ConfigMap", e.to_string()))?;
    Ok(config.jwt_handler.unwrap_or_default())
}

/// Source of the cluster-wide JWT handler
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Current JWT handler; a missing ConfigMap means the default
    async fn jwt_handler(&self) -> Result<JwtHandler, Error>;
}

/// Reads the handler from the gateway ConfigMap
pub struct ConfigMapSource {
    client: Client,
}

impl ConfigMapSource {
    /// Create a source reading through the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ConfigSource for ConfigMapSource {
    async fn jwt_handler(&self) -> Result<JwtHandler, Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), CONFIG_MAP_NAMESPACE);
        let Some(cm) = api.get_opt(CONFIG_MAP_NAME).await? else {
            debug!(
                namespace = CONFIG_MAP_NAMESPACE,
                name = CONFIG_MAP_NAME,
                "gateway ConfigMap not found, using default handler"
            );
            return Ok(JwtHandler::default());
        };
        let raw = cm
            .data
            .as_ref()
            .and_then(|d| d.get(CONFIG_MAP_KEY))
            .map(String::as_str)
            .unwrap_or_default();
        parse_gateway_config(raw)
    }
}
