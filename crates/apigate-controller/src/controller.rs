//! APIRule controller
//!
//! Glue between the kube-rs runtime and the [`Orchestrator`]: reads the
//! handler config, guards child cleanup with a finalizer, runs a pass and
//! writes its status back to the APIRule.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use apigate_common::crd::{APIRule, APIRuleStatus};
use apigate_common::{
    CrdRegistry, Error, ReconcileError, MIGRATION_ANNOTATION, MIGRATION_MARKER_VALUE,
    SUBRESOURCES_FINALIZER,
};

use crate::config::{ConfigMapSource, ConfigSource, ReconcileConfig};
use crate::dependencies::RegistryDependencyChecker;
use crate::processing::{requeue_after, Orchestrator, ReconcileInput, ReconciliationStatus};
use crate::store::KubeStore;
use crate::validation::ApiRuleValidator;

const FIELD_MANAGER: &str = "apigate-controller";

/// Sub-status keys cleared when a pass no longer reports them
const SUB_STATUS_KEYS: [&str; 4] = [
    "virtualServiceStatus",
    "accessRuleStatus",
    "requestAuthenticationStatus",
    "authorizationPolicyStatus",
];

/// Writes to the APIRule itself
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ApiRuleClient: Send + Sync {
    /// Merge-patch the status subresource, guarded by the observed resourceVersion
    async fn patch_status(&self, api_rule: &APIRule, status: &APIRuleStatus) -> Result<(), Error>;

    /// Add the subresources finalizer
    async fn add_finalizer(&self, api_rule: &APIRule) -> Result<(), Error>;

    /// Remove the subresources finalizer
    async fn remove_finalizer(&self, api_rule: &APIRule) -> Result<(), Error>;

    /// Annotate a migrating APIRule so its secured paths bypass Oathkeeper
    async fn add_migration_marker(&self, api_rule: &APIRule) -> Result<(), Error>;
}

/// [`ApiRuleClient`] over a kube client
pub struct KubeApiRuleClient {
    client: Client,
}

impl KubeApiRuleClient {
    /// Create a client for APIRule writes
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, api_rule: &APIRule) -> Api<APIRule> {
        Api::namespaced(self.client.clone(), &api_rule.namespace().unwrap_or_default())
    }

    async fn patch_finalizers(&self, api_rule: &APIRule, finalizers: Vec<String>) -> Result<(), Error> {
        let patch = json!({
            "metadata": {
                "resourceVersion": api_rule.resource_version(),
                "finalizers": finalizers
            }
        });
        self.api(api_rule)
            .patch(
                &api_rule.name_any(),
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ApiRuleClient for KubeApiRuleClient {
    async fn patch_status(&self, api_rule: &APIRule, status: &APIRuleStatus) -> Result<(), Error> {
        let patch = status_patch(api_rule, status)?;
        self.api(api_rule)
            .patch_status(
                &api_rule.name_any(),
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(())
    }

    async fn add_finalizer(&self, api_rule: &APIRule) -> Result<(), Error> {
        let mut finalizers = api_rule.finalizers().to_vec();
        if finalizers.iter().any(|f| f == SUBRESOURCES_FINALIZER) {
            return Ok(());
        }
        finalizers.push(SUBRESOURCES_FINALIZER.to_string());
        self.patch_finalizers(api_rule, finalizers).await
    }

    async fn remove_finalizer(&self, api_rule: &APIRule) -> Result<(), Error> {
        let finalizers = api_rule
            .finalizers()
            .iter()
            .filter(|f| *f != SUBRESOURCES_FINALIZER)
            .cloned()
            .collect();
        self.patch_finalizers(api_rule, finalizers).await
    }

    async fn add_migration_marker(&self, api_rule: &APIRule) -> Result<(), Error> {
        // Unguarded: the status write just bumped the resourceVersion
        let patch = json!({
            "metadata": {
                "annotations": { MIGRATION_ANNOTATION: MIGRATION_MARKER_VALUE }
            }
        });
        self.api(api_rule)
            .patch(
                &api_rule.name_any(),
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await?;
        Ok(())
    }
}

/// Status merge patch.
///
/// Sub-statuses absent from `status` are sent as `null` so entries of kinds
/// the current mode no longer handles are dropped. The resourceVersion makes
/// the write fail with a conflict when the APIRule changed since it was read.
pub fn status_patch(api_rule: &APIRule, status: &APIRuleStatus) -> Result<Value, Error> {
    let mut body = serde_json::to_value(status)
        .map_err(|e| Error::serialization_for_kind("APIRule", e.to_string()))?;
    if let Value::Object(fields) = &mut body {
        for key in SUB_STATUS_KEYS {
            fields.entry(key).or_insert(Value::Null);
        }
    }
    Ok(json!({
        "metadata": { "resourceVersion": api_rule.resource_version() },
        "status": body
    }))
}

/// Controller context shared by every reconcile
pub struct Context {
    /// APIRule writes
    pub api_rules: Arc<dyn ApiRuleClient>,
    /// Cluster-wide handler config
    pub config_source: Arc<dyn ConfigSource>,
    /// Reconciliation engine
    pub orchestrator: Orchestrator,
    /// Settings from the command line; the handler is replaced every pass
    pub config: ReconcileConfig,
}

impl Context {
    /// Context backed by the given client and CRD registry
    pub fn new(client: Client, registry: Arc<CrdRegistry>, config: ReconcileConfig) -> Self {
        let orchestrator = Orchestrator::new(
            Arc::new(KubeStore::new(client.clone(), registry.clone())),
            Arc::new(ApiRuleValidator),
            Arc::new(RegistryDependencyChecker::new(registry)),
        );
        Self {
            api_rules: Arc::new(KubeApiRuleClient::new(client.clone())),
            config_source: Arc::new(ConfigMapSource::new(client)),
            orchestrator,
            config,
        }
    }
}

fn has_finalizer(api_rule: &APIRule) -> bool {
    api_rule
        .finalizers()
        .iter()
        .any(|f| f == SUBRESOURCES_FINALIZER)
}

/// Reconcile one APIRule
#[instrument(
    skip(api_rule, ctx),
    fields(apirule = %api_rule.name_any(), namespace = ?api_rule.namespace())
)]
pub async fn reconcile(api_rule: Arc<APIRule>, ctx: Arc<Context>) -> Result<Action, ReconcileError> {
    info!("Reconciling APIRule");

    let handler = ctx.config_source.jwt_handler().await?;
    let config = ctx.config.with_handler(handler);
    let input = ReconcileInput::from_api_rule(&api_rule, config.clone())?;

    if api_rule.metadata.deletion_timestamp.is_some() {
        if has_finalizer(&api_rule) {
            info!("APIRule deleted, removing children");
            ctx.orchestrator.delete_children(&input).await?;
            ctx.api_rules.remove_finalizer(&api_rule).await?;
        }
        return Ok(Action::await_change());
    }

    if !has_finalizer(&api_rule) {
        debug!("adding subresources finalizer");
        ctx.api_rules.add_finalizer(&api_rule).await?;
    }

    let awaiting_marker = input.awaits_migration_marker();
    let outcome = ctx.orchestrator.reconcile(input).await;
    let status = next_status(&api_rule, &outcome);

    match ctx.api_rules.patch_status(&api_rule, &status).await {
        Ok(()) => {
            if awaiting_marker && outcome.is_ok() {
                info!("migration pass succeeded, setting migration marker");
                if let Err(e) = ctx.api_rules.add_migration_marker(&api_rule).await {
                    warn!(error = %e, "failed to set migration marker");
                    return Ok(Action::requeue(config.error_period));
                }
            }
            let delay = requeue_after(&outcome, awaiting_marker, &config);
            info!(
                code = %outcome.api_rule.code,
                requeue_secs = delay.as_secs(),
                "APIRule reconciled"
            );
            Ok(Action::requeue(delay))
        }
        Err(e) if e.is_conflict() => {
            debug!("APIRule changed during reconcile, retrying");
            Ok(Action::requeue(Duration::ZERO))
        }
        Err(e) => {
            warn!(error = %e, "failed to write APIRule status");
            Ok(Action::requeue(config.error_period))
        }
    }
}

fn next_status(api_rule: &APIRule, outcome: &ReconciliationStatus) -> APIRuleStatus {
    let mut status = APIRuleStatus {
        last_processed_time: Some(chrono::Utc::now().to_rfc3339()),
        observed_generation: api_rule.metadata.generation,
        ..Default::default()
    };
    outcome.write_to(&mut status);
    status
}

/// Requeue after the error period when reconcile returns an error
pub fn error_policy(api_rule: Arc<APIRule>, error: &ReconcileError, ctx: Arc<Context>) -> Action {
    error!(
        ?error,
        apirule = %api_rule.name_any(),
        namespace = ?api_rule.namespace(),
        "reconciliation failed"
    );
    Action::requeue(ctx.config.error_period)
}
