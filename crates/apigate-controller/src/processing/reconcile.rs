//! Orchestrator for one reconciliation pass
//!
//! Errors never escape a pass: every outcome is folded into a
//! [`ReconciliationStatus`], and the caller only decides when to come back.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use apigate_common::crd::StatusCode;
use apigate_common::Error;

use super::apply::apply_changes;
use super::status::{aggregate, ReconciliationStatus};
use super::{ReconcileInput, ALL_CHILD_KINDS};
use crate::config::ReconcileConfig;
use crate::creators::processors_for;
use crate::dependencies::DependencyChecker;
use crate::store::ClusterStore;
use crate::validation::Validator;

/// Runs validation, the dependency check and every processor of a mode
pub struct Orchestrator {
    store: Arc<dyn ClusterStore>,
    validator: Arc<dyn Validator>,
    dependencies: Arc<dyn DependencyChecker>,
}

impl Orchestrator {
    /// Create an orchestrator over the given collaborators
    pub fn new(
        store: Arc<dyn ClusterStore>,
        validator: Arc<dyn Validator>,
        dependencies: Arc<dyn DependencyChecker>,
    ) -> Self {
        Self {
            store,
            validator,
            dependencies,
        }
    }

    /// Run one pass and report its status
    #[instrument(
        skip_all,
        fields(apirule = %input.owner_label_value(), mode = ?input.mode)
    )]
    pub async fn reconcile(&self, mut input: ReconcileInput) -> ReconciliationStatus {
        let kinds = input.mode.child_kinds();

        let failures = self.validator.validate(&input);
        if !failures.is_empty() {
            info!(failures = failures.len(), "APIRule failed validation");
            return ReconciliationStatus::validation_failed(kinds, &failures);
        }

        if let Err(e) = self.dependencies.are_available(input.mode.required_kinds()).await {
            return ReconciliationStatus::aborted(kinds, e.status_code(), e.to_string());
        }

        if input.mode.is_istio() {
            if let Err(e) = self.resolve_selectors(&mut input).await {
                warn!(error = %e, "failed to resolve service selectors");
                return ReconciliationStatus::aborted(kinds, StatusCode::Error, e.to_string());
            }
        }

        let mut changes = Vec::new();
        for processor in processors_for(input.mode) {
            match processor.evaluate(&input, self.store.as_ref()).await {
                Ok(c) => changes.extend(c),
                Err(e) => {
                    warn!(kind = %processor.kind(), error = %e, "processor failed");
                    return ReconciliationStatus::aborted(kinds, StatusCode::Error, e.to_string());
                }
            }
        }

        debug!(changes = changes.len(), "applying changes");
        let errors = apply_changes(self.store.as_ref(), changes).await;
        aggregate(&errors, ReconciliationStatus::ok(kinds))
    }

    /// Delete every child of the APIRule, for each kind whose CRD is installed
    #[instrument(skip_all, fields(apirule = %input.owner_label_value()))]
    pub async fn delete_children(&self, input: &ReconcileInput) -> Result<(), Error> {
        let selector = input.owner_selector();
        let mut first_error = None;
        for kind in ALL_CHILD_KINDS {
            let objects = match self.store.list(*kind, &selector).await {
                Ok(objects) => objects,
                Err(e) => {
                    warn!(kind = %kind, error = %e, "failed to list children for deletion");
                    first_error.get_or_insert(e);
                    continue;
                }
            };
            for object in objects {
                if let Err(e) = self.store.delete(&object).await {
                    warn!(
                        kind = %kind,
                        name = %object.metadata().name,
                        error = %e,
                        "failed to delete child"
                    );
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn resolve_selectors(&self, input: &mut ReconcileInput) -> Result<(), Error> {
        let mut selectors = BTreeMap::new();
        for rule in &input.spec.rules {
            let Some(service) = rule.effective_service(&input.spec) else {
                continue;
            };
            let key = (service.name.clone(), input.service_namespace(rule));
            if selectors.contains_key(&key) {
                continue;
            }
            if let Some(selector) = self.store.service_selector(&key.0, &key.1).await? {
                selectors.insert(key, selector);
            }
        }
        input.selectors = selectors;
        Ok(())
    }
}

/// Delay until the next pass.
///
/// Any non-OK outcome retries after the error period; a migration still
/// waiting for its marker is revisited after the migration period.
pub fn requeue_after(
    status: &ReconciliationStatus,
    awaiting_migration_marker: bool,
    config: &ReconcileConfig,
) -> Duration {
    if !status.is_ok() {
        config.error_period
    } else if awaiting_migration_marker {
        config.migration_period
    } else {
        config.default_period
    }
}
