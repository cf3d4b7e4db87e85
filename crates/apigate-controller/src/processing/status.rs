//! Reconciliation status
//!
//! Built fresh every pass. The parent status summarises the pass; each child
//! kind handled in the current mode gets its own sub-status.

use std::collections::BTreeMap;

use apigate_common::crd::{APIRuleStatus, ResourceStatus, StatusCode};
use apigate_common::Error;

use super::ChildKind;
use crate::validation::Failure;

/// Validation failures listed in a multi-failure description
const MAX_LISTED_FAILURES: usize = 3;

/// Outcome of one pass
#[derive(Clone, Debug, PartialEq)]
pub struct ReconciliationStatus {
    /// Parent status
    pub api_rule: ResourceStatus,
    /// VirtualService status
    pub virtual_service: Option<ResourceStatus>,
    /// Oathkeeper Rule status
    pub access_rule: Option<ResourceStatus>,
    /// AuthorizationPolicy status
    pub authorization_policy: Option<ResourceStatus>,
    /// RequestAuthentication status
    pub request_authentication: Option<ResourceStatus>,
}

impl ReconciliationStatus {
    /// Status with `code` on every kind in `kinds` and the given parent status
    pub fn base(kinds: &[ChildKind], api_rule: ResourceStatus, code: StatusCode) -> Self {
        let mut status = Self {
            api_rule,
            virtual_service: None,
            access_rule: None,
            authorization_policy: None,
            request_authentication: None,
        };
        for kind in kinds {
            *status.sub_status_mut(*kind) = Some(ResourceStatus::code(code));
        }
        status
    }

    /// Everything OK
    pub fn ok(kinds: &[ChildKind]) -> Self {
        Self::base(kinds, ResourceStatus::code(StatusCode::Ok), StatusCode::Ok)
    }

    /// Validation failed: parent ERROR with the formatted failures, all kinds SKIPPED
    pub fn validation_failed(kinds: &[ChildKind], failures: &[Failure]) -> Self {
        Self::base(
            kinds,
            ResourceStatus::new(StatusCode::Error, validation_description(failures)),
            StatusCode::Skipped,
        )
    }

    /// Pass aborted before applying: parent `code` with `description`, all kinds SKIPPED
    pub fn aborted(kinds: &[ChildKind], code: StatusCode, description: impl Into<String>) -> Self {
        Self::base(
            kinds,
            ResourceStatus::new(code, description),
            StatusCode::Skipped,
        )
    }

    /// Sub-status slot of a kind
    pub fn sub_status_mut(&mut self, kind: ChildKind) -> &mut Option<ResourceStatus> {
        match kind {
            ChildKind::VirtualService => &mut self.virtual_service,
            ChildKind::AccessRule => &mut self.access_rule,
            ChildKind::AuthorizationPolicy => &mut self.authorization_policy,
            ChildKind::RequestAuthentication => &mut self.request_authentication,
        }
    }

    /// Sub-status of a kind
    pub fn sub_status(&self, kind: ChildKind) -> Option<&ResourceStatus> {
        match kind {
            ChildKind::VirtualService => self.virtual_service.as_ref(),
            ChildKind::AccessRule => self.access_rule.as_ref(),
            ChildKind::AuthorizationPolicy => self.authorization_policy.as_ref(),
            ChildKind::RequestAuthentication => self.request_authentication.as_ref(),
        }
    }

    /// Parent or any sub-status is ERROR
    pub fn has_error(&self) -> bool {
        self.api_rule.code == StatusCode::Error
            || [
                &self.virtual_service,
                &self.access_rule,
                &self.authorization_policy,
                &self.request_authentication,
            ]
            .into_iter()
            .flatten()
            .any(|s| s.code == StatusCode::Error)
    }

    /// Parent is OK and no sub-status is ERROR
    pub fn is_ok(&self) -> bool {
        self.api_rule.code == StatusCode::Ok && !self.has_error()
    }

    /// Copy into the APIRule status, replacing all previous per-kind entries
    pub fn write_to(&self, status: &mut APIRuleStatus) {
        status.api_rule_status = Some(self.api_rule.clone());
        status.virtual_service_status = self.virtual_service.clone();
        status.access_rule_status = self.access_rule.clone();
        status.authorization_policy_status = self.authorization_policy.clone();
        status.request_authentication_status = self.request_authentication.clone();
    }
}

/// Fold apply errors into `base`.
///
/// Kinds with errors become ERROR with the messages joined by newlines; kinds
/// without errors become OK. Every failing kind escalates the parent to ERROR.
pub fn aggregate(
    errors: &BTreeMap<ChildKind, Vec<Error>>,
    mut base: ReconciliationStatus,
) -> ReconciliationStatus {
    for kind in super::ALL_CHILD_KINDS {
        let kind_errors = errors.get(kind).filter(|e| !e.is_empty());
        let slot = base.sub_status_mut(*kind);
        match kind_errors {
            Some(errs) => {
                let description = errs
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("\n");
                *slot = Some(ResourceStatus::new(StatusCode::Error, description));
                escalate(&mut base.api_rule, *kind);
            }
            None => {
                if let Some(s) = slot.as_mut() {
                    *s = ResourceStatus::code(StatusCode::Ok);
                }
            }
        }
    }
    base
}

fn escalate(parent: &mut ResourceStatus, kind: ChildKind) {
    let note = format!("Error has happened on subresource {kind}");
    if parent.code == StatusCode::Ok || parent.description.is_empty() {
        *parent = ResourceStatus::new(StatusCode::Error, note);
    } else {
        parent.code = StatusCode::Error;
        parent.description.push('\n');
        parent.description.push_str(&note);
    }
}

/// Human-readable summary of validation failures, listing at most three
pub fn validation_description(failures: &[Failure]) -> String {
    if let [only] = failures {
        return format!(
            "Validation error: Attribute \"{}\": {}",
            only.attribute_path, only.message
        );
    }

    let mut description = String::from("Multiple validation errors: ");
    for failure in failures.iter().take(MAX_LISTED_FAILURES) {
        description.push_str(&format!(
            "\nAttribute \"{}\": {}",
            failure.attribute_path, failure.message
        ));
    }
    if failures.len() > MAX_LISTED_FAILURES {
        description.push_str(&format!(
            "\n{} more error(s)...",
            failures.len() - MAX_LISTED_FAILURES
        ));
    }
    description
}
