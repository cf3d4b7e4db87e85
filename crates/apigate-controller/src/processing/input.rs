//! Per-pass input shared by validation and all creators

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};

use apigate_common::crd::{APIRule, APIRuleSpec, Rule, Service};
use apigate_common::kube_utils::ObjectMeta;
use apigate_common::policy::WorkloadSelector;
use apigate_common::{
    owner_label_value, owner_selector, Error, MIGRATION_ANNOTATION, MIGRATION_MARKER_VALUE,
    ORIGINAL_VERSION_ANNOTATION, OWNER_LABEL,
};

use super::ChildKind;
use crate::config::{JwtHandler, ReconcileConfig};

/// Which set of child kinds a pass manages
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlerMode {
    /// Oathkeeper proxies secured paths
    Ory,
    /// Istio validates tokens in the sidecar; Oathkeeper only serves
    /// `noop` and `oauth2_introspection`
    Istio,
    /// APIRule authored as v2alpha1: Istio security resources next to the
    /// Oathkeeper Rules. Secured paths go through Oathkeeper until the
    /// migration marker is set, then straight to the backend.
    Migration,
}

impl HandlerMode {
    /// Mode for one APIRule under the cluster-wide handler
    pub fn resolve(handler: JwtHandler, annotations: &BTreeMap<String, String>) -> Self {
        if annotations
            .get(ORIGINAL_VERSION_ANNOTATION)
            .is_some_and(|v| v == "v2alpha1")
        {
            return Self::Migration;
        }
        match handler {
            JwtHandler::Ory => Self::Ory,
            JwtHandler::Istio => Self::Istio,
        }
    }

    /// Kinds reported in status
    pub fn child_kinds(self) -> &'static [ChildKind] {
        match self {
            Self::Ory => &[ChildKind::VirtualService, ChildKind::AccessRule],
            Self::Istio | Self::Migration => super::ALL_CHILD_KINDS,
        }
    }

    /// Kinds whose CRDs must be installed before anything is applied
    pub fn required_kinds(self) -> &'static [ChildKind] {
        self.child_kinds()
    }

    /// Whether backends are reached through the Istio sidecar directly
    pub fn is_istio(self) -> bool {
        matches!(self, Self::Istio | Self::Migration)
    }
}

/// Everything a pass needs about one APIRule, fixed for the duration of the pass
#[derive(Clone, Debug)]
pub struct ReconcileInput {
    /// APIRule name
    pub name: String,
    /// APIRule namespace
    pub namespace: String,
    /// APIRule spec
    pub spec: APIRuleSpec,
    /// Controller owner reference for same-namespace children
    pub owner: Option<OwnerReference>,
    /// Config snapshot for this pass
    pub config: ReconcileConfig,
    /// Handler mode for this pass
    pub mode: HandlerMode,
    /// The APIRule carries the migration marker
    pub migration_marker: bool,
    /// Pod selectors of target services, keyed by (name, namespace)
    pub selectors: BTreeMap<(String, String), BTreeMap<String, String>>,
}

impl ReconcileInput {
    /// Input for a pass without an owning cluster object
    pub fn new(
        name: impl Into<String>,
        namespace: impl Into<String>,
        spec: APIRuleSpec,
        config: ReconcileConfig,
    ) -> Self {
        let mode = HandlerMode::resolve(config.handler, &BTreeMap::new());
        Self {
            name: name.into(),
            namespace: namespace.into(),
            spec,
            owner: None,
            config,
            mode,
            migration_marker: false,
            selectors: BTreeMap::new(),
        }
    }

    /// Input for a pass over a cluster APIRule
    pub fn from_api_rule(api_rule: &APIRule, config: ReconcileConfig) -> Result<Self, Error> {
        let namespace = api_rule
            .namespace()
            .ok_or_else(|| Error::validation("APIRule missing namespace"))?;
        let annotations = api_rule.annotations();
        let mode = HandlerMode::resolve(config.handler, annotations);
        Ok(Self {
            name: api_rule.name_any(),
            namespace,
            spec: api_rule.spec.clone(),
            owner: api_rule.controller_owner_ref(&()),
            config,
            mode,
            migration_marker: annotations
                .get(MIGRATION_ANNOTATION)
                .is_some_and(|v| v == MIGRATION_MARKER_VALUE),
            selectors: BTreeMap::new(),
        })
    }

    /// A migration pass still routing through Oathkeeper; the marker is
    /// set once it succeeds
    pub fn awaits_migration_marker(&self) -> bool {
        self.mode == HandlerMode::Migration && !self.migration_marker
    }

    /// Owner label value, `<name>.<namespace>`
    pub fn owner_label_value(&self) -> String {
        owner_label_value(&self.name, &self.namespace)
    }

    /// Label selector matching every child of this APIRule
    pub fn owner_selector(&self) -> String {
        owner_selector(&self.name, &self.namespace)
    }

    /// Metadata for a desired child: generated name, owner label, extra labels
    pub fn child_meta(&self, namespace: &str) -> ObjectMeta {
        ObjectMeta::generated(format!("{}-", self.name), namespace)
            .with_label(OWNER_LABEL, self.owner_label_value())
            .with_labels(&self.config.extra_labels)
    }

    /// Like [`child_meta`](Self::child_meta), plus the owner reference when
    /// the child lives in the APIRule's namespace
    pub fn owned_child_meta(&self, namespace: &str) -> ObjectMeta {
        let owner = if namespace == self.namespace {
            self.owner.clone()
        } else {
            None
        };
        self.child_meta(namespace).with_owner(owner)
    }

    /// Exposed host, completed with the default domain when it has none
    pub fn host(&self) -> Option<String> {
        let host = self.spec.host.as_deref()?;
        match &self.config.default_domain {
            Some(domain) if !host.contains('.') => Some(format!("{host}.{domain}")),
            _ => Some(host.to_string()),
        }
    }

    /// Effective backend of a rule
    pub fn service<'a>(&'a self, rule: &'a Rule) -> Result<&'a Service, Error> {
        rule.effective_service(&self.spec).ok_or_else(|| {
            Error::validation_for_field(
                ".spec.service",
                format!("no service for rule with path {}", rule.path),
            )
        })
    }

    /// Namespace of a rule's backend, defaulting to the APIRule namespace
    pub fn service_namespace(&self, rule: &Rule) -> String {
        rule.effective_service(&self.spec)
            .and_then(|s| s.namespace.clone())
            .unwrap_or_else(|| self.namespace.clone())
    }

    /// Host under which a rule's backend is reachable
    pub fn backend_host(&self, rule: &Rule) -> Result<String, Error> {
        let service = self.service(rule)?;
        if service.is_external == Some(true) {
            return Ok(service.name.clone());
        }
        Ok(format!(
            "{}.{}.svc.cluster.local",
            service.name,
            self.service_namespace(rule)
        ))
    }

    /// Workload selector for policies targeting a rule's backend.
    ///
    /// Uses the service's pod selector when it was resolved, `app=<name>`
    /// otherwise.
    pub fn workload_selector(&self, rule: &Rule) -> Result<WorkloadSelector, Error> {
        let service = self.service(rule)?;
        let key = (service.name.clone(), self.service_namespace(rule));
        let match_labels = match self.selectors.get(&key) {
            Some(labels) if !labels.is_empty() => labels.clone(),
            _ => BTreeMap::from([("app".to_string(), service.name.clone())]),
        };
        Ok(WorkloadSelector { match_labels })
    }
}
