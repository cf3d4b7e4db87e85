//! Reconciliation core
//!
//! One pass runs: validate, check dependencies, then for every processor
//! compute desired state, read actual state, diff, and apply. The results are
//! aggregated into a [`status::ReconciliationStatus`].

pub mod apply;
pub mod hashbased;
pub mod input;
pub mod processor;
pub mod reconcile;
pub mod status;

use std::fmt;

use apigate_common::kube_utils::ObjectMeta;
use apigate_common::policy::{AccessRule, AuthorizationPolicy, RequestAuthentication, VirtualService};
use apigate_common::{CrdKind, Error, HASH_LABEL, INDEX_LABEL, OWNER_LABEL};

pub use input::{HandlerMode, ReconcileInput};
pub use processor::{Creator, Processor, ReconciliationProcessor};
pub use reconcile::{requeue_after, Orchestrator};
pub use status::ReconciliationStatus;

// =============================================================================
// Child kinds
// =============================================================================

/// Kind of a child object derived from an APIRule
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChildKind {
    /// Istio VirtualService
    VirtualService,
    /// Oathkeeper Rule
    AccessRule,
    /// Istio AuthorizationPolicy
    AuthorizationPolicy,
    /// Istio RequestAuthentication
    RequestAuthentication,
}

/// All child kinds, in status order
pub const ALL_CHILD_KINDS: &[ChildKind] = &[
    ChildKind::VirtualService,
    ChildKind::AccessRule,
    ChildKind::AuthorizationPolicy,
    ChildKind::RequestAuthentication,
];

impl ChildKind {
    /// The CRD backing this kind
    pub fn crd_kind(self) -> CrdKind {
        match self {
            Self::VirtualService => CrdKind::VirtualService,
            Self::AccessRule => CrdKind::OathkeeperRule,
            Self::AuthorizationPolicy => CrdKind::AuthorizationPolicy,
            Self::RequestAuthentication => CrdKind::RequestAuthentication,
        }
    }

    /// Name used in status descriptions
    pub fn as_str(self) -> &'static str {
        match self {
            Self::VirtualService => "VirtualService",
            Self::AccessRule => "AccessRule",
            Self::AuthorizationPolicy => "AuthorizationPolicy",
            Self::RequestAuthentication => "RequestAuthentication",
        }
    }
}

impl fmt::Display for ChildKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Child objects
// =============================================================================

/// A desired or actual child object
#[derive(Clone, Debug, PartialEq)]
pub enum ChildObject {
    /// VirtualService
    VirtualService(VirtualService),
    /// Oathkeeper Rule
    AccessRule(AccessRule),
    /// AuthorizationPolicy
    AuthorizationPolicy(AuthorizationPolicy),
    /// RequestAuthentication
    RequestAuthentication(RequestAuthentication),
}

impl ChildObject {
    /// Kind of this object
    pub fn kind(&self) -> ChildKind {
        match self {
            Self::VirtualService(_) => ChildKind::VirtualService,
            Self::AccessRule(_) => ChildKind::AccessRule,
            Self::AuthorizationPolicy(_) => ChildKind::AuthorizationPolicy,
            Self::RequestAuthentication(_) => ChildKind::RequestAuthentication,
        }
    }

    /// Object metadata
    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Self::VirtualService(o) => &o.metadata,
            Self::AccessRule(o) => &o.metadata,
            Self::AuthorizationPolicy(o) => &o.metadata,
            Self::RequestAuthentication(o) => &o.metadata,
        }
    }

    /// Mutable object metadata
    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Self::VirtualService(o) => &mut o.metadata,
            Self::AccessRule(o) => &mut o.metadata,
            Self::AuthorizationPolicy(o) => &mut o.metadata,
            Self::RequestAuthentication(o) => &mut o.metadata,
        }
    }

    /// Serialize to the wire format
    pub fn to_value(&self) -> Result<serde_json::Value, Error> {
        let value = match self {
            Self::VirtualService(o) => serde_json::to_value(o),
            Self::AccessRule(o) => serde_json::to_value(o),
            Self::AuthorizationPolicy(o) => serde_json::to_value(o),
            Self::RequestAuthentication(o) => serde_json::to_value(o),
        };
        value.map_err(|e| Error::serialization_for_kind(self.kind().as_str(), e.to_string()))
    }

    /// Deserialize an object of the given kind from the wire format
    pub fn from_value(kind: ChildKind, value: serde_json::Value) -> Result<Self, Error> {
        let parsed = match kind {
            ChildKind::VirtualService => serde_json::from_value(value).map(Self::VirtualService),
            ChildKind::AccessRule => serde_json::from_value(value).map(Self::AccessRule),
            ChildKind::AuthorizationPolicy => {
                serde_json::from_value(value).map(Self::AuthorizationPolicy)
            }
            ChildKind::RequestAuthentication => {
                serde_json::from_value(value).map(Self::RequestAuthentication)
            }
        };
        parsed.map_err(|e| Error::serialization_for_kind(kind.as_str(), e.to_string()))
    }

    /// Take over the spec and labels of a desired object.
    ///
    /// Owner, hash and index labels are replaced by the desired ones, so a
    /// label the desired object no longer carries is dropped. Name,
    /// resourceVersion, annotations and foreign labels of `self` are kept
    /// so the update goes through optimistic concurrency.
    pub fn adopt_desired(&mut self, desired: ChildObject) {
        let labels = desired.metadata().labels.clone();
        match (&mut *self, desired) {
            (Self::VirtualService(a), Self::VirtualService(d)) => a.spec = d.spec,
            (Self::AccessRule(a), Self::AccessRule(d)) => a.spec = d.spec,
            (Self::AuthorizationPolicy(a), Self::AuthorizationPolicy(d)) => a.spec = d.spec,
            (Self::RequestAuthentication(a), Self::RequestAuthentication(d)) => a.spec = d.spec,
            (actual, mut d) => {
                let meta = d.metadata_mut();
                meta.name = actual.metadata().name.clone();
                meta.resource_version = actual.metadata().resource_version.clone();
                *actual = d;
                return;
            }
        }
        let actual = &mut self.metadata_mut().labels;
        for key in [OWNER_LABEL, HASH_LABEL, INDEX_LABEL] {
            actual.remove(key);
        }
        actual.extend(labels);
    }
}

// =============================================================================
// Object changes
// =============================================================================

/// What to do with an object
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeAction {
    /// Create a new object
    Create,
    /// Replace an existing object
    Update,
    /// Delete an existing object
    Delete,
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => f.write_str("create"),
            Self::Update => f.write_str("update"),
            Self::Delete => f.write_str("delete"),
        }
    }
}

/// One change computed in a pass and applied in the same pass
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectChange {
    /// Action
    pub action: ChangeAction,
    /// Object to act on
    pub object: ChildObject,
}

impl ObjectChange {
    /// Create `object`
    pub fn create(object: ChildObject) -> Self {
        Self {
            action: ChangeAction::Create,
            object,
        }
    }

    /// Update `object`
    pub fn update(object: ChildObject) -> Self {
        Self {
            action: ChangeAction::Update,
            object,
        }
    }

    /// Delete `object`
    pub fn delete(object: ChildObject) -> Self {
        Self {
            action: ChangeAction::Delete,
            object,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apigate_common::policy::{AuthorizationPolicySpec, VirtualServiceSpec};

    fn policy(name: &str, rv: Option<&str>, action: &str) -> ChildObject {
        let mut meta = ObjectMeta::generated("httpbin-", "default").with_label("a", "1");
        meta.name = name.to_string();
        meta.resource_version = rv.map(str::to_string);
        ChildObject::AuthorizationPolicy(AuthorizationPolicy::new(
            meta,
            AuthorizationPolicySpec {
                action: action.to_string(),
                ..Default::default()
            },
        ))
    }

    #[test]
    fn adopt_desired_keeps_identity_and_takes_spec() {
        let mut actual = policy("httpbin-abc", Some("42"), "");
        actual
            .metadata_mut()
            .annotations
            .insert("kept".to_string(), "yes".to_string());
        let mut desired = policy("", None, "ALLOW");
        desired
            .metadata_mut()
            .labels
            .insert("b".to_string(), "2".to_string());

        actual.adopt_desired(desired);

        let meta = actual.metadata();
        assert_eq!(meta.name, "httpbin-abc");
        assert_eq!(meta.resource_version.as_deref(), Some("42"));
        assert_eq!(meta.annotations.get("kept").map(String::as_str), Some("yes"));
        assert_eq!(meta.labels.get("b").map(String::as_str), Some("2"));
        match actual {
            ChildObject::AuthorizationPolicy(ap) => assert_eq!(ap.spec.action, "ALLOW"),
            other => panic!("unexpected kind {:?}", other.kind()),
        }
    }

    #[test]
    fn adopt_desired_drops_stale_managed_labels() {
        let mut actual = policy("httpbin-abc", Some("42"), "");
        let labels = &mut actual.metadata_mut().labels;
        labels.insert(OWNER_LABEL.to_string(), "httpbin.default".to_string());
        labels.insert(HASH_LABEL.to_string(), "old".to_string());
        labels.insert(INDEX_LABEL.to_string(), "3".to_string());
        labels.insert("team".to_string(), "edge".to_string());
        let mut desired = policy("", None, "ALLOW");
        let labels = &mut desired.metadata_mut().labels;
        labels.insert(OWNER_LABEL.to_string(), "httpbin.default".to_string());
        labels.insert(HASH_LABEL.to_string(), "new".to_string());

        actual.adopt_desired(desired);

        let labels = &actual.metadata().labels;
        assert_eq!(labels.get(HASH_LABEL).map(String::as_str), Some("new"));
        assert!(!labels.contains_key(INDEX_LABEL));
        assert_eq!(labels.get(OWNER_LABEL).map(String::as_str), Some("httpbin.default"));
        assert_eq!(labels.get("team").map(String::as_str), Some("edge"));
    }

    #[test]
    fn wire_round_trip_keeps_kind() {
        let vs = ChildObject::VirtualService(VirtualService::new(
            ObjectMeta::generated("httpbin-", "default"),
            VirtualServiceSpec {
                hosts: vec!["httpbin.example.com".to_string()],
                ..Default::default()
            },
        ));
        let value = vs.to_value().expect("serializable");
        assert_eq!(value["kind"], "VirtualService");

        let parsed = ChildObject::from_value(ChildKind::VirtualService, value).expect("parsable");
        assert_eq!(parsed, vs);
    }

    #[test]
    fn from_value_reports_kind_on_failure() {
        let err = ChildObject::from_value(ChildKind::AccessRule, serde_json::json!("nope"))
            .expect_err("not an object");
        assert!(matches!(err, Error::Serialization { kind: Some(k), .. } if k == "AccessRule"));
    }

    #[test]
    fn child_kinds_map_to_crds() {
        assert_eq!(ChildKind::AccessRule.crd_kind(), CrdKind::OathkeeperRule);
        assert_eq!(ChildKind::VirtualService.to_string(), "VirtualService");
        assert_eq!(ALL_CHILD_KINDS.len(), 4);
    }
}
