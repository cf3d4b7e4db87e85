//! Generic processor: desired state, actual state, diff

use std::collections::BTreeMap;

use async_trait::async_trait;
use tracing::debug;

use apigate_common::Error;

use super::{ChildKind, ChildObject, ObjectChange, ReconcileInput};
use crate::store::ClusterStore;

/// Builds the desired objects of one kind and keys objects for pairing.
///
/// `key` must return the same key for a desired object and the cluster
/// object it is meant to replace. Cluster objects without a key are deleted.
pub trait Creator: Send + Sync {
    /// Kind produced by this creator
    fn kind(&self) -> ChildKind;

    /// Desired objects keyed by identity key
    fn create(&self, input: &ReconcileInput) -> Result<BTreeMap<String, ChildObject>, Error>;

    /// Identity key of an object of this kind
    fn key(&self, input: &ReconcileInput, object: &ChildObject) -> Option<String>;
}

/// Objects read from the cluster, keyed with a creator's key policy
#[derive(Debug, Default)]
pub struct ActualState {
    /// Objects with a unique key
    pub keyed: BTreeMap<String, ChildObject>,
    /// Objects without a key, or whose key was already taken
    pub marked_for_deletion: Vec<ChildObject>,
}

impl ActualState {
    /// Key `objects` with `key`
    pub fn from_objects(
        objects: Vec<ChildObject>,
        key: impl Fn(&ChildObject) -> Option<String>,
    ) -> Self {
        let mut state = Self::default();
        for object in objects {
            match key(&object) {
                Some(k) if !state.keyed.contains_key(&k) => {
                    state.keyed.insert(k, object);
                }
                _ => state.marked_for_deletion.push(object),
            }
        }
        state
    }
}

/// Pair desired with actual objects and compute the changes
pub fn compute_changes(
    desired: BTreeMap<String, ChildObject>,
    actual: ActualState,
) -> Vec<ObjectChange> {
    let ActualState {
        keyed: mut actual,
        marked_for_deletion,
    } = actual;

    let mut changes = Vec::with_capacity(desired.len() + marked_for_deletion.len());
    for (key, object) in desired {
        match actual.remove(&key) {
            Some(mut existing) => {
                existing.adopt_desired(object);
                changes.push(ObjectChange::update(existing));
            }
            None => changes.push(ObjectChange::create(object)),
        }
    }
    changes.extend(actual.into_values().map(ObjectChange::delete));
    changes.extend(marked_for_deletion.into_iter().map(ObjectChange::delete));
    changes
}

/// A processor as seen by the orchestrator
#[async_trait]
pub trait ReconciliationProcessor: Send + Sync {
    /// Kind handled by this processor
    fn kind(&self) -> ChildKind;

    /// Changes needed to move the cluster to the desired state
    async fn evaluate(
        &self,
        input: &ReconcileInput,
        store: &dyn ClusterStore,
    ) -> Result<Vec<ObjectChange>, Error>;
}

/// Processor over one creator
pub struct Processor<C> {
    creator: C,
}

impl<C: Creator> Processor<C> {
    /// Wrap a creator
    pub fn new(creator: C) -> Self {
        Self { creator }
    }
}

#[async_trait]
impl<C: Creator> ReconciliationProcessor for Processor<C> {
    fn kind(&self) -> ChildKind {
        self.creator.kind()
    }

    async fn evaluate(
        &self,
        input: &ReconcileInput,
        store: &dyn ClusterStore,
    ) -> Result<Vec<ObjectChange>, Error> {
        let kind = self.creator.kind();
        let desired = self.creator.create(input)?;
        let objects = store.list(kind, &input.owner_selector()).await?;
        let actual = ActualState::from_objects(objects, |o| self.creator.key(input, o));

        debug!(
            kind = %kind,
            desired = desired.len(),
            actual = actual.keyed.len(),
            unkeyed = actual.marked_for_deletion.len(),
            "evaluated child state"
        );
        Ok(compute_changes(desired, actual))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::ChangeAction;
    use apigate_common::kube_utils::ObjectMeta;
    use apigate_common::policy::{AuthorizationPolicy, AuthorizationPolicySpec};

    fn ap(name: &str, key: Option<&str>, action: &str) -> ChildObject {
        let mut meta = ObjectMeta::generated("httpbin-", "default");
        meta.name = name.to_string();
        if let Some(k) = key {
            meta.labels.insert("key".to_string(), k.to_string());
        }
        ChildObject::AuthorizationPolicy(AuthorizationPolicy::new(
            meta,
            AuthorizationPolicySpec {
                action: action.to_string(),
                ..Default::default()
            },
        ))
    }

    fn label_key(o: &ChildObject) -> Option<String> {
        o.metadata().labels.get("key").cloned()
    }

    fn desired(entries: &[(&str, &str)]) -> BTreeMap<String, ChildObject> {
        entries
            .iter()
            .map(|(k, action)| (k.to_string(), ap("", Some(k), action)))
            .collect()
    }

    fn actions(changes: &[ObjectChange], action: ChangeAction) -> Vec<String> {
        let mut names: Vec<String> = changes
            .iter()
            .filter(|c| c.action == action)
            .map(|c| c.object.metadata().display_name().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn matching_keys_update_and_keep_names() {
        let actual = ActualState::from_objects(vec![ap("ap-1", Some("a"), "")], label_key);
        let changes = compute_changes(desired(&[("a", "ALLOW")]), actual);

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].action, ChangeAction::Update);
        assert_eq!(changes[0].object.metadata().name, "ap-1");
        match &changes[0].object {
            ChildObject::AuthorizationPolicy(p) => assert_eq!(p.spec.action, "ALLOW"),
            other => panic!("unexpected kind {:?}", other.kind()),
        }
    }

    #[test]
    fn new_keys_create_and_stale_keys_delete() {
        let actual = ActualState::from_objects(vec![ap("ap-old", Some("old"), "")], label_key);
        let changes = compute_changes(desired(&[("new", "")]), actual);

        assert_eq!(actions(&changes, ChangeAction::Create), vec!["httpbin-"]);
        assert_eq!(actions(&changes, ChangeAction::Delete), vec!["ap-old"]);
        assert!(actions(&changes, ChangeAction::Update).is_empty());
    }

    #[test]
    fn unkeyed_and_duplicate_actuals_are_deleted() {
        let actual = ActualState::from_objects(
            vec![
                ap("ap-1", Some("a"), ""),
                ap("ap-2", Some("a"), ""),
                ap("ap-legacy", None, ""),
            ],
            label_key,
        );
        assert_eq!(actual.keyed.len(), 1);
        assert_eq!(actual.marked_for_deletion.len(), 2);

        let changes = compute_changes(desired(&[("a", "")]), actual);
        assert_eq!(actions(&changes, ChangeAction::Update), vec!["ap-1"]);
        assert_eq!(
            actions(&changes, ChangeAction::Delete),
            vec!["ap-2", "ap-legacy"]
        );
    }

    #[test]
    fn empty_desired_deletes_everything() {
        let actual = ActualState::from_objects(
            vec![ap("ap-1", Some("a"), ""), ap("ap-2", Some("b"), "")],
            label_key,
        );
        let changes = compute_changes(BTreeMap::new(), actual);
        assert_eq!(actions(&changes, ChangeAction::Delete), vec!["ap-1", "ap-2"]);
    }
}
