//! Applies computed changes, isolating failures per child kind

use std::collections::BTreeMap;

use tracing::{debug, warn};

use apigate_common::Error;

use super::{ChangeAction, ChildKind, ObjectChange};
use crate::store::ClusterStore;

/// Apply every change in order. A failure is recorded under the object's
/// kind and never stops the remaining changes.
///
/// Returns an empty map when everything succeeded.
pub async fn apply_changes(
    store: &dyn ClusterStore,
    changes: Vec<ObjectChange>,
) -> BTreeMap<ChildKind, Vec<Error>> {
    let mut errors: BTreeMap<ChildKind, Vec<Error>> = BTreeMap::new();

    for change in changes {
        let kind = change.object.kind();
        let result = match change.action {
            ChangeAction::Create => store.create(&change.object).await,
            ChangeAction::Update => store.update(&change.object).await,
            ChangeAction::Delete => store.delete(&change.object).await,
        };

        let meta = change.object.metadata();
        match result {
            Ok(()) => debug!(
                kind = %kind,
                action = %change.action,
                name = meta.display_name(),
                namespace = %meta.namespace,
                "applied change"
            ),
            Err(e) => {
                warn!(
                    kind = %kind,
                    action = %change.action,
                    name = meta.display_name(),
                    namespace = %meta.namespace,
                    error = %e,
                    "failed to apply change"
                );
                errors.entry(kind).or_default().push(e);
            }
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::ChildObject;
    use crate::store::MockClusterStore;
    use apigate_common::kube_utils::ObjectMeta;
    use apigate_common::policy::{
        AccessRule, AccessRuleSpec, VirtualService, VirtualServiceSpec,
    };

    fn vs() -> ChildObject {
        ChildObject::VirtualService(VirtualService::new(
            ObjectMeta::generated("httpbin-", "default"),
            VirtualServiceSpec::default(),
        ))
    }

    fn rule(name: &str) -> ChildObject {
        let mut meta = ObjectMeta::generated("httpbin-", "default");
        meta.name = name.to_string();
        ChildObject::AccessRule(AccessRule::new(meta, AccessRuleSpec::default()))
    }

    /// Story: one failing rule does not stop the VirtualService or other rules
    #[tokio::test]
    async fn story_failures_are_isolated_per_kind() {
        let mut store = MockClusterStore::new();
        store.expect_create().times(1).returning(|_| Ok(()));
        store.expect_update().times(2).returning(|o| {
            if o.metadata().name == "rule-bad" {
                Err(Error::internal_with_context("store", "conflict on rule-bad"))
            } else {
                Ok(())
            }
        });
        store.expect_delete().times(1).returning(|_| {
            Err(Error::internal_with_context("store", "delete failed"))
        });

        let errors = apply_changes(
            &store,
            vec![
                ObjectChange::update(rule("rule-bad")),
                ObjectChange::create(vs()),
                ObjectChange::update(rule("rule-good")),
                ObjectChange::delete(rule("rule-stale")),
            ],
        )
        .await;

        assert_eq!(errors.len(), 1);
        let rule_errors = errors.get(&ChildKind::AccessRule).expect("rule errors");
        assert_eq!(rule_errors.len(), 2);
        assert!(!errors.contains_key(&ChildKind::VirtualService));
    }

    #[tokio::test]
    async fn full_success_returns_empty_map() {
        let mut store = MockClusterStore::new();
        store.expect_create().returning(|_| Ok(()));

        let errors = apply_changes(&store, vec![ObjectChange::create(vs())]).await;
        assert!(errors.is_empty());
    }
}
