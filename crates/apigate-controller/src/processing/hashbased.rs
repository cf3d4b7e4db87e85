//! Hash + index identity for AuthorizationPolicies
//!
//! AuthorizationPolicies have no natural key: two authorizations of one rule
//! can produce policies that differ only in their conditions. Each desired
//! policy is labelled with a content hash of its spec and namespace, plus its
//! position in the rule's authorization sequence. `hash:index` pairs desired
//! with actual policies.
//!
//! Inserting an authorization before existing ones shifts the index of all
//! following entries, so their policies are recreated.

use std::fmt::Write;

use apigate_common::kube_utils::ObjectMeta;
use apigate_common::policy::AuthorizationPolicy;
use apigate_common::{deterministic_hash, Error, HASH_LABEL, INDEX_LABEL};

/// Label `policy` with its content hash and sequence index
pub fn add_hash_labels(policy: &mut AuthorizationPolicy, index: usize) -> Result<(), Error> {
    let hash = policy_hash(policy)?;
    policy
        .metadata
        .labels
        .insert(INDEX_LABEL.to_string(), index.to_string());
    policy.metadata.labels.insert(HASH_LABEL.to_string(), hash);
    Ok(())
}

/// Content hash over the spec and namespace.
///
/// Object keys are sorted and lists are compared as sets.
pub fn policy_hash(policy: &AuthorizationPolicy) -> Result<String, Error> {
    let spec = serde_json::to_value(&policy.spec)
        .map_err(|e| Error::serialization_for_kind("AuthorizationPolicy", e.to_string()))?;
    let mut canonical = String::new();
    write_canonical(&spec, &mut canonical);
    Ok(deterministic_hash(&format!(
        "{}:{}",
        policy.metadata.namespace, canonical
    )))
}

/// `hash:index` from the labels, `None` if either is missing
pub fn hash_key(meta: &ObjectMeta) -> Option<String> {
    let hash = meta.labels.get(HASH_LABEL)?;
    let index = meta.labels.get(INDEX_LABEL)?;
    Some(format!("{hash}:{index}"))
}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
    use serde_json::Value;

    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{key:?}:");
                if let Some(v) = map.get(key) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            let mut rendered: Vec<String> = items
                .iter()
                .map(|item| {
                    let mut s = String::new();
                    write_canonical(item, &mut s);
                    s
                })
                .collect();
            rendered.sort();
            out.push('[');
            out.push_str(&rendered.join(","));
            out.push(']');
        }
        other => out.push_str(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apigate_common::policy::{
        AuthorizationOperation, AuthorizationPolicySpec, AuthorizationRule, OperationSpec,
    };

    fn policy(namespace: &str, methods: &[&str], paths: &[&str]) -> AuthorizationPolicy {
        AuthorizationPolicy::new(
            ObjectMeta::generated("httpbin-", namespace),
            AuthorizationPolicySpec {
                rules: vec![AuthorizationRule {
                    to: vec![AuthorizationOperation {
                        operation: OperationSpec {
                            methods: methods.iter().map(|m| m.to_string()).collect(),
                            paths: paths.iter().map(|p| p.to_string()).collect(),
                        },
                    }],
                    ..Default::default()
                }],
                ..Default::default()
            },
        )
    }

    #[test]
    fn hash_ignores_list_order() {
        let a = policy("default", &["GET", "POST"], &["/headers"]);
        let b = policy("default", &["POST", "GET"], &["/headers"]);
        assert_eq!(
            policy_hash(&a).expect("hashable"),
            policy_hash(&b).expect("hashable")
        );
    }

    #[test]
    fn hash_depends_on_namespace_and_content() {
        let base = policy("default", &["GET"], &["/headers"]);
        let moved = policy("other", &["GET"], &["/headers"]);
        let changed = policy("default", &["GET"], &["/ip"]);
        let h = policy_hash(&base).expect("hashable");
        assert_ne!(h, policy_hash(&moved).expect("hashable"));
        assert_ne!(h, policy_hash(&changed).expect("hashable"));
        assert_eq!(h.len(), 16);
    }

    #[test]
    fn labels_produce_the_key() {
        let mut ap = policy("default", &["GET"], &["/headers"]);
        add_hash_labels(&mut ap, 2).expect("hashable");

        let key = hash_key(&ap.metadata).expect("labelled");
        assert!(key.ends_with(":2"));
        assert!(key.starts_with(&policy_hash(&ap).expect("hashable")));
    }

    #[test]
    fn missing_label_has_no_key() {
        let mut ap = policy("default", &["GET"], &["/headers"]);
        assert_eq!(hash_key(&ap.metadata), None);

        ap.metadata
            .labels
            .insert(HASH_LABEL.to_string(), "abc".to_string());
        assert_eq!(hash_key(&ap.metadata), None);
    }
}
