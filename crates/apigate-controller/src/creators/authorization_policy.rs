//! AuthorizationPolicy creator
//!
//! Every rule gets one AuthorizationPolicy per JWT authorization entry, or a
//! single one when it has none. Policies carry hash and index labels; see
//! [`crate::processing::hashbased`] for how they are paired.

use std::collections::BTreeMap;

use apigate_common::crd::{JwtAuthorization, JwtConfig, Rule};
use apigate_common::policy::{
    AuthorizationCondition, AuthorizationOperation, AuthorizationPolicy, AuthorizationPolicySpec,
    AuthorizationRule, AuthorizationSource, OperationSpec, SourceSpec,
};
use apigate_common::Error;

use super::keeps_all_access_rules;
use crate::access_strategy::{is_jwt_secured, is_secured, istio_jwt};
use crate::processing::hashbased::{add_hash_labels, hash_key};
use crate::processing::{ChildKind, ChildObject, Creator, ReconcileInput};

/// Service account Oathkeeper forwards requests as
pub const OATHKEEPER_PRINCIPAL: &str = "cluster.local/ns/kyma-system/sa/oathkeeper-maester-account";

/// Service account of the Istio ingress gateway
pub const INGRESS_GATEWAY_PRINCIPAL: &str =
    "cluster.local/ns/istio-system/sa/istio-ingressgateway-service-account";

const SCOPE_CLAIM_KEYS: [&str; 3] = [
    "request.auth.claims[scp]",
    "request.auth.claims[scope]",
    "request.auth.claims[scopes]",
];

const AUDIENCE_CLAIM_KEY: &str = "request.auth.claims[aud]";

/// Builds AuthorizationPolicies for an APIRule
#[derive(Clone, Copy, Debug, Default)]
pub struct AuthorizationPolicyCreator;

impl Creator for AuthorizationPolicyCreator {
    fn kind(&self) -> ChildKind {
        ChildKind::AuthorizationPolicy
    }

    fn create(&self, input: &ReconcileInput) -> Result<BTreeMap<String, ChildObject>, Error> {
        let mut desired = BTreeMap::new();
        for rule in &input.spec.rules {
            let jwt = istio_jwt(rule).unwrap_or_default();
            let authorizations = if jwt.authorizations.is_empty() {
                vec![JwtAuthorization::default()]
            } else {
                jwt.authorizations.clone()
            };

            for (index, authorization) in authorizations.iter().enumerate() {
                let mut policy = AuthorizationPolicy::new(
                    input.owned_child_meta(&input.service_namespace(rule)),
                    AuthorizationPolicySpec {
                        selector: Some(input.workload_selector(rule)?),
                        action: String::new(),
                        rules: policy_rules(input, rule, &jwt, authorization),
                    },
                );
                add_hash_labels(&mut policy, index)?;
                if let Some(key) = hash_key(&policy.metadata) {
                    desired.insert(key, ChildObject::AuthorizationPolicy(policy));
                }
            }
        }
        Ok(desired)
    }

    fn key(&self, _input: &ReconcileInput, object: &ChildObject) -> Option<String> {
        hash_key(object.metadata())
    }
}

fn policy_rules(
    input: &ReconcileInput,
    rule: &Rule,
    jwt: &JwtConfig,
    authorization: &JwtAuthorization,
) -> Vec<AuthorizationRule> {
    let audiences = authorization.audiences.iter().map(|aud| AuthorizationCondition {
        key: AUDIENCE_CLAIM_KEY.to_string(),
        values: vec![aud.clone()],
    });

    if authorization.required_scopes.is_empty() {
        let mut base = base_rule(input, rule, jwt);
        base.when.extend(audiences);
        return vec![base];
    }

    SCOPE_CLAIM_KEYS
        .iter()
        .map(|scope_key| {
            let mut scoped = base_rule(input, rule, jwt);
            scoped
                .when
                .extend(authorization.required_scopes.iter().map(|scope| AuthorizationCondition {
                    key: scope_key.to_string(),
                    values: vec![scope.clone()],
                }));
            scoped.when.extend(audiences.clone());
            scoped
        })
        .collect()
}

fn base_rule(input: &ReconcileInput, rule: &Rule, jwt: &JwtConfig) -> AuthorizationRule {
    // AuthorizationPolicies have no regex paths
    let path = if rule.path == "/.*" { "/*" } else { rule.path.as_str() };

    AuthorizationRule {
        from: sources(input, rule, jwt),
        to: vec![AuthorizationOperation {
            operation: OperationSpec {
                methods: rule.methods.clone(),
                paths: vec![path.to_string()],
            },
        }],
        when: Vec::new(),
    }
}

fn sources(input: &ReconcileInput, rule: &Rule, jwt: &JwtConfig) -> Vec<AuthorizationSource> {
    if is_jwt_secured(rule) {
        let mut sources = vec![AuthorizationSource {
            source: SourceSpec {
                request_principals: jwt
                    .authentications
                    .iter()
                    .map(|authn| format!("{}/*", authn.issuer))
                    .collect(),
                ..Default::default()
            },
        }];
        // Oathkeeper may still proxy the rule while its Oathkeeper Rule exists
        if keeps_all_access_rules(input) {
            sources.push(principal(OATHKEEPER_PRINCIPAL));
        }
        sources
    } else if is_secured(rule) {
        vec![principal(OATHKEEPER_PRINCIPAL)]
    } else {
        vec![principal(INGRESS_GATEWAY_PRINCIPAL)]
    }
}

fn principal(name: &str) -> AuthorizationSource {
    AuthorizationSource {
        source: SourceSpec {
            principals: vec![name.to_string()],
            ..Default::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apigate_common::crd::{APIRuleSpec, Handler, Service};
    use apigate_common::{HASH_LABEL, INDEX_LABEL};
    use serde_json::{json, Value};

    use crate::access_strategy::{JWT, NOOP, NO_AUTH};
    use crate::config::ReconcileConfig;
    use crate::processing::HandlerMode;

    fn jwt(authorizations: Value) -> Handler {
        Handler::with_config(
            JWT,
            json!({
                "authentications": [{"issuer": "https://a.example/", "jwksUri": "https://a.example/jwks"}],
                "authorizations": authorizations
            }),
        )
    }

    fn rule(path: &str, handler: Handler) -> Rule {
        Rule {
            path: path.to_string(),
            methods: vec!["GET".to_string()],
            access_strategies: vec![handler],
            ..Default::default()
        }
    }

    fn input(rules: Vec<Rule>) -> ReconcileInput {
        let spec = APIRuleSpec {
            host: Some("httpbin.example.com".to_string()),
            service: Some(Service {
                name: "httpbin".to_string(),
                namespace: None,
                port: 8000,
                is_external: None,
            }),
            rules,
            ..Default::default()
        };
        let mut input = ReconcileInput::new("httpbin", "default", spec, ReconcileConfig::default());
        input.mode = HandlerMode::Istio;
        input
    }

    fn policies(input: &ReconcileInput) -> Vec<AuthorizationPolicy> {
        let desired = AuthorizationPolicyCreator.create(input).expect("creatable");
        let mut out: Vec<AuthorizationPolicy> = desired
            .into_values()
            .map(|o| match o {
                ChildObject::AuthorizationPolicy(ap) => ap,
                other => panic!("unexpected kind {:?}", other.kind()),
            })
            .collect();
        out.sort_by_key(|ap| ap.metadata.labels.get(INDEX_LABEL).cloned());
        out
    }

    // ==========================================================================
    // Sources
    // ==========================================================================

    #[test]
    fn jwt_rule_requires_issuer_principal() {
        let aps = policies(&input(vec![rule("/headers", jwt(json!([])))]));
        assert_eq!(aps.len(), 1);

        let ap_rule = &aps[0].spec.rules[0];
        assert_eq!(ap_rule.from[0].source.request_principals, vec!["https://a.example/*"]);
        assert_eq!(ap_rule.to[0].operation.methods, vec!["GET"]);
        assert_eq!(ap_rule.to[0].operation.paths, vec!["/headers"]);
        assert!(ap_rule.when.is_empty());
        assert_eq!(aps[0].metadata.labels.get(INDEX_LABEL).map(String::as_str), Some("0"));
        assert!(aps[0].metadata.labels.contains_key(HASH_LABEL));
    }

    #[test]
    fn unsecured_and_oathkeeper_rules_use_service_principals() {
        let aps = policies(&input(vec![rule("/ip", Handler::named(NO_AUTH))]));
        assert_eq!(
            aps[0].spec.rules[0].from[0].source.principals,
            vec![INGRESS_GATEWAY_PRINCIPAL]
        );

        let aps = policies(&input(vec![rule("/ip", Handler::named(NOOP))]));
        assert_eq!(
            aps[0].spec.rules[0].from[0].source.principals,
            vec![OATHKEEPER_PRINCIPAL]
        );
    }

    #[test]
    fn migrating_jwt_rule_also_admits_oathkeeper() {
        let mut input = input(vec![rule("/headers", jwt(json!([])))]);
        input.mode = HandlerMode::Migration;
        for marker in [false, true] {
            input.migration_marker = marker;
            let aps = policies(&input);
            let from = &aps[0].spec.rules[0].from;
            assert_eq!(from.len(), 2);
            assert_eq!(from[1].source.principals, vec![OATHKEEPER_PRINCIPAL]);
        }

        input.mode = HandlerMode::Istio;
        assert_eq!(policies(&input)[0].spec.rules[0].from.len(), 1);
    }

    // ==========================================================================
    // Conditions
    // ==========================================================================

    #[test]
    fn required_scopes_expand_to_one_rule_per_claim_key() {
        let aps = policies(&input(vec![rule(
            "/headers",
            jwt(json!([{"requiredScopes": ["read", "write"], "audiences": ["app"]}])),
        )]));
        let rules = &aps[0].spec.rules;
        assert_eq!(rules.len(), 3);

        let keys: Vec<&str> = rules.iter().map(|r| r.when[0].key.as_str()).collect();
        assert_eq!(keys, SCOPE_CLAIM_KEYS.to_vec());
        for r in rules {
            assert_eq!(r.when.len(), 3);
            assert_eq!(r.when[2].key, AUDIENCE_CLAIM_KEY);
            assert_eq!(r.when[2].values, vec!["app"]);
        }
    }

    #[test]
    fn audiences_alone_add_conditions_to_a_single_rule() {
        let aps = policies(&input(vec![rule("/headers", jwt(json!([{"audiences": ["a", "b"]}])))]));
        let rules = &aps[0].spec.rules;
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].when.len(), 2);
    }

    #[test]
    fn regex_catch_all_becomes_wildcard() {
        let aps = policies(&input(vec![rule("/.*", Handler::named(NO_AUTH))]));
        assert_eq!(aps[0].spec.rules[0].to[0].operation.paths, vec!["/*"]);
    }

    // ==========================================================================
    // Identity
    // ==========================================================================

    #[test]
    fn each_authorization_gets_its_own_index() {
        let aps = policies(&input(vec![rule(
            "/headers",
            jwt(json!([{"audiences": ["a"]}, {"audiences": ["b"]}])),
        )]));
        let indices: Vec<&str> = aps
            .iter()
            .map(|ap| ap.metadata.labels[INDEX_LABEL].as_str())
            .collect();
        assert_eq!(indices, vec!["0", "1"]);
    }

    /// Story: an authorization inserted in front shifts every later policy
    #[test]
    fn story_inserting_authorization_changes_following_keys() {
        let before = input(vec![rule(
            "/headers",
            jwt(json!([{"audiences": ["a"]}, {"audiences": ["b"]}])),
        )]);
        let after = input(vec![rule(
            "/headers",
            jwt(json!([{"audiences": ["new"]}, {"audiences": ["a"]}, {"audiences": ["b"]}])),
        )]);

        let old_keys: Vec<String> = AuthorizationPolicyCreator
            .create(&before)
            .expect("creatable")
            .into_keys()
            .collect();
        let new_keys: Vec<String> = AuthorizationPolicyCreator
            .create(&after)
            .expect("creatable")
            .into_keys()
            .collect();

        assert_eq!(new_keys.len(), 3);
        assert!(old_keys.iter().all(|k| !new_keys.contains(k)));
    }

    #[test]
    fn unlabelled_actual_has_no_key() {
        let input = input(vec![]);
        let legacy = AuthorizationPolicy::new(
            input.child_meta("default"),
            AuthorizationPolicySpec::default(),
        );
        assert_eq!(
            AuthorizationPolicyCreator.key(&input, &ChildObject::AuthorizationPolicy(legacy)),
            None
        );
    }
}
