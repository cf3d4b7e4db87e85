//! RequestAuthentication creator
//!
//! One RequestAuthentication per rule with an Istio-style `jwt` strategy,
//! placed in the backend's namespace and selecting its pods. Rules that
//! target the same workload with the same issuers share one object.

use std::collections::BTreeMap;

use apigate_common::policy::{JwtRule, RequestAuthentication, RequestAuthenticationSpec};
use apigate_common::Error;

use crate::access_strategy::istio_jwt;
use crate::processing::{ChildKind, ChildObject, Creator, ReconcileInput};

const DEFAULT_NAMESPACE: &str = "default";

/// Builds RequestAuthentications for an APIRule
#[derive(Clone, Copy, Debug, Default)]
pub struct RequestAuthenticationCreator;

impl Creator for RequestAuthenticationCreator {
    fn kind(&self) -> ChildKind {
        ChildKind::RequestAuthentication
    }

    fn create(&self, input: &ReconcileInput) -> Result<BTreeMap<String, ChildObject>, Error> {
        let mut desired = BTreeMap::new();
        for rule in &input.spec.rules {
            let Some(config) = istio_jwt(rule) else {
                continue;
            };

            let jwt_rules = config
                .authentications
                .iter()
                .map(|authn| JwtRule {
                    issuer: authn.issuer.clone(),
                    jwks_uri: authn.jwks_uri.clone(),
                    from_headers: authn.from_headers.clone(),
                    from_params: authn.from_params.clone(),
                    forward_original_token: true,
                })
                .collect();

            let ra = RequestAuthentication::new(
                input.owned_child_meta(&input.service_namespace(rule)),
                RequestAuthenticationSpec {
                    selector: Some(input.workload_selector(rule)?),
                    jwt_rules,
                },
            );
            desired.insert(request_authentication_key(&ra), ChildObject::RequestAuthentication(ra));
        }
        Ok(desired)
    }

    fn key(&self, _input: &ReconcileInput, object: &ChildObject) -> Option<String> {
        match object {
            ChildObject::RequestAuthentication(ra) => Some(request_authentication_key(ra)),
            _ => None,
        }
    }
}

/// `selector:issuer:jwksUri[:issuer:jwksUri...]:namespace`
fn request_authentication_key(ra: &RequestAuthentication) -> String {
    let mut key = ra
        .spec
        .selector
        .as_ref()
        .map(|s| s.key())
        .unwrap_or_default();
    for rule in &ra.spec.jwt_rules {
        key.push(':');
        key.push_str(&rule.issuer);
        key.push(':');
        key.push_str(&rule.jwks_uri);
    }
    let namespace = if ra.metadata.namespace.is_empty() {
        DEFAULT_NAMESPACE
    } else {
        &ra.metadata.namespace
    };
    key.push(':');
    key.push_str(namespace);
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use apigate_common::crd::{APIRuleSpec, Handler, Rule, Service};
    use serde_json::json;

    use crate::access_strategy::{JWT, NO_AUTH};
    use crate::config::ReconcileConfig;
    use crate::processing::HandlerMode;

    fn jwt(issuer: &str) -> Handler {
        Handler::with_config(
            JWT,
            json!({"authentications": [{
                "issuer": issuer,
                "jwksUri": format!("{issuer}jwks"),
                "fromHeaders": [{"name": "x-token"}]
            }]}),
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

    fn authentications(desired: &BTreeMap<String, ChildObject>) -> Vec<&RequestAuthentication> {
        desired
            .values()
            .map(|o| match o {
                ChildObject::RequestAuthentication(ra) => ra,
                other => panic!("unexpected kind {:?}", other.kind()),
            })
            .collect()
    }

    #[test]
    fn jwt_rule_produces_one_request_authentication() {
        let input = input(vec![
            rule("/headers", jwt("https://a.example/")),
            rule("/ip", Handler::named(NO_AUTH)),
        ]);
        let desired = RequestAuthenticationCreator.create(&input).expect("creatable");
        let ras = authentications(&desired);
        assert_eq!(ras.len(), 1);

        let ra = ras[0];
        assert_eq!(ra.metadata.namespace, "default");
        assert_eq!(ra.spec.selector.as_ref().map(|s| s.key()).as_deref(), Some("app=httpbin"));
        let jwt_rule = &ra.spec.jwt_rules[0];
        assert_eq!(jwt_rule.issuer, "https://a.example/");
        assert_eq!(jwt_rule.jwks_uri, "https://a.example/jwks");
        assert_eq!(jwt_rule.from_headers[0].name, "x-token");
        assert!(jwt_rule.forward_original_token);

        assert!(desired.contains_key("app=httpbin:https://a.example/:https://a.example/jwks:default"));
    }

    #[test]
    fn identical_rules_share_one_object() {
        let input = input(vec![
            rule("/headers", jwt("https://a.example/")),
            rule("/ip", jwt("https://a.example/")),
        ]);
        let desired = RequestAuthenticationCreator.create(&input).expect("creatable");
        assert_eq!(desired.len(), 1);
    }

    #[test]
    fn service_namespace_moves_the_object_and_changes_the_key() {
        let mut moved = rule("/headers", jwt("https://a.example/"));
        moved.service = Some(Service {
            name: "httpbin".to_string(),
            namespace: Some("team-b".to_string()),
            port: 8000,
            is_external: None,
        });
        let input = input(vec![moved]);
        let desired = RequestAuthenticationCreator.create(&input).expect("creatable");
        let ras = authentications(&desired);
        assert_eq!(ras[0].metadata.namespace, "team-b");
        assert!(desired.keys().all(|k| k.ends_with(":team-b")));
    }

    #[test]
    fn actual_object_without_namespace_keys_as_default() {
        let input = input(vec![]);
        let mut ra = RequestAuthentication::new(
            input.child_meta(""),
            RequestAuthenticationSpec::default(),
        );
        ra.spec.jwt_rules.push(JwtRule {
            issuer: "https://a.example/".to_string(),
            jwks_uri: "https://a.example/jwks".to_string(),
            ..Default::default()
        });
        assert_eq!(
            RequestAuthenticationCreator
                .key(&input, &ChildObject::RequestAuthentication(ra))
                .as_deref(),
            Some(":https://a.example/:https://a.example/jwks:default")
        );
    }
}
