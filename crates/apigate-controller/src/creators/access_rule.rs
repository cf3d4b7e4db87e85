//! Oathkeeper Rule creator
//!
//! One Rule per rule that Oathkeeper proxies. The key is the match URL;
//! when two rules share a path the methods are added to keep keys unique.

use std::collections::BTreeMap;

use apigate_common::crd::{Handler, OryJwtConfig, Rule};
use apigate_common::policy::{AccessRule, AccessRuleSpec, Match, Upstream};
use apigate_common::Error;

use super::keeps_all_access_rules;
use crate::access_strategy::{
    is_secured, oathkeeper_strategies, AccessStrategy, JwtStrategy, ALLOW, JWT,
};
use crate::processing::{ChildKind, ChildObject, Creator, ReconcileInput};

/// Builds Oathkeeper Rules for an APIRule
#[derive(Clone, Copy, Debug, Default)]
pub struct AccessRuleCreator;

impl Creator for AccessRuleCreator {
    fn kind(&self) -> ChildKind {
        ChildKind::AccessRule
    }

    fn create(&self, input: &ReconcileInput) -> Result<BTreeMap<String, ChildObject>, Error> {
        let host = input
            .host()
            .ok_or_else(|| Error::validation_for_field(".spec.host", "Host was nil"))?;
        let all_secured = keeps_all_access_rules(input);

        let mut desired = BTreeMap::new();
        for rule in &input.spec.rules {
            if !is_secured(rule) {
                continue;
            }
            let authenticators = if all_secured {
                ory_authenticators(rule)?
            } else {
                oathkeeper_strategies(rule)
            };
            if authenticators.is_empty() {
                continue;
            }

            let access_rule = AccessRule::new(
                input.owned_child_meta(&input.namespace),
                AccessRuleSpec {
                    upstream: Upstream {
                        url: upstream_url(input, rule)?,
                        ..Default::default()
                    },
                    matcher: Match {
                        url: format!("<http|https>://{host}<{}>", rule.path),
                        methods: rule.methods.clone(),
                    },
                    authenticators,
                    authorizer: Some(Handler::named(ALLOW)),
                    mutators: rule.mutators.clone(),
                },
            );
            let key = access_rule_key(input, &access_rule);
            desired.insert(key, ChildObject::AccessRule(access_rule));
        }
        Ok(desired)
    }

    fn key(&self, input: &ReconcileInput, object: &ChildObject) -> Option<String> {
        match object {
            ChildObject::AccessRule(rule) => Some(access_rule_key(input, rule)),
            _ => None,
        }
    }
}

fn access_rule_key(input: &ReconcileInput, rule: &AccessRule) -> String {
    if input.spec.has_path_duplicates() {
        format!("{}:{}", rule.spec.matcher.url, rule.spec.matcher.methods.join(","))
    } else {
        rule.spec.matcher.url.clone()
    }
}

fn upstream_url(input: &ReconcileInput, rule: &Rule) -> Result<String, Error> {
    Ok(format!(
        "http://{}:{}",
        input.backend_host(rule)?,
        input.service(rule)?.port
    ))
}

/// The rule's strategies as Oathkeeper authenticators.
///
/// Istio-shaped `jwt` configs are rewritten into the Oathkeeper shape so
/// tokens keep being accepted while a migration is in progress.
fn ory_authenticators(rule: &Rule) -> Result<Vec<Handler>, Error> {
    rule.access_strategies
        .iter()
        .map(|handler| match AccessStrategy::decode(handler)? {
            AccessStrategy::Jwt(JwtStrategy::Istio(config)) => {
                let ory = serde_json::to_value(OryJwtConfig::from_istio(&config))
                    .map_err(|e| Error::serialization_for_kind(JWT, e.to_string()))?;
                Ok(Handler::with_config(JWT, ory))
            }
            _ => Ok(handler.clone()),
        })
        .collect()
}
