//! Desired-state creators, one per child kind
//!
//! Each creator turns a [`ReconcileInput`] into the objects of its kind and
//! knows how to key them. The processors built here wrap them in the generic
//! [`Processor`].

mod access_rule;
mod authorization_policy;
mod request_authentication;
mod virtual_service;

pub use access_rule::AccessRuleCreator;
pub use authorization_policy::AuthorizationPolicyCreator;
pub use request_authentication::RequestAuthenticationCreator;
pub use virtual_service::VirtualServiceCreator;

use apigate_common::crd::Rule;

use crate::access_strategy::{is_jwt_secured, is_secured};
use crate::processing::{ChildKind, HandlerMode, Processor, ReconcileInput, ReconciliationProcessor};

/// Processor for one child kind
pub fn processor_for(kind: ChildKind) -> Box<dyn ReconciliationProcessor> {
    match kind {
        ChildKind::VirtualService => Box::new(Processor::new(VirtualServiceCreator)),
        ChildKind::AccessRule => Box::new(Processor::new(AccessRuleCreator)),
        ChildKind::AuthorizationPolicy => Box::new(Processor::new(AuthorizationPolicyCreator)),
        ChildKind::RequestAuthentication => {
            Box::new(Processor::new(RequestAuthenticationCreator))
        }
    }
}

/// Processors for every kind a mode manages, in status order
pub fn processors_for(mode: HandlerMode) -> Vec<Box<dyn ReconciliationProcessor>> {
    mode.child_kinds().iter().copied().map(processor_for).collect()
}

/// Oathkeeper handles every secured rule: Ory mode, or a migration whose
/// marker is not set yet
pub(crate) fn oathkeeper_handles_all(input: &ReconcileInput) -> bool {
    match input.mode {
        HandlerMode::Ory => true,
        HandlerMode::Migration => !input.migration_marker,
        HandlerMode::Istio => false,
    }
}

/// Every secured rule keeps an Oathkeeper Rule. During a migration the Rules
/// stay after the VirtualService has switched, so no request reaches a route
/// whose Rule is already gone.
pub(crate) fn keeps_all_access_rules(input: &ReconcileInput) -> bool {
    matches!(input.mode, HandlerMode::Ory | HandlerMode::Migration)
}

/// Requests for `rule` pass through the Oathkeeper proxy
pub(crate) fn routes_via_oathkeeper(input: &ReconcileInput, rule: &Rule) -> bool {
    is_secured(rule) && (oathkeeper_handles_all(input) || !is_jwt_secured(rule))
}

#[cfg(test)]
mod tests {
    use super::*;
    use apigate_common::crd::{APIRuleSpec, Handler};

    use crate::access_strategy::{JWT, NOOP, NO_AUTH};
    use crate::config::ReconcileConfig;

    fn rule(handler: &str) -> Rule {
        Rule {
            path: "/headers".to_string(),
            access_strategies: vec![Handler::named(handler)],
            ..Default::default()
        }
    }

    fn input(mode: HandlerMode, marker: bool) -> ReconcileInput {
        let mut input = ReconcileInput::new(
            "httpbin",
            "default",
            APIRuleSpec::default(),
            ReconcileConfig::default(),
        );
        input.mode = mode;
        input.migration_marker = marker;
        input
    }

    #[test]
    fn processors_follow_mode_kinds() {
        let kinds: Vec<ChildKind> = processors_for(HandlerMode::Ory)
            .iter()
            .map(|p| p.kind())
            .collect();
        assert_eq!(kinds, vec![ChildKind::VirtualService, ChildKind::AccessRule]);
        assert_eq!(processors_for(HandlerMode::Istio).len(), 4);
    }

    #[test]
    fn jwt_goes_through_oathkeeper_only_when_it_handles_everything() {
        assert!(routes_via_oathkeeper(&input(HandlerMode::Ory, false), &rule(JWT)));
        assert!(!routes_via_oathkeeper(&input(HandlerMode::Istio, false), &rule(JWT)));
        assert!(routes_via_oathkeeper(&input(HandlerMode::Migration, false), &rule(JWT)));
        assert!(!routes_via_oathkeeper(&input(HandlerMode::Migration, true), &rule(JWT)));
    }

    #[test]
    fn migration_keeps_access_rules_on_both_sides_of_the_marker() {
        assert!(keeps_all_access_rules(&input(HandlerMode::Migration, false)));
        assert!(keeps_all_access_rules(&input(HandlerMode::Migration, true)));
        assert!(keeps_all_access_rules(&input(HandlerMode::Ory, false)));
        assert!(!keeps_all_access_rules(&input(HandlerMode::Istio, false)));
    }

    #[test]
    fn oathkeeper_handlers_stay_proxied_under_istio() {
        assert!(routes_via_oathkeeper(&input(HandlerMode::Istio, false), &rule(NOOP)));
        assert!(!routes_via_oathkeeper(&input(HandlerMode::Istio, false), &rule(NO_AUTH)));
    }
}
