//! APIRule schema conversion between v1beta1 and v2alpha1
//!
//! Both directions are pure. Anything the target schema cannot express is
//! reported as [`NotRepresentable`] instead of being dropped.

use std::collections::BTreeMap;

use thiserror::Error;

use apigate_common::crd::v2alpha1::{APIRuleSpecV2Alpha1, APIRuleStatusV2Alpha1, RuleV2Alpha1, State};
use apigate_common::crd::{APIRuleSpec, APIRuleStatus, Handler, Rule, StatusCode};
use apigate_common::ORIGINAL_VERSION_ANNOTATION;

use crate::access_strategy::{AccessStrategy, JwtStrategy, JWT, NO_AUTH};

/// Why an APIRule cannot be expressed in the other schema version
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotRepresentable {
    /// v1beta1 carries a single host
    #[error("v1beta1 supports a single host, got {0}")]
    MultipleHosts(usize),
    /// No host at all
    #[error("APIRule has no host")]
    NoHost,
    /// v2alpha1 only knows `noAuth` and `jwt`
    #[error("rule {path}: handler {handler} has no v2alpha1 equivalent")]
    UnsupportedHandler {
        /// Rule path
        path: String,
        /// Handler name
        handler: String,
    },
    /// Oathkeeper-shaped JWT config
    #[error("rule {path}: Oathkeeper jwt config has no v2alpha1 equivalent")]
    OryJwt {
        /// Rule path
        path: String,
    },
    /// A v2alpha1 rule without `noAuth` or `jwt`
    #[error("rule {path}: neither noAuth nor jwt is set")]
    NoAccess {
        /// Rule path
        path: String,
    },
}

impl From<NotRepresentable> for apigate_common::Error {
    fn from(e: NotRepresentable) -> Self {
        apigate_common::Error::conversion(e.to_string())
    }
}

/// Convert a v1beta1 spec to v2alpha1
pub fn to_v2alpha1(spec: &APIRuleSpec) -> Result<APIRuleSpecV2Alpha1, NotRepresentable> {
    let host = spec.host.clone().ok_or(NotRepresentable::NoHost)?;
    let rules = spec
        .rules
        .iter()
        .map(rule_to_v2alpha1)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(APIRuleSpecV2Alpha1 {
        hosts: vec![host],
        service: spec.service.clone(),
        gateway: spec.gateway.clone(),
        cors_policy: spec.cors_policy.clone(),
        rules,
        timeout: spec.timeout,
    })
}

fn rule_to_v2alpha1(rule: &Rule) -> Result<RuleV2Alpha1, NotRepresentable> {
    let mut out = RuleV2Alpha1 {
        path: rule.path.clone(),
        service: rule.service.clone(),
        methods: rule.methods.clone(),
        no_auth: None,
        jwt: None,
        mutators: rule.mutators.clone(),
        timeout: rule.timeout,
    };

    for handler in &rule.access_strategies {
        match AccessStrategy::decode(handler) {
            Ok(AccessStrategy::NoAuth) => out.no_auth = Some(true),
            Ok(AccessStrategy::Jwt(JwtStrategy::Istio(config))) => out.jwt = Some(config),
            Ok(AccessStrategy::Jwt(JwtStrategy::Ory(_))) | Err(_) if handler.handler == JWT => {
                return Err(NotRepresentable::OryJwt {
                    path: rule.path.clone(),
                })
            }
            _ => {
                return Err(NotRepresentable::UnsupportedHandler {
                    path: rule.path.clone(),
                    handler: handler.handler.clone(),
                })
            }
        }
    }
    Ok(out)
}

/// Convert a v2alpha1 spec to v1beta1.
///
/// Returns the spec and the annotations to set on the converted object,
/// which record the version it was authored in.
pub fn to_v1beta1(
    spec: &APIRuleSpecV2Alpha1,
    annotations: &BTreeMap<String, String>,
) -> Result<(APIRuleSpec, BTreeMap<String, String>), NotRepresentable> {
    let host = match spec.hosts.as_slice() {
        [] => return Err(NotRepresentable::NoHost),
        [host] => host.clone(),
        hosts => return Err(NotRepresentable::MultipleHosts(hosts.len())),
    };
    let rules = spec
        .rules
        .iter()
        .map(rule_to_v1beta1)
        .collect::<Result<Vec<_>, _>>()?;

    let mut annotations = annotations.clone();
    annotations.insert(ORIGINAL_VERSION_ANNOTATION.to_string(), "v2alpha1".to_string());

    Ok((
        APIRuleSpec {
            host: Some(host),
            service: spec.service.clone(),
            gateway: spec.gateway.clone(),
            cors_policy: spec.cors_policy.clone(),
            rules,
            timeout: spec.timeout,
        },
        annotations,
    ))
}

fn rule_to_v1beta1(rule: &RuleV2Alpha1) -> Result<Rule, NotRepresentable> {
    let mut access_strategies = Vec::new();
    if rule.no_auth == Some(true) {
        access_strategies.push(Handler::named(NO_AUTH));
    }
    if let Some(jwt) = &rule.jwt {
        let config = serde_json::to_value(jwt).map_err(|_| NotRepresentable::NoAccess {
            path: rule.path.clone(),
        })?;
        access_strategies.push(Handler::with_config(JWT, config));
    }
    if access_strategies.is_empty() {
        return Err(NotRepresentable::NoAccess {
            path: rule.path.clone(),
        });
    }

    Ok(Rule {
        path: rule.path.clone(),
        service: rule.service.clone(),
        methods: rule.methods.clone(),
        access_strategies,
        mutators: rule.mutators.clone(),
        timeout: rule.timeout,
    })
}

/// v2alpha1 state for a v1beta1 status code
pub fn state_for(code: StatusCode) -> State {
    match code {
        StatusCode::Ok => State::Ready,
        StatusCode::Error => State::Error,
        StatusCode::Warning | StatusCode::Skipped => State::Warning,
    }
}

/// v1beta1 status code for a v2alpha1 state
pub fn code_for(state: State) -> StatusCode {
    match state {
        State::Ready => StatusCode::Ok,
        State::Error => StatusCode::Error,
        State::Warning => StatusCode::Warning,
        State::Processing => StatusCode::Skipped,
    }
}

/// v2alpha1 view of a v1beta1 status
pub fn status_to_v2alpha1(status: &APIRuleStatus) -> APIRuleStatusV2Alpha1 {
    let (state, description) = match &status.api_rule_status {
        Some(s) => (state_for(s.code), s.description.clone()),
        None => (State::Processing, String::new()),
    };
    APIRuleStatusV2Alpha1 {
        state,
        description,
        last_processed_time: status.last_processed_time.clone(),
    }
}
