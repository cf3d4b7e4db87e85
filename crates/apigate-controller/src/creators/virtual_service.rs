//! VirtualService creator
//!
//! One VirtualService per APIRule, routing the exposed host through the
//! configured gateway. Each route either goes straight to the backend or to
//! the Oathkeeper proxy, depending on the handler mode and the rule's
//! access strategies.

use std::collections::{BTreeMap, BTreeSet};

use apigate_common::crd::{self, Rule};
use apigate_common::policy::{
    CorsPolicy, Destination, HeaderOperations, Headers, HttpMatchRequest, HttpRoute,
    HttpRouteDestination, PortSelector, StringMatch, VirtualService, VirtualServiceSpec,
};
use apigate_common::Error;

use super::routes_via_oathkeeper;
use crate::access_strategy::is_no_auth;
use crate::processing::{ChildKind, ChildObject, Creator, HandlerMode, ReconcileInput};

/// Route timeout when neither the rule nor the spec sets one
pub const DEFAULT_TIMEOUT_SECS: u32 = 180;

const FORWARDED_HOST_HEADER: &str = "x-forwarded-host";

/// There is exactly one VirtualService per APIRule
const VIRTUAL_SERVICE_KEY: &str = "virtualservice";

/// Builds the VirtualService for an APIRule
#[derive(Clone, Copy, Debug, Default)]
pub struct VirtualServiceCreator;

impl Creator for VirtualServiceCreator {
    fn kind(&self) -> ChildKind {
        ChildKind::VirtualService
    }

    fn create(&self, input: &ReconcileInput) -> Result<BTreeMap<String, ChildObject>, Error> {
        let host = input
            .host()
            .ok_or_else(|| Error::validation_for_field(".spec.host", "Host was nil"))?;

        let collapse_paths = input.mode == HandlerMode::Ory;
        let mut seen_paths = BTreeSet::new();
        let mut http = Vec::with_capacity(input.spec.rules.len());
        for rule in &input.spec.rules {
            if collapse_paths && !seen_paths.insert(rule.path.as_str()) {
                continue;
            }
            http.push(route(input, rule, &host)?);
        }

        let vs = VirtualService::new(
            input.owned_child_meta(&input.namespace),
            VirtualServiceSpec {
                hosts: vec![host],
                gateways: input.spec.gateway.iter().cloned().collect(),
                http,
            },
        );
        Ok(BTreeMap::from([(
            VIRTUAL_SERVICE_KEY.to_string(),
            ChildObject::VirtualService(vs),
        )]))
    }

    fn key(&self, _input: &ReconcileInput, _object: &ChildObject) -> Option<String> {
        Some(VIRTUAL_SERVICE_KEY.to_string())
    }
}

fn route(input: &ReconcileInput, rule: &Rule, host: &str) -> Result<HttpRoute, Error> {
    let destination = if routes_via_oathkeeper(input, rule) {
        Destination {
            host: input.config.oathkeeper_svc.clone(),
            port: Some(PortSelector {
                number: input.config.oathkeeper_port,
            }),
        }
    } else {
        Destination {
            host: input.backend_host(rule)?,
            port: Some(PortSelector {
                number: input.service(rule)?.port,
            }),
        }
    };

    let restrict_methods = input.mode != HandlerMode::Ory || is_no_auth(rule);
    let method = (restrict_methods && !rule.methods.is_empty())
        .then(|| StringMatch::Regex(format!("^({})$", rule.methods.join("|"))));

    let timeout = rule
        .timeout
        .or(input.spec.timeout)
        .map(u32::from)
        .unwrap_or(DEFAULT_TIMEOUT_SECS);

    Ok(HttpRoute {
        matches: vec![HttpMatchRequest {
            uri: Some(uri_match(&rule.path)),
            method,
        }],
        route: vec![HttpRouteDestination {
            destination,
            weight: None,
        }],
        cors_policy: Some(cors_policy(input)),
        headers: Some(Headers {
            request: Some(HeaderOperations {
                set: BTreeMap::from([(FORWARDED_HOST_HEADER.to_string(), host.to_string())]),
            }),
        }),
        timeout: Some(format!("{timeout}s")),
    })
}

fn uri_match(path: &str) -> StringMatch {
    if path == "/*" {
        StringMatch::Prefix("/".to_string())
    } else {
        StringMatch::Regex(path.to_string())
    }
}

fn cors_policy(input: &ReconcileInput) -> CorsPolicy {
    match &input.spec.cors_policy {
        Some(policy) => from_spec_cors(policy),
        None => {
            let defaults = &input.config.cors;
            CorsPolicy {
                allow_origins: defaults.allow_origins.clone(),
                allow_methods: defaults.allow_methods.clone(),
                allow_headers: defaults.allow_headers.clone(),
                ..Default::default()
            }
        }
    }
}

fn from_spec_cors(policy: &crd::CorsPolicy) -> CorsPolicy {
    CorsPolicy {
        allow_origins: policy
            .allow_origins
            .iter()
            .filter_map(|origin| {
                origin.iter().find_map(|(kind, value)| match kind.as_str() {
                    "exact" => Some(StringMatch::Exact(value.clone())),
                    "prefix" => Some(StringMatch::Prefix(value.clone())),
                    "regex" => Some(StringMatch::Regex(value.clone())),
                    _ => None,
                })
            })
            .collect(),
        allow_methods: policy.allow_methods.clone(),
        allow_headers: policy.allow_headers.clone(),
        expose_headers: policy.expose_headers.clone(),
        allow_credentials: policy.allow_credentials,
        max_age: policy.max_age.map(|secs| format!("{secs}s")),
    }
}
