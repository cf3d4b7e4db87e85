//! APIRule validation
//!
//! Validation runs before anything is read or written. Any failure skips the
//! whole pass: every sub-status becomes SKIPPED and the parent carries the
//! formatted failures.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use serde_json::Value;

#[cfg(test)]
use mockall::automock;

use apigate_common::crd::{Handler, JwtAuthentication, JwtConfig, OryJwtConfig, Rule};

use crate::access_strategy::{AccessStrategy, Security, JWT, KNOWN_HANDLERS, NO_AUTH};
use crate::processing::ReconcileInput;

/// A problem with one attribute of the APIRule
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Failure {
    /// Path of the offending attribute, e.g. `.spec.rules[0].accessStrategies[1].handler`
    pub attribute_path: String,
    /// What is wrong
    pub message: String,
}

impl Failure {
    /// Create a failure
    pub fn new(attribute_path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            attribute_path: attribute_path.into(),
            message: message.into(),
        }
    }
}

/// Validates the input of one pass
#[cfg_attr(test, automock)]
pub trait Validator: Send + Sync {
    /// All failures; empty when the APIRule is valid
    fn validate(&self, input: &ReconcileInput) -> Vec<Failure>;
}

/// Default APIRule validator. JWT configs are checked against the handler mode.
#[derive(Clone, Copy, Debug, Default)]
pub struct ApiRuleValidator;

impl Validator for ApiRuleValidator {
    fn validate(&self, input: &ReconcileInput) -> Vec<Failure> {
        let mut failures = validate_host(input);
        failures.extend(validate_rules(input));
        failures
    }
}

fn validate_host(input: &ReconcileInput) -> Vec<Failure> {
    const PATH: &str = ".spec.host";
    match input.spec.host.as_deref() {
        None => vec![Failure::new(PATH, "Host was nil")],
        Some(host) if !host.contains('.') && input.config.default_domain.is_none() => {
            vec![Failure::new(
                PATH,
                "Host does not contain a domain name and no default domain name is configured",
            )]
        }
        Some(_) => Vec::new(),
    }
}

fn validate_rules(input: &ReconcileInput) -> Vec<Failure> {
    const PATH: &str = ".spec.rules";
    let rules = &input.spec.rules;
    if rules.is_empty() {
        return vec![Failure::new(PATH, "No rules defined")];
    }

    let mut failures = Vec::new();
    if has_path_and_method_duplicates(rules) {
        failures.push(Failure::new(
            PATH,
            "multiple rules defined for the same path and method",
        ));
    }

    let check_service = input.spec.service.is_none();
    for (i, rule) in rules.iter().enumerate() {
        let rule_path = format!("{PATH}[{i}]");
        if check_service && rule.service.is_none() {
            failures.push(Failure::new(
                format!("{rule_path}.service"),
                "No service defined with no main service on spec level",
            ));
            continue;
        }
        failures.extend(validate_access_strategies(
            &format!("{rule_path}.accessStrategies"),
            rule,
            input.mode.is_istio(),
        ));
    }

    if input.mode.is_istio() {
        failures.extend(validate_issuer_consistency(rules));
    }
    failures
}

/// Two rules on the same path share a method, or neither lists methods
fn has_path_and_method_duplicates(rules: &[Rule]) -> bool {
    let mut seen = BTreeSet::new();
    rules.iter().any(|rule| {
        if rule.methods.is_empty() {
            !seen.insert(rule.path.clone())
        } else {
            rule.methods
                .iter()
                .any(|m| !seen.insert(format!("{}:{m}", rule.path)))
        }
    })
}

fn validate_access_strategies(path: &str, rule: &Rule, istio: bool) -> Vec<Failure> {
    let strategies = &rule.access_strategies;
    if strategies.is_empty() {
        return vec![Failure::new(path, "No accessStrategies defined")];
    }

    let mut failures = Vec::new();

    let securities: Vec<Security> = strategies
        .iter()
        .filter_map(|s| AccessStrategy::decode(s).ok())
        .filter_map(|s| s.security())
        .collect();
    if securities.contains(&Security::Secure) && securities.contains(&Security::Unsecure) {
        failures.push(Failure::new(
            path,
            "Secure access strategies cannot be used in combination with unsecure access strategies",
        ));
    }

    if strategies.len() > 1 {
        if let Some(k) = strategies.iter().position(|s| s.handler == NO_AUTH) {
            failures.push(Failure::new(
                format!("{path}[{k}].handler"),
                format!("{NO_AUTH} access strategy is not allowed in combination with other access strategies"),
            ));
        }
    }

    for (j, strategy) in strategies.iter().enumerate() {
        let strategy_path = format!("{path}[{j}]");
        if !KNOWN_HANDLERS.contains(&strategy.handler.as_str()) {
            failures.push(Failure::new(
                format!("{strategy_path}.handler"),
                format!("Unsupported accessStrategy: {}", strategy.handler),
            ));
            continue;
        }
        if strategy.handler == JWT {
            failures.extend(if istio {
                validate_istio_jwt(&strategy_path, strategy)
            } else {
                validate_ory_jwt(&strategy_path, strategy)
            });
        }
    }
    failures
}

fn config_is_empty(config: Option<&Value>) -> bool {
    match config {
        None | Some(Value::Null) => true,
        Some(Value::Object(map)) => map.is_empty(),
        Some(_) => false,
    }
}

fn decode_failure<T>(path: &str, result: serde_json::Result<T>) -> Result<T, Failure> {
    result.map_err(|e| Failure::new(format!("{path}.config"), format!("Can't read json: {e}")))
}

fn validate_istio_jwt(path: &str, handler: &Handler) -> Vec<Failure> {
    let config = match handler.config.as_ref() {
        Some(c) if !config_is_empty(Some(c)) => c,
        _ => return vec![Failure::new(format!("{path}.config"), "supplied config cannot be empty")],
    };
    let istio: JwtConfig = match decode_failure(path, serde_json::from_value(config.clone())) {
        Ok(c) => c,
        Err(f) => return vec![f],
    };
    let ory: OryJwtConfig = match decode_failure(path, serde_json::from_value(config.clone())) {
        Ok(c) => c,
        Err(f) => return vec![f],
    };

    let mut failures = Vec::new();
    for (present, field) in [
        (!ory.jwks_urls.is_empty(), "jwks_urls"),
        (!ory.required_scope.is_empty(), "required_scopes"),
        (!ory.trusted_issuers.is_empty(), "trusted_issuers"),
    ] {
        if present {
            failures.push(Failure::new(
                format!("{path}.config.{field}"),
                format!("Configuration for {field} is not supported with Istio handler"),
            ));
        }
    }

    failures.extend(validate_authorizations(path, config));
    failures.extend(validate_authentications(path, &istio.authentications));
    failures
}

fn validate_authorizations(path: &str, raw: &Value) -> Vec<Failure> {
    let Some(authorizations) = raw.get("authorizations") else {
        return Vec::new();
    };
    let base = format!("{path}.config.authorizations");
    let Some(entries) = authorizations.as_array() else {
        return Vec::new();
    };
    if entries.is_empty() {
        return vec![Failure::new(base, "value is empty")];
    }

    let mut failures = Vec::new();
    for (i, entry) in entries.iter().enumerate() {
        if entry.is_null() {
            failures.push(Failure::new(format!("{base}[{i}]"), "authorization is empty"));
            continue;
        }
        for (field, singular) in [("requiredScopes", "scope"), ("audiences", "audience")] {
            let Some(values) = entry.get(field).and_then(Value::as_array) else {
                continue;
            };
            let message = if values.is_empty() {
                Some("value is empty".to_string())
            } else if values.iter().any(|v| v.as_str().is_some_and(str::is_empty)) {
                Some(format!("{singular} value is empty"))
            } else {
                None
            };
            if let Some(message) = message {
                failures.push(Failure::new(format!("{base}[{i}].{field}"), message));
            }
        }
    }
    failures
}

fn validate_authentications(path: &str, authentications: &[JwtAuthentication]) -> Vec<Failure> {
    if authentications.is_empty() {
        return vec![Failure::new(
            path,
            "Authentications are required when using JWT access handler",
        )];
    }

    let base = format!("{path}.config.authentications");
    let mut failures = Vec::new();
    let (mut has_headers, mut has_params) = (false, false);
    for (i, authn) in authentications.iter().enumerate() {
        if let Err(e) = validate_issuer(&authn.issuer) {
            failures.push(Failure::new(
                format!("{base}[{i}].issuer"),
                format!("value is empty or not a valid uri err={e}"),
            ));
        }
        if let Err(e) = validate_uri(&authn.jwks_uri) {
            failures.push(Failure::new(
                format!("{base}[{i}].jwksUri"),
                format!("value is empty or not a valid uri err={e}"),
            ));
        }

        const MIXTURE: &str = "mixture of multiple fromHeaders and fromParams is not supported";
        if !authn.from_headers.is_empty() {
            if has_params {
                failures.push(Failure::new(format!("{base}[{i}].fromHeaders"), MIXTURE));
            }
            has_headers = true;
        }
        if !authn.from_params.is_empty() {
            if has_headers {
                failures.push(Failure::new(format!("{base}[{i}].fromParams"), MIXTURE));
            }
            has_params = true;
        }
        if authn.from_headers.len() > 1 {
            failures.push(Failure::new(
                format!("{base}[{i}].fromHeaders"),
                "multiple fromHeaders are not supported",
            ));
        }
        if authn.from_params.len() > 1 {
            failures.push(Failure::new(
                format!("{base}[{i}].fromParams"),
                "multiple fromParams are not supported",
            ));
        }
    }
    failures
}

/// The same issuer and JWKS URI must be configured identically on every rule
fn validate_issuer_consistency(rules: &[Rule]) -> Vec<Failure> {
    let mut seen: BTreeMap<(String, String), JwtAuthentication> = BTreeMap::new();
    let mut failures = Vec::new();
    for (i, rule) in rules.iter().enumerate() {
        for (j, strategy) in rule.access_strategies.iter().enumerate() {
            let Some(Ok(config)) = strategy
                .config
                .clone()
                .map(serde_json::from_value::<JwtConfig>)
            else {
                continue;
            };
            for (k, authn) in config.authentications.into_iter().enumerate() {
                let key = (authn.issuer.clone(), authn.jwks_uri.clone());
                match seen.get(&key) {
                    Some(existing) if *existing != authn => failures.push(Failure::new(
                        format!(".spec.rules[{i}].accessStrategies[{j}].config.authentications[{k}]"),
                        "multiple jwt configurations that differ for the same issuer",
                    )),
                    Some(_) => {}
                    None => {
                        seen.insert(key, authn);
                    }
                }
            }
        }
    }
    failures
}

fn validate_ory_jwt(path: &str, handler: &Handler) -> Vec<Failure> {
    let config = match handler.config.as_ref() {
        Some(c) if !config_is_empty(Some(c)) => c,
        _ => return vec![Failure::new(format!("{path}.config"), "supplied config cannot be empty")],
    };
    let ory: OryJwtConfig = match decode_failure(path, serde_json::from_value(config.clone())) {
        Ok(c) => c,
        Err(f) => return vec![f],
    };
    let istio: JwtConfig = match decode_failure(path, serde_json::from_value(config.clone())) {
        Ok(c) => c,
        Err(f) => return vec![f],
    };

    if !istio.authentications.is_empty() {
        return vec![Failure::new(
            format!("{path}.config.authentications"),
            "Configuration for authentications is not supported with Ory handler",
        )];
    }

    let mut failures = Vec::new();
    for (field, values) in [
        ("trusted_issuers", &ory.trusted_issuers),
        ("jwks_urls", &ory.jwks_urls),
    ] {
        for (i, value) in values.iter().enumerate() {
            if let Err(e) = validate_uri(value) {
                failures.push(Failure::new(
                    format!("{path}.config.{field}[{i}]"),
                    format!("value is empty or not a valid uri err={e}"),
                ));
            }
        }
    }
    failures
}

fn validate_uri(value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err("value is empty".to_string());
    }
    url::Url::parse(value).map(|_| ()).map_err(|e| e.to_string())
}

/// Issuers only need to be URIs when they look like one
fn validate_issuer(issuer: &str) -> Result<(), String> {
    if issuer.is_empty() {
        return Err("value is empty".to_string());
    }
    if issuer.contains(':') {
        validate_uri(issuer)?;
    }
    Ok(())
}
