//! Child resource types generated from an APIRule
//!
//! - [`VirtualService`]: routing for the exposed host
//! - [`AccessRule`]: Oathkeeper proxy rule for secured paths
//! - [`AuthorizationPolicy`]: who may call which path (Istio)
//! - [`RequestAuthentication`]: which tokens are accepted (Istio)

pub mod istio;
pub mod oathkeeper;
pub mod virtual_service;

pub use istio::{
    AuthorizationCondition, AuthorizationOperation, AuthorizationPolicy, AuthorizationPolicySpec,
    AuthorizationRule, AuthorizationSource, JwtRule, OperationSpec, RequestAuthentication,
    RequestAuthenticationSpec, SourceSpec, WorkloadSelector,
};
pub use oathkeeper::{AccessRule, AccessRuleSpec, Match, Upstream};
pub use virtual_service::{
    CorsPolicy, Destination, HeaderOperations, Headers, HttpMatchRequest, HttpRoute,
    HttpRouteDestination, PortSelector, StringMatch, VirtualService, VirtualServiceSpec,
};
