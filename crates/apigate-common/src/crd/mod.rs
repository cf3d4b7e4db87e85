//! Custom Resource Definitions for apigate
//!
//! The APIRule CRD (v1beta1), its JWT config shapes, and a v2alpha1 snapshot
//! used for schema conversion.

mod apirule;
mod jwt;
pub mod v2alpha1;

pub use apirule::{
    APIRule, APIRuleSpec, APIRuleStatus, CorsPolicy, Handler, ResourceStatus, Rule, Service,
    StatusCode,
};
pub use jwt::{JwtAuthentication, JwtAuthorization, JwtConfig, JwtHeader, OryJwtConfig};
