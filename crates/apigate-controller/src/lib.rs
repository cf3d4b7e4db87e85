//! APIRule reconciliation engine
//!
//! Derives VirtualServices, Oathkeeper Rules, AuthorizationPolicies and
//! RequestAuthentications from an APIRule, diffs them against what the
//! cluster holds, applies the difference and reports a per-kind status.
//!
//! - [`processing`]: generic processor, change computation, apply, status
//! - [`creators`]: the four desired-state creators
//! - [`controller`]: kube-rs reconcile and error policy

pub mod access_strategy;
pub mod config;
pub mod controller;
pub mod conversion;
pub mod creators;
pub mod dependencies;
pub mod processing;
pub mod store;
pub mod validation;

#[cfg(test)]
pub(crate) mod fake;

pub use config::{ConfigSource, JwtHandler, ReconcileConfig};
pub use controller::{error_policy, reconcile, Context};
pub use processing::{ChildKind, ChildObject, HandlerMode, ObjectChange, ReconcileInput};
pub use store::{ClusterStore, KubeStore};
