//! Dependency check: the CRDs a handler mode writes must be installed

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

#[cfg(test)]
use mockall::automock;

use apigate_common::crd::StatusCode;
use apigate_common::CrdRegistry;

use crate::processing::ChildKind;

/// Why the required kinds are not available
#[derive(Debug, Error)]
pub enum DependencyError {
    /// A CRD is not installed
    #[error("CRD {crd} is not present. Make sure to install required dependencies for the component")]
    Missing {
        /// The missing kind
        kind: ChildKind,
        /// CRD object name, e.g. `rules.oathkeeper.ory.sh`
        crd: String,
    },
    /// Discovery itself failed
    #[error("Error happened during discovering dependencies")]
    Discovery {
        /// The kind being resolved
        kind: ChildKind,
        /// Underlying failure
        #[source]
        source: apigate_common::Error,
    },
}

impl DependencyError {
    /// Parent status code: a missing CRD may appear later, a failed discovery is an error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Missing { .. } => StatusCode::Warning,
            Self::Discovery { .. } => StatusCode::Error,
        }
    }

    /// The kind that could not be resolved
    pub fn kind(&self) -> ChildKind {
        match self {
            Self::Missing { kind, .. } | Self::Discovery { kind, .. } => *kind,
        }
    }
}

/// Checks that child kinds can be written
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DependencyChecker: Send + Sync {
    /// `Ok` when every kind in `kinds` is installed; otherwise the first that is not
    async fn are_available(&self, kinds: &[ChildKind]) -> Result<(), DependencyError>;
}

/// [`DependencyChecker`] over the CRD registry
pub struct RegistryDependencyChecker {
    registry: Arc<CrdRegistry>,
}

impl RegistryDependencyChecker {
    /// Create a checker over `registry`
    pub fn new(registry: Arc<CrdRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl DependencyChecker for RegistryDependencyChecker {
    async fn are_available(&self, kinds: &[ChildKind]) -> Result<(), DependencyError> {
        for kind in kinds {
            let crd_kind = kind.crd_kind();
            match self.registry.try_resolve(crd_kind).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    let crd = crd_kind.crd_name();
                    warn!(kind = %kind, crd = %crd, "required CRD not installed");
                    return Err(DependencyError::Missing { kind: *kind, crd });
                }
                Err(source) => {
                    warn!(kind = %kind, error = %source, "dependency discovery failed");
                    return Err(DependencyError::Discovery { kind: *kind, source });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apigate_common::Error;

    #[test]
    fn missing_crd_is_a_warning_with_install_hint() {
        let err = DependencyError::Missing {
            kind: ChildKind::AccessRule,
            crd: "rules.oathkeeper.ory.sh".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::Warning);
        assert_eq!(err.kind(), ChildKind::AccessRule);
        assert_eq!(
            err.to_string(),
            "CRD rules.oathkeeper.ory.sh is not present. Make sure to install required dependencies for the component"
        );
    }

    #[test]
    fn discovery_failure_is_an_error() {
        let err = DependencyError::Discovery {
            kind: ChildKind::VirtualService,
            source: Error::internal_with_context("discovery", "timeout"),
        };
        assert_eq!(err.status_code(), StatusCode::Error);
        assert_eq!(err.to_string(), "Error happened during discovering dependencies");
    }
}
