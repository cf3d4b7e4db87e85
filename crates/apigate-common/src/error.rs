//! Error types for the apigate controller
//!
//! Errors are structured with fields to aid debugging in production.
//! Variants carry the resource kind or context where the failure happened.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for apigate operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Validation error for APIRule specs or controller config
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., ".spec.rules[0].path")
        field: Option<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// APIRule schema version conversion error
    #[error("conversion error: {message}")]
    Conversion {
        /// Description of what cannot be represented
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "store", "processor", "discovery")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with a field path
    pub fn validation_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a conversion error
    pub fn conversion(msg: impl Into<String>) -> Self {
        Self::Conversion {
            message: msg.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// HTTP status code of the underlying API error, if any
    pub fn api_code(&self) -> Option<u16> {
        match self {
            Error::Kube {
                source: kube::Error::Api(ae),
            } => Some(ae.code),
            _ => None,
        }
    }

    /// The API server reported the object (or its type) as missing
    pub fn is_not_found(&self) -> bool {
        self.api_code() == Some(404)
    }

    /// The object changed between read and write (optimistic concurrency)
    pub fn is_conflict(&self) -> bool {
        self.api_code() == Some(409)
    }

    /// Check if this error is retryable
    ///
    /// Validation, serialization and conversion errors need a spec fix.
    /// Kubernetes errors are retryable unless they are 4xx other than 409.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 409
            ),
            Error::Validation { .. } => false,
            Error::Serialization { .. } => false,
            Error::Conversion { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            _ => None,
        }
    }
}

/// Error returned from a kube-rs reconcile function
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Kubernetes API call failed
    #[error("kubernetes error: {0}")]
    Kube(String),
    /// The APIRule itself is malformed (e.g. no namespace)
    #[error("validation error: {0}")]
    Validation(String),
    /// Anything else
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<Error> for ReconcileError {
    fn from(e: Error) -> Self {
        match e {
            Error::Kube { source } => ReconcileError::Kube(source.to_string()),
            Error::Validation { message, .. } => ReconcileError::Validation(message),
            other => ReconcileError::Internal(other.to_string()),
        }
    }
}

#[cfg(test)]
pub(crate) fn api_error(code: u16, reason: &str) -> kube::Error {
    kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{reason} for test"),
        reason: reason.to_string(),
        code,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // Story Tests: Error classification in reconciliation
    // ==========================================================================

    /// Story: a stale resourceVersion on update surfaces as a conflict
    ///
    /// The controller retries immediately on conflicts instead of waiting for
    /// the error period, so the classification must be exact.
    #[test]
    fn story_conflict_is_detected_and_retryable() {
        let err = Error::from(api_error(409, "Conflict"));
        assert!(err.is_conflict());
        assert!(!err.is_not_found());
        assert!(err.is_retryable());
        assert!(err.to_string().contains("kubernetes error"));
    }

    /// Story: a missing CRD surfaces as not found
    #[test]
    fn story_missing_resource_is_not_found() {
        let err = Error::from(api_error(404, "NotFound"));
        assert!(err.is_not_found());
        assert!(!err.is_conflict());
        assert!(!err.is_retryable());
    }

    /// Story: spec problems are never retried without a spec change
    #[test]
    fn story_spec_errors_are_not_retryable() {
        assert!(!Error::validation("no rules").is_retryable());
        assert!(!Error::serialization("bad json").is_retryable());
        assert!(!Error::conversion("two hosts").is_retryable());
        assert!(Error::internal("boom").is_retryable());
    }

    #[test]
    fn validation_for_field_keeps_path() {
        match Error::validation_for_field(".spec.host", "Host was nil") {
            Error::Validation { field, message } => {
                assert_eq!(field.as_deref(), Some(".spec.host"));
                assert_eq!(message, "Host was nil");
            }
            _ => panic!("Expected Validation variant"),
        }
    }

    #[test]
    fn internal_error_with_context() {
        let err = Error::internal_with_context("store", "list failed");
        assert_eq!(err.context(), Some("store"));
        assert!(err.to_string().contains("[store]"));

        let err = Error::internal("unexpected");
        assert_eq!(err.context(), Some(UNKNOWN_CONTEXT));
    }

    #[test]
    fn reconcile_error_from_error() {
        let err: ReconcileError = Error::validation("missing namespace").into();
        assert!(matches!(err, ReconcileError::Validation(m) if m == "missing namespace"));

        let err: ReconcileError = Error::from(api_error(500, "InternalError")).into();
        assert!(matches!(err, ReconcileError::Kube(_)));

        let err: ReconcileError = Error::serialization_for_kind("Rule", "bad").into();
        assert!(matches!(err, ReconcileError::Internal(_)));
    }
}
