//! Error types for service account bootstrap
//!
//! Errors carry the resource kind and name they relate to so a failed
//! bootstrap reports exactly which step stopped it. "Already exists" is
//! never represented here: create conflicts are treated as success at the
//! call site.

use thiserror::Error;

/// Main error type for bootstrap operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error, surfaced verbatim
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A resource that must already exist was not found
    #[error("{kind} {} not found", qualified_name(.namespace, .name))]
    NotFound {
        /// Resource kind (e.g., "Namespace", "ServiceAccount")
        kind: &'static str,
        /// Resource name
        name: String,
        /// Namespace for namespaced resources
        namespace: Option<String>,
    },

    /// A bounded retry loop gave up
    #[error("retries exceeded for {operation} after {attempts} attempts")]
    RetriesExceeded {
        /// What was being retried
        operation: String,
        /// Number of attempts performed
        attempts: u32,
    },

    /// The caller cancelled the operation or its deadline elapsed
    #[error("{operation} cancelled")]
    Cancelled {
        /// What was interrupted
        operation: String,
    },

    /// Invalid caller-supplied configuration
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
    },

    /// The API server answered with something unusable
    #[error("invalid response: {message}")]
    InvalidResponse {
        /// Description of what was wrong with the response
        message: String,
    },

    /// Failed to load a kubeconfig or build a client from it
    #[error("kubeconfig error: {message}")]
    Kubeconfig {
        /// Description of what failed
        message: String,
    },
}

fn qualified_name(namespace: &Option<String>, name: &str) -> String {
    match namespace {
        Some(ns) => format!("{}/{}", ns, name),
        None => name.to_string(),
    }
}

impl Error {
    /// Create a not-found error for a cluster-scoped resource
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
            namespace: None,
        }
    }

    /// Create a not-found error for a namespaced resource
    pub fn not_found_in(
        kind: &'static str,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
            namespace: Some(namespace.into()),
        }
    }

    /// Create a retries-exceeded error
    pub fn retries_exceeded(operation: impl Into<String>, attempts: u32) -> Self {
        Self::RetriesExceeded {
            operation: operation.into(),
            attempts,
        }
    }

    /// Create a cancellation error
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create an invalid-response error with the given message
    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: msg.into(),
        }
    }

    /// Create a kubeconfig error with the given message
    pub fn kubeconfig(msg: impl Into<String>) -> Self {
        Self::Kubeconfig {
            message: msg.into(),
        }
    }

    /// Whether this error means a required resource is absent
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Kube { source } => is_not_found(source),
            _ => false,
        }
    }

    /// Whether this error came from cancellation or an elapsed deadline
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Check whether a kube error is an HTTP 404 from the API server
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// Check whether a kube error is an HTTP 409 "AlreadyExists" from the API server
pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409)
}

#[cfg(test)]
pub(crate) fn api_error(code: u16, reason: &str) -> kube::Error {
    kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{} ({})", reason, code),
        reason: reason.to_string(),
        code,
    })
}
