//! Error types for the Application operator

use thiserror::Error;

/// Result type alias for operator operations
pub type Result<T> = std::result::Result<T, OperatorError>;

/// Errors that can occur during operator operations
#[derive(Debug, Error)]
pub enum OperatorError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// The Application spec cannot be turned into managed resources
    #[error("Invalid Application spec: {0}")]
    InvalidSpec(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Finalizer bookkeeping failed; deletion stays blocked
    #[error("Finalizer error for {name}: {cause}")]
    Finalizer {
        /// Application name
        name: String,
        /// Underlying failure
        cause: String,
    },

    /// Invalid resource state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl OperatorError {
    /// HTTP status code of the underlying API error, if any
    pub fn api_code(&self) -> Option<u16> {
        match self {
            OperatorError::Kube(kube::Error::Api(ae)) => Some(ae.code),
            _ => None,
        }
    }

    /// True when the API server reported 404
    pub fn is_not_found(&self) -> bool {
        self.api_code() == Some(404)
    }

    /// True when an optimistic-concurrency write lost the race (409)
    pub fn is_conflict(&self) -> bool {
        self.api_code() == Some(409)
    }

    /// Short label used for the `error` metric dimension
    pub fn metric_label(&self) -> &'static str {
        match self {
            OperatorError::Kube(_) if self.is_conflict() => "conflict",
            OperatorError::Kube(_) => "kube",
            OperatorError::InvalidSpec(_) => "invalid_spec",
            OperatorError::Serialization(_) => "serialization",
            OperatorError::Finalizer { .. } => "finalizer",
            OperatorError::InvalidState(_) => "invalid_state",
        }
    }
}

/// Build a `kube::Error::Api` carrying the given status code.
///
/// Used wherever an API-shaped failure has to be synthesized locally.
pub fn api_error(code: u16, reason: &str, message: impl Into<String>) -> kube::Error {
    kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: message.into(),
        reason: reason.to_string(),
        code,
    })
}
