//! Provisioning backend error types

use thiserror::Error;

/// Provisioning backend errors
#[derive(Error, Debug)]
pub enum CloudError {
    /// Temporary failure (rate limiting, eventual consistency lag).
    /// Callers may retry the same request.
    #[error("Transient backend error: {0}")]
    Transient(String),

    /// The backend refused the request (invalid inputs, quota exceeded).
    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("Unknown resource kind: {0}")]
    UnknownKind(String),

    #[error("State file error: {0}")]
    StateError(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CloudError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, CloudError::Transient(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::ResourceNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(CloudError::Transient("throttled".into()).is_transient());
        assert!(!CloudError::Rejected("quota".into()).is_transient());
        assert!(!CloudError::ResourceNotFound("vpc".into()).is_transient());
    }
}
