//! Store error types.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Referenced record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Optimistic version check failed (a concurrent writer won the race).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Underlying database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Store backend error.
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Check if this error is a lost optimistic check.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StoreError::NotFound("bkt_missing".to_string());
        assert_eq!(err.to_string(), "not found: bkt_missing");

        let err = StoreError::Conflict("bucket bkt_a at version 3".to_string());
        assert!(err.is_conflict());
    }
}
