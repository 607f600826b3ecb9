//! Chain error types.

use thiserror::Error;

use crate::store::StoreError;

/// Result type for chain operations.
pub type ChainResult<T> = Result<T, ChainError>;

/// Errors that can occur while maintaining or traversing a bucket chain.
#[derive(Debug, Error)]
pub enum ChainError {
    /// No head record exists for the conversation.
    #[error("conversation not found: {0}")]
    ConversationNotFound(String),

    /// The per-bucket version check lost every attempt of the retry budget.
    #[error("append to bucket {bucket_id} lost the race after {attempts} attempts")]
    AppendConflict { bucket_id: String, attempts: u32 },

    /// The head pointer update lost every attempt of the retry budget.
    #[error("rotation for conversation {conversation_id} lost the race after {attempts} attempts")]
    RotationConflict {
        conversation_id: String,
        attempts: u32,
    },

    /// A referenced bucket is missing. This is a data-integrity bug, never
    /// retried or repaired.
    #[error("chain corruption: bucket {bucket_id} referenced by {referrer} is missing")]
    Corruption { bucket_id: String, referrer: String },

    /// The caller asked for a zero-sized page.
    #[error("page size must be at least 1")]
    InvalidPageSize,

    /// Store-level failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ChainError {
    /// Check if this error is a lost optimistic race the caller may retry.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            ChainError::AppendConflict { .. } | ChainError::RotationConflict { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ChainError::Corruption {
            bucket_id: "bkt_gone".to_string(),
            referrer: "bucket bkt_a".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "chain corruption: bucket bkt_gone referenced by bucket bkt_a is missing"
        );

        assert!(
            ChainError::AppendConflict {
                bucket_id: "bkt_a".to_string(),
                attempts: 5
            }
            .is_conflict()
        );
        assert!(!ChainError::InvalidPageSize.is_conflict());
    }
}
