//! Persisted chain records.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// A bounded segment of a conversation's message history.
///
/// Buckets link newest to oldest: `next_bucket_id` names the next-older
/// bucket, or is empty at the chain terminus. A bucket accepts appends only
/// while it is the one named by the conversation head; once superseded it is
/// sealed and never mutated again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageBucket {
    /// Opaque unique identifier, immutable after creation.
    pub bucket_id: String,
    /// Message identifiers in append order.
    pub message_ids: Vec<String>,
    /// Identifier of the next-older bucket, empty at the terminus.
    pub next_bucket_id: String,
    /// Optimistic concurrency counter, bumped by every successful update.
    pub version: i64,
    /// When the bucket was created (RFC 3339).
    pub created_at: String,
    /// When the bucket was last written (RFC 3339).
    pub updated_at: String,
}

impl MessageBucket {
    /// Create the first, empty bucket of a conversation (the chain terminus).
    pub fn origin(bucket_id: impl Into<String>) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            bucket_id: bucket_id.into(),
            message_ids: Vec::new(),
            next_bucket_id: String::new(),
            version: 0,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Create a rotation successor holding its first message and pointing at
    /// the sealed, next-older bucket.
    pub fn chained(
        bucket_id: impl Into<String>,
        first_message_id: impl Into<String>,
        older_bucket_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            bucket_id: bucket_id.into(),
            message_ids: vec![first_message_id.into()],
            next_bucket_id: older_bucket_id.into(),
            version: 0,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Check whether the bucket has reached capacity.
    pub fn is_full(&self, capacity: usize) -> bool {
        self.message_ids.len() >= capacity
    }

    /// Check whether this bucket is the oldest in its chain.
    pub fn is_terminus(&self) -> bool {
        self.next_bucket_id.is_empty()
    }
}

/// Per-conversation pointer at the bucket currently accepting appends.
///
/// Advancing this pointer is the single linearization point of the chain:
/// once it names a new bucket, the previous one is permanently sealed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationHead {
    /// Identifier of the owning conversation.
    pub conversation_id: String,
    /// Identifier of the bucket currently accepting appends.
    pub newest_bucket_id: String,
    /// Optimistic concurrency counter, bumped exactly once per rotation.
    pub version: i64,
    /// When the head was created (RFC 3339).
    pub created_at: String,
    /// When the head was last advanced (RFC 3339).
    pub updated_at: String,
}

impl ConversationHead {
    /// Create a head record for a freshly bootstrapped conversation.
    pub fn new(conversation_id: impl Into<String>, newest_bucket_id: impl Into<String>) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            conversation_id: conversation_id.into(),
            newest_bucket_id: newest_bucket_id.into(),
            version: 0,
            created_at: now.clone(),
            updated_at: now,
        }
    }
}
