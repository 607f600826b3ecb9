//! Store trait definitions.

use async_trait::async_trait;

use super::StoreResult;
use super::models::{ConversationHead, MessageBucket};

/// Durable key-value persistence of bucket records.
///
/// Implementations must enforce the optimistic version check on `update` so
/// that concurrent writers cannot silently clobber each other.
#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Fetch a bucket by identifier.
    async fn get(&self, bucket_id: &str) -> StoreResult<Option<MessageBucket>>;

    /// Persist a freshly created bucket.
    ///
    /// Fails with `Conflict` if the identifier already exists.
    async fn create(&self, bucket: &MessageBucket) -> StoreResult<()>;

    /// Write back a mutated bucket, conditioned on `bucket.version` matching
    /// the stored version. The stored version is bumped on success.
    ///
    /// Fails with `Conflict` if the version check loses, `NotFound` if the
    /// bucket does not exist.
    async fn update(&self, bucket: &MessageBucket) -> StoreResult<()>;
}

/// Durable persistence of the per-conversation head pointer.
#[async_trait]
pub trait ConversationHeadStore: Send + Sync {
    /// Fetch the head record for a conversation.
    async fn get(&self, conversation_id: &str) -> StoreResult<Option<ConversationHead>>;

    /// Create the head record for a conversation's first bucket.
    ///
    /// Fails with `Conflict` if a head already exists (a concurrent
    /// bootstrap won the race); the caller should re-read and adopt it.
    async fn create(
        &self,
        conversation_id: &str,
        newest_bucket_id: &str,
    ) -> StoreResult<ConversationHead>;

    /// Atomically point the head at a new bucket, conditioned on
    /// `expected_version` matching the stored version.
    ///
    /// This is the single linearization point of the chain: the first writer
    /// to advance the pointer wins the rotation, and there is no other
    /// ordering authority. Fails with `Conflict` on a lost race, `NotFound`
    /// if the head does not exist.
    async fn advance(
        &self,
        conversation_id: &str,
        new_bucket_id: &str,
        expected_version: i64,
    ) -> StoreResult<()>;
}
