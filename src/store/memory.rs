//! In-memory chain store.
//!
//! Same contract as the SQLite store, with the version checks enforced under
//! the map entry guard. Used by tests and by embedders that don't need
//! durability.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::error::{StoreError, StoreResult};
use super::models::{ConversationHead, MessageBucket};
use super::traits::{BucketStore, ConversationHeadStore};

/// Chain store over in-process maps. Implements both [`BucketStore`] and
/// [`ConversationHeadStore`].
#[derive(Debug, Default)]
pub struct MemoryChainStore {
    buckets: DashMap<String, MessageBucket>,
    heads: DashMap<String, ConversationHead>,
}

impl MemoryChainStore {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buckets currently stored, reachable or not.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

#[async_trait]
impl BucketStore for MemoryChainStore {
    async fn get(&self, bucket_id: &str) -> StoreResult<Option<MessageBucket>> {
        Ok(self.buckets.get(bucket_id).map(|b| b.clone()))
    }

    async fn create(&self, bucket: &MessageBucket) -> StoreResult<()> {
        match self.buckets.entry(bucket.bucket_id.clone()) {
            Entry::Occupied(_) => Err(StoreError::Conflict(format!(
                "bucket {} already exists",
                bucket.bucket_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(bucket.clone());
                Ok(())
            }
        }
    }

    async fn update(&self, bucket: &MessageBucket) -> StoreResult<()> {
        let mut current = self
            .buckets
            .get_mut(&bucket.bucket_id)
            .ok_or_else(|| StoreError::NotFound(format!("bucket {}", bucket.bucket_id)))?;

        if current.version != bucket.version {
            return Err(StoreError::Conflict(format!(
                "bucket {} moved from version {} to {}",
                bucket.bucket_id, bucket.version, current.version
            )));
        }

        let mut next = bucket.clone();
        next.version = bucket.version + 1;
        next.updated_at = Utc::now().to_rfc3339();
        *current = next;
        Ok(())
    }
}

#[async_trait]
impl ConversationHeadStore for MemoryChainStore {
    async fn get(&self, conversation_id: &str) -> StoreResult<Option<ConversationHead>> {
        Ok(self.heads.get(conversation_id).map(|h| h.clone()))
    }

    async fn create(
        &self,
        conversation_id: &str,
        newest_bucket_id: &str,
    ) -> StoreResult<ConversationHead> {
        match self.heads.entry(conversation_id.to_string()) {
            Entry::Occupied(_) => Err(StoreError::Conflict(format!(
                "head for conversation {} already exists",
                conversation_id
            ))),
            Entry::Vacant(slot) => {
                let head = ConversationHead::new(conversation_id, newest_bucket_id);
                slot.insert(head.clone());
                Ok(head)
            }
        }
    }

    async fn advance(
        &self,
        conversation_id: &str,
        new_bucket_id: &str,
        expected_version: i64,
    ) -> StoreResult<()> {
        let mut current = self
            .heads
            .get_mut(conversation_id)
            .ok_or_else(|| StoreError::NotFound(format!("head for conversation {}", conversation_id)))?;

        if current.version != expected_version {
            return Err(StoreError::Conflict(format!(
                "head for conversation {} moved from version {} to {}",
                conversation_id, expected_version, current.version
            )));
        }

        current.newest_bucket_id = new_bucket_id.to_string();
        current.version += 1;
        current.updated_at = Utc::now().to_rfc3339();
        Ok(())
    }
}
