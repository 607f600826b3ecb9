//! Chain manager - maintains chain integrity across concurrent appends,
//! rotations, and backward traversal.
//!
//! All chain mutation goes through this type. Correctness under concurrent
//! writers rests on two optimistic checks: the per-bucket version on append
//! and the head pointer version on rotation. The head update is the single
//! linearization point; a writer that loses either check re-reads and
//! retries within a bounded budget.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::ids::IdGenerator;
use crate::store::{
    BucketStore, ConversationHead, ConversationHeadStore, MessageBucket, StoreError,
};

use super::error::{ChainError, ChainResult};

/// Default maximum number of message identifiers per bucket.
pub const DEFAULT_BUCKET_CAPACITY: usize = 50;

/// Default retry budget for the whole append loop.
pub const DEFAULT_MAX_APPEND_ATTEMPTS: u32 = 5;

/// Chain manager configuration.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Maximum message identifiers per bucket before rotation.
    pub bucket_capacity: usize,
    /// Attempts before a lost race is surfaced to the caller.
    pub max_append_attempts: u32,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            bucket_capacity: DEFAULT_BUCKET_CAPACITY,
            max_append_attempts: DEFAULT_MAX_APPEND_ATTEMPTS,
        }
    }
}

/// Outcome of a successful append.
#[derive(Debug, Clone, Serialize)]
pub struct AppendReceipt {
    /// Bucket the message identifier landed in.
    pub bucket_id: String,
    /// Whether this append sealed the previous bucket and created a new one.
    pub rotated: bool,
}

/// One batch of a backward history traversal.
///
/// `message_ids` is newest first. `next_cursor` names the next-older bucket
/// and is stable under concurrent appends, because superseded buckets never
/// mutate; `None` marks the oldest history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPage {
    /// Message identifiers, most recent first.
    pub message_ids: Vec<String>,
    /// Continuation cursor, `None` at the terminus.
    pub next_cursor: Option<String>,
}

impl HistoryPage {
    /// Check whether this is the last page of the conversation's history.
    pub fn is_terminal(&self) -> bool {
        self.next_cursor.is_none()
    }
}

/// Which optimistic check lost the most recent attempt.
enum LostRace {
    Append(String),
    Rotation,
}

/// Orchestrates append, chain extension, and backward traversal.
pub struct BucketChainManager {
    buckets: Arc<dyn BucketStore>,
    heads: Arc<dyn ConversationHeadStore>,
    ids: Arc<dyn IdGenerator>,
    config: ChainConfig,
}

impl BucketChainManager {
    /// Create a new chain manager over the given stores.
    pub fn new(
        buckets: Arc<dyn BucketStore>,
        heads: Arc<dyn ConversationHeadStore>,
        ids: Arc<dyn IdGenerator>,
        config: ChainConfig,
    ) -> Self {
        Self {
            buckets,
            heads,
            ids,
            config,
        }
    }

    /// Append a message identifier to the conversation's newest bucket,
    /// rotating to a fresh bucket when the current one is at capacity.
    ///
    /// The first message of a conversation bootstraps an empty origin bucket
    /// and the head record. Lost races are retried up to the configured
    /// budget, then surfaced as `AppendConflict` or `RotationConflict`
    /// depending on which check lost last.
    pub async fn append_message(
        &self,
        conversation_id: &str,
        message_id: &str,
    ) -> ChainResult<AppendReceipt> {
        let attempts = self.config.max_append_attempts;
        let mut last_loss: Option<LostRace> = None;

        for attempt in 1..=attempts {
            let head = match self.heads.get(conversation_id).await? {
                Some(head) => head,
                None => match self.bootstrap(conversation_id).await? {
                    Some(head) => head,
                    None => {
                        // A concurrent bootstrap won; adopt its head on the
                        // next attempt.
                        last_loss = Some(LostRace::Rotation);
                        continue;
                    }
                },
            };

            let Some(bucket) = self.buckets.get(&head.newest_bucket_id).await? else {
                warn!(
                    "head of conversation {} names missing bucket {}",
                    conversation_id, head.newest_bucket_id
                );
                return Err(ChainError::Corruption {
                    bucket_id: head.newest_bucket_id,
                    referrer: format!("head of conversation {}", conversation_id),
                });
            };

            if !bucket.is_full(self.config.bucket_capacity) {
                let mut open = bucket;
                open.message_ids.push(message_id.to_string());

                match self.buckets.update(&open).await {
                    Ok(()) => {
                        debug!(
                            "appended {} to bucket {} ({}/{})",
                            message_id,
                            open.bucket_id,
                            open.message_ids.len(),
                            self.config.bucket_capacity
                        );
                        return Ok(AppendReceipt {
                            bucket_id: open.bucket_id,
                            rotated: false,
                        });
                    }
                    Err(StoreError::Conflict(reason)) => {
                        debug!("append attempt {} lost the bucket race: {}", attempt, reason);
                        last_loss = Some(LostRace::Append(open.bucket_id));
                        continue;
                    }
                    Err(StoreError::NotFound(_)) => {
                        // Buckets are never deleted, so a vanished append
                        // target is an integrity violation.
                        return Err(ChainError::Corruption {
                            bucket_id: open.bucket_id,
                            referrer: format!("head of conversation {}", conversation_id),
                        });
                    }
                    Err(err) => return Err(err.into()),
                }
            }

            // The bucket is at capacity and therefore sealed. Create its
            // successor holding the message, then advance the head.
            let successor =
                MessageBucket::chained(self.ids.bucket_id(), message_id, bucket.bucket_id.clone());
            self.buckets.create(&successor).await?;

            match self
                .heads
                .advance(conversation_id, &successor.bucket_id, head.version)
                .await
            {
                Ok(()) => {
                    debug!(
                        "rotated conversation {}: {} sealed, {} now open",
                        conversation_id, bucket.bucket_id, successor.bucket_id
                    );
                    return Ok(AppendReceipt {
                        bucket_id: successor.bucket_id,
                        rotated: true,
                    });
                }
                Err(StoreError::Conflict(reason)) => {
                    // Another rotation won. Our successor has no
                    // back-reference and is unreachable; abandon it and
                    // retry against the winner's chain.
                    debug!(
                        "rotation attempt {} lost the head race, orphaning {}: {}",
                        attempt, successor.bucket_id, reason
                    );
                    last_loss = Some(LostRace::Rotation);
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        }

        warn!(
            "append of {} to conversation {} exhausted {} attempts",
            message_id, conversation_id, attempts
        );
        Err(match last_loss {
            Some(LostRace::Append(bucket_id)) => ChainError::AppendConflict {
                bucket_id,
                attempts,
            },
            _ => ChainError::RotationConflict {
                conversation_id: conversation_id.to_string(),
                attempts,
            },
        })
    }

    /// First-message bootstrap: create an empty origin bucket and the head
    /// record pointing at it.
    ///
    /// Returns `None` when a concurrent bootstrap created the head first; in
    /// that case our origin bucket is abandoned as an orphan.
    async fn bootstrap(&self, conversation_id: &str) -> ChainResult<Option<ConversationHead>> {
        let bucket = MessageBucket::origin(self.ids.bucket_id());
        self.buckets.create(&bucket).await?;

        match self.heads.create(conversation_id, &bucket.bucket_id).await {
            Ok(head) => {
                debug!(
                    "bootstrapped conversation {} with bucket {}",
                    conversation_id, bucket.bucket_id
                );
                Ok(Some(head))
            }
            Err(StoreError::Conflict(_)) => {
                debug!(
                    "bootstrap of conversation {} lost the race, orphaning {}",
                    conversation_id, bucket.bucket_id
                );
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Read one bucket-aligned batch of history, walking backward from the
    /// head (no cursor) or from an earlier page's cursor.
    pub async fn read_page(
        &self,
        conversation_id: &str,
        cursor: Option<&str>,
    ) -> ChainResult<HistoryPage> {
        let (bucket_id, referrer) = match cursor {
            Some(cursor) => (cursor.to_string(), "history cursor".to_string()),
            None => {
                let head = self
                    .heads
                    .get(conversation_id)
                    .await?
                    .ok_or_else(|| ChainError::ConversationNotFound(conversation_id.to_string()))?;
                (
                    head.newest_bucket_id,
                    format!("head of conversation {}", conversation_id),
                )
            }
        };

        let Some(bucket) = self.buckets.get(&bucket_id).await? else {
            warn!(
                "chain corruption reading conversation {}: bucket {} referenced by {} is missing",
                conversation_id, bucket_id, referrer
            );
            return Err(ChainError::Corruption { bucket_id, referrer });
        };

        let mut message_ids = bucket.message_ids;
        message_ids.reverse();

        let next_cursor = if bucket.next_bucket_id.is_empty() {
            None
        } else {
            Some(bucket.next_bucket_id)
        };

        Ok(HistoryPage {
            message_ids,
            next_cursor,
        })
    }

    /// Identifier of the bucket currently accepting appends.
    pub async fn newest_bucket_id(&self, conversation_id: &str) -> ChainResult<String> {
        let head = self
            .heads
            .get(conversation_id)
            .await?
            .ok_or_else(|| ChainError::ConversationNotFound(conversation_id.to_string()))?;
        Ok(head.newest_bucket_id)
    }

    /// Capacity the manager seals buckets at.
    pub fn bucket_capacity(&self) -> usize {
        self.config.bucket_capacity
    }
}
