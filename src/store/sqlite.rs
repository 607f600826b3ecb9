//! SQLite-backed chain store.
//!
//! Optimistic concurrency is enforced with conditional UPDATEs: every write
//! carries the version the writer read, and `rows_affected() == 0` means a
//! concurrent writer got there first. Transient SQLite errors (busy/locked,
//! pool timeouts) are retried in place with bounded exponential backoff;
//! version conflicts and missing records are never retried here.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::{debug, instrument};

use super::error::{StoreError, StoreResult};
use super::models::{ConversationHead, MessageBucket};
use super::traits::{BucketStore, ConversationHeadStore};

/// Attempts per operation for transient database errors.
const RETRY_ATTEMPTS: u32 = 3;

/// Base delay before the first retry, doubled each attempt.
const RETRY_BASE_DELAY_MS: u64 = 25;

/// Chain store over a SQLite pool. Implements both [`BucketStore`] and
/// [`ConversationHeadStore`].
#[derive(Debug, Clone)]
pub struct SqliteChainStore {
    pool: SqlitePool,
}

/// Raw bucket row; `message_ids` is a JSON array in a TEXT column.
#[derive(Debug, sqlx::FromRow)]
struct BucketRow {
    bucket_id: String,
    message_ids: String,
    next_bucket_id: String,
    version: i64,
    created_at: String,
    updated_at: String,
}

impl TryFrom<BucketRow> for MessageBucket {
    type Error = StoreError;

    fn try_from(row: BucketRow) -> Result<Self, Self::Error> {
        let message_ids: Vec<String> = serde_json::from_str(&row.message_ids).map_err(|e| {
            StoreError::Backend(format!(
                "bucket {} has malformed message_ids: {}",
                row.bucket_id, e
            ))
        })?;
        Ok(MessageBucket {
            bucket_id: row.bucket_id,
            message_ids,
            next_bucket_id: row.next_bucket_id,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct HeadRow {
    conversation_id: String,
    newest_bucket_id: String,
    version: i64,
    created_at: String,
    updated_at: String,
}

impl From<HeadRow> for ConversationHead {
    fn from(row: HeadRow) -> Self {
        ConversationHead {
            conversation_id: row.conversation_id,
            newest_bucket_id: row.newest_bucket_id,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Check whether a sqlx error is worth retrying.
fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
        // SQLITE_BUSY (5) and SQLITE_LOCKED (6)
        sqlx::Error::Database(db) => matches!(db.code().as_deref(), Some("5") | Some("6")),
        _ => false,
    }
}

/// Run a store operation, retrying transient database errors with bounded
/// exponential backoff. Conflict and NotFound results pass straight through.
async fn with_retry<T, F, Fut>(what: &str, mut op: F) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = StoreResult<T>>,
{
    let mut delay = std::time::Duration::from_millis(RETRY_BASE_DELAY_MS);
    let mut attempt: u32 = 1;

    loop {
        match op().await {
            Err(StoreError::Database(err)) if is_transient(&err) && attempt < RETRY_ATTEMPTS => {
                debug!(
                    "transient database error on {} (attempt {}): {}",
                    what, attempt, err
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            other => return other,
        }
    }
}

impl SqliteChainStore {
    /// Create a new chain store over the given pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// List all conversation identifiers with a head record.
    pub async fn conversation_ids(&self) -> StoreResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT conversation_id FROM conversation_heads ORDER BY conversation_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn get_bucket_once(&self, bucket_id: &str) -> StoreResult<Option<MessageBucket>> {
        let row = sqlx::query_as::<_, BucketRow>(
            r#"
            SELECT bucket_id, message_ids, next_bucket_id, version, created_at, updated_at
            FROM buckets
            WHERE bucket_id = ?
            "#,
        )
        .bind(bucket_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(MessageBucket::try_from).transpose()
    }

    async fn create_bucket_once(&self, bucket: &MessageBucket) -> StoreResult<()> {
        let message_ids = encode_message_ids(&bucket.message_ids)?;

        let result = sqlx::query(
            r#"
            INSERT INTO buckets (bucket_id, message_ids, next_bucket_id, version, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&bucket.bucket_id)
        .bind(&message_ids)
        .bind(&bucket.next_bucket_id)
        .bind(bucket.version)
        .bind(&bucket.created_at)
        .bind(&bucket.updated_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(StoreError::Conflict(format!(
                "bucket {} already exists",
                bucket.bucket_id
            ))),
            Err(err) => Err(err.into()),
        }
    }

    async fn update_bucket_once(&self, bucket: &MessageBucket) -> StoreResult<()> {
        let message_ids = encode_message_ids(&bucket.message_ids)?;

        let result = sqlx::query(
            r#"
            UPDATE buckets
            SET message_ids = ?,
                next_bucket_id = ?,
                version = version + 1,
                updated_at = ?
            WHERE bucket_id = ? AND version = ?
            "#,
        )
        .bind(&message_ids)
        .bind(&bucket.next_bucket_id)
        .bind(Utc::now().to_rfc3339())
        .bind(&bucket.bucket_id)
        .bind(bucket.version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // Either the bucket is gone or a concurrent writer bumped the
            // version. Re-fetch to tell the two cases apart.
            return match self.get_bucket_once(&bucket.bucket_id).await? {
                None => Err(StoreError::NotFound(format!(
                    "bucket {}",
                    bucket.bucket_id
                ))),
                Some(current) => Err(StoreError::Conflict(format!(
                    "bucket {} moved from version {} to {}",
                    bucket.bucket_id, bucket.version, current.version
                ))),
            };
        }

        Ok(())
    }

    async fn get_head_once(&self, conversation_id: &str) -> StoreResult<Option<ConversationHead>> {
        let row = sqlx::query_as::<_, HeadRow>(
            r#"
            SELECT conversation_id, newest_bucket_id, version, created_at, updated_at
            FROM conversation_heads
            WHERE conversation_id = ?
            "#,
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ConversationHead::from))
    }

    async fn create_head_once(
        &self,
        conversation_id: &str,
        newest_bucket_id: &str,
    ) -> StoreResult<ConversationHead> {
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO conversation_heads
                (conversation_id, newest_bucket_id, version, created_at, updated_at)
            VALUES (?, ?, 0, ?, ?)
            "#,
        )
        .bind(conversation_id)
        .bind(newest_bucket_id)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(format!(
                "head for conversation {} already exists",
                conversation_id
            )));
        }

        self.get_head_once(conversation_id).await?.ok_or_else(|| {
            StoreError::Backend(format!(
                "head for conversation {} missing after creation",
                conversation_id
            ))
        })
    }

    async fn advance_head_once(
        &self,
        conversation_id: &str,
        new_bucket_id: &str,
        expected_version: i64,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE conversation_heads
            SET newest_bucket_id = ?,
                version = version + 1,
                updated_at = ?
            WHERE conversation_id = ? AND version = ?
            "#,
        )
        .bind(new_bucket_id)
        .bind(Utc::now().to_rfc3339())
        .bind(conversation_id)
        .bind(expected_version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return match self.get_head_once(conversation_id).await? {
                None => Err(StoreError::NotFound(format!(
                    "head for conversation {}",
                    conversation_id
                ))),
                Some(current) => Err(StoreError::Conflict(format!(
                    "head for conversation {} moved from version {} to {}",
                    conversation_id, expected_version, current.version
                ))),
            };
        }

        Ok(())
    }
}

fn encode_message_ids(message_ids: &[String]) -> StoreResult<String> {
    serde_json::to_string(message_ids)
        .map_err(|e| StoreError::Backend(format!("encoding message_ids: {}", e)))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

#[async_trait]
impl BucketStore for SqliteChainStore {
    #[instrument(skip(self))]
    async fn get(&self, bucket_id: &str) -> StoreResult<Option<MessageBucket>> {
        with_retry("get bucket", || self.get_bucket_once(bucket_id)).await
    }

    #[instrument(skip(self, bucket), fields(bucket_id = %bucket.bucket_id))]
    async fn create(&self, bucket: &MessageBucket) -> StoreResult<()> {
        with_retry("create bucket", || self.create_bucket_once(bucket)).await
    }

    #[instrument(skip(self, bucket), fields(bucket_id = %bucket.bucket_id, version = bucket.version))]
    async fn update(&self, bucket: &MessageBucket) -> StoreResult<()> {
        with_retry("update bucket", || self.update_bucket_once(bucket)).await
    }
}

#[async_trait]
impl ConversationHeadStore for SqliteChainStore {
    #[instrument(skip(self))]
    async fn get(&self, conversation_id: &str) -> StoreResult<Option<ConversationHead>> {
        with_retry("get head", || self.get_head_once(conversation_id)).await
    }

    #[instrument(skip(self))]
    async fn create(
        &self,
        conversation_id: &str,
        newest_bucket_id: &str,
    ) -> StoreResult<ConversationHead> {
        with_retry("create head", || {
            self.create_head_once(conversation_id, newest_bucket_id)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn advance(
        &self,
        conversation_id: &str,
        new_bucket_id: &str,
        expected_version: i64,
    ) -> StoreResult<()> {
        with_retry("advance head", || {
            self.advance_head_once(conversation_id, new_bucket_id, expected_version)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn setup_store() -> SqliteChainStore {
        let db = Database::in_memory().await.unwrap();
        SqliteChainStore::new(db.pool().clone())
    }

    #[tokio::test]
    async fn test_with_retry_recovers_from_transient_errors() {
        let calls = AtomicU32::new(0);

        // Two pool timeouts, then success on the final attempt
        let result: StoreResult<u32> = with_retry("flaky get", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StoreError::Database(sqlx::Error::PoolTimedOut))
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_gives_up_after_budget() {
        let calls = AtomicU32::new(0);

        let result: StoreResult<()> = with_retry("stuck get", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::Database(sqlx::Error::PoolTimedOut)) }
        })
        .await;

        assert!(matches!(
            result.unwrap_err(),
            StoreError::Database(sqlx::Error::PoolTimedOut)
        ));
        assert_eq!(calls.load(Ordering::SeqCst), RETRY_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_with_retry_passes_conflict_straight_through() {
        let calls = AtomicU32::new(0);

        let result: StoreResult<()> = with_retry("losing update", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::Conflict("version moved".to_string())) }
        })
        .await;

        assert!(result.unwrap_err().is_conflict());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_with_retry_passes_not_found_straight_through() {
        let calls = AtomicU32::new(0);

        let result: StoreResult<()> = with_retry("missing record", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::NotFound("bucket bkt_gone".to_string())) }
        })
        .await;

        assert!(matches!(result.unwrap_err(), StoreError::NotFound(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_create_and_get_bucket() {
        let store = setup_store().await;

        let bucket = MessageBucket::origin("bkt_a");
        BucketStore::create(&store, &bucket).await.unwrap();

        let fetched = BucketStore::get(&store, "bkt_a").await.unwrap().unwrap();
        assert_eq!(fetched.bucket_id, "bkt_a");
        assert!(fetched.message_ids.is_empty());
        assert!(fetched.is_terminus());
        assert_eq!(fetched.version, 0);

        assert!(BucketStore::get(&store, "bkt_missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_duplicate_bucket_conflicts() {
        let store = setup_store().await;

        let bucket = MessageBucket::origin("bkt_dup");
        BucketStore::create(&store, &bucket).await.unwrap();

        let err = BucketStore::create(&store, &bucket).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_update_bumps_version() {
        let store = setup_store().await;

        let bucket = MessageBucket::origin("bkt_v");
        BucketStore::create(&store, &bucket).await.unwrap();

        let mut read = BucketStore::get(&store, "bkt_v").await.unwrap().unwrap();
        read.message_ids.push("msg_1".to_string());
        BucketStore::update(&store, &read).await.unwrap();

        let after = BucketStore::get(&store, "bkt_v").await.unwrap().unwrap();
        assert_eq!(after.version, 1);
        assert_eq!(after.message_ids, vec!["msg_1".to_string()]);
    }

    #[tokio::test]
    async fn test_stale_update_conflicts() {
        let store = setup_store().await;

        let bucket = MessageBucket::origin("bkt_cas");
        BucketStore::create(&store, &bucket).await.unwrap();

        // Two writers read the same version
        let mut first = BucketStore::get(&store, "bkt_cas").await.unwrap().unwrap();
        let mut second = first.clone();

        first.message_ids.push("msg_a".to_string());
        BucketStore::update(&store, &first).await.unwrap();

        second.message_ids.push("msg_b".to_string());
        let err = BucketStore::update(&store, &second).await.unwrap_err();
        assert!(err.is_conflict());

        // The winner's write is intact
        let after = BucketStore::get(&store, "bkt_cas").await.unwrap().unwrap();
        assert_eq!(after.message_ids, vec!["msg_a".to_string()]);
    }

    #[tokio::test]
    async fn test_update_missing_bucket_not_found() {
        let store = setup_store().await;

        let bucket = MessageBucket::origin("bkt_ghost");
        let err = BucketStore::update(&store, &bucket).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_head_create_and_advance() {
        let store = setup_store().await;

        let head = ConversationHeadStore::create(&store, "conv_1", "bkt_a")
            .await
            .unwrap();
        assert_eq!(head.newest_bucket_id, "bkt_a");
        assert_eq!(head.version, 0);

        ConversationHeadStore::advance(&store, "conv_1", "bkt_b", 0)
            .await
            .unwrap();

        let after = ConversationHeadStore::get(&store, "conv_1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.newest_bucket_id, "bkt_b");
        assert_eq!(after.version, 1);
    }

    #[tokio::test]
    async fn test_head_create_race_conflicts() {
        let store = setup_store().await;

        ConversationHeadStore::create(&store, "conv_race", "bkt_a")
            .await
            .unwrap();

        let err = ConversationHeadStore::create(&store, "conv_race", "bkt_b")
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        // The first writer's pointer survives
        let head = ConversationHeadStore::get(&store, "conv_race")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(head.newest_bucket_id, "bkt_a");
    }

    #[tokio::test]
    async fn test_head_advance_stale_version_conflicts() {
        let store = setup_store().await;

        ConversationHeadStore::create(&store, "conv_adv", "bkt_a")
            .await
            .unwrap();
        ConversationHeadStore::advance(&store, "conv_adv", "bkt_b", 0)
            .await
            .unwrap();

        // Stale rotation against version 0 loses
        let err = ConversationHeadStore::advance(&store, "conv_adv", "bkt_c", 0)
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let head = ConversationHeadStore::get(&store, "conv_adv")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(head.newest_bucket_id, "bkt_b");
    }

    #[tokio::test]
    async fn test_advance_missing_head_not_found() {
        let store = setup_store().await;

        let err = ConversationHeadStore::advance(&store, "conv_none", "bkt_a", 0)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_conversation_ids() {
        let store = setup_store().await;

        ConversationHeadStore::create(&store, "conv_b", "bkt_1")
            .await
            .unwrap();
        ConversationHeadStore::create(&store, "conv_a", "bkt_2")
            .await
            .unwrap();

        let ids = store.conversation_ids().await.unwrap();
        assert_eq!(ids, vec!["conv_a".to_string(), "conv_b".to_string()]);
    }
}
