//! Chain store layer.
//!
//! Provides trait-based persistence for bucket and head records with
//! implementations for:
//! - SQLite (durable, production)
//! - In-memory maps (tests, embedders)

mod error;
mod memory;
mod models;
mod sqlite;
mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryChainStore;
pub use models::{ConversationHead, MessageBucket};
pub use sqlite::SqliteChainStore;
pub use traits::{BucketStore, ConversationHeadStore};

use std::sync::Arc;

/// Store configuration.
#[derive(Debug, Clone)]
pub enum StoreConfig {
    /// SQLite-backed store over an existing pool.
    Sqlite(sqlx::SqlitePool),
    /// In-process store with no durability.
    Memory,
}

/// Create the bucket and head stores based on configuration.
///
/// Both halves are served by one backend instance so that a single pool (or
/// map set) carries the whole chain.
pub fn create_chain_store(
    config: StoreConfig,
) -> (Arc<dyn BucketStore>, Arc<dyn ConversationHeadStore>) {
    match config {
        StoreConfig::Sqlite(pool) => {
            let store = Arc::new(SqliteChainStore::new(pool));
            (store.clone(), store)
        }
        StoreConfig::Memory => {
            let store = Arc::new(MemoryChainStore::new());
            (store.clone(), store)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    #[tokio::test]
    async fn test_factory_memory_backs_both_handles() {
        let (buckets, heads) = create_chain_store(StoreConfig::Memory);

        let bucket = MessageBucket::origin("bkt_mem");
        buckets.create(&bucket).await.unwrap();
        let head = heads.create("conv", "bkt_mem").await.unwrap();

        // Both handles see the same backend
        assert_eq!(head.newest_bucket_id, "bkt_mem");
        assert!(buckets.get("bkt_mem").await.unwrap().is_some());
        assert!(heads.get("conv").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_factory_sqlite_backs_both_handles() {
        let db = Database::in_memory().await.unwrap();
        let (buckets, heads) = create_chain_store(StoreConfig::Sqlite(db.pool().clone()));

        let bucket = MessageBucket::origin("bkt_sql");
        buckets.create(&bucket).await.unwrap();
        heads.create("conv", "bkt_sql").await.unwrap();

        let fetched = buckets.get("bkt_sql").await.unwrap().unwrap();
        assert!(fetched.is_terminus());
        let head = heads.get("conv").await.unwrap().unwrap();
        assert_eq!(head.newest_bucket_id, "bkt_sql");
    }
}
