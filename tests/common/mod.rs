//! Test utilities and common setup.

use std::path::Path;
use std::sync::Arc;

use bucketchain::chain::{BucketChainManager, ChainConfig};
use bucketchain::db::Database;
use bucketchain::history::HistoryReader;
use bucketchain::ids::NanoidGenerator;
use bucketchain::ingest::{MemoryBodyStore, MessageIngestService};
use bucketchain::notify::BroadcastNotifier;
use bucketchain::store::{MemoryChainStore, StoreConfig, create_chain_store};

/// The full service graph wired over one chain store.
pub struct TestChain {
    pub manager: Arc<BucketChainManager>,
    pub ingest: MessageIngestService,
    pub reader: HistoryReader,
    pub bodies: Arc<MemoryBodyStore>,
    pub notifier: Arc<BroadcastNotifier>,
}

fn wire(manager: Arc<BucketChainManager>) -> TestChain {
    let bodies = Arc::new(MemoryBodyStore::new());
    let notifier = Arc::new(BroadcastNotifier::new());
    let ingest = MessageIngestService::new(manager.clone(), bodies.clone(), notifier.clone());
    let reader = HistoryReader::new(manager.clone());
    TestChain {
        manager,
        ingest,
        reader,
        bodies,
        notifier,
    }
}

fn config(capacity: usize) -> ChainConfig {
    ChainConfig {
        bucket_capacity: capacity,
        max_append_attempts: 5,
    }
}

/// Chain over the in-memory store, returning the store for inspection.
pub fn memory_chain(capacity: usize) -> (Arc<MemoryChainStore>, TestChain) {
    let store = Arc::new(MemoryChainStore::new());
    let manager = Arc::new(BucketChainManager::new(
        store.clone(),
        store.clone(),
        Arc::new(NanoidGenerator),
        config(capacity),
    ));
    (store, wire(manager))
}

/// Chain over an in-memory SQLite database.
pub async fn sqlite_chain(capacity: usize) -> TestChain {
    let db = Database::in_memory().await.unwrap();
    let (buckets, heads) = create_chain_store(StoreConfig::Sqlite(db.pool().clone()));
    let manager = Arc::new(BucketChainManager::new(
        buckets,
        heads,
        Arc::new(NanoidGenerator),
        config(capacity),
    ));
    wire(manager)
}

/// Chain over an on-disk SQLite database at the given path.
pub async fn sqlite_chain_at(path: &Path, capacity: usize) -> TestChain {
    let db = Database::open(path).await.unwrap();
    let (buckets, heads) = create_chain_store(StoreConfig::Sqlite(db.pool().clone()));
    let manager = Arc::new(BucketChainManager::new(
        buckets,
        heads,
        Arc::new(NanoidGenerator),
        config(capacity),
    ));
    wire(manager)
}

/// Page backward from the head and concatenate every page, newest first.
/// Also returns the per-page lengths for bucket-shape assertions.
pub async fn collect_history(
    reader: &HistoryReader,
    conversation_id: &str,
) -> (Vec<String>, Vec<usize>) {
    let mut collected = Vec::new();
    let mut page_lens = Vec::new();
    let mut cursor: Option<String> = None;

    loop {
        let page = reader
            .page(conversation_id, cursor.as_deref(), 50)
            .await
            .unwrap();
        page_lens.push(page.message_ids.len());
        collected.extend(page.message_ids);
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    (collected, page_lens)
}
