//! Read-only paging through a conversation's history.

use std::sync::Arc;
use tracing::debug;

use crate::chain::{BucketChainManager, ChainError, ChainResult, HistoryPage};

/// Pages backward through a conversation's history, newest first.
///
/// Pure read; never mutates the chain and never blocks writers. Pages are
/// bucket-aligned: each page is exactly one bucket, so a page is never split
/// or merged and its cursor stays valid under concurrent appends (sealed
/// buckets are immutable). `page_size` is the caller's requested ceiling and
/// is validated; a whole bucket is returned even when the ceiling is smaller,
/// and batch length is bounded by the bucket capacity regardless.
pub struct HistoryReader {
    chain: Arc<BucketChainManager>,
}

impl HistoryReader {
    /// Create a new history reader.
    pub fn new(chain: Arc<BucketChainManager>) -> Self {
        Self { chain }
    }

    /// Fetch one page of history.
    ///
    /// With no cursor the page starts at the conversation head; otherwise at
    /// the bucket named by the cursor of the previous page. A page with no
    /// `next_cursor` is the oldest history. Calling twice with the same
    /// cursor on a quiescent conversation returns identical pages.
    pub async fn page(
        &self,
        conversation_id: &str,
        cursor: Option<&str>,
        page_size: usize,
    ) -> ChainResult<HistoryPage> {
        if page_size == 0 {
            return Err(ChainError::InvalidPageSize);
        }

        let page = self.chain.read_page(conversation_id, cursor).await?;
        debug!(
            conversation_id,
            returned = page.message_ids.len(),
            terminal = page.is_terminal(),
            "served history page"
        );
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainConfig;
    use crate::ids::NanoidGenerator;
    use crate::store::MemoryChainStore;

    fn reader_with_chain(capacity: usize) -> (Arc<BucketChainManager>, HistoryReader) {
        let store = Arc::new(MemoryChainStore::new());
        let chain = Arc::new(BucketChainManager::new(
            store.clone(),
            store,
            Arc::new(NanoidGenerator),
            ChainConfig {
                bucket_capacity: capacity,
                max_append_attempts: 5,
            },
        ));
        (chain.clone(), HistoryReader::new(chain))
    }

    #[tokio::test]
    async fn test_zero_page_size_rejected() {
        let (_, reader) = reader_with_chain(2);
        let err = reader.page("conv", None, 0).await.unwrap_err();
        assert!(matches!(err, ChainError::InvalidPageSize));
    }

    #[tokio::test]
    async fn test_page_is_idempotent_for_fixed_cursor() {
        let (chain, reader) = reader_with_chain(2);

        for i in 0..5 {
            chain
                .append_message("conv", &format!("m{}", i))
                .await
                .unwrap();
        }

        let first = reader.page("conv", None, 10).await.unwrap();
        let cursor = first.next_cursor.clone();

        let once = reader.page("conv", cursor.as_deref(), 10).await.unwrap();
        let twice = reader.page("conv", cursor.as_deref(), 10).await.unwrap();
        assert_eq!(once, twice);
    }

    #[tokio::test]
    async fn test_pages_concatenate_to_reverse_append_order() {
        let (chain, reader) = reader_with_chain(3);

        let ids: Vec<String> = (0..8).map(|i| format!("m{}", i)).collect();
        for id in &ids {
            chain.append_message("conv", id).await.unwrap();
        }

        let mut collected = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = reader.page("conv", cursor.as_deref(), 3).await.unwrap();
            collected.extend(page.message_ids.clone());
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        let mut expected = ids;
        expected.reverse();
        assert_eq!(collected, expected);
    }
}
