//! Message ingest service - the entry point used by the messaging transport
//! to commit a newly authored message.

use log::{info, warn};
use std::sync::Arc;
use thiserror::Error;

use crate::chain::{BucketChainManager, ChainError, ChainResult};
use crate::notify::{MessageEvent, MessageNotifier};

use super::body::MessageBodyStore;
use super::models::AuthoredMessage;

/// Errors surfaced by [`MessageIngestService::commit`].
#[derive(Debug, Error)]
pub enum CommitError {
    /// The body write failed; nothing was persisted in the chain.
    #[error("message body write failed: {0}")]
    BodyWrite(#[source] anyhow::Error),

    /// The body was stored but the chain append failed, so the message is
    /// not reachable through history. The caller should retry only the
    /// append step with the carried identifier; the body write is idempotent
    /// per identifier.
    #[error("message {message_id} stored but not linked into history: {source}")]
    PartialCommit {
        message_id: String,
        #[source]
        source: ChainError,
    },
}

/// Service committing authored messages: body write, chain append, notify.
pub struct MessageIngestService {
    chain: Arc<BucketChainManager>,
    bodies: Arc<dyn MessageBodyStore>,
    notifier: Arc<dyn MessageNotifier>,
}

impl MessageIngestService {
    /// Create a new ingest service.
    pub fn new(
        chain: Arc<BucketChainManager>,
        bodies: Arc<dyn MessageBodyStore>,
        notifier: Arc<dyn MessageNotifier>,
    ) -> Self {
        Self {
            chain,
            bodies,
            notifier,
        }
    }

    /// Commit a newly authored message and return its identifier.
    ///
    /// The message becomes visible in history only after both the body write
    /// and the chain append succeed. On success the `(conversation, message)`
    /// event is published to the notifier; delivery to connected clients is
    /// the transport's responsibility.
    pub async fn commit(
        &self,
        conversation_id: &str,
        message: &AuthoredMessage,
    ) -> Result<String, CommitError> {
        let message_id = self
            .bodies
            .store_body(conversation_id, message)
            .await
            .map_err(CommitError::BodyWrite)?;

        if let Err(err) = self.chain.append_message(conversation_id, &message_id).await {
            warn!(
                "partial commit of message {} in conversation {}: {}",
                message_id, conversation_id, err
            );
            return Err(CommitError::PartialCommit {
                message_id,
                source: err,
            });
        }

        info!(
            "committed message {} to conversation {}",
            message_id, conversation_id
        );
        self.notifier.publish(MessageEvent {
            conversation_id: conversation_id.to_string(),
            message_id: message_id.clone(),
        });

        Ok(message_id)
    }

    /// Recovery step for [`CommitError::PartialCommit`]: retry only the
    /// chain append for an already-stored message body.
    pub async fn retry_append(&self, conversation_id: &str, message_id: &str) -> ChainResult<()> {
        self.chain.append_message(conversation_id, message_id).await?;

        info!(
            "recovered message {} into conversation {} history",
            message_id, conversation_id
        );
        self.notifier.publish(MessageEvent {
            conversation_id: conversation_id.to_string(),
            message_id: message_id.to_string(),
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainConfig;
    use crate::ids::NanoidGenerator;
    use crate::ingest::MemoryBodyStore;
    use crate::notify::BroadcastNotifier;
    use crate::store::MemoryChainStore;

    fn service() -> (
        MessageIngestService,
        Arc<MemoryBodyStore>,
        Arc<BroadcastNotifier>,
        Arc<BucketChainManager>,
    ) {
        let store = Arc::new(MemoryChainStore::new());
        let chain = Arc::new(BucketChainManager::new(
            store.clone(),
            store,
            Arc::new(NanoidGenerator),
            ChainConfig::default(),
        ));
        let bodies = Arc::new(MemoryBodyStore::new());
        let notifier = Arc::new(BroadcastNotifier::new());
        let service = MessageIngestService::new(chain.clone(), bodies.clone(), notifier.clone());
        (service, bodies, notifier, chain)
    }

    #[tokio::test]
    async fn test_commit_stores_body_and_links_history() {
        let (service, bodies, notifier, chain) = service();
        let mut events = notifier.subscribe();

        let message_id = service
            .commit("conv", &AuthoredMessage::new("usr_a", "hello"))
            .await
            .unwrap();

        assert!(bodies.get(&message_id).is_some());

        let page = chain.read_page("conv", None).await.unwrap();
        assert_eq!(page.message_ids, vec![message_id.clone()]);

        let event = events.try_recv().unwrap();
        assert_eq!(event.conversation_id, "conv");
        assert_eq!(event.message_id, message_id);
    }

    #[tokio::test]
    async fn test_commit_orders_messages() {
        let (service, _, _, chain) = service();

        let first = service
            .commit("conv", &AuthoredMessage::new("usr_a", "one"))
            .await
            .unwrap();
        let second = service
            .commit("conv", &AuthoredMessage::new("usr_b", "two"))
            .await
            .unwrap();

        let page = chain.read_page("conv", None).await.unwrap();
        assert_eq!(page.message_ids, vec![second, first]);
    }
}
