//! Message body persistence collaborator.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use super::models::AuthoredMessage;

/// External message-body storage.
///
/// Implementations persist the authored content and return its identifier.
/// The write must be idempotent per identifier so that a caller recovering
/// from a partial commit can safely retry.
#[async_trait]
pub trait MessageBodyStore: Send + Sync {
    /// Persist a message body and return its identifier.
    async fn store_body(
        &self,
        conversation_id: &str,
        message: &AuthoredMessage,
    ) -> anyhow::Result<String>;
}

/// A stored message body with its owning conversation.
#[derive(Debug, Clone)]
pub struct StoredBody {
    pub conversation_id: String,
    pub message: AuthoredMessage,
    pub stored_at: String,
}

/// In-memory body store for tests and embedders without a messaging backend.
#[derive(Debug, Default)]
pub struct MemoryBodyStore {
    bodies: DashMap<String, StoredBody>,
}

impl MemoryBodyStore {
    /// Create an empty body store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a stored body by message identifier.
    pub fn get(&self, message_id: &str) -> Option<StoredBody> {
        self.bodies.get(message_id).map(|b| b.clone())
    }

    /// Number of stored bodies.
    pub fn len(&self) -> usize {
        self.bodies.len()
    }

    /// Check whether no bodies are stored.
    pub fn is_empty(&self) -> bool {
        self.bodies.is_empty()
    }
}

#[async_trait]
impl MessageBodyStore for MemoryBodyStore {
    async fn store_body(
        &self,
        conversation_id: &str,
        message: &AuthoredMessage,
    ) -> anyhow::Result<String> {
        let message_id = Uuid::new_v4().to_string();
        self.bodies.insert(
            message_id.clone(),
            StoredBody {
                conversation_id: conversation_id.to_string(),
                message: message.clone(),
                stored_at: Utc::now().to_rfc3339(),
            },
        );
        Ok(message_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_and_get_body() {
        let store = MemoryBodyStore::new();
        assert!(store.is_empty());

        let message = AuthoredMessage::new("usr_a", "hello");
        let id = store.store_body("conv_1", &message).await.unwrap();

        let stored = store.get(&id).unwrap();
        assert_eq!(stored.conversation_id, "conv_1");
        assert_eq!(stored.message, message);
        assert_eq!(store.len(), 1);
    }
}
