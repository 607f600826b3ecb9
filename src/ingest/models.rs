//! Ingest data models.

use serde::{Deserialize, Serialize};

/// A newly authored message as handed over by the messaging transport.
///
/// The body itself is owned by the external messaging subsystem; the chain
/// only ever stores the identifier the body store assigns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthoredMessage {
    /// Identifier of the authoring user.
    pub author_id: String,
    /// Message payload.
    pub content: String,
    /// Client-side authoring timestamp (RFC 3339), if supplied.
    #[serde(default)]
    pub client_timestamp: Option<String>,
}

impl AuthoredMessage {
    /// Create a message with no client timestamp.
    pub fn new(author_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            author_id: author_id.into(),
            content: content.into(),
            client_timestamp: None,
        }
    }
}
