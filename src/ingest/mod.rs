//! Message ingest: body persistence, chain linkage, and notification.

mod body;
mod models;
mod service;

pub use body::{MemoryBodyStore, MessageBodyStore, StoredBody};
pub use models::AuthoredMessage;
pub use service::{CommitError, MessageIngestService};
