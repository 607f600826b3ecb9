//! Bucket-chain message history storage core.
//!
//! Conversation history is persisted as a chain of fixed-capacity buckets
//! linked newest to oldest. Appends target the bucket named by the
//! per-conversation head record; when that bucket fills, a new bucket is
//! created and the head is advanced. All mutation is guarded by optimistic
//! version checks, so any number of writers can race safely.

pub mod chain;
pub mod db;
pub mod history;
pub mod ids;
pub mod ingest;
pub mod notify;
pub mod store;
