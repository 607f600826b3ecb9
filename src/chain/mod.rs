//! Bucket chain management.

mod error;
mod manager;

pub use error::{ChainError, ChainResult};
pub use manager::{
    AppendReceipt, BucketChainManager, ChainConfig, DEFAULT_BUCKET_CAPACITY,
    DEFAULT_MAX_APPEND_ATTEMPTS, HistoryPage,
};
