//! History paging over the bucket chain.

mod reader;

pub use crate::chain::HistoryPage;
pub use reader::HistoryReader;
