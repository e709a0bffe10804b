pub mod blockstore;
pub mod headers;

pub use blockstore::{BlockRow, BlockStore, Tip};
pub use headers::{BhsClient, BlockHeaderRecord, HeaderStore, HeaderSync, SyncProgress};
