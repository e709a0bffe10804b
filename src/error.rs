//! Error taxonomy for the core: Storage, Broadcast, Network, Protocol,
//! and Invariant violation.

use thiserror::Error;

/// Persistent-store failures: RocksDB unavailable, or a row failed to decode.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("rocksdb error: {0}")]
    RocksDb(#[from] rocksdb::Error),
    #[error("column family not found: {0}")]
    MissingColumnFamily(&'static str),
    #[error("corrupt row in {table}: {reason}")]
    CorruptRow {
        table: &'static str,
        reason: &'static str,
    },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Errors surfaced from a `MintBroadcaster` implementation's `Error` arm.
#[derive(Debug, Error)]
#[error("mint broadcast failed: {message}")]
pub struct BroadcastError {
    pub message: String,
}

/// Soft failures: gossip send failed, a mesh peer was unreachable, or the
/// Block-Header Service timed out. Always handled fail-soft by the caller.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("gossip send failed: {0}")]
    GossipSend(String),
    #[error("mesh peer unreachable: {0}")]
    MeshPeerUnreachable(String),
    #[error("request to {0} timed out")]
    Timeout(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// A malformed peer message or a block that fails PoW verification on
/// ingest. The message is rejected; no state is mutated.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed peer block: {0}")]
    MalformedBlock(&'static str),
    #[error("proof-of-work check failed on ingest")]
    PowNotMet,
    #[error("merkle root does not match declared items")]
    MerkleMismatch,
}

/// Fatal conditions within a single block-mining attempt: an invariant was
/// violated, not a transient failure. Abort the attempt and log.
#[derive(Debug, Error)]
pub enum MiningError {
    #[error("block has no items")]
    EmptyBlock,
    #[error("computed merkle root does not match the header template")]
    MerkleMismatch,
    #[error("candidate hash does not satisfy the target")]
    TargetNotMet,
    #[error(transparent)]
    Storage(#[from] StorageError),
}
