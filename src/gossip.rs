//! The gossip seam: resolves the cyclic `PoIService` <-> gossip
//! reference with setter injection. `PoIService` owns an optional handle to
//! a `GossipNode`; the gossip layer calls back into the service through the
//! small `GossipListener` interface. No module-level singletons.

use async_trait::async_trait;

use crate::block::Block;

/// The block-announcement message, sent after persistence.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct BlockAnnouncement {
    pub hash: String,
    pub height: u64,
    pub prev_hash: String,
    pub merkle_root: String,
    pub miner_address: String,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,
    pub version: u32,
    pub item_count: u32,
    pub target_hex: String,
}

impl BlockAnnouncement {
    pub fn from_block(block: &Block) -> Self {
        BlockAnnouncement {
            hash: hex::encode(block.hash()),
            height: block.height,
            prev_hash: hex::encode(block.header.prev_hash),
            merkle_root: hex::encode(block.header.merkle_root),
            miner_address: block.header.miner_address.clone(),
            timestamp: block.header.timestamp_s,
            bits: block.header.bits,
            nonce: block.header.nonce,
            version: block.header.version,
            item_count: block.item_count(),
            target_hex: block.target_hex.clone(),
        }
    }
}

/// `tx:relay` / `tx:request` gossip payloads.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TxRelay {
    pub txid: String,
    pub raw_hex: String,
}

/// Outbound fan-out this crate's core needs from its gossip layer. Sends are
/// treated as non-blocking from the miner's perspective: fan-out
/// happens asynchronously and failures are fail-soft.
#[async_trait]
pub trait GossipNode: Send + Sync {
    async fn announce_block(&self, announcement: BlockAnnouncement);
    async fn relay_tx(&self, relay: TxRelay);
    async fn serve_tx(&self, txid: String, to_peer: String);
}

/// Inbound events the gossip layer delivers back into the core.
#[async_trait]
pub trait GossipListener: Send + Sync {
    async fn on_peer_block(&self, block: Block, source_peer: String);
    async fn on_tx_relayed(&self, txid: String, raw_hex: String, source_peer: String);
    async fn on_tx_requested(&self, txid: String, requesting_peer: String);
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Records every outbound call for assertions in orchestrator tests.
    #[derive(Default)]
    pub struct RecordingGossip {
        pub announced: Mutex<Vec<BlockAnnouncement>>,
        pub relayed: Mutex<Vec<TxRelay>>,
        pub served: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl GossipNode for RecordingGossip {
        async fn announce_block(&self, announcement: BlockAnnouncement) {
            self.announced.lock().unwrap().push(announcement);
        }

        async fn relay_tx(&self, relay: TxRelay) {
            self.relayed.lock().unwrap().push(relay);
        }

        async fn serve_tx(&self, txid: String, to_peer: String) {
            self.served.lock().unwrap().push((txid, to_peer));
        }
    }
}
