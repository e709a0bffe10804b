//! The orchestrator: consumes work, drives the miner, persists
//! blocks, triggers mint-broadcast, and announces blocks via gossip.
//!
//! Constructed with explicit dependencies, no module-level singletons —
//! `miner_address`, an optional `MintBroadcaster`, an
//! optional `GossipNode` (attachable later via `set_gossip_node`, resolving
//! the cyclic service/gossip reference with setter injection), the
//! `BlockStore`, and an optional `HeaderSync`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use primitive_types::U256;
use rand::Rng;
use rayon::prelude::*;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::block::{self, header_template, Block, BlockHeader};
use crate::broadcaster::{BroadcastOutcome, MintBroadcaster};
use crate::consensus::target::{difficulty_of, target_to_u256, Target};
use crate::consensus::{genesis, target::DifficultyAdjuster};
use crate::error::{MiningError, ProtocolError};
use crate::gossip::{BlockAnnouncement, GossipListener, GossipNode, TxRelay};
use crate::mempool::{Mempool, WorkItem};
use crate::miner::{try_chunk, ChunkOutcome};
use crate::relay::RelayCache;
use crate::store::BlockStore;

/// Per-window difficulty/timing snapshot for `status()`.
#[derive(Debug, Clone)]
pub struct WindowStats {
    pub recent_timestamps: Vec<u64>,
    pub total_blocks_seen: u64,
    pub adjustment_period: u64,
}

/// Operator-facing snapshot.
#[derive(Debug, Clone)]
pub struct Status {
    pub blocks_mined: u64,
    pub block_height: u64,
    pub is_mining: bool,
    pub is_paused: bool,
    pub mempool_size: usize,
    pub last_block_hash_prefix: String,
    pub miner_address: String,
    pub difficulty: U256,
    pub window_stats: WindowStats,
}

pub struct PoIServiceConfig {
    pub miner_address: String,
    pub adjustment_period: u64,
    pub target_block_time_ms: u64,
    pub initial_difficulty: u32,
    pub min_items_to_mine: usize,
    pub batch_size: usize,
    pub chunk_size: u64,
    pub max_chunks_per_header: u64,
    pub mint_max_retries: u32,
    pub mint_retry_min_ms: u64,
    pub mint_retry_max_ms: u64,
}

pub struct PoIService {
    cfg: PoIServiceConfig,
    mempool: Mutex<Mempool>,
    block_store: Arc<BlockStore>,
    relay_cache: Arc<RelayCache>,
    broadcaster: Option<Arc<dyn MintBroadcaster>>,
    gossip: Mutex<Option<Arc<dyn GossipNode>>>,
    adjuster: Mutex<DifficultyAdjuster>,
    is_mining: AtomicBool,
    is_paused: AtomicBool,
    blocks_mined: AtomicU64,
}

impl PoIService {
    /// Restores state from the block store on construction: tip ->
    /// block_height/last_block_hash, own-block
    /// count -> blocks_mined, latest block's target_hex -> adjuster target,
    /// recent window timestamps -> adjuster's sliding window.
    pub fn new(
        cfg: PoIServiceConfig,
        block_store: Arc<BlockStore>,
        relay_cache: Arc<RelayCache>,
        broadcaster: Option<Arc<dyn MintBroadcaster>>,
    ) -> Self {
        let initial_target = genesis::initial_target(cfg.initial_difficulty);
        let mut adjuster = DifficultyAdjuster::new(
            initial_target,
            cfg.adjustment_period,
            cfg.target_block_time_ms,
        );

        let restored_target = block_store
            .latest_target_hex()
            .ok()
            .flatten()
            .and_then(|hex_str| hex_to_target(&hex_str));
        let total_blocks_seen = block_store.total_block_count().unwrap_or(0);
        let recent_timestamps = block_store
            .recent_timestamps(cfg.adjustment_period as usize)
            .unwrap_or_default();

        if let Some(target) = restored_target {
            adjuster.restore_state(target, total_blocks_seen, recent_timestamps);
        }

        let blocks_mined = block_store.own_block_count().unwrap_or(0);

        PoIService {
            cfg,
            mempool: Mutex::new(Mempool::new()),
            block_store,
            relay_cache,
            broadcaster,
            gossip: Mutex::new(None),
            adjuster: Mutex::new(adjuster),
            is_mining: AtomicBool::new(false),
            is_paused: AtomicBool::new(false),
            blocks_mined: AtomicU64::new(blocks_mined),
        }
    }

    /// Setter injection for the gossip layer: the service can be
    /// constructed before the gossip mesh exists.
    pub fn set_gossip_node(&self, gossip: Arc<dyn GossipNode>) {
        *self.gossip.lock().unwrap() = Some(gossip);
    }

    pub fn miner_address(&self) -> &str {
        &self.cfg.miner_address
    }

    /// Adds `item` to the mempool; starts the mining loop if not already
    /// running, not paused, and the mempool has reached `min_items_to_mine`
    ///. The `is_mining` compare-exchange is the scheduling gate:
    /// two loops never start concurrently.
    pub fn submit_work(self: &Arc<Self>, item: WorkItem) {
        self.mempool.lock().unwrap().add(item);
        self.maybe_start_mining();
    }

    fn maybe_start_mining(self: &Arc<Self>) {
        if self.is_paused.load(Ordering::Acquire) {
            return;
        }
        let size = self.mempool.lock().unwrap().size();
        if size < self.cfg.min_items_to_mine {
            return;
        }
        if self
            .is_mining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let svc = Arc::clone(self);
            tokio::spawn(async move {
                svc.mining_loop().await;
            });
        }
    }

    async fn mining_loop(self: Arc<Self>) {
        info!("mining loop started");
        loop {
            if self.is_paused.load(Ordering::Acquire) {
                break;
            }
            let items = self.mempool.lock().unwrap().take(self.cfg.batch_size);
            if items.is_empty() {
                break;
            }

            let tip = self.block_store.tip();
            let target = self.adjuster.lock().unwrap().target();
            let bits = bits_from_target(&target);
            let now_s = now_s();
            let mut header = header_template(&items, tip.hash, &self.cfg.miner_address, bits, now_s);

            let mut solution: Option<(BlockHeader, [u8; 32])> = None;
            for _ in 0..self.cfg.max_chunks_per_header {
                tokio::task::yield_now().await;
                match try_chunk(header, &target, self.cfg.chunk_size) {
                    ChunkOutcome::Solved { header: h, hash } => {
                        solution = Some((h, hash));
                        break;
                    }
                    ChunkOutcome::NotYet { header: h } => header = h,
                }
            }

            match solution {
                None => {
                    // Exhausted this header's nonce/timestamp space without a
                    // match; requeue the batch and let the next loop
                    // iteration mint a fresh header_template.
                    let mut mempool = self.mempool.lock().unwrap();
                    for item in items {
                        mempool.add(item);
                    }
                }
                Some((solved_header, hash)) => {
                    self.on_block_found(solved_header, hash, items, target, tip.height)
                        .await;
                }
            }
        }
        self.is_mining.store(false, Ordering::Release);
        info!("mining loop exited (mempool drained or paused)");
    }

    async fn on_block_found(
        self: &Arc<Self>,
        header: BlockHeader,
        hash: [u8; 32],
        items: Vec<WorkItem>,
        target: Target,
        prev_height: u64,
    ) {
        let item_ids: Vec<String> = items.iter().map(|i| i.id.clone()).collect();

        if let Err(e) = verify_own_block(&header, &item_ids, &hash, &target) {
            error!(error = %e, height = prev_height + 1, "mined block failed self-verification, abandoning attempt");
            return;
        }

        let height = prev_height + 1;
        let target_hex = hex::encode(target);

        let block = Block {
            header: header.clone(),
            item_ids,
            is_own: true,
            source_peer: None,
            mint_txid: None,
            target_hex: target_hex.clone(),
            height,
        };

        self.blocks_mined.fetch_add(1, Ordering::Relaxed);
        self.adjuster
            .lock()
            .unwrap()
            .record_block(header.timestamp_s as u64 * 1000);

        if let Err(e) = self.block_store.insert(&block) {
            error!(error = %e, height, "failed to persist mined block");
            return;
        }
        info!(height, hash = %hex::encode(hash), item_count = block.item_count(), "block mined");

        let merkle_root_hex = hex::encode(header.merkle_root);
        if let Some(broadcaster) = self.broadcaster.clone() {
            let svc = Arc::clone(self);
            let block_hash = hash;
            tokio::spawn(async move {
                svc.claim_mint(broadcaster, merkle_root_hex, block_hash).await;
            });
        }

        if let Some(gossip) = self.gossip.lock().unwrap().clone() {
            let announcement = BlockAnnouncement::from_block(&block);
            tokio::spawn(async move {
                gossip.announce_block(announcement).await;
            });
        }
    }

    /// Bounded retry policy for a mint claim: attempts up to
    /// `mint_max_retries`, sleeping a uniform jitter between `retry`
    /// outcomes. `stop` absorbs silently; a final failure is logged and the
    /// block remains valid with `mint_txid = null`.
    async fn claim_mint(
        self: Arc<Self>,
        broadcaster: Arc<dyn MintBroadcaster>,
        merkle_root_hex: String,
        block_hash: [u8; 32],
    ) {
        for attempt in 0..self.cfg.mint_max_retries {
            match broadcaster.broadcast_mint(&merkle_root_hex).await {
                BroadcastOutcome::Success { txid, raw_hex, .. } => {
                    if let Err(e) = self.block_store.set_mint_txid(&block_hash, &txid) {
                        error!(error = %e, txid, "failed to record mint txid");
                    }
                    let raw = raw_hex.unwrap_or_default();
                    if let Err(e) = self.relay_cache.store(&txid, &raw, false, None, None, now_s() as u64)
                    {
                        warn!(error = %e, txid, "failed to cache mint transaction");
                    }
                    if let Some(gossip) = self.gossip.lock().unwrap().clone() {
                        let relay = TxRelay {
                            txid: txid.clone(),
                            raw_hex: raw,
                        };
                        tokio::spawn(async move {
                            gossip.relay_tx(relay).await;
                        });
                    }
                    return;
                }
                BroadcastOutcome::Retry { reason } => {
                    if attempt + 1 >= self.cfg.mint_max_retries {
                        warn!(reason, merkle_root = %merkle_root_hex, "mint retries exhausted");
                        return;
                    }
                    let delay = rand::thread_rng()
                        .gen_range(self.cfg.mint_retry_min_ms..=self.cfg.mint_retry_max_ms);
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                BroadcastOutcome::Stop { reason } => {
                    info!(reason, merkle_root = %merkle_root_hex, "mint broadcast stopped (expected)");
                    return;
                }
                BroadcastOutcome::Error { message } => {
                    error!(message, merkle_root = %merkle_root_hex, "mint broadcast failed");
                    return;
                }
            }
        }
    }

    /// Records the timestamp in the adjuster, persists the block, and
    /// adopts it as tip if it extends the chain (`BlockStore::insert` adopts
    /// any higher-height block unconditionally; this spec does no further
    /// reorg validation). Peer blocks are validated for PoW and merkle-root
    /// correctness before any state mutation; a protocol error rejects the
    /// message without mutating state.
    pub fn handle_peer_block(&self, block: Block, source_peer: String) -> Result<(), ProtocolError> {
        verify_peer_block(&block)?;
        self.apply_verified_peer_block(block, source_peer);
        Ok(())
    }

    /// Verifies a batch of gossip-delivered peer blocks (e.g. a `Headers`/
    /// `Blocks` response spanning several heights) with the PoW check run in
    /// parallel across the batch, then applies the survivors sequentially in
    /// ascending height order so the adjuster's timestamp window and the
    /// block store's tip both advance in a consistent order. Each input's
    /// outcome is reported independently; one block's rejection does not
    /// drop its batch-mates.
    pub fn handle_peer_blocks_batch(&self, blocks: Vec<(Block, String)>) -> Vec<Result<(), ProtocolError>> {
        let mut outcomes: Vec<Option<ProtocolError>> = blocks
            .par_iter()
            .map(|(block, _)| verify_peer_block(block).err())
            .collect();

        let mut indexed: Vec<usize> = (0..blocks.len())
            .filter(|i| outcomes[*i].is_none())
            .collect();
        indexed.sort_by_key(|&i| blocks[i].0.height);

        for i in indexed {
            let (block, source_peer) = blocks[i].clone();
            self.apply_verified_peer_block(block, source_peer);
        }

        blocks
            .iter()
            .enumerate()
            .map(|(i, _)| match outcomes[i].take() {
                Some(e) => Err(e),
                None => Ok(()),
            })
            .collect()
    }

    fn apply_verified_peer_block(&self, block: Block, source_peer: String) {
        self.adjuster
            .lock()
            .unwrap()
            .record_block(block.header.timestamp_s as u64 * 1000);

        let mut peer_block = block;
        peer_block.is_own = false;
        peer_block.source_peer = Some(source_peer);

        if let Err(e) = self.block_store.insert(&peer_block) {
            error!(error = %e, "failed to persist peer block");
        }
    }

    pub fn pause(&self) {
        self.is_paused.store(true, Ordering::Release);
    }

    /// Re-enters the mining loop if work remains.
    pub fn resume(self: &Arc<Self>) {
        self.is_paused.store(false, Ordering::Release);
        self.maybe_start_mining();
    }

    pub fn paused(&self) -> bool {
        self.is_paused.load(Ordering::Acquire)
    }

    /// Injects a `heartbeat` item with id `ping-<now>` when the mempool is
    /// below `min_items_to_mine`, so the chain keeps advancing during idle
    /// periods.
    pub fn heartbeat_tick(self: &Arc<Self>) {
        let size = self.mempool.lock().unwrap().size();
        if size < self.cfg.min_items_to_mine {
            let now = now_ms();
            self.submit_work(WorkItem::heartbeat(now));
        }
    }

    pub fn status(&self) -> Status {
        let tip = self.block_store.tip();
        let adjuster = self.adjuster.lock().unwrap();
        let target = adjuster.target();
        Status {
            blocks_mined: self.blocks_mined.load(Ordering::Relaxed),
            block_height: tip.height,
            is_mining: self.is_mining.load(Ordering::Acquire),
            is_paused: self.is_paused.load(Ordering::Acquire),
            mempool_size: self.mempool.lock().unwrap().size(),
            last_block_hash_prefix: hex::encode(tip.hash)[..16].to_string(),
            miner_address: self.cfg.miner_address.clone(),
            difficulty: difficulty_of(&target),
            window_stats: WindowStats {
                recent_timestamps: adjuster.recent_timestamps().to_vec(),
                total_blocks_seen: adjuster.total_blocks_seen(),
                adjustment_period: self.cfg.adjustment_period,
            },
        }
    }
}

/// Wires inbound gossip events into the orchestrator: `on_peer_block` feeds
/// `handle_peer_block`, `on_tx_relayed`/`on_tx_requested` drive the relay
/// cache's mesh-propagation state machine (spec §4.7).
#[async_trait]
impl GossipListener for PoIService {
    async fn on_peer_block(&self, block: Block, source_peer: String) {
        if let Err(e) = self.handle_peer_block(block, source_peer.clone()) {
            warn!(error = %e, peer = %source_peer, "rejected peer block");
        }
    }

    /// If the tx is unknown, caches it with `source_peer` attributed so
    /// mesh/health reporting can tell local mints from relayed ones apart.
    async fn on_tx_relayed(&self, txid: String, raw_hex: String, source_peer: String) {
        if self.relay_cache.has(&txid) {
            return;
        }
        if let Err(e) = self
            .relay_cache
            .store(&txid, &raw_hex, false, None, Some(source_peer), now_s() as u64)
        {
            warn!(error = %e, txid, "failed to cache relayed transaction");
        }
    }

    /// Serves the tx back to the requester if cached; the actual byte
    /// transport is the gossip layer's job, this only decides whether to ask
    /// for it.
    async fn on_tx_requested(&self, txid: String, requesting_peer: String) {
        let hit = matches!(self.relay_cache.get(&txid), Ok(Some(_)));
        if !hit {
            return;
        }
        if let Some(gossip) = self.gossip.lock().unwrap().clone() {
            gossip.serve_tx(txid, requesting_peer).await;
        }
    }
}

/// Outcome of the merkle-root/PoW pair of checks shared by own-block and
/// peer-block verification; each caller maps it onto its own error type.
enum BlockCheckFailure {
    MerkleMismatch,
    TargetNotMet,
}

/// Recomputes the merkle root over `item_ids` and compares it against the
/// header's declared root, then checks `hash` against `target`. Shared by
/// `verify_own_block` (invariant checks on a just-mined block) and
/// `verify_peer_block` (ingest checks on a gossip-delivered block) so both
/// reject on the identical condition.
fn check_merkle_and_pow(
    item_ids: &[String],
    merkle_root: [u8; 32],
    hash: &[u8; 32],
    target: &Target,
) -> Result<(), BlockCheckFailure> {
    let expected_root = block::merkle_root(item_ids);
    if expected_root != merkle_root {
        return Err(BlockCheckFailure::MerkleMismatch);
    }
    if U256::from_big_endian(hash) >= target_to_u256(target) {
        return Err(BlockCheckFailure::TargetNotMet);
    }
    Ok(())
}

/// Invariant check on a block `mining_loop` just solved, before any
/// persistence: an empty item set, a merkle-root mismatch against the
/// builder's own `item_ids`, or a solution that does not actually satisfy
/// `target` are all fatal for this attempt (spec.md §7) and must not reach
/// `BlockStore::insert`.
fn verify_own_block(
    header: &BlockHeader,
    item_ids: &[String],
    hash: &[u8; 32],
    target: &Target,
) -> Result<(), MiningError> {
    if item_ids.is_empty() {
        return Err(MiningError::EmptyBlock);
    }
    check_merkle_and_pow(item_ids, header.merkle_root, hash, target).map_err(|f| match f {
        BlockCheckFailure::MerkleMismatch => MiningError::MerkleMismatch,
        BlockCheckFailure::TargetNotMet => MiningError::TargetNotMet,
    })
}

/// Pure PoW + merkle-root check for an incoming peer block, shared by the
/// single-block and batch entry points so both reject identically.
fn verify_peer_block(block: &Block) -> Result<(), ProtocolError> {
    if block.item_ids.is_empty() {
        return Err(ProtocolError::MalformedBlock("block has no items"));
    }
    let target = hex_to_target(&block.target_hex)
        .ok_or(ProtocolError::MalformedBlock("invalid target_hex"))?;
    let hash = block.hash();
    check_merkle_and_pow(&block.item_ids, block.header.merkle_root, &hash, &target).map_err(|f| match f {
        BlockCheckFailure::MerkleMismatch => ProtocolError::MerkleMismatch,
        BlockCheckFailure::TargetNotMet => ProtocolError::PowNotMet,
    })
}

/// Packs a 32-byte target into an informational `bits` field for the block
/// header by taking the 4 most-significant non-zero-prefixed bytes.
fn bits_from_target(target: &Target) -> u32 {
    let leading_zero_bytes = target.iter().take_while(|b| **b == 0).count();
    let start = leading_zero_bytes.min(28);
    let mut bits = [0u8; 4];
    bits.copy_from_slice(&target[start..start + 4]);
    u32::from_be_bytes(bits)
}

fn hex_to_target(s: &str) -> Option<Target> {
    let bytes = hex::decode(s).ok()?;
    if bytes.len() != 32 {
        return None;
    }
    let mut t = [0u8; 32];
    t.copy_from_slice(&bytes);
    Some(t)
}

fn now_s() -> u32 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Drives the idle-filler heartbeat on `heartbeat_interval_ms` until the
/// shutdown signal fires.
pub async fn run_heartbeat(
    svc: Arc<PoIService>,
    interval_ms: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
    loop {
        tokio::select! {
            _ = ticker.tick() => svc.heartbeat_tick(),
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("heartbeat task shutting down");
                    break;
                }
            }
        }
    }
}
