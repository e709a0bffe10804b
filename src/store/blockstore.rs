//! Persistent chain-state store backed by the `poi_blocks` column family.
//!
//! Column families, tuned for a write-heavy append pattern (write buffer
//! sizing, LZ4, a shared block cache):
//! - `blocks`        : hash (64 hex chars) -> JSON-encoded `BlockRow`
//! - `height_index`  : height (8-byte BE) ++ hash (32 raw bytes) -> `()`
//! - `meta`          : small fixed keys (`tip_hash`, `tip_height`,
//!                     `own_count`, `total_count`)

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rocksdb::{ColumnFamilyDescriptor, Options, DB};
use serde::{Deserialize, Serialize};

use crate::block::Block;
use crate::error::StorageError;

const CF_BLOCKS: &str = "blocks";
const CF_HEIGHT_INDEX: &str = "height_index";
const CF_META: &str = "meta";

const META_TIP_HASH: &[u8] = b"tip_hash";
const META_TIP_HEIGHT: &[u8] = b"tip_height";
const META_OWN_COUNT: &[u8] = b"own_count";
const META_TOTAL_COUNT: &[u8] = b"total_count";

/// A persisted row of the `poi_blocks` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockRow {
    pub hash: String,
    pub height: u64,
    pub prev_hash: String,
    pub merkle_root: String,
    pub miner_address: String,
    pub timestamp_s: u32,
    pub bits: u32,
    pub nonce: u32,
    pub version: u32,
    pub item_count: u32,
    pub items_json: Option<Vec<String>>,
    pub is_own: bool,
    pub mint_txid: Option<String>,
    pub target_hex: String,
    pub source_peer: Option<String>,
    pub created_at: u64,
}

impl BlockRow {
    pub fn from_block(block: &Block, created_at: u64) -> Self {
        BlockRow {
            hash: hex::encode(block.hash()),
            height: block.height,
            prev_hash: hex::encode(block.header.prev_hash),
            merkle_root: hex::encode(block.header.merkle_root),
            miner_address: block.header.miner_address.clone(),
            timestamp_s: block.header.timestamp_s,
            bits: block.header.bits,
            nonce: block.header.nonce,
            version: block.header.version,
            item_count: block.item_count(),
            items_json: Some(block.item_ids.clone()),
            is_own: block.is_own,
            mint_txid: block.mint_txid.clone(),
            target_hex: block.target_hex.clone(),
            source_peer: block.source_peer.clone(),
            created_at,
        }
    }
}

/// The chain tip: highest height seen; ties broken by earliest insertion.
#[derive(Debug, Clone)]
pub struct Tip {
    pub hash: [u8; 32],
    pub height: u64,
}

fn genesis_tip() -> Tip {
    Tip {
        hash: crate::consensus::genesis::ZERO_HASH,
        height: 0,
    }
}

/// Persistent chain state store, backed by RocksDB.
pub struct BlockStore {
    db: Arc<DB>,
    tip: Mutex<Tip>,
    seq: AtomicU64,
}

impl BlockStore {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_write_buffer_size(32 * 1024 * 1024);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let cfs = vec![
            ColumnFamilyDescriptor::new(CF_BLOCKS, opts.clone()),
            ColumnFamilyDescriptor::new(CF_HEIGHT_INDEX, opts.clone()),
            ColumnFamilyDescriptor::new(CF_META, opts.clone()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, cfs)?;
        let store = BlockStore {
            db: Arc::new(db),
            tip: Mutex::new(genesis_tip()),
            seq: AtomicU64::new(0),
        };
        store.restore_runtime_state()?;
        Ok(store)
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or(StorageError::MissingColumnFamily(
                "expected column family absent",
            ))
    }

    /// Best-effort restoration: if `meta` is empty or a row is corrupt, the
    /// store falls back to genesis rather than erroring.
    fn restore_runtime_state(&self) -> Result<(), StorageError> {
        let meta = self.cf(CF_META)?;
        if let Ok(Some(bytes)) = self.db.get_cf(meta, META_TIP_HASH) {
            if let Ok(height_bytes) = self.db.get_cf(meta, META_TIP_HEIGHT) {
                if let Some(height_bytes) = height_bytes {
                    if bytes.len() == 32 && height_bytes.len() == 8 {
                        let mut hash = [0u8; 32];
                        hash.copy_from_slice(&bytes);
                        let height = u64::from_le_bytes(height_bytes.try_into().unwrap());
                        *self.tip.lock().unwrap() = Tip { hash, height };
                    }
                }
            }
        }

        // The sequence counter only needs to be monotonic across a process
        // lifetime (used for insertion-order tie-breaks); count existing
        // rows as a cheap upper bound rather than scanning for the max.
        let count = self.total_block_count().unwrap_or(0);
        self.seq.store(count, Ordering::SeqCst);
        Ok(())
    }

    /// Inserts a block, deduplicating by hash (a no-op, not an error, if the
    /// hash is already known). Returns `true` if newly inserted.
    pub fn insert(&self, block: &Block) -> Result<bool, StorageError> {
        let blocks_cf = self.cf(CF_BLOCKS)?;
        let hash = block.hash();
        let hash_hex = hex::encode(hash);

        if self.db.get_cf(blocks_cf, hash_hex.as_bytes())?.is_some() {
            return Ok(false);
        }

        let created_at = self.seq.fetch_add(1, Ordering::SeqCst);
        let row = BlockRow::from_block(block, created_at);
        let row_bytes = serde_json::to_vec(&row)?;
        self.db.put_cf(blocks_cf, hash_hex.as_bytes(), row_bytes)?;

        let height_cf = self.cf(CF_HEIGHT_INDEX)?;
        let mut key = Vec::with_capacity(40);
        key.extend_from_slice(&block.height.to_be_bytes());
        key.extend_from_slice(&hash);
        self.db.put_cf(height_cf, key, [])?;

        let meta = self.cf(CF_META)?;
        let mut total = self.total_block_count().unwrap_or(0);
        total += 1;
        self.db
            .put_cf(meta, META_TOTAL_COUNT, total.to_le_bytes())?;
        if block.is_own {
            let mut own = self.own_block_count().unwrap_or(0);
            own += 1;
            self.db.put_cf(meta, META_OWN_COUNT, own.to_le_bytes())?;
        }

        let mut tip = self.tip.lock().unwrap();
        if block.height > tip.height {
            *tip = Tip {
                hash,
                height: block.height,
            };
            self.db.put_cf(meta, META_TIP_HASH, hash)?;
            self.db
                .put_cf(meta, META_TIP_HEIGHT, block.height.to_le_bytes())?;
        }
        Ok(true)
    }

    pub fn tip(&self) -> Tip {
        self.tip.lock().unwrap().clone()
    }

    pub fn get_by_hash(&self, hash: &[u8; 32]) -> Result<Option<BlockRow>, StorageError> {
        let cf = self.cf(CF_BLOCKS)?;
        let hash_hex = hex::encode(hash);
        match self.db.get_cf(cf, hash_hex.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Sets `mint_txid` on an existing block; a no-op if `hash` is unknown
    ///.
    pub fn set_mint_txid(&self, hash: &[u8; 32], txid: &str) -> Result<(), StorageError> {
        let cf = self.cf(CF_BLOCKS)?;
        let hash_hex = hex::encode(hash);
        if let Some(bytes) = self.db.get_cf(cf, hash_hex.as_bytes())? {
            let mut row: BlockRow = serde_json::from_slice(&bytes)?;
            row.mint_txid = Some(txid.to_string());
            let updated = serde_json::to_vec(&row)?;
            self.db.put_cf(cf, hash_hex.as_bytes(), updated)?;
        }
        Ok(())
    }

    pub fn own_block_count(&self) -> Result<u64, StorageError> {
        self.read_counter(META_OWN_COUNT)
    }

    pub fn total_block_count(&self) -> Result<u64, StorageError> {
        self.read_counter(META_TOTAL_COUNT)
    }

    fn read_counter(&self, key: &[u8]) -> Result<u64, StorageError> {
        let meta = self.cf(CF_META)?;
        match self.db.get_cf(meta, key)? {
            Some(bytes) if bytes.len() == 8 => Ok(u64::from_le_bytes(bytes.try_into().unwrap())),
            _ => Ok(0),
        }
    }

    /// Returns the timestamps of the last `n` blocks by insertion (spec
    /// §4.5), used to restore `DifficultyAdjuster::recent_timestamps` on
    /// startup. Chronological order (oldest first).
    pub fn recent_timestamps(&self, n: usize) -> Result<Vec<u64>, StorageError> {
        let height_cf = self.cf(CF_HEIGHT_INDEX)?;
        let blocks_cf = self.cf(CF_BLOCKS)?;

        let mut keys: Vec<Vec<u8>> = Vec::new();
        let iter = self.db.iterator_cf(height_cf, rocksdb::IteratorMode::End);
        for item in iter {
            let (key, _) = item?;
            keys.push(key.to_vec());
            if keys.len() >= n {
                break;
            }
        }
        keys.reverse();

        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            let hash = &key[8..40];
            let hash_hex = hex::encode(hash);
            if let Some(bytes) = self.db.get_cf(blocks_cf, hash_hex.as_bytes())? {
                let row: BlockRow = serde_json::from_slice(&bytes)?;
                out.push(row.timestamp_s as u64);
            }
        }
        Ok(out)
    }

    /// The latest block's `target_hex`, used to seed the adjuster on restart.
    pub fn latest_target_hex(&self) -> Result<Option<String>, StorageError> {
        let tip = self.tip();
        if tip.hash == genesis_tip().hash {
            return Ok(None);
        }
        Ok(self.get_by_hash(&tip.hash)?.map(|row| row.target_hex))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::BlockHeader;
    use std::sync::atomic::AtomicU64 as TestCtr;

    static CTR: TestCtr = TestCtr::new(0);

    fn tmp_store() -> (BlockStore, std::path::PathBuf) {
        let id = CTR.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!("clawminer_bs_{}_{}", std::process::id(), id));
        let _ = std::fs::remove_dir_all(&path);
        (BlockStore::open(&path).unwrap(), path)
    }

    fn block(height: u64, prev: [u8; 32], is_own: bool, nonce: u32) -> Block {
        Block {
            header: BlockHeader {
                version: 1,
                prev_hash: prev,
                merkle_root: [7u8; 32],
                miner_address: "miner".to_string(),
                timestamp_s: 1_000 + height as u32,
                bits: 8,
                nonce,
            },
            item_ids: vec!["a".to_string()],
            is_own,
            source_peer: None,
            mint_txid: None,
            target_hex: "ff".repeat(32),
            height,
        }
    }

    #[test]
    fn test_insert_and_get_by_hash() {
        let (store, path) = tmp_store();
        let b = block(1, [0u8; 32], true, 0);
        let hash = b.hash();
        assert!(store.insert(&b).unwrap());
        let row = store.get_by_hash(&hash).unwrap().unwrap();
        assert_eq!(row.height, 1);
        let _ = std::fs::remove_dir_all(&path);
    }

    #[test]
    fn test_insert_dedups_by_hash() {
        let (store, path) = tmp_store();
        let b = block(1, [0u8; 32], true, 0);
        assert!(store.insert(&b).unwrap());
        assert!(!store.insert(&b).unwrap());
        assert_eq!(store.total_block_count().unwrap(), 1);
        let _ = std::fs::remove_dir_all(&path);
    }

    #[test]
    fn test_tip_tracks_max_height() {
        let (store, path) = tmp_store();
        let b1 = block(1, [0u8; 32], true, 0);
        let b2 = block(2, b1.hash(), true, 1);
        store.insert(&b1).unwrap();
        store.insert(&b2).unwrap();
        let tip = store.tip();
        assert_eq!(tip.height, 2);
        assert_eq!(tip.hash, b2.hash());
        let _ = std::fs::remove_dir_all(&path);
    }

    #[test]
    fn test_set_mint_txid_noop_for_unknown_hash() {
        let (store, path) = tmp_store();
        store.set_mint_txid(&[9u8; 32], "txid").unwrap();
        let _ = std::fs::remove_dir_all(&path);
    }

    #[test]
    fn test_set_mint_txid_updates_row() {
        let (store, path) = tmp_store();
        let b = block(1, [0u8; 32], true, 0);
        let hash = b.hash();
        store.insert(&b).unwrap();
        store.set_mint_txid(&hash, "tx1").unwrap();
        let row = store.get_by_hash(&hash).unwrap().unwrap();
        assert_eq!(row.mint_txid.as_deref(), Some("tx1"));
        let _ = std::fs::remove_dir_all(&path);
    }

    // ========== RESTART DURABILITY ==========

    #[test]
    fn test_restart_restores_tip_and_counts() {
        let id = CTR.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!("clawminer_bs_restart_{}_{}", std::process::id(), id));
        let _ = std::fs::remove_dir_all(&path);

        let mut prev = [0u8; 32];
        {
            let store = BlockStore::open(&path).unwrap();
            for h in 1..=3u64 {
                let b = block(h, prev, true, h as u32);
                prev = b.hash();
                store.insert(&b).unwrap();
            }
        }

        let store2 = BlockStore::open(&path).unwrap();
        assert_eq!(store2.own_block_count().unwrap(), 3);
        assert_eq!(store2.total_block_count().unwrap(), 3);
        assert_eq!(store2.tip().height, 3);
        let _ = std::fs::remove_dir_all(&path);
    }
}
