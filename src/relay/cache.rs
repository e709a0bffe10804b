//! Bounded SPV relay-transaction cache backed by the `relay_txs` table.
//!
//! State machine per tx:
//! `[unknown] --store--> [cached] --TTL expire--> [evicted]`,
//! `[cached] --LRU evict from memory--> [persistent-only] --get--> [cached]`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use rocksdb::{ColumnFamilyDescriptor, Options, DB};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

const CF_RELAY: &str = "relay_txs";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayTx {
    pub txid: String,
    pub raw_hex: String,
    pub confirmed: bool,
    pub block_hash: Option<String>,
    pub source_peer: Option<String>,
    pub stored_at: u64,
}

struct MemoryEntry {
    tx: RelayTx,
    /// Insertion order key for FIFO/LRU eviction.
    order: u64,
}

/// Bounded in-memory map backed by a persistent RocksDB table.
pub struct RelayCache {
    db: Arc<DB>,
    memory: Mutex<HashMap<String, MemoryEntry>>,
    order_ctr: Mutex<u64>,
    max_size: usize,
    ttl_s: u64,
}

impl RelayCache {
    pub fn open(path: &Path, max_size: usize, ttl_s: u64) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        let cfs = vec![ColumnFamilyDescriptor::new(CF_RELAY, opts.clone())];
        let db = DB::open_cf_descriptors(&opts, path, cfs)?;
        Ok(RelayCache {
            db: Arc::new(db),
            memory: Mutex::new(HashMap::new()),
            order_ctr: Mutex::new(0),
            max_size,
            ttl_s,
        })
    }

    fn cf(&self) -> Result<&rocksdb::ColumnFamily, StorageError> {
        self.db
            .cf_handle(CF_RELAY)
            .ok_or(StorageError::MissingColumnFamily(
                "expected column family absent",
            ))
    }

    fn persist_upsert(&self, tx: &RelayTx) -> Result<(), StorageError> {
        let cf = self.cf()?;
        let bytes = serde_json::to_vec(tx)?;
        self.db.put_cf(cf, tx.txid.as_bytes(), bytes)?;
        Ok(())
    }

    fn persist_get(&self, txid: &str) -> Result<Option<RelayTx>, StorageError> {
        let cf = self.cf()?;
        match self.db.get_cf(cf, txid.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn persist_delete(&self, txid: &str) -> Result<(), StorageError> {
        let cf = self.cf()?;
        self.db.delete_cf(cf, txid.as_bytes())?;
        Ok(())
    }

    /// Evicts the oldest memory entry if at capacity, then writes through to
    /// memory and the persistent store.
    pub fn store(
        &self,
        txid: &str,
        raw_hex: &str,
        confirmed: bool,
        block_hash: Option<String>,
        source_peer: Option<String>,
        now_s: u64,
    ) -> Result<(), StorageError> {
        let tx = RelayTx {
            txid: txid.to_string(),
            raw_hex: raw_hex.to_string(),
            confirmed,
            block_hash,
            source_peer,
            stored_at: now_s,
        };

        self.persist_upsert(&tx)?;

        let mut mem = self.memory.lock().unwrap();
        if !mem.contains_key(txid) && mem.len() >= self.max_size {
            if let Some(oldest_key) = mem
                .iter()
                .min_by_key(|(_, e)| e.order)
                .map(|(k, _)| k.clone())
            {
                mem.remove(&oldest_key);
            }
        }
        let mut ctr = self.order_ctr.lock().unwrap();
        *ctr += 1;
        mem.insert(
            txid.to_string(),
            MemoryEntry {
                tx,
                order: *ctr,
            },
        );
        Ok(())
    }

    /// Memory first; on miss, promotes from the persistent store into memory.
    pub fn get(&self, txid: &str) -> Result<Option<RelayTx>, StorageError> {
        {
            let mem = self.memory.lock().unwrap();
            if let Some(entry) = mem.get(txid) {
                return Ok(Some(entry.tx.clone()));
            }
        }
        match self.persist_get(txid)? {
            Some(tx) => {
                let mut mem = self.memory.lock().unwrap();
                if mem.len() >= self.max_size {
                    if let Some(oldest_key) = mem
                        .iter()
                        .min_by_key(|(_, e)| e.order)
                        .map(|(k, _)| k.clone())
                    {
                        mem.remove(&oldest_key);
                    }
                }
                let mut ctr = self.order_ctr.lock().unwrap();
                *ctr += 1;
                mem.insert(
                    txid.to_string(),
                    MemoryEntry {
                        tx: tx.clone(),
                        order: *ctr,
                    },
                );
                Ok(Some(tx))
            }
            None => Ok(None),
        }
    }

    pub fn has(&self, txid: &str) -> bool {
        if self.memory.lock().unwrap().contains_key(txid) {
            return true;
        }
        matches!(self.persist_get(txid), Ok(Some(_)))
    }

    /// Drops memory entries older than the configured TTL and purges the
    /// corresponding persistent rows. Run on a periodic timer by the daemon.
    pub fn prune(&self, now_s: u64) -> Result<usize, StorageError> {
        let expired: Vec<String> = {
            let mem = self.memory.lock().unwrap();
            mem.iter()
                .filter(|(_, e)| now_s.saturating_sub(e.tx.stored_at) > self.ttl_s)
                .map(|(k, _)| k.clone())
                .collect()
        };

        for txid in &expired {
            self.memory.lock().unwrap().remove(txid);
            self.persist_delete(txid)?;
        }
        Ok(expired.len())
    }

    pub fn memory_len(&self) -> usize {
        self.memory.lock().unwrap().len()
    }

    /// Total rows in the persistent table, counted the way
    /// `HeaderStore::total_headers` counts its column family.
    pub fn db_count(&self) -> Result<u64, StorageError> {
        let cf = self.cf()?;
        Ok(self.db.iterator_cf(cf, rocksdb::IteratorMode::Start).count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    static CTR: AtomicU64 = AtomicU64::new(0);

    fn tmp_cache(max_size: usize, ttl_s: u64) -> (RelayCache, std::path::PathBuf) {
        let id = CTR.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!("clawminer_relay_{}_{}", std::process::id(), id));
        let _ = std::fs::remove_dir_all(&path);
        (RelayCache::open(&path, max_size, ttl_s).unwrap(), path)
    }

    #[test]
    fn test_store_then_get_roundtrips() {
        let (cache, path) = tmp_cache(10, 3600);
        cache.store("abc", "deadbeef", false, None, None, 0).unwrap();
        let got = cache.get("abc").unwrap().unwrap();
        assert_eq!(got.raw_hex, "deadbeef");
        assert!(!got.confirmed);
        let _ = std::fs::remove_dir_all(&path);
    }

    #[test]
    fn test_has_checks_memory_and_persistent() {
        let (cache, path) = tmp_cache(10, 3600);
        assert!(!cache.has("nope"));
        cache.store("abc", "deadbeef", false, None, None, 0).unwrap();
        assert!(cache.has("abc"));
        let _ = std::fs::remove_dir_all(&path);
    }

    #[test]
    fn test_db_count_reflects_persisted_rows() {
        let (cache, path) = tmp_cache(10, 3600);
        assert_eq!(cache.db_count().unwrap(), 0);
        cache.store("a", "1", false, None, None, 0).unwrap();
        cache.store("b", "2", false, None, None, 0).unwrap();
        assert_eq!(cache.db_count().unwrap(), 2);
        let _ = std::fs::remove_dir_all(&path);
    }

    #[test]
    fn test_lru_eviction_at_capacity() {
        let (cache, path) = tmp_cache(2, 3600);
        cache.store("a", "1", false, None, None, 0).unwrap();
        cache.store("b", "2", false, None, None, 0).unwrap();
        cache.store("c", "3", false, None, None, 0).unwrap();
        assert_eq!(cache.memory_len(), 2);
        // "a" was evicted from memory but still promotable from persistence.
        let got = cache.get("a").unwrap();
        assert!(got.is_some());
        let _ = std::fs::remove_dir_all(&path);
    }

    // ========== RELAY TTL ==========

    #[test]
    fn test_prune_removes_expired_entries_from_memory() {
        let (cache, path) = tmp_cache(10, 100);
        cache.store("abc", "deadbeef", false, None, None, 0).unwrap();
        let pruned = cache.prune(50).unwrap();
        assert_eq!(pruned, 0);
        assert!(cache.get("abc").unwrap().is_some());

        let pruned = cache.prune(201).unwrap();
        assert_eq!(pruned, 1);
        assert_eq!(cache.memory_len(), 0);
        assert!(cache.get("abc").unwrap().is_none());
        let _ = std::fs::remove_dir_all(&path);
    }
}
