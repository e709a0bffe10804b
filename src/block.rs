//! Block header encoding, double-SHA-256 hashing, and the canonical Merkle
//! rule over work-item ids.
//!
//! `merkle_root` and `header_template` are the two functions that must be
//! byte-for-byte agreed across independent implementations:
//! keep them pure and free of any non-canonical field ordering.

use sha2::{Digest, Sha256};

use crate::mempool::WorkItem;

/// Protocol version placed into every header. Only `1` exists today.
pub const HEADER_VERSION: u32 = 1;

/// Fixed byte layout: 4 + 32 + 32 + miner_address (length-prefixed) + 4 + 4 + 4.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    pub prev_hash: [u8; 32],
    pub merkle_root: [u8; 32],
    pub miner_address: String,
    pub timestamp_s: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    /// Canonical little-endian byte encoding: field order fixed, integers
    /// little-endian, `miner_address` as a 4-byte LE length prefix followed
    /// by its UTF-8 bytes (so the encoding stays byte-identical across
    /// implementations regardless of string allocator details).
    pub fn encode(&self) -> Vec<u8> {
        let addr = self.miner_address.as_bytes();
        let mut buf = Vec::with_capacity(4 + 32 + 32 + 4 + addr.len() + 4 + 4 + 4);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&self.prev_hash);
        buf.extend_from_slice(&self.merkle_root);
        buf.extend_from_slice(&(addr.len() as u32).to_le_bytes());
        buf.extend_from_slice(addr);
        buf.extend_from_slice(&self.timestamp_s.to_le_bytes());
        buf.extend_from_slice(&self.bits.to_le_bytes());
        buf.extend_from_slice(&self.nonce.to_le_bytes());
        buf
    }

    /// `doubleSHA256(encode(header))`.
    pub fn hash(&self) -> [u8; 32] {
        double_sha256(&self.encode())
    }
}

/// A mined or peer-announced block.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    /// Work-item ids included in this block, in mempool-take order.
    pub item_ids: Vec<String>,
    pub is_own: bool,
    pub source_peer: Option<String>,
    pub mint_txid: Option<String>,
    /// The 256-bit target this block was mined against, as 64 lowercase hex
    /// chars — stored so difficulty can be restored on restart.
    pub target_hex: String,
    pub height: u64,
}

impl Block {
    pub fn hash(&self) -> [u8; 32] {
        self.header.hash()
    }

    pub fn item_count(&self) -> u32 {
        self.item_ids.len() as u32
    }
}

/// `doubleSHA256(data) = SHA256(SHA256(data))`.
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    second.into()
}

/// Canonical Merkle root over an ordered list of work-item ids:
/// hash each id's UTF-8 bytes to a leaf digest, duplicate the last element of
/// an odd-length level, pair-wise hash until one digest remains. Empty input
/// yields the all-zero digest (never reached for a real block, since blocks
/// require >= 1 item).
pub fn merkle_root(ids: &[String]) -> [u8; 32] {
    if ids.is_empty() {
        return [0u8; 32];
    }

    let mut level: Vec<[u8; 32]> = ids.iter().map(|id| double_sha256(id.as_bytes())).collect();

    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let mut combined = Vec::with_capacity(64);
            combined.extend_from_slice(&pair[0]);
            combined.extend_from_slice(if pair.len() == 2 { &pair[1] } else { &pair[0] });
            next.push(double_sha256(&combined));
        }
        level = next;
    }
    level[0]
}

/// Builds a header template: `version=1`, `merkle_root` over the
/// batch's ids, `timestamp_s = now_s`, `nonce = 0`. `bits` is informational
/// only (the authoritative target is supplied separately to the miner).
pub fn header_template(
    items: &[WorkItem],
    prev_hash: [u8; 32],
    miner_address: &str,
    bits: u32,
    now_s: u32,
) -> BlockHeader {
    let ids: Vec<String> = items.iter().map(|i| i.id.clone()).collect();
    BlockHeader {
        version: HEADER_VERSION,
        prev_hash,
        merkle_root: merkle_root(&ids),
        miner_address: miner_address.to_string(),
        timestamp_s: now_s,
        bits,
        nonce: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ========== MERKLE ROOT DETERMINISM ==========

    #[test]
    fn test_merkle_root_empty_is_zero() {
        assert_eq!(merkle_root(&[]), [0u8; 32]);
    }

    #[test]
    fn test_merkle_root_single_item() {
        let ids = vec!["a".to_string()];
        let expected = double_sha256(b"a");
        assert_eq!(merkle_root(&ids), expected);
    }

    #[test]
    fn test_merkle_root_odd_count_duplicates_last() {
        let ids = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let h_a = double_sha256(b"a");
        let h_b = double_sha256(b"b");
        let h_c = double_sha256(b"c");

        let mut ab = Vec::new();
        ab.extend_from_slice(&h_a);
        ab.extend_from_slice(&h_b);
        let top_left = double_sha256(&ab);

        let mut cc = Vec::new();
        cc.extend_from_slice(&h_c);
        cc.extend_from_slice(&h_c);
        let top_right = double_sha256(&cc);

        let mut top = Vec::new();
        top.extend_from_slice(&top_left);
        top.extend_from_slice(&top_right);
        let expected = double_sha256(&top);

        assert_eq!(merkle_root(&ids), expected);
    }

    #[test]
    fn test_merkle_root_deterministic_across_calls() {
        let ids = vec!["x".to_string(), "y".to_string(), "z".to_string(), "w".to_string()];
        assert_eq!(merkle_root(&ids), merkle_root(&ids));
    }

    #[test]
    fn test_merkle_root_order_sensitive() {
        let a = vec!["x".to_string(), "y".to_string()];
        let b = vec!["y".to_string(), "x".to_string()];
        assert_ne!(merkle_root(&a), merkle_root(&b));
    }

    #[test]
    fn test_header_encode_is_stable() {
        let h = BlockHeader {
            version: 1,
            prev_hash: [0u8; 32],
            merkle_root: [1u8; 32],
            miner_address: "abc".to_string(),
            timestamp_s: 1000,
            bits: 8,
            nonce: 0,
        };
        let a = h.encode();
        let b = h.encode();
        assert_eq!(a, b);
    }

    #[test]
    fn test_header_hash_changes_with_nonce() {
        let mut h = BlockHeader {
            version: 1,
            prev_hash: [0u8; 32],
            merkle_root: [0u8; 32],
            miner_address: "m".to_string(),
            timestamp_s: 0,
            bits: 0,
            nonce: 0,
        };
        let h0 = h.hash();
        h.nonce = 1;
        let h1 = h.hash();
        assert_ne!(h0, h1);
    }
}
