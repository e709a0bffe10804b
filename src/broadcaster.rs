//! The `MintBroadcaster` seam: the core's sole dependency on
//! an external settlement layer. Transaction construction, signing, and fee
//! management are the broadcaster's problem — the core only supplies the
//! merkle root of a mined block as the claim's commitment.

use async_trait::async_trait;

/// Disambiguates a broadcast attempt's outcome as a proper sum type rather
/// than an ad-hoc boolean-plus-strings protocol.
#[derive(Debug, Clone)]
pub enum BroadcastOutcome {
    /// `raw_hex` is the serialized mint transaction, when the broadcaster can
    /// supply it, so the relay mesh can serve it to peers without each one
    /// querying the settlement layer directly. This field is not load-bearing
    /// for any broadcaster implementation; its addition is recorded in
    /// `DESIGN.md`.
    Success {
        txid: String,
        amount: Option<u64>,
        raw_hex: Option<String>,
    },
    /// Transient failure (e.g. wallet-side UTXO contention); the caller may
    /// retry.
    Retry { reason: String },
    /// Permanent; the caller should not retry further.
    Stop { reason: String },
    /// Logged and the mint skipped; the block remains valid.
    Error { message: String },
}

/// An opaque external settlement-layer client. The core never constructs or
/// signs transactions itself.
#[async_trait]
pub trait MintBroadcaster: Send + Sync {
    async fn broadcast_mint(&self, merkle_root: &str) -> BroadcastOutcome;
}
