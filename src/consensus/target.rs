//! 256-bit proof-of-work target and Bitcoin-style periodic retargeting
//!.

use primitive_types::U256;

/// Hard ceiling: `2^256 - 1`.
pub const MAX_TARGET: U256 = U256::MAX;

/// A 256-bit unsigned target. A block hash `H` satisfies the target iff
/// `int(H) < target`.
pub type Target = [u8; 32];

/// Converts a big-endian 32-byte target into a `U256` for arithmetic.
pub fn target_to_u256(target: &Target) -> U256 {
    U256::from_big_endian(target)
}

/// Converts a `U256` back into its big-endian 32-byte representation.
pub fn u256_to_target(value: U256) -> Target {
    let mut out = [0u8; 32];
    value.to_big_endian(&mut out);
    out
}

/// Produces the informational difficulty integer `floor(MAX_TARGET / target)`.
pub fn difficulty_of(target: &Target) -> U256 {
    let t = target_to_u256(target);
    if t.is_zero() {
        return MAX_TARGET;
    }
    MAX_TARGET / t
}

/// Builds an initial target from a leading-zero-bit count (as used for
/// `initial_difficulty`): the target is `2^(256 - leading_zero_bits) - 1`.
pub fn target_from_leading_zero_bits(leading_zero_bits: u32) -> Target {
    let bits = leading_zero_bits.min(255);
    let shift = 256 - bits;
    let value = if shift >= 256 {
        U256::zero()
    } else {
        (U256::one() << shift) - U256::one()
    };
    u256_to_target(value)
}

/// Bitcoin-style retargeting engine operating on a 256-bit integer target
/// with bounded adjustment per window.
#[derive(Debug, Clone)]
pub struct DifficultyAdjuster {
    target: Target,
    adjustment_period: u64,
    target_block_time_ms: u64,
    recent_timestamps: Vec<u64>,
    total_blocks_seen: u64,
}

impl DifficultyAdjuster {
    pub fn new(initial_target: Target, adjustment_period: u64, target_block_time_ms: u64) -> Self {
        DifficultyAdjuster {
            target: initial_target,
            adjustment_period: adjustment_period.max(2),
            target_block_time_ms,
            recent_timestamps: Vec::new(),
            total_blocks_seen: 0,
        }
    }

    pub fn target(&self) -> Target {
        self.target
    }

    pub fn total_blocks_seen(&self) -> u64 {
        self.total_blocks_seen
    }

    pub fn recent_timestamps(&self) -> &[u64] {
        &self.recent_timestamps
    }

    /// `floor(MAX_TARGET / target)`, purely informational.
    pub fn difficulty(&self) -> U256 {
        difficulty_of(&self.target)
    }

    /// Appends a block timestamp to the sliding window (trimmed to the last
    /// `adjustment_period` entries) and retargets at window boundaries.
    pub fn record_block(&mut self, timestamp_ms: u64) {
        self.recent_timestamps.push(timestamp_ms);
        let n = self.adjustment_period as usize;
        if self.recent_timestamps.len() > n {
            let excess = self.recent_timestamps.len() - n;
            self.recent_timestamps.drain(0..excess);
        }
        self.total_blocks_seen += 1;

        if self.total_blocks_seen != 0
            && self.total_blocks_seen.is_multiple_of(self.adjustment_period)
            && self.recent_timestamps.len() >= 2
        {
            self.retarget();
        }
    }

    /// `new_target = clamp(target * actual / expected, target/4, target*4)`.
    /// No I/O; cannot fail.
    fn retarget(&mut self) {
        let window = &self.recent_timestamps;
        let first = *window.first().expect("window has >= 2 entries");
        let last = *window.last().expect("window has >= 2 entries");
        let actual = last.saturating_sub(first).max(1);
        let expected = (window.len() as u64 - 1) * self.target_block_time_ms;
        let expected = expected.max(1);

        let old = target_to_u256(&self.target);
        let scaled = scale_clamped(old, actual, expected);

        let min_target = old / U256::from(4u8);
        let max_target = old.saturating_mul(U256::from(4u8)).min(MAX_TARGET);

        let clamped = scaled.clamp(min_target.max(U256::one()), max_target);
        self.target = u256_to_target(clamped);
    }

    /// Replaces internal state wholesale; used to restore the adjuster from
    /// the chain-state store on startup.
    pub fn restore_state(&mut self, target: Target, total_blocks_seen: u64, recent_timestamps: Vec<u64>) {
        self.target = target;
        self.total_blocks_seen = total_blocks_seen;
        let n = self.adjustment_period as usize;
        self.recent_timestamps = if recent_timestamps.len() > n {
            recent_timestamps[recent_timestamps.len() - n..].to_vec()
        } else {
            recent_timestamps
        };
    }
}

/// `target * actual / expected`, saturating to `MAX_TARGET` on overflow.
fn scale_clamped(target: U256, actual: u64, expected: u64) -> U256 {
    let actual = U256::from(actual);
    let expected = U256::from(expected);
    if MAX_TARGET / actual < target {
        MAX_TARGET
    } else {
        (target * actual / expected).max(U256::one())
    }
}
