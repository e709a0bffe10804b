//! Cold-start chain state: there is no persisted genesis block
//! in this protocol — a fresh node simply starts from the zero hash at
//! height zero with the configured initial target.

use crate::consensus::target::{target_from_leading_zero_bits, Target};

/// The previous-hash value for height-zero blocks: 32 zero bytes.
pub const ZERO_HASH: [u8; 32] = [0u8; 32];

/// Builds the initial target from `initial_difficulty` (a leading-zero-bit
/// count) — the daemon's configured starting difficulty.
pub fn initial_target(initial_difficulty: u32) -> Target {
    target_from_leading_zero_bits(initial_difficulty)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_hash_is_all_zero() {
        assert_eq!(ZERO_HASH, [0u8; 32]);
    }

    #[test]
    fn test_initial_target_respects_difficulty() {
        let easy = initial_target(0);
        let hard = initial_target(16);
        assert!(super::super::target::target_to_u256(&hard) < super::super::target::target_to_u256(&easy));
    }
}
