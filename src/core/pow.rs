//! Proof-of-work engine
//!
//! A block is solved when its hash has `difficulty` leading zero hex digits,
//! which is the same as the hash being below `2^(256 - 4 * difficulty)`.

use crate::core::block::Block;
use crate::crypto::{calculate_target, hash_below_target, meets_difficulty, Target};

/// A nonce that satisfies the difficulty predicate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Solution {
    pub nonce: u64,
    pub hash: String,
    pub attempts: u64,
}

/// Numeric target for a difficulty
pub fn target(difficulty: u32) -> Target {
    calculate_target(difficulty)
}

/// Numeric form of the difficulty predicate for a raw hash
pub fn meets_target(hash: &[u8; 32], difficulty: u32) -> bool {
    hash_below_target(hash, &target(difficulty))
}

/// Search nonces 0, 1, 2, ... until the hash meets the difficulty
///
/// Difficulty must be at most 64, otherwise no nonce can succeed.
pub fn solve(block: &Block, difficulty: u32) -> Solution {
    let mut nonce = 0u64;
    let mut attempts = 0u64;
    loop {
        attempts = attempts.saturating_add(1);
        let hash = block.hash_with_nonce(nonce);
        if meets_difficulty(&hash, difficulty) {
            return Solution {
                nonce,
                hash,
                attempts,
            };
        }
        nonce = nonce.wrapping_add(1);
    }
}

/// Like [`solve`], but gives up as soon as `stop` returns true
///
/// `stop` is polled before every attempt.
pub fn solve_until<F>(block: &Block, difficulty: u32, mut stop: F) -> Option<Solution>
where
    F: FnMut() -> bool,
{
    let mut attempts = 0u64;
    for nonce in 0..=u64::MAX {
        if stop() {
            return None;
        }
        attempts = attempts.saturating_add(1);
        let hash = block.hash_with_nonce(nonce);
        if meets_difficulty(&hash, difficulty) {
            return Some(Solution {
                nonce,
                hash,
                attempts,
            });
        }
    }
    None
}

/// Whether the stored hash matches the contents and meets the difficulty
pub fn verify(block: &Block, difficulty: u32) -> bool {
    block.has_valid_hash() && meets_difficulty(block.hash(), difficulty)
}
