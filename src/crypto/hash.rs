//! Cryptographic hashing utilities for the blockchain
//!
//! Provides SHA-256 based hashing used for block hashes and transaction IDs,
//! plus the two equivalent forms of the proof-of-work difficulty predicate.

use sha2::{Digest, Sha256};

/// Highest meaningful difficulty: every hex digit of a SHA-256 hash is zero
pub const MAX_DIFFICULTY: u32 = 64;

/// A 256-bit hash target, stored big-endian with one extra leading byte so
/// that `2^256` (difficulty 0) is representable
pub type Target = [u8; 33];

/// Computes SHA-256 hash of the input data
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Computes SHA-256 hash and returns it as a lowercase hex string
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Checks if a hex-encoded hash meets the difficulty target
/// The hash must start with `difficulty` '0' hex characters
pub fn meets_difficulty(hash_hex: &str, difficulty: u32) -> bool {
    let required = difficulty as usize;
    if required > hash_hex.len() {
        return false;
    }
    hash_hex.bytes().take(required).all(|c| c == b'0')
}

/// Calculate the numeric target `2^(256 - 4 * difficulty)` for a difficulty
///
/// Difficulties above [`MAX_DIFFICULTY`] yield a zero target that no hash
/// can fall below.
pub fn calculate_target(difficulty: u32) -> Target {
    let mut target = [0u8; 33];
    let Some(bit) = 256u32.checked_sub(difficulty.saturating_mul(4)) else {
        return target;
    };
    let index = 32 - (bit / 8) as usize;
    target[index] = 1 << (bit % 8);
    target
}

/// Checks whether a hash, read as a big-endian 256-bit integer, is strictly
/// below the target
pub fn hash_below_target(hash: &[u8; 32], target: &Target) -> bool {
    let mut padded = [0u8; 33];
    padded[1..].copy_from_slice(hash);
    padded < *target
}
