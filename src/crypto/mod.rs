//! Cryptographic utilities for the blockchain
//!
//! This module provides:
//! - SHA-256 hashing and the difficulty predicates
//! - ECDSA key management (secp256k1) and address derivation

pub mod hash;
pub mod keys;

pub use hash::{
    calculate_target, hash_below_target, meets_difficulty, sha256, sha256_hex, Target,
    MAX_DIFFICULTY,
};
pub use keys::{
    public_key_from_hex, public_key_to_address, sign_message, verify_signature, KeyError, KeyPair,
};
