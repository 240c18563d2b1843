//! Block implementation for the blockchain
//!
//! A block links to its parent by hash and commits to the ids of the
//! transactions it confirms. Transaction bodies travel separately.

use crate::core::transaction::{push_field, TxId};
use crate::crypto::sha256_hex;
use serde::{Deserialize, Serialize};

/// Timestamp shared by every node's genesis block (2024-01-01T00:00:00Z)
pub const GENESIS_TIMESTAMP: i64 = 1_704_067_200;

/// Parent hash recorded in the genesis block
pub const GENESIS_PREV_HASH: &str = "0";

/// A block in the blockchain
///
/// Fields are private so that locally built blocks always carry the hash of
/// their own contents. Blocks received from peers carry a claimed hash that
/// validation recomputes with [`Block::has_valid_hash`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block index/height
    index: u64,
    /// Seconds since the Unix epoch
    timestamp: i64,
    /// Ids of the confirmed transactions, sorted
    transactions: Vec<TxId>,
    /// Hash of the previous block
    prev_hash: String,
    /// Nonce used for proof of work
    nonce: u64,
    /// Block hash
    hash: String,
}

impl Block {
    /// Create a new (unsolved) block with nonce 0
    pub fn new(index: u64, timestamp: i64, mut transactions: Vec<TxId>, prev_hash: String) -> Self {
        transactions.sort();
        let mut block = Self {
            index,
            timestamp,
            transactions,
            prev_hash,
            nonce: 0,
            hash: String::new(),
        };
        block.hash = block.calculate_hash();
        block
    }

    /// Create the genesis block
    pub fn genesis() -> Self {
        Self::new(0, GENESIS_TIMESTAMP, Vec::new(), GENESIS_PREV_HASH.to_string())
    }

    /// Hash of the block contents with the current nonce
    pub fn calculate_hash(&self) -> String {
        self.hash_with_nonce(self.nonce)
    }

    /// Hash of the block contents as if it carried `nonce`
    pub fn hash_with_nonce(&self, nonce: u64) -> String {
        let mut txids: Vec<&str> = self.transactions.iter().map(String::as_str).collect();
        txids.sort_unstable();

        let mut record = Vec::new();
        push_field(&mut record, &self.index.to_string());
        push_field(&mut record, &self.timestamp.to_string());
        push_field(&mut record, &self.prev_hash);
        push_field(&mut record, &nonce.to_string());
        push_field(&mut record, &txids.len().to_string());
        for txid in txids {
            push_field(&mut record, txid);
        }
        sha256_hex(&record)
    }

    /// Return this block sealed with `nonce`
    pub fn with_nonce(mut self, nonce: u64) -> Self {
        self.nonce = nonce;
        self.hash = self.calculate_hash();
        self
    }

    /// Whether the stored hash matches the contents
    pub fn has_valid_hash(&self) -> bool {
        self.hash == self.calculate_hash()
    }

    /// Whether the txids are in canonical (ascending) order
    pub fn has_sorted_transactions(&self) -> bool {
        self.transactions.windows(2).all(|pair| pair[0] <= pair[1])
    }

    pub fn is_genesis(&self) -> bool {
        self.index == 0
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn transactions(&self) -> &[TxId] {
        &self.transactions
    }

    pub fn prev_hash(&self) -> &str {
        &self.prev_hash
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn tx_count(&self) -> usize {
        self.transactions.len()
    }
}
