//! Transaction pool (mempool) for pending transactions
//!
//! Holds validated transactions waiting to be included in a block,
//! deduplicated by id and kept in arrival order. Validation happens in the
//! chain state before a transaction reaches the pool.

use crate::core::{OutPoint, Transaction, TxId, UtxoSet};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;

// =============================================================================
// Mempool Entry
// =============================================================================

/// Entry in the mempool with metadata
#[derive(Debug, Clone)]
pub struct MempoolEntry {
    /// The transaction
    pub tx: Transaction,
    /// When the transaction was added (Unix timestamp)
    pub added_time: i64,
}

impl MempoolEntry {
    pub fn new(tx: Transaction, added_time: i64) -> Self {
        Self { tx, added_time }
    }
}

// =============================================================================
// Mempool
// =============================================================================

/// Memory pool for pending transactions
#[derive(Debug, Default, Clone)]
pub struct Mempool {
    /// Transactions indexed by ID
    entries: HashMap<TxId, MempoolEntry>,
    /// Transaction IDs in order of arrival
    by_time: Vec<TxId>,
    /// Outpoint to the pending transaction spending it
    spent_by: HashMap<OutPoint, TxId>,
}

impl Mempool {
    /// Create a new mempool
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a transaction; returns false and does nothing if it is already
    /// pending
    pub fn add(&mut self, tx: Transaction) -> bool {
        let id = tx.id();
        if self.entries.contains_key(&id) {
            return false;
        }

        for outpoint in tx.spent_outpoints() {
            self.spent_by.insert(outpoint, id.clone());
        }
        self.by_time.push(id.clone());
        self.entries
            .insert(id, MempoolEntry::new(tx, Utc::now().timestamp()));
        true
    }

    /// Remove a transaction from the pool
    pub fn remove_transaction(&mut self, id: &str) -> Option<Transaction> {
        let entry = self.entries.remove(id)?;
        self.by_time.retain(|pending| pending != id);
        for outpoint in entry.tx.spent_outpoints() {
            if self.spent_by.get(&outpoint).map(String::as_str) == Some(id) {
                self.spent_by.remove(&outpoint);
            }
        }
        Some(entry.tx)
    }

    /// Remove transactions by id; absent ids are ignored
    pub fn remove<S: AsRef<str>>(&mut self, ids: &[S]) {
        for id in ids {
            self.remove_transaction(id.as_ref());
        }
    }

    /// Point-in-time copy of the pending transactions in arrival order
    pub fn snapshot(&self) -> Vec<Transaction> {
        self.by_time
            .iter()
            .filter_map(|id| self.entries.get(id).map(|e| e.tx.clone()))
            .collect()
    }

    /// Id of the pending transaction spending `outpoint`, if any
    pub fn spends(&self, outpoint: &OutPoint) -> Option<&TxId> {
        self.spent_by.get(outpoint)
    }

    /// Drop pending transactions whose inputs no longer exist in `utxos`
    ///
    /// Returns the ids that were dropped.
    pub fn remove_conflicting(&mut self, utxos: &UtxoSet) -> Vec<TxId> {
        let stale: Vec<TxId> = self
            .by_time
            .iter()
            .filter(|id| {
                self.entries.get(*id).is_some_and(|entry| {
                    entry
                        .tx
                        .spent_outpoints()
                        .any(|outpoint| !utxos.contains(&outpoint))
                })
            })
            .cloned()
            .collect();

        self.remove(&stale);
        stale
    }

    /// Get a transaction by ID
    pub fn get(&self, id: &str) -> Option<&Transaction> {
        self.entries.get(id).map(|e| &e.tx)
    }

    /// Check if a transaction is in the pool
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Get the number of pending transactions
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the pool is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pending ids in arrival order
    pub fn transaction_ids(&self) -> Vec<TxId> {
        self.by_time.clone()
    }

    /// Get mempool statistics
    pub fn stats(&self) -> MempoolStats {
        MempoolStats {
            tx_count: self.entries.len(),
            total_output: self
                .entries
                .values()
                .fold(0i64, |acc, e| acc.saturating_add(e.tx.total_output() as i64)),
            oldest_added_time: self.entries.values().map(|e| e.added_time).min(),
        }
    }
}

/// Mempool statistics
#[derive(Debug, Clone, Serialize)]
pub struct MempoolStats {
    pub tx_count: usize,
    pub total_output: i64,
    pub oldest_added_time: Option<i64>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{TransactionBuilder, TransactionOutput};

    fn issue(address: &str, amount: i64) -> Transaction {
        Transaction::issuance(vec![TransactionOutput::new(address, amount)])
    }

    #[test]
    fn test_mempool_add_remove() {
        let mut mempool = Mempool::new();
        let tx = issue("alice", 10);
        let id = tx.id();

        assert!(mempool.add(tx));
        assert!(mempool.contains(&id));
        assert_eq!(mempool.len(), 1);

        mempool.remove(&[id.clone()]);
        assert!(mempool.is_empty());
        assert!(mempool.get(&id).is_none());
    }

    #[test]
    fn test_mempool_duplicate() {
        let mut mempool = Mempool::new();
        assert!(mempool.add(issue("alice", 10)));
        assert!(!mempool.add(issue("alice", 10)));
        assert_eq!(mempool.len(), 1);
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let mut mempool = Mempool::new();
        mempool.add(issue("alice", 10));
        mempool.remove(&["missing"]);
        mempool.remove::<String>(&[]);
        assert_eq!(mempool.len(), 1);
    }

    #[test]
    fn test_snapshot_in_arrival_order() {
        let mut mempool = Mempool::new();
        let txs: Vec<Transaction> = (0..5).map(|i| issue("alice", i)).collect();
        for tx in &txs {
            mempool.add(tx.clone());
        }

        let snapshot = mempool.snapshot();
        assert_eq!(snapshot, txs);

        // The snapshot is a copy
        mempool.remove(&[txs[0].id()]);
        assert_eq!(snapshot.len(), 5);
        assert_eq!(mempool.snapshot().len(), 4);
    }

    #[test]
    fn test_spends_index() {
        let mut mempool = Mempool::new();
        let outpoint = OutPoint::new("aa".repeat(32), 0);
        let tx = TransactionBuilder::new()
            .add_input(&outpoint)
            .add_output("bob", 1)
            .build();
        let id = tx.id();
        mempool.add(tx);

        assert_eq!(mempool.spends(&outpoint), Some(&id));
        mempool.remove(&[id]);
        assert!(mempool.spends(&outpoint).is_none());
    }

    #[test]
    fn test_remove_conflicting() {
        let mut utxos = UtxoSet::new();
        let funding = issue("alice", 10);
        utxos.apply(&funding).unwrap();

        let live = TransactionBuilder::new()
            .add_input(&OutPoint::new(funding.id(), 0))
            .add_output("bob", 10)
            .build();
        let dead = TransactionBuilder::new()
            .add_input(&OutPoint::new("bb".repeat(32), 0))
            .add_output("bob", 10)
            .build();

        let mut mempool = Mempool::new();
        mempool.add(live.clone());
        mempool.add(dead.clone());
        mempool.add(issue("carol", 1));

        let dropped = mempool.remove_conflicting(&utxos);
        assert_eq!(dropped, vec![dead.id()]);
        assert!(mempool.contains(&live.id()));
        assert_eq!(mempool.len(), 2);
    }

    #[test]
    fn test_mempool_stats() {
        let mut mempool = Mempool::new();
        assert_eq!(mempool.stats().tx_count, 0);
        assert!(mempool.stats().oldest_added_time.is_none());

        mempool.add(issue("alice", 3));
        mempool.add(issue("bob", 4));
        let stats = mempool.stats();
        assert_eq!(stats.tx_count, 2);
        assert_eq!(stats.total_output, 7);
        assert!(stats.oldest_added_time.is_some());
    }
}
