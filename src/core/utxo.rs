//! Unspent transaction output set
//!
//! Tracks every spendable output of the confirmed chain. Block application is
//! all-or-nothing and returns undo records so that a reorganization can roll
//! blocks back without replaying from genesis.

use crate::core::transaction::{OutPoint, Transaction, TxId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// UTXO set errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UtxoError {
    #[error("Output {0} does not exist or is already spent")]
    NotFound(OutPoint),
    #[error("Output {0} is spent more than once")]
    DoubleSpend(OutPoint),
    #[error("Output {0} already exists")]
    OutputExists(OutPoint),
    #[error("Inputs ({inputs}) do not cover outputs ({outputs})")]
    InsufficientInputs { inputs: i128, outputs: i128 },
}

/// An unspent output together with its location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: TxId,
    pub vout: u32,
    pub address: String,
    pub amount: i64,
}

impl Utxo {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.txid.clone(), self.vout)
    }
}

/// Everything needed to reverse one application
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UndoData {
    /// Entries consumed, to be restored
    pub spent: Vec<Utxo>,
    /// Outputs created, to be removed
    pub created: Vec<OutPoint>,
}

impl UndoData {
    pub fn is_empty(&self) -> bool {
        self.spent.is_empty() && self.created.is_empty()
    }
}

/// Mapping from outpoint to unspent output
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UtxoSet {
    entries: HashMap<OutPoint, Utxo>,
}

impl UtxoSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an unspent output
    pub fn get(&self, txid: &str, vout: u32) -> Option<&Utxo> {
        self.entries.get(&OutPoint::new(txid, vout))
    }

    pub fn contains(&self, outpoint: &OutPoint) -> bool {
        self.entries.contains_key(outpoint)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Utxo> {
        self.entries.values()
    }

    /// Unspent outputs locked to an address, ordered by outpoint
    pub fn find_for_address(&self, address: &str) -> Vec<&Utxo> {
        let mut found: Vec<&Utxo> = self
            .entries
            .values()
            .filter(|utxo| utxo.address == address)
            .collect();
        found.sort_by(|a, b| (&a.txid, a.vout).cmp(&(&b.txid, b.vout)));
        found
    }

    pub fn balance(&self, address: &str) -> i64 {
        self.entries
            .values()
            .filter(|utxo| utxo.address == address)
            .fold(0i64, |acc, utxo| acc.saturating_add(utxo.amount))
    }

    /// Sum of the values referenced by the transaction's inputs
    pub fn input_total(&self, tx: &Transaction) -> Result<i128, UtxoError> {
        tx.spent_outpoints().try_fold(0i128, |acc, outpoint| {
            let utxo = self
                .entries
                .get(&outpoint)
                .ok_or(UtxoError::NotFound(outpoint))?;
            Ok(acc + utxo.amount as i128)
        })
    }

    /// Check that a transaction can be applied on top of this set
    pub fn check_spendable(&self, tx: &Transaction) -> Result<(), UtxoError> {
        let inputs = self.input_total(tx)?;

        if !tx.is_issuance() {
            let outputs = tx.total_output();
            if inputs < outputs {
                return Err(UtxoError::InsufficientInputs { inputs, outputs });
            }
        }

        let txid = tx.id();
        for vout in 0..tx.outputs.len() as u32 {
            let outpoint = OutPoint::new(txid.clone(), vout);
            if self.entries.contains_key(&outpoint) {
                return Err(UtxoError::OutputExists(outpoint));
            }
        }

        Ok(())
    }

    /// Apply a single transaction
    pub fn apply(&mut self, tx: &Transaction) -> Result<UndoData, UtxoError> {
        self.apply_block(std::slice::from_ref(tx))
    }

    /// Apply a block's transactions atomically
    ///
    /// Every input must exist in the set as it was before the block. No
    /// outpoint may be spent twice and no output may collide with an existing
    /// one. On error the set is unchanged.
    pub fn apply_block(&mut self, txs: &[Transaction]) -> Result<UndoData, UtxoError> {
        let mut spent = HashSet::new();
        let mut created = HashSet::new();

        for tx in txs {
            self.check_spendable(tx)?;

            for outpoint in tx.spent_outpoints() {
                if !spent.insert(outpoint.clone()) {
                    return Err(UtxoError::DoubleSpend(outpoint));
                }
            }

            let txid = tx.id();
            for vout in 0..tx.outputs.len() as u32 {
                let outpoint = OutPoint::new(txid.clone(), vout);
                if !created.insert(outpoint.clone()) {
                    return Err(UtxoError::OutputExists(outpoint));
                }
            }
        }

        let mut undo = UndoData::default();
        for tx in txs {
            for outpoint in tx.spent_outpoints() {
                if let Some(utxo) = self.entries.remove(&outpoint) {
                    undo.spent.push(utxo);
                }
            }

            let txid = tx.id();
            for (vout, output) in tx.outputs.iter().enumerate() {
                let utxo = Utxo {
                    txid: txid.clone(),
                    vout: vout as u32,
                    address: output.address.clone(),
                    amount: output.amount,
                };
                undo.created.push(utxo.outpoint());
                self.entries.insert(utxo.outpoint(), utxo);
            }
        }

        Ok(undo)
    }

    /// Reverse a previous application
    pub fn revert(&mut self, undo: &UndoData) {
        for outpoint in &undo.created {
            self.entries.remove(outpoint);
        }
        for utxo in &undo.spent {
            self.entries.insert(utxo.outpoint(), utxo.clone());
        }
    }
}
