//! Blockchain implementation
//!
//! The chain state owns the block list, the UTXO set, per-block undo records,
//! the bodies of confirmed transactions and the mempool. Every mutation goes
//! through `&mut self`, so a block, its UTXO changes and the matching mempool
//! cleanup are committed together or not at all.

use crate::core::block::Block;
use crate::core::pow;
use crate::core::transaction::{Transaction, TransactionError, TxId};
use crate::core::utxo::{UndoData, UtxoError, UtxoSet};
use crate::crypto::MAX_DIFFICULTY;
use crate::mining::Mempool;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use thiserror::Error;

/// Default mining difficulty (number of leading zero hex digits)
pub const DEFAULT_DIFFICULTY: u32 = 3;

/// Blockchain-related errors
#[derive(Error, Debug)]
pub enum BlockchainError {
    #[error("Invalid difficulty {0}: must be between 0 and 64")]
    InvalidDifficulty(u32),
    #[error("Block {0} hash does not match its contents")]
    InvalidHash(u64),
    #[error("Block {0} lists its transactions out of order")]
    UnsortedTransactions(u64),
    #[error("Block {0} does not meet the proof-of-work target")]
    InvalidProofOfWork(u64),
    #[error("Block {index} does not link to the tip (expected parent {expected}, got {found})")]
    InvalidLinkage {
        index: u64,
        expected: String,
        found: String,
    },
    #[error("Unexpected block index: expected {expected}, got {found}")]
    InvalidIndex { expected: u64, found: u64 },
    #[error("Transaction {0} appears twice in the block")]
    DuplicateTransaction(TxId),
    #[error("Transaction {0} is unknown")]
    UnknownTransaction(TxId),
    #[error("Transaction {0} is already confirmed")]
    AlreadyConfirmed(TxId),
    #[error("Invalid transaction {txid}: {source}")]
    InvalidTransaction {
        txid: TxId,
        #[source]
        source: TransactionError,
    },
    #[error("UTXO error: {0}")]
    Utxo(#[from] UtxoError),
    #[error("Genesis block does not match")]
    InvalidGenesis,
    #[error("Chain is empty")]
    EmptyChain,
}

impl BlockchainError {
    /// Whether the sender of the offending block likely has blocks we lack
    pub fn needs_resync(&self) -> bool {
        match self {
            BlockchainError::InvalidLinkage { .. } | BlockchainError::UnknownTransaction(_) => true,
            BlockchainError::InvalidIndex { expected, found } => found > expected,
            _ => false,
        }
    }
}

/// Outcome of offering a candidate chain
#[derive(Debug)]
pub enum ForkChoice {
    /// The candidate was longer and valid and is now the local chain
    Adopted {
        previous_length: usize,
        new_length: usize,
    },
    /// The candidate was not longer than the local chain
    KeptLocal,
    /// The candidate was longer but invalid
    Rejected(BlockchainError),
}

impl ForkChoice {
    pub fn is_adopted(&self) -> bool {
        matches!(self, ForkChoice::Adopted { .. })
    }
}

/// The main blockchain structure
#[derive(Debug, Clone)]
pub struct Blockchain {
    /// The chain of blocks, genesis first
    blocks: Vec<Block>,
    /// Mining difficulty
    difficulty: u32,
    /// Unspent transaction outputs at the tip
    utxos: UtxoSet,
    /// Undo record for each block, parallel to `blocks`
    undo: Vec<UndoData>,
    /// Bodies of every confirmed transaction
    confirmed: HashMap<TxId, Transaction>,
    /// Pending transactions
    mempool: Mempool,
}

impl Blockchain {
    /// Create a new blockchain holding only the genesis block
    pub fn new(difficulty: u32) -> Result<Self, BlockchainError> {
        if difficulty > MAX_DIFFICULTY {
            return Err(BlockchainError::InvalidDifficulty(difficulty));
        }

        Ok(Self {
            blocks: vec![Block::genesis()],
            difficulty,
            utxos: UtxoSet::new(),
            undo: vec![UndoData::default()],
            confirmed: HashMap::new(),
            mempool: Mempool::new(),
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Get the latest block
    pub fn latest_block(&self) -> &Block {
        // `blocks` always holds at least the genesis block
        &self.blocks[self.blocks.len() - 1]
    }

    /// Get blockchain height (index of the tip)
    pub fn height(&self) -> u64 {
        self.latest_block().index()
    }

    /// Number of blocks, genesis included
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Get a block by index
    pub fn get_block(&self, index: u64) -> Option<&Block> {
        self.blocks.get(index as usize)
    }

    /// Get a block by hash
    pub fn get_block_by_hash(&self, hash: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.hash() == hash)
    }

    pub fn utxos(&self) -> &UtxoSet {
        &self.utxos
    }

    pub fn mempool(&self) -> &Mempool {
        &self.mempool
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    /// Whether the transaction is part of the chain
    pub fn is_confirmed(&self, txid: &str) -> bool {
        self.confirmed.contains_key(txid)
    }

    /// Look up a confirmed or pending transaction body
    pub fn get_transaction(&self, txid: &str) -> Option<&Transaction> {
        self.confirmed.get(txid).or_else(|| self.mempool.get(txid))
    }

    /// Bodies of all confirmed transactions in chain order
    pub fn confirmed_transactions(&self) -> Vec<Transaction> {
        self.blocks
            .iter()
            .flat_map(|block| block.transactions())
            .filter_map(|txid| self.confirmed.get(txid).cloned())
            .collect()
    }

    // =========================================================================
    // Transaction admission
    // =========================================================================

    /// Validate a transaction and add it to the mempool
    ///
    /// Returns `Ok(false)` if it is already pending.
    pub fn submit_transaction(&mut self, tx: Transaction) -> Result<bool, TransactionError> {
        tx.validate_structure()?;

        let txid = tx.id();
        if self.mempool.contains(&txid) {
            return Ok(false);
        }
        if self.confirmed.contains_key(&txid) {
            return Err(TransactionError::AlreadyConfirmed(txid));
        }

        tx.verify_authorization(&self.utxos)?;

        for outpoint in tx.spent_outpoints() {
            if self.mempool.spends(&outpoint).is_some() {
                return Err(TransactionError::ConflictsWithPending(outpoint));
            }
        }

        self.utxos.check_spendable(&tx)?;

        log::info!("Transaction {} added to mempool", txid);
        Ok(self.mempool.add(tx))
    }

    // =========================================================================
    // Block acceptance
    // =========================================================================

    /// Unsolved block on top of the tip confirming `transactions`
    pub fn mine_candidate(&self, transactions: &[Transaction], timestamp: i64) -> Block {
        let tip = self.latest_block();
        Block::new(
            tip.index() + 1,
            timestamp,
            transactions.iter().map(Transaction::id).collect(),
            tip.hash().to_string(),
        )
    }

    /// Append a block to the tip
    ///
    /// The block's transactions must be pending in the mempool. On error
    /// nothing changes.
    pub fn extend(&mut self, block: Block) -> Result<(), BlockchainError> {
        check_header(&block, self.latest_block(), self.difficulty)?;

        let mempool = &self.mempool;
        let (txs, undo) = connect_block(&mut self.utxos, &self.confirmed, &block, |txid| {
            mempool.get(txid)
        })?;

        let ids: Vec<TxId> = block.transactions().to_vec();
        for tx in txs {
            self.confirmed.insert(tx.id(), tx);
        }
        self.undo.push(undo);
        self.mempool.remove(&ids);
        let dropped = self.mempool.remove_conflicting(&self.utxos);

        log::info!(
            "Block {} accepted: {} ({} transactions, {} pending dropped)",
            block.index(),
            block.hash(),
            ids.len(),
            dropped.len()
        );
        self.blocks.push(block);
        Ok(())
    }

    // =========================================================================
    // Fork choice
    // =========================================================================

    /// Replace the local chain with `candidate` if it is strictly longer and
    /// fully valid
    ///
    /// `bodies` supplies the transactions the candidate references; bodies
    /// already known locally need not be repeated.
    pub fn replace_chain(&mut self, candidate: Vec<Block>, bodies: Vec<Transaction>) -> ForkChoice {
        let previous_length = self.blocks.len();

        if candidate.is_empty() {
            return self.reject(BlockchainError::EmptyChain);
        }
        if candidate.len() <= previous_length {
            log::debug!(
                "Keeping local chain ({} blocks) over candidate ({} blocks)",
                previous_length,
                candidate.len()
            );
            return ForkChoice::KeptLocal;
        }
        if candidate[0] != self.blocks[0] {
            return self.reject(BlockchainError::InvalidGenesis);
        }

        // Shared prefix: only blocks identical to ours are skipped
        let fork = candidate
            .iter()
            .zip(&self.blocks)
            .take_while(|(theirs, ours)| theirs == ours)
            .count();

        let mut utxos = self.utxos.clone();
        let mut confirmed = self.confirmed.clone();
        let mut abandoned = Vec::new();

        for index in (fork..previous_length).rev() {
            utxos.revert(&self.undo[index]);
            for txid in self.blocks[index].transactions() {
                if let Some(tx) = confirmed.remove(txid) {
                    abandoned.push(tx);
                }
            }
        }
        abandoned.reverse();

        let mut pool: HashMap<TxId, Transaction> = HashMap::new();
        let known = self.mempool.snapshot().into_iter().chain(abandoned.iter().cloned());
        for tx in known.chain(bodies) {
            pool.insert(tx.id(), tx);
        }

        let mut undo = self.undo[..fork].to_vec();
        let mut included = Vec::new();
        for index in fork..candidate.len() {
            let block = &candidate[index];
            if let Err(e) = check_header(block, &candidate[index - 1], self.difficulty) {
                return self.reject(e);
            }

            match connect_block(&mut utxos, &confirmed, block, |txid| pool.get(txid)) {
                Ok((txs, block_undo)) => {
                    for tx in txs {
                        included.push(tx.id());
                        confirmed.insert(tx.id(), tx);
                    }
                    undo.push(block_undo);
                }
                Err(e) => return self.reject(e),
            }
        }

        self.blocks = candidate;
        self.utxos = utxos;
        self.undo = undo;
        self.confirmed = confirmed;

        self.mempool.remove(&included);
        let mut restored = 0;
        for tx in abandoned {
            if self.submit_transaction(tx).unwrap_or(false) {
                restored += 1;
            }
        }
        let dropped = self.mempool.remove_conflicting(&self.utxos);

        log::info!(
            "Chain replaced: {} -> {} blocks (fork at {}, {} transactions restored, {} pending dropped)",
            previous_length,
            self.blocks.len(),
            fork,
            restored,
            dropped.len()
        );

        ForkChoice::Adopted {
            previous_length,
            new_length: self.blocks.len(),
        }
    }

    fn reject(&self, error: BlockchainError) -> ForkChoice {
        log::warn!("Rejected candidate chain: {}", error);
        ForkChoice::Rejected(error)
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Validate the entire chain from genesis
    pub fn is_valid(&self) -> bool {
        if self.blocks.first() != Some(&Block::genesis()) {
            return false;
        }

        let mut utxos = UtxoSet::new();
        let mut confirmed = HashMap::new();
        for pair in self.blocks.windows(2) {
            let (parent, block) = (&pair[0], &pair[1]);
            if check_header(block, parent, self.difficulty).is_err() {
                return false;
            }
            match connect_block(&mut utxos, &confirmed, block, |txid| self.confirmed.get(txid)) {
                Ok((txs, _)) => {
                    for tx in txs {
                        confirmed.insert(tx.id(), tx);
                    }
                }
                Err(_) => return false,
            }
        }

        utxos == self.utxos
    }

    /// Get chain statistics
    pub fn stats(&self) -> ChainStats {
        ChainStats {
            height: self.height(),
            total_blocks: self.blocks.len(),
            total_transactions: self.confirmed.len(),
            utxo_count: self.utxos.len(),
            pending_transactions: self.mempool.len(),
            difficulty: self.difficulty,
            latest_hash: self.latest_block().hash().to_string(),
        }
    }
}

/// Integrity, proof of work, index and linkage of `block` on top of `parent`
fn check_header(block: &Block, parent: &Block, difficulty: u32) -> Result<(), BlockchainError> {
    if !block.has_valid_hash() {
        return Err(BlockchainError::InvalidHash(block.index()));
    }
    if !block.has_sorted_transactions() {
        return Err(BlockchainError::UnsortedTransactions(block.index()));
    }
    if !pow::verify(block, difficulty) {
        return Err(BlockchainError::InvalidProofOfWork(block.index()));
    }

    let expected = parent.index() + 1;
    if block.index() != expected {
        return Err(BlockchainError::InvalidIndex {
            expected,
            found: block.index(),
        });
    }
    if block.prev_hash() != parent.hash() {
        return Err(BlockchainError::InvalidLinkage {
            index: block.index(),
            expected: parent.hash().to_string(),
            found: block.prev_hash().to_string(),
        });
    }
    Ok(())
}

/// Resolve, validate and apply a block's transactions to `utxos`
///
/// `utxos` is left untouched on error.
fn connect_block<'a, F>(
    utxos: &mut UtxoSet,
    confirmed: &HashMap<TxId, Transaction>,
    block: &Block,
    lookup: F,
) -> Result<(Vec<Transaction>, UndoData), BlockchainError>
where
    F: Fn(&str) -> Option<&'a Transaction>,
{
    let mut seen = HashSet::new();
    let mut txs = Vec::with_capacity(block.tx_count());

    for txid in block.transactions() {
        if !seen.insert(txid.as_str()) {
            return Err(BlockchainError::DuplicateTransaction(txid.clone()));
        }
        if confirmed.contains_key(txid) {
            return Err(BlockchainError::AlreadyConfirmed(txid.clone()));
        }

        let tx = lookup(txid).ok_or_else(|| BlockchainError::UnknownTransaction(txid.clone()))?;
        let invalid = |source| BlockchainError::InvalidTransaction {
            txid: txid.clone(),
            source,
        };
        tx.validate_structure().map_err(invalid)?;
        tx.verify_authorization(utxos).map_err(invalid)?;
        txs.push(tx.clone());
    }

    let undo = utxos.apply_block(&txs)?;
    Ok((txs, undo))
}

/// Chain statistics
#[derive(Debug, Clone, Serialize)]
pub struct ChainStats {
    pub height: u64,
    pub total_blocks: usize,
    pub total_transactions: usize,
    pub utxo_count: usize,
    pub pending_transactions: usize,
    pub difficulty: u32,
    pub latest_hash: String,
}
