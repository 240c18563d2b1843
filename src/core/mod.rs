//! Core blockchain components
//!
//! This module contains the fundamental building blocks:
//! - Transactions (UTXO model with secp256k1 authorization)
//! - UTXO set with undo records
//! - Blocks and the proof-of-work engine
//! - Blockchain (chain state, admission, extension and fork choice)

pub mod block;
pub mod blockchain;
pub mod pow;
pub mod transaction;
pub mod utxo;

pub use block::{Block, GENESIS_PREV_HASH, GENESIS_TIMESTAMP};
pub use blockchain::{Blockchain, BlockchainError, ChainStats, ForkChoice, DEFAULT_DIFFICULTY};
pub use pow::Solution;
pub use transaction::{
    OutPoint, Transaction, TransactionBuilder, TransactionError, TransactionInput,
    TransactionOutput, TxId,
};
pub use utxo::{UndoData, Utxo, UtxoError, UtxoSet};
