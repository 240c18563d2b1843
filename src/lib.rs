//! Mini-Chain: a minimal proof-of-work UTXO blockchain node in Rust
//!
//! This crate provides:
//! - Proof of Work over leading hex zeros with longest-chain fork choice
//! - ECDSA authorization of spends (secp256k1)
//! - UTXO set with per-block undo records for reorganizations
//! - Transaction mempool with conflict tracking
//! - Background miner and P2P gossip over TCP or an in-process network
//! - HTTP admin API with a WebSocket event stream
//!
//! # Example
//!
//! ```rust
//! use mini_chain::core::{pow, Blockchain, Transaction, TransactionOutput};
//!
//! // Create a chain with an easy difficulty
//! let mut chain = Blockchain::new(1).unwrap();
//!
//! // Admit an issuance transaction
//! let tx = Transaction::issuance(vec![TransactionOutput::new("alice", 50)]);
//! chain.submit_transaction(tx).unwrap();
//!
//! // Mine the pending transactions into a block
//! let pending = chain.mempool().snapshot();
//! let candidate = chain.mine_candidate(&pending, 1_704_067_260);
//! let solution = pow::solve(&candidate, chain.difficulty());
//! chain.extend(candidate.with_nonce(solution.nonce)).unwrap();
//!
//! assert_eq!(chain.height(), 1);
//! assert_eq!(chain.utxos().balance("alice"), 50);
//! ```

pub mod api;
pub mod cli;
pub mod core;
pub mod crypto;
pub mod mining;
pub mod network;

// Re-export commonly used types
pub use api::{create_router, ApiState};
pub use core::{
    Block, Blockchain, ForkChoice, OutPoint, Transaction, TransactionBuilder, UtxoSet,
    DEFAULT_DIFFICULTY,
};
pub use crypto::KeyPair;
pub use mining::{Mempool, Miner};
pub use network::{Message, Node, NodeConfig, NodeEvent};
