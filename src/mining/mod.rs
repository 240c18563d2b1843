//! Mining module for block creation and transaction pooling

pub mod mempool;
pub mod miner;

pub use mempool::{Mempool, MempoolEntry, MempoolStats};
pub use miner::{mine_block, MineOutcome, Miner, MinerConfig, MiningStats, DEFAULT_IDLE_INTERVAL};
