//! Mining engine for the blockchain
//!
//! The miner snapshots the mempool under a read lock, solves the proof of
//! work on a blocking thread without holding any lock, and then offers the
//! block to the chain under a write lock. A block that no longer fits the tip
//! by then is stale work and is dropped.

use crate::core::{pow, Block, Blockchain};
use chrono::Utc;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

/// How long the miner sleeps when there is nothing to mine
pub const DEFAULT_IDLE_INTERVAL: Duration = Duration::from_secs(2);

/// Mining statistics
#[derive(Debug, Clone)]
pub struct MiningStats {
    /// Number of hash attempts
    pub hash_attempts: u64,
    /// Time taken in milliseconds
    pub time_ms: u128,
    /// Hash rate (hashes per second)
    pub hash_rate: f64,
}

/// Miner configuration
#[derive(Debug, Clone)]
pub struct MinerConfig {
    pub idle_interval: Duration,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            idle_interval: DEFAULT_IDLE_INTERVAL,
        }
    }
}

/// Result of one mining round
#[derive(Debug)]
pub enum MineOutcome {
    /// The mempool was empty
    Idle,
    /// A block was mined and appended to the chain
    Mined(Block, MiningStats),
    /// The tip moved while solving; the block was discarded
    Stale,
    /// Mining was cancelled
    Cancelled,
}

/// Solve the proof of work for `candidate`, checking `stop` between attempts
pub fn mine_block(
    candidate: &Block,
    difficulty: u32,
    stop: &CancellationToken,
) -> Option<(Block, MiningStats)> {
    let start = Instant::now();

    info!(
        "Mining block {} with difficulty {}...",
        candidate.index(),
        difficulty
    );

    let solution = pow::solve_until(candidate, difficulty, || stop.is_cancelled())?;

    let elapsed = start.elapsed().as_millis();
    let attempts = solution.attempts;
    let hash_rate = if elapsed > 0 {
        (attempts as f64) / (elapsed as f64 / 1000.0)
    } else {
        attempts as f64
    };

    let stats = MiningStats {
        hash_attempts: attempts,
        time_ms: elapsed,
        hash_rate,
    };

    info!(
        "Block {} mined in {}ms ({} attempts, {:.2} H/s)",
        candidate.index(),
        elapsed,
        attempts,
        hash_rate
    );

    Some((candidate.clone().with_nonce(solution.nonce), stats))
}

/// Background miner for the shared chain state
pub struct Miner {
    chain: Arc<RwLock<Blockchain>>,
    config: MinerConfig,
    mined_tx: mpsc::Sender<Block>,
    stop: CancellationToken,
}

impl Miner {
    /// Create a new miner; mined blocks are sent on `mined_tx`
    pub fn new(
        chain: Arc<RwLock<Blockchain>>,
        config: MinerConfig,
        mined_tx: mpsc::Sender<Block>,
        stop: CancellationToken,
    ) -> Self {
        Self {
            chain,
            config,
            mined_tx,
            stop,
        }
    }

    /// Mine until cancelled
    pub async fn run(self) {
        info!("Miner started");

        while !self.stop.is_cancelled() {
            if let MineOutcome::Idle = self.mine_once().await {
                tokio::select! {
                    _ = self.stop.cancelled() => break,
                    _ = tokio::time::sleep(self.config.idle_interval) => {}
                }
            }
        }

        info!("Miner stopped");
    }

    /// Run a single mining round
    pub async fn mine_once(&self) -> MineOutcome {
        let (candidate, difficulty) = {
            let chain = self.chain.read().await;
            let pending = chain.mempool().snapshot();
            if pending.is_empty() {
                return MineOutcome::Idle;
            }
            (
                chain.mine_candidate(&pending, Utc::now().timestamp()),
                chain.difficulty(),
            )
        };

        let stop = self.stop.clone();
        let solved =
            tokio::task::spawn_blocking(move || mine_block(&candidate, difficulty, &stop)).await;

        let (block, stats) = match solved {
            Ok(Some(result)) => result,
            Ok(None) => return MineOutcome::Cancelled,
            Err(e) => {
                warn!("Mining task failed: {}", e);
                return MineOutcome::Cancelled;
            }
        };

        let extended = self.chain.write().await.extend(block.clone());
        if let Err(e) = extended {
            debug!("Discarding stale block {}: {}", block.index(), e);
            return MineOutcome::Stale;
        }

        if self.mined_tx.send(block.clone()).await.is_err() {
            debug!("No listener for mined block {}", block.index());
        }
        MineOutcome::Mined(block, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Transaction, TransactionOutput};

    fn shared_chain(difficulty: u32) -> Arc<RwLock<Blockchain>> {
        Arc::new(RwLock::new(Blockchain::new(difficulty).unwrap()))
    }

    fn issue(address: &str, amount: i64) -> Transaction {
        Transaction::issuance(vec![TransactionOutput::new(address, amount)])
    }

    #[test]
    fn test_mine_block() {
        let chain = Blockchain::new(3).unwrap();
        let candidate = chain.mine_candidate(&[issue("alice", 1)], 100);

        let (block, stats) = mine_block(&candidate, 3, &CancellationToken::new()).unwrap();
        assert!(block.hash().starts_with("000"));
        assert!(pow::verify(&block, 3));
        assert!(stats.hash_attempts > 0);
    }

    #[test]
    fn test_mine_block_cancelled() {
        let stop = CancellationToken::new();
        stop.cancel();
        let candidate = Block::new(1, 0, vec![], "00".into());
        assert!(mine_block(&candidate, 64, &stop).is_none());
    }

    #[tokio::test]
    async fn test_idle_when_mempool_empty() {
        let (tx, _rx) = mpsc::channel(4);
        let miner = Miner::new(
            shared_chain(1),
            MinerConfig::default(),
            tx,
            CancellationToken::new(),
        );
        assert!(matches!(miner.mine_once().await, MineOutcome::Idle));
    }

    #[tokio::test]
    async fn test_mine_once_extends_chain() {
        let chain = shared_chain(2);
        chain
            .write()
            .await
            .submit_transaction(issue("alice", 5))
            .unwrap();

        let (tx, mut rx) = mpsc::channel(4);
        let miner = Miner::new(chain.clone(), MinerConfig::default(), tx, CancellationToken::new());

        let outcome = miner.mine_once().await;
        let MineOutcome::Mined(block, _) = outcome else {
            panic!("expected a mined block");
        };

        let chain = chain.read().await;
        assert_eq!(chain.len(), 2);
        assert!(chain.mempool().is_empty());
        assert_eq!(chain.latest_block(), &block);
        assert_eq!(rx.recv().await, Some(block));
    }

    #[tokio::test]
    async fn test_run_mines_and_stops() {
        let chain = shared_chain(1);
        let stop = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(4);
        let config = MinerConfig {
            idle_interval: Duration::from_millis(20),
        };
        let handle = tokio::spawn(Miner::new(chain.clone(), config, tx, stop.clone()).run());

        chain
            .write()
            .await
            .submit_transaction(issue("bob", 1))
            .unwrap();

        let block = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(block.index(), 1);

        stop.cancel();
        tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
