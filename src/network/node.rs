//! P2P Node implementation
//!
//! The node ties the shared chain state to a transport. It gossips new
//! transactions and blocks, answers chain requests, and falls back to a full
//! chain sync whenever a received block does not fit its tip.

use crate::core::{
    Block, Blockchain, BlockchainError, ForkChoice, Transaction, TransactionError, TxId,
    DEFAULT_DIFFICULTY,
};
use crate::mining::{Miner, MinerConfig, DEFAULT_IDLE_INTERVAL};
use crate::network::message::{ChainPayload, Message};
use crate::network::tcp::TcpTransport;
use crate::network::transport::{
    MessageHandler, Transport, TransportError, TransportKind, DEFAULT_REQUEST_TIMEOUT,
};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio_util::sync::CancellationToken;

/// Capacity of the event channel before slow subscribers lag
const EVENT_CAPACITY: usize = 256;

/// Node errors
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Blockchain error: {0}")]
    Blockchain(#[from] BlockchainError),
}

/// P2P Node configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Address to accept peer messages on
    pub listen_addr: String,
    /// Address for the HTTP API, if enabled
    pub api_addr: Option<String>,
    /// Initial peers
    pub peers: Vec<String>,
    /// Leading zero hex digits required of block hashes
    pub difficulty: u32,
    /// Run the background miner
    pub mine: bool,
    /// Miner sleep when the mempool is empty
    pub idle_interval: Duration,
    /// Bound on waiting for a peer's reply
    pub request_timeout: Duration,
    pub transport: TransportKind,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:3000".to_string(),
            api_addr: None,
            peers: Vec::new(),
            difficulty: DEFAULT_DIFFICULTY,
            mine: true,
            idle_interval: DEFAULT_IDLE_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            transport: TransportKind::Tcp,
        }
    }
}

/// Something observable happened to the local chain state
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum NodeEvent {
    TransactionAccepted { txid: TxId, transaction: Transaction },
    BlockAccepted(Block),
    ChainReplaced {
        previous_length: usize,
        new_length: usize,
        tip: Block,
    },
}

/// Node status
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub address: String,
    pub height: u64,
    pub latest_hash: String,
    pub difficulty: u32,
    pub pending_tx: usize,
    pub peers: Vec<String>,
    pub mining: bool,
}

/// The main P2P node
#[derive(Clone)]
pub struct Node {
    config: NodeConfig,
    chain: Arc<RwLock<Blockchain>>,
    transport: Arc<dyn Transport>,
    events: broadcast::Sender<NodeEvent>,
    stop: CancellationToken,
}

impl Node {
    /// Create a node with a fresh chain on the given transport
    pub fn new(config: NodeConfig, transport: Arc<dyn Transport>) -> Result<Self, NodeError> {
        let chain = Blockchain::new(config.difficulty)?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            config,
            chain: Arc::new(RwLock::new(chain)),
            transport,
            events,
            stop: CancellationToken::new(),
        })
    }

    /// Create a node using the transport named in the configuration
    pub fn from_config(config: NodeConfig) -> Result<Self, NodeError> {
        let transport: Arc<dyn Transport> = match &config.transport {
            TransportKind::Tcp => Arc::new(TcpTransport::new(
                config.listen_addr.clone(),
                config.peers.clone(),
                config.request_timeout,
            )),
            TransportKind::Memory(network) => Arc::new(
                network
                    .transport(config.listen_addr.clone(), config.peers.clone())
                    .with_request_timeout(config.request_timeout),
            ),
        };
        Self::new(config, transport)
    }

    /// Start serving peers, mining (if enabled) and sync with known peers
    pub async fn start(&self) -> Result<(), NodeError> {
        self.transport.start(Arc::new(self.clone())).await?;
        log::info!(
            "Node {} started (difficulty {}, mining {})",
            self.transport.local_addr(),
            self.config.difficulty,
            if self.config.mine { "on" } else { "off" }
        );

        let (mined_tx, mut mined_rx) = mpsc::channel::<Block>(16);
        if self.config.mine {
            let miner = Miner::new(
                self.chain.clone(),
                MinerConfig {
                    idle_interval: self.config.idle_interval,
                },
                mined_tx,
                self.stop.child_token(),
            );
            tokio::spawn(miner.run());
        }

        let node = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = node.stop.cancelled() => break,
                    mined = mined_rx.recv() => match mined {
                        Some(block) => node.announce_block(block).await,
                        None => break,
                    },
                }
            }
        });

        self.sync_with_peers().await;
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn chain(&self) -> &Arc<RwLock<Blockchain>> {
        &self.chain
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn local_addr(&self) -> String {
        self.transport.local_addr()
    }

    /// Stream of chain events
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    pub async fn add_peer(&self, peer: String) {
        self.transport.add_peer(peer).await;
    }

    /// Get node status
    pub async fn status(&self) -> NodeStatus {
        let peers = self.transport.peers().await;
        let chain = self.chain.read().await;
        NodeStatus {
            address: self.transport.local_addr(),
            height: chain.height(),
            latest_hash: chain.latest_block().hash().to_string(),
            difficulty: chain.difficulty(),
            pending_tx: chain.mempool().len(),
            peers,
            mining: self.config.mine,
        }
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Admit a transaction and gossip it if it is new
    pub async fn submit_transaction(&self, tx: Transaction) -> Result<bool, TransactionError> {
        let accepted = self.chain.write().await.submit_transaction(tx.clone())?;

        if accepted {
            self.emit(NodeEvent::TransactionAccepted {
                txid: tx.id(),
                transaction: tx.clone(),
            });
            self.transport.broadcast(&Message::Tx(tx)).await;
        }
        Ok(accepted)
    }

    /// Ask every known peer for its chain; returns how many were adopted
    pub async fn sync_with_peers(&self) -> usize {
        let mut adopted = 0;
        for peer in self.transport.peers().await {
            if self.request_chain(&peer).await {
                adopted += 1;
            }
        }
        adopted
    }

    /// Stop mining, relaying and serving peers
    pub async fn shutdown(&self) {
        log::info!("Node {} shutting down...", self.transport.local_addr());
        self.stop.cancel();
        self.transport.shutdown().await;
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn emit(&self, event: NodeEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    async fn announce_block(&self, block: Block) {
        self.emit(NodeEvent::BlockAccepted(block.clone()));
        self.transport.broadcast(&Message::Block(block)).await;
    }

    async fn chain_payload(&self) -> ChainPayload {
        let chain = self.chain.read().await;
        ChainPayload {
            blocks: chain.blocks().to_vec(),
            transactions: chain.confirmed_transactions(),
        }
    }

    async fn request_chain(&self, peer: &str) -> bool {
        match self.transport.request(peer, &Message::GetChain).await {
            Ok(Message::Chain(payload)) => self.apply_chain(peer, payload).await,
            Ok(other) => {
                log::warn!("Unexpected {} reply from {}", other.type_name(), peer);
                false
            }
            Err(e) => {
                log::warn!("Chain request to {} failed: {}", peer, e);
                false
            }
        }
    }

    /// Resync after a block from `from` did not fit
    async fn sync_from(&self, from: &str) {
        let known = self.transport.peers().await;
        if known.iter().any(|peer| peer == from) {
            self.request_chain(from).await;
        } else {
            // Inbound connections report an ephemeral address
            self.sync_with_peers().await;
        }
    }

    async fn apply_chain(&self, from: &str, payload: ChainPayload) -> bool {
        let (choice, tip) = {
            let mut chain = self.chain.write().await;
            let choice = chain.replace_chain(payload.blocks, payload.transactions);
            (choice, chain.latest_block().clone())
        };

        match choice {
            ForkChoice::Adopted {
                previous_length,
                new_length,
            } => {
                log::info!(
                    "Adopted chain from {} ({} -> {} blocks)",
                    from,
                    previous_length,
                    new_length
                );
                self.emit(NodeEvent::ChainReplaced {
                    previous_length,
                    new_length,
                    tip,
                });
                true
            }
            ForkChoice::KeptLocal => false,
            ForkChoice::Rejected(e) => {
                log::warn!("Rejected chain from {}: {}", from, e);
                false
            }
        }
    }

    async fn receive_block(&self, from: &str, block: Block) {
        let index = block.index();
        let extended = self.chain.write().await.extend(block.clone());

        match extended {
            Ok(()) => self.announce_block(block).await,
            Err(e) if e.needs_resync() => {
                log::info!(
                    "Block {} from {} does not fit our tip ({}), requesting chain",
                    index,
                    from,
                    e
                );
                self.sync_from(from).await;
            }
            Err(BlockchainError::InvalidIndex { .. }) => {
                log::debug!("Ignoring stale block {} from {}", index, from);
            }
            Err(e) => log::warn!("Rejected block {} from {}: {}", index, from, e),
        }
    }
}

#[async_trait]
impl MessageHandler for Node {
    async fn handle(&self, from: &str, msg: Message) -> Option<Message> {
        log::debug!("Received {} from {}", msg.type_name(), from);

        match msg {
            Message::Tx(tx) => {
                if let Err(e) = self.submit_transaction(tx).await {
                    log::warn!("Rejected transaction from {}: {}", from, e);
                }
                None
            }
            Message::Block(block) => {
                self.receive_block(from, block).await;
                None
            }
            Message::GetChain => Some(Message::Chain(self.chain_payload().await)),
            Message::Chain(payload) => {
                self.apply_chain(from, payload).await;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{pow, TransactionOutput};
    use crate::network::memory::MemoryNetwork;

    fn issue(address: &str, amount: i64) -> Transaction {
        Transaction::issuance(vec![TransactionOutput::new(address, amount)])
    }

    fn config(network: &MemoryNetwork, addr: &str, peers: &[&str], mine: bool) -> NodeConfig {
        NodeConfig {
            listen_addr: addr.to_string(),
            peers: peers.iter().map(|p| p.to_string()).collect(),
            difficulty: 1,
            mine,
            idle_interval: Duration::from_millis(20),
            transport: TransportKind::Memory(network.clone()),
            ..NodeConfig::default()
        }
    }

    /// Mine `tx` straight into the node's chain without gossip
    async fn mine_local(node: &Node, tx: Transaction, timestamp: i64) -> Block {
        let mut chain = node.chain().write().await;
        chain.submit_transaction(tx).unwrap();
        let pending = chain.mempool().snapshot();
        let candidate = chain.mine_candidate(&pending, timestamp);
        let solution = pow::solve(&candidate, chain.difficulty());
        let block = candidate.with_nonce(solution.nonce);
        chain.extend(block.clone()).unwrap();
        block
    }

    async fn wait_for<F: Fn(&Blockchain) -> bool>(node: &Node, check: F) -> bool {
        for _ in 0..500 {
            if check(&*node.chain().read().await) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_node_creation() {
        let node = Node::from_config(NodeConfig {
            difficulty: 2,
            ..NodeConfig::default()
        })
        .unwrap();
        assert_eq!(node.local_addr(), "127.0.0.1:3000");

        let status = node.status().await;
        assert_eq!(status.height, 0);
        assert_eq!(status.difficulty, 2);
        assert_eq!(status.pending_tx, 0);

        assert!(matches!(
            Node::from_config(NodeConfig {
                difficulty: 65,
                ..NodeConfig::default()
            }),
            Err(NodeError::Blockchain(BlockchainError::InvalidDifficulty(65)))
        ));
    }

    #[tokio::test]
    async fn test_transaction_gossip_is_idempotent() {
        let network = MemoryNetwork::new();
        let a = Node::from_config(config(&network, "a", &["b"], false)).unwrap();
        let b = Node::from_config(config(&network, "b", &["a"], false)).unwrap();
        a.start().await.unwrap();
        b.start().await.unwrap();

        let mut events = a.subscribe();
        let tx = issue("alice", 5);
        assert!(a.submit_transaction(tx.clone()).await.unwrap());
        assert!(!a.submit_transaction(tx.clone()).await.unwrap());

        assert!(wait_for(&b, |chain| chain.mempool().contains(&tx.id())).await);
        // Let any echo settle
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(a.chain().read().await.mempool().len(), 1);
        assert_eq!(b.chain().read().await.mempool().len(), 1);

        match events.recv().await.unwrap() {
            NodeEvent::TransactionAccepted { txid, .. } => assert_eq!(txid, tx.id()),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_mined_block_propagates() {
        let network = MemoryNetwork::new();
        let miner = Node::from_config(config(&network, "miner", &["follower"], true)).unwrap();
        let follower = Node::from_config(config(&network, "follower", &["miner"], false)).unwrap();
        follower.start().await.unwrap();
        miner.start().await.unwrap();

        miner.submit_transaction(issue("alice", 9)).await.unwrap();

        assert!(wait_for(&follower, |chain| chain.len() == 2).await);
        assert!(wait_for(&miner, |chain| chain.len() == 2).await);
        let tip = miner.chain().read().await.latest_block().clone();
        assert_eq!(follower.chain().read().await.latest_block(), &tip);
        assert_eq!(follower.chain().read().await.utxos().balance("alice"), 9);
        assert!(follower.chain().read().await.mempool().is_empty());

        miner.shutdown().await;
        follower.shutdown().await;
    }

    #[tokio::test]
    async fn test_startup_sync_adopts_longer_chain() {
        let network = MemoryNetwork::new();
        let a = Node::from_config(config(&network, "a", &[], false)).unwrap();
        a.start().await.unwrap();
        for i in 0..4 {
            mine_local(&a, issue("alice", i + 1), 100 + i).await;
        }

        let b = Node::from_config(config(&network, "b", &["a"], false)).unwrap();
        for i in 0..2 {
            mine_local(&b, issue("bob", i + 1), 200 + i).await;
        }

        let mut events = b.subscribe();
        b.start().await.unwrap();

        let (a_chain, b_chain) = (a.chain().read().await, b.chain().read().await);
        assert_eq!(b_chain.len(), 5);
        assert_eq!(b_chain.blocks(), a_chain.blocks());
        assert_eq!(b_chain.utxos(), a_chain.utxos());
        assert_eq!(b_chain.utxos().balance("alice"), 10);
        // Bob's abandoned issuances are pending again
        assert_eq!(b_chain.mempool().len(), 2);
        drop((a_chain, b_chain));

        assert!(matches!(
            events.recv().await.unwrap(),
            NodeEvent::ChainReplaced {
                previous_length: 3,
                new_length: 5,
                ..
            }
        ));

        // The longer node ignores the shorter one
        assert_eq!(a.sync_with_peers().await, 0);
        a.add_peer("b".to_string()).await;
        assert_eq!(a.sync_with_peers().await, 0);
        assert_eq!(a.chain().read().await.len(), 5);
    }

    #[tokio::test]
    async fn test_unlinked_block_triggers_resync() {
        let network = MemoryNetwork::new();
        let a = Node::from_config(config(&network, "a", &[], false)).unwrap();
        let b = Node::from_config(config(&network, "b", &["a"], false)).unwrap();
        a.start().await.unwrap();
        b.start().await.unwrap();

        let mut mined = Vec::new();
        for i in 0..3 {
            mined.push(mine_local(&a, issue("alice", i + 1), 10 + i).await);
        }
        let tip = mined[2].clone();

        assert_eq!(b.handle("a", Message::Block(tip.clone())).await, None);
        let chain = b.chain().read().await;
        assert_eq!(chain.len(), 4);
        assert_eq!(chain.latest_block(), &tip);
    }

    #[tokio::test]
    async fn test_getchain_reply_carries_bodies() {
        let network = MemoryNetwork::new();
        let a = Node::from_config(config(&network, "a", &[], false)).unwrap();
        let tx = issue("alice", 3);
        mine_local(&a, tx.clone(), 1).await;

        let Some(Message::Chain(payload)) = a.handle("x", Message::GetChain).await else {
            panic!("expected a CHAIN reply");
        };
        assert_eq!(payload.blocks.len(), 2);
        assert_eq!(payload.transactions, vec![tx]);
    }

    #[tokio::test]
    async fn test_invalid_peer_input_is_ignored() {
        let network = MemoryNetwork::new();
        let a = Node::from_config(config(&network, "a", &[], false)).unwrap();

        let empty = Transaction::new(vec![], vec![]);
        assert_eq!(a.handle("x", Message::Tx(empty)).await, None);

        let unsolved = Block::new(1, 1, vec![], Block::genesis().hash().to_string());
        let failing = (0..)
            .find(|n| !crate::crypto::meets_difficulty(&unsolved.hash_with_nonce(*n), 1))
            .unwrap();
        a.handle("x", Message::Block(unsolved.with_nonce(failing))).await;

        let chain = a.chain().read().await;
        assert_eq!(chain.len(), 1);
        assert!(chain.mempool().is_empty());
    }
}
