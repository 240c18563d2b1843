//! Transport abstraction for peer messaging
//!
//! The node talks to peers only through [`Transport`]. Inbound messages are
//! delivered to a [`MessageHandler`], whose optional return value is written
//! back to the sender as the reply.

use crate::network::memory::MemoryNetwork;
use crate::network::message::Message;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Default bound on waiting for a reply
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Timed out waiting for {0}")]
    Timeout(String),
    #[error("Unknown peer: {0}")]
    UnknownPeer(String),
    #[error("Connection closed by {0} without a reply")]
    Closed(String),
    #[error("Transport already started")]
    AlreadyStarted,
}

/// Receiver of inbound peer messages
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Handle `msg` from `from`; a returned message is sent back as the reply
    async fn handle(&self, from: &str, msg: Message) -> Option<Message>;
}

/// Peer messaging capability
#[async_trait]
pub trait Transport: Send + Sync {
    /// Address other nodes reach this one at
    fn local_addr(&self) -> String;

    /// Begin accepting inbound messages
    async fn start(&self, handler: Arc<dyn MessageHandler>) -> Result<(), TransportError>;

    /// Deliver a message to one peer without waiting for a reply
    async fn send(&self, peer: &str, msg: &Message) -> Result<(), TransportError>;

    /// Deliver a message and wait for the reply
    async fn request(&self, peer: &str, msg: &Message) -> Result<Message, TransportError>;

    async fn add_peer(&self, peer: String);

    async fn peers(&self) -> Vec<String>;

    /// Stop accepting inbound messages
    async fn shutdown(&self);

    /// Send to every known peer; returns how many deliveries succeeded
    async fn broadcast(&self, msg: &Message) -> usize {
        let peers = self.peers().await;
        let sends = peers.iter().map(|peer| async move {
            match self.send(peer, msg).await {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("Failed to send {} to {}: {}", msg.type_name(), peer, e);
                    false
                }
            }
        });
        futures::future::join_all(sends)
            .await
            .into_iter()
            .filter(|delivered| *delivered)
            .count()
    }
}

/// Which transport a node uses
#[derive(Debug, Clone, Default)]
pub enum TransportKind {
    /// Line-delimited JSON over TCP
    #[default]
    Tcp,
    /// In-process hub, for tests and simulations
    Memory(MemoryNetwork),
}
