//! In-process transport
//!
//! A [`MemoryNetwork`] is a hub of named handlers. Transports created from
//! it deliver messages by calling the target's handler directly, which makes
//! multi-node scenarios deterministic enough to test without sockets.

use crate::network::message::Message;
use crate::network::transport::{MessageHandler, Transport, TransportError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock as StdRwLock};
use std::time::Duration;
use tokio::sync::RwLock;

/// Shared hub connecting memory transports
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    handlers: Arc<StdRwLock<HashMap<String, Arc<dyn MessageHandler>>>>,
}

impl fmt::Debug for MemoryNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryNetwork")
            .field("nodes", &self.addresses())
            .finish()
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport reachable under `addr`
    pub fn transport(&self, addr: impl Into<String>, peers: Vec<String>) -> MemoryTransport {
        MemoryTransport {
            addr: addr.into(),
            network: self.clone(),
            peers: RwLock::new(peers),
            request_timeout: crate::network::transport::DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Addresses with a registered handler
    pub fn addresses(&self) -> Vec<String> {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        let mut addresses: Vec<String> = handlers.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    fn register(&self, addr: &str, handler: Arc<dyn MessageHandler>) -> Result<(), TransportError> {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        if handlers.contains_key(addr) {
            return Err(TransportError::AlreadyStarted);
        }
        handlers.insert(addr.to_string(), handler);
        Ok(())
    }

    fn unregister(&self, addr: &str) {
        let mut handlers = self.handlers.write().unwrap_or_else(|e| e.into_inner());
        handlers.remove(addr);
    }

    fn handler(&self, addr: &str) -> Result<Arc<dyn MessageHandler>, TransportError> {
        let handlers = self.handlers.read().unwrap_or_else(|e| e.into_inner());
        handlers
            .get(addr)
            .cloned()
            .ok_or_else(|| TransportError::UnknownPeer(addr.to_string()))
    }
}

/// Transport endpoint on a [`MemoryNetwork`]
pub struct MemoryTransport {
    addr: String,
    network: MemoryNetwork,
    peers: RwLock<Vec<String>>,
    request_timeout: Duration,
}

impl MemoryTransport {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_addr(&self) -> String {
        self.addr.clone()
    }

    async fn start(&self, handler: Arc<dyn MessageHandler>) -> Result<(), TransportError> {
        self.network.register(&self.addr, handler)
    }

    async fn send(&self, peer: &str, msg: &Message) -> Result<(), TransportError> {
        let handler = self.network.handler(peer)?;
        let from = self.addr.clone();
        let msg = msg.clone();
        // Delivered on its own task, like a message on the wire
        tokio::spawn(async move {
            handler.handle(&from, msg).await;
        });
        Ok(())
    }

    async fn request(&self, peer: &str, msg: &Message) -> Result<Message, TransportError> {
        let handler = self.network.handler(peer)?;
        let reply = handler.handle(&self.addr, msg.clone());
        let reply = tokio::time::timeout(self.request_timeout, reply)
            .await
            .map_err(|_| TransportError::Timeout(format!("reply from {}", peer)))?;
        reply.ok_or_else(|| TransportError::Closed(peer.to_string()))
    }

    async fn add_peer(&self, peer: String) {
        let mut peers = self.peers.write().await;
        if !peers.contains(&peer) {
            peers.push(peer);
        }
    }

    async fn peers(&self) -> Vec<String> {
        self.peers.read().await.clone()
    }

    async fn shutdown(&self) {
        self.network.unregister(&self.addr);
    }
}
