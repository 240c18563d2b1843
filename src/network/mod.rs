//! P2P Networking module
//!
//! Provides peer-to-peer gossip of transactions and blocks plus full-chain
//! synchronization.
//!
//! # Features
//! - Tagged JSON messages (`TX`, `BLOCK`, `GETCHAIN`, `CHAIN`)
//! - Pluggable transports: line-delimited JSON over TCP, or in-process
//! - Longest-chain sync on startup and whenever a block does not fit

pub mod memory;
pub mod message;
pub mod node;
pub mod tcp;
pub mod transport;

pub use memory::{MemoryNetwork, MemoryTransport};
pub use message::{ChainPayload, Message, MessageError};
pub use node::{Node, NodeConfig, NodeError, NodeEvent, NodeStatus};
pub use tcp::{MessageCodec, TcpTransport, MAX_LINE_LENGTH};
pub use transport::{
    MessageHandler, Transport, TransportError, TransportKind, DEFAULT_REQUEST_TIMEOUT,
};
