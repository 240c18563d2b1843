//! TCP transport
//!
//! Peers exchange line-delimited JSON messages. Every outbound message opens
//! a fresh connection; requests keep it open for exactly one reply line.

use crate::network::message::Message;
use crate::network::transport::{MessageHandler, Transport, TransportError};
use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use futures::sink::SinkExt;
use futures::stream::StreamExt;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_util::codec::{Decoder, Encoder, Framed};
use tokio_util::sync::CancellationToken;

/// Longest accepted line; a full chain with bodies must fit
pub const MAX_LINE_LENGTH: usize = 64 * 1024 * 1024;

/// Message codec for newline-delimited JSON framing
#[derive(Debug, Clone)]
pub struct MessageCodec {
    max_length: usize,
    /// Bytes already scanned for a newline
    scanned: usize,
}

impl MessageCodec {
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length,
            scanned: 0,
        }
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::new(MAX_LINE_LENGTH)
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = std::io::Error;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let data = item
            .to_bytes()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;

        dst.reserve(data.len() + 1);
        dst.put_slice(&data);
        dst.put_u8(b'\n');

        Ok(())
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(offset) = src[self.scanned..].iter().position(|b| *b == b'\n') else {
                if src.len() > self.max_length {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("Line exceeds {} bytes", self.max_length),
                    ));
                }
                self.scanned = src.len();
                return Ok(None);
            };

            let line = src.split_to(self.scanned + offset + 1);
            self.scanned = 0;

            let line = line.strip_suffix(b"\n").unwrap_or(&line[..]);
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            let msg = Message::from_bytes(line)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
            return Ok(Some(msg));
        }
    }
}

/// Line-delimited JSON over TCP
pub struct TcpTransport {
    listen_addr: String,
    bound_addr: OnceLock<SocketAddr>,
    peers: RwLock<Vec<String>>,
    request_timeout: Duration,
    stop: CancellationToken,
}

impl TcpTransport {
    pub fn new(
        listen_addr: impl Into<String>,
        peers: Vec<String>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            bound_addr: OnceLock::new(),
            peers: RwLock::new(peers),
            request_timeout,
            stop: CancellationToken::new(),
        }
    }

    /// Actual listening address once started (resolves port 0)
    pub fn bound_addr(&self) -> Option<SocketAddr> {
        self.bound_addr.get().copied()
    }

    async fn connect(&self, peer: &str) -> Result<Framed<TcpStream, MessageCodec>, TransportError> {
        let stream = tokio::time::timeout(self.request_timeout, TcpStream::connect(peer))
            .await
            .map_err(|_| TransportError::Timeout(format!("connection to {}", peer)))??;
        Ok(Framed::new(stream, MessageCodec::default()))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn local_addr(&self) -> String {
        self.bound_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|| self.listen_addr.clone())
    }

    async fn start(&self, handler: Arc<dyn MessageHandler>) -> Result<(), TransportError> {
        if self.bound_addr.get().is_some() {
            return Err(TransportError::AlreadyStarted);
        }

        let listener = TcpListener::bind(&self.listen_addr).await?;
        let addr = listener.local_addr()?;
        let _ = self.bound_addr.set(addr);
        log::info!("P2P server listening on {}", addr);

        let stop = self.stop.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer)) => {
                            tokio::spawn(handle_connection(stream, peer, handler.clone()));
                        }
                        Err(e) => log::warn!("Failed to accept connection: {}", e),
                    },
                }
            }
            log::info!("P2P server on {} stopped", addr);
        });

        Ok(())
    }

    async fn send(&self, peer: &str, msg: &Message) -> Result<(), TransportError> {
        let mut framed = self.connect(peer).await?;
        framed.send(msg.clone()).await?;
        framed.close().await?;
        Ok(())
    }

    async fn request(&self, peer: &str, msg: &Message) -> Result<Message, TransportError> {
        let mut framed = self.connect(peer).await?;
        framed.send(msg.clone()).await?;

        let reply = tokio::time::timeout(self.request_timeout, framed.next())
            .await
            .map_err(|_| TransportError::Timeout(format!("reply from {}", peer)))?;

        match reply {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(e)) => Err(e.into()),
            None => Err(TransportError::Closed(peer.to_string())),
        }
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
        self.stop.cancel();
    }
}

/// Serve one inbound connection until the peer closes it
async fn handle_connection(stream: TcpStream, addr: SocketAddr, handler: Arc<dyn MessageHandler>) {
    let mut framed = Framed::new(stream, MessageCodec::default());
    let from = addr.to_string();

    while let Some(frame) = framed.next().await {
        let msg = match frame {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!("Dropping connection from {}: {}", addr, e);
                break;
            }
        };

        log::debug!("Received {} from {}", msg.type_name(), addr);
        if let Some(reply) = handler.handle(&from, msg).await {
            if let Err(e) = framed.send(reply).await {
                log::warn!("Failed to reply to {}: {}", addr, e);
                break;
            }
        }
    }
}
