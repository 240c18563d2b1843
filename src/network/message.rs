//! Network message types for P2P communication
//!
//! Every message travels as one JSON object `{"type": ..., "data": ...}`
//! per line. The envelope is decoded once, here, into [`Message`].

use crate::core::{Block, Transaction};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Message decoding errors
#[derive(Error, Debug)]
pub enum MessageError {
    #[error("Unknown message type: {0}")]
    UnknownType(String),
    #[error("Invalid {kind} payload: {source}")]
    InvalidPayload {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Blocks of a chain plus the transaction bodies they reference
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainPayload {
    pub blocks: Vec<Block>,
    #[serde(default)]
    pub transactions: Vec<Transaction>,
}

/// Network message types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Envelope", into = "Envelope")]
pub enum Message {
    /// Announce a new transaction
    Tx(Transaction),
    /// Announce a newly mined block
    Block(Block),
    /// Ask for the full chain
    GetChain,
    /// Full chain, usually the reply to `GetChain`
    Chain(ChainPayload),
}

/// Wire form of a message
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

impl TryFrom<Envelope> for Message {
    type Error = MessageError;

    fn try_from(envelope: Envelope) -> Result<Self, Self::Error> {
        fn payload<T: serde::de::DeserializeOwned>(
            kind: &'static str,
            data: Value,
        ) -> Result<T, MessageError> {
            serde_json::from_value(data)
                .map_err(|source| MessageError::InvalidPayload { kind, source })
        }

        match envelope.kind.as_str() {
            "TX" => Ok(Message::Tx(payload("TX", envelope.data)?)),
            "BLOCK" => Ok(Message::Block(payload("BLOCK", envelope.data)?)),
            "GETCHAIN" => Ok(Message::GetChain),
            "CHAIN" => match envelope.data {
                // Bare block list without bodies
                Value::Array(_) => Ok(Message::Chain(ChainPayload {
                    blocks: payload("CHAIN", envelope.data)?,
                    transactions: Vec::new(),
                })),
                data => Ok(Message::Chain(payload("CHAIN", data)?)),
            },
            _ => Err(MessageError::UnknownType(envelope.kind)),
        }
    }
}

impl From<Message> for Envelope {
    fn from(message: Message) -> Self {
        let kind = message.type_name().to_string();
        let data = match message {
            Message::Tx(tx) => serde_json::to_value(tx),
            Message::Block(block) => serde_json::to_value(block),
            Message::GetChain => Ok(Value::Null),
            Message::Chain(payload) => serde_json::to_value(payload),
        };
        // Plain data structs always convert to a JSON value
        Self {
            kind,
            data: data.unwrap_or(Value::Null),
        }
    }
}

impl Message {
    /// Serialize message to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize message from bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    /// Wire type name, also used for logging
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::Tx(_) => "TX",
            Message::Block(_) => "BLOCK",
            Message::GetChain => "GETCHAIN",
            Message::Chain(_) => "CHAIN",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TransactionOutput;

    #[test]
    fn test_message_serialization() {
        let tx = Transaction::issuance(vec![TransactionOutput::new("alice", 5)]);
        let bytes = Message::Tx(tx.clone()).to_bytes().unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["type"], "TX");
        assert_eq!(value["data"]["outputs"][0]["amount"], 5);

        assert_eq!(Message::from_bytes(&bytes).unwrap(), Message::Tx(tx));
    }

    #[test]
    fn test_getchain_forms() {
        for raw in [
            r#"{"type":"GETCHAIN"}"#,
            r#"{"type":"GETCHAIN","data":null}"#,
        ] {
            assert_eq!(Message::from_bytes(raw.as_bytes()).unwrap(), Message::GetChain);
        }

        let encoded = serde_json::to_value(Message::GetChain).unwrap();
        assert_eq!(encoded, serde_json::json!({"type": "GETCHAIN", "data": null}));
    }

    #[test]
    fn test_chain_forms() {
        let genesis = Block::genesis();

        let bare = serde_json::json!({"type": "CHAIN", "data": [genesis]});
        let decoded: Message = serde_json::from_value(bare).unwrap();
        assert_eq!(
            decoded,
            Message::Chain(ChainPayload {
                blocks: vec![genesis.clone()],
                transactions: vec![],
            })
        );

        let full = Message::Chain(ChainPayload {
            blocks: vec![genesis],
            transactions: vec![Transaction::issuance(vec![TransactionOutput::new("a", 1)])],
        });
        let value = serde_json::to_value(&full).unwrap();
        assert!(value["data"]["blocks"].is_array());
        assert_eq!(serde_json::from_value::<Message>(value).unwrap(), full);
    }

    #[test]
    fn test_rejects_unknown_and_legacy() {
        assert!(Message::from_bytes(br#"{"type":"PING","data":1}"#).is_err());
        // Account-style transfer is not a transaction
        let legacy = br#"{"type":"TX","data":{"from":"a","to":"b","amount":1}}"#;
        match Message::from_bytes(legacy) {
            Ok(Message::Tx(tx)) => assert!(tx.validate_structure().is_err()),
            Ok(other) => panic!("unexpected {:?}", other),
            Err(_) => {}
        }
        assert!(Message::from_bytes(br#"{"type":"BLOCK","data":{"index":"x"}}"#).is_err());
    }
}
