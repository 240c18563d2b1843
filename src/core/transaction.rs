//! Transaction handling for the blockchain
//!
//! Implements a UTXO-based transaction model with secp256k1 authorization.
//! A transaction consumes previous outputs through its inputs and creates new
//! outputs; its id is the hash of its canonical serialization.

use crate::core::utxo::{UtxoError, UtxoSet};
use crate::crypto::{public_key_from_hex, public_key_to_address, sha256, verify_signature, KeyPair};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Transaction identifier: lowercase hex SHA-256 of the canonical encoding
pub type TxId = String;

// =============================================================================
// Error Types
// =============================================================================

/// Transaction-related errors
#[derive(Error, Debug)]
pub enum TransactionError {
    // Structural
    #[error("Transaction has no inputs and no outputs")]
    Empty,
    #[error("Output {0} has negative amount {1}")]
    NegativeAmount(usize, i64),
    #[error("Output {0} has no address")]
    MissingAddress(usize),
    #[error("Input {0} is spent twice by the same transaction")]
    DuplicateInput(OutPoint),

    // Authorization
    #[error("Input {0} is not signed")]
    MissingSignature(usize),
    #[error("Invalid signature on input {0}")]
    InvalidSignature(usize),
    #[error("Key on input does not own output {0}")]
    NotOwner(OutPoint),
    #[error("Crypto error: {0}")]
    CryptoError(#[from] crate::crypto::KeyError),

    // Admission
    #[error("Input references unknown or spent output {0}")]
    UnknownInput(OutPoint),
    #[error("Transaction {0} is already confirmed")]
    AlreadyConfirmed(TxId),
    #[error("Output {0} is already spent by a pending transaction")]
    ConflictsWithPending(OutPoint),
    #[error("Unspendable: {0}")]
    Unspendable(#[from] UtxoError),
}

impl TransactionError {
    /// Whether the error is about the authorization of an input
    pub fn is_authorization(&self) -> bool {
        matches!(
            self,
            TransactionError::MissingSignature(_)
                | TransactionError::InvalidSignature(_)
                | TransactionError::NotOwner(_)
                | TransactionError::CryptoError(_)
        )
    }
}

// =============================================================================
// OutPoint
// =============================================================================

/// Reference to a specific output of a previous transaction
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: TxId,
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: impl Into<TxId>, vout: u32) -> Self {
        Self {
            txid: txid.into(),
            vout,
        }
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

// =============================================================================
// Transaction Input / Output
// =============================================================================

/// Transaction input (reference to previous output plus its authorization)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransactionInput {
    /// Transaction ID of the previous transaction
    pub txid: TxId,
    /// Index of the output in the previous transaction
    pub vout: u32,
    /// Hex compact ECDSA signature over the signing hash
    #[serde(default)]
    pub signature: String,
    /// Hex compressed public key of the spender
    #[serde(default, rename = "pubkey")]
    pub public_key: String,
}

impl TransactionInput {
    /// Unsigned input spending the given output
    pub fn unsigned(outpoint: &OutPoint) -> Self {
        Self {
            txid: outpoint.txid.clone(),
            vout: outpoint.vout,
            signature: String::new(),
            public_key: String::new(),
        }
    }

    pub fn outpoint(&self) -> OutPoint {
        OutPoint::new(self.txid.clone(), self.vout)
    }
}

/// Transaction output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransactionOutput {
    /// Recipient's address (derived from a public key)
    pub address: String,
    /// Amount of coins; signed so that negative values can be rejected
    pub amount: i64,
}

impl TransactionOutput {
    pub fn new(address: impl Into<String>, amount: i64) -> Self {
        Self {
            address: address.into(),
            amount,
        }
    }
}

// =============================================================================
// Transaction
// =============================================================================

/// A value transfer in the UTXO model
///
/// A transaction without inputs issues new value and needs no signatures.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transaction {
    #[serde(default)]
    pub inputs: Vec<TransactionInput>,
    #[serde(default)]
    pub outputs: Vec<TransactionOutput>,
}

impl Transaction {
    pub fn new(inputs: Vec<TransactionInput>, outputs: Vec<TransactionOutput>) -> Self {
        Self { inputs, outputs }
    }

    /// Create an issuance transaction paying the given outputs
    pub fn issuance(outputs: Vec<TransactionOutput>) -> Self {
        Self::new(Vec::new(), outputs)
    }

    /// Compute the transaction id over inputs (with authorization) and outputs
    pub fn id(&self) -> TxId {
        let mut buf = Vec::new();
        self.encode_inputs(&mut buf, true);
        self.encode_outputs(&mut buf);
        hex::encode(sha256(&buf))
    }

    /// Hash that every input signs: outpoints and outputs, no signatures
    pub fn signing_hash(&self) -> [u8; 32] {
        let mut buf = Vec::new();
        self.encode_inputs(&mut buf, false);
        self.encode_outputs(&mut buf);
        sha256(&buf)
    }

    // Length-prefixed fields keep the encoding injective for arbitrary strings.
    fn encode_inputs(&self, buf: &mut Vec<u8>, with_auth: bool) {
        push_field(buf, &self.inputs.len().to_string());
        for input in &self.inputs {
            push_field(buf, &input.txid);
            push_field(buf, &input.vout.to_string());
            if with_auth {
                push_field(buf, &input.public_key);
                push_field(buf, &input.signature);
            }
        }
    }

    fn encode_outputs(&self, buf: &mut Vec<u8>) {
        push_field(buf, &self.outputs.len().to_string());
        for output in &self.outputs {
            push_field(buf, &output.address);
            push_field(buf, &output.amount.to_string());
        }
    }

    pub fn is_issuance(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Outpoints consumed by this transaction
    pub fn spent_outpoints(&self) -> impl Iterator<Item = OutPoint> + '_ {
        self.inputs.iter().map(TransactionInput::outpoint)
    }

    /// Sum of output amounts (widened so it cannot overflow)
    pub fn total_output(&self) -> i128 {
        self.outputs.iter().map(|o| o.amount as i128).sum()
    }

    /// Sign all inputs with the provided key pair
    pub fn sign(&mut self, key_pair: &KeyPair) -> Result<(), TransactionError> {
        let signing_hash = self.signing_hash();
        let public_key_hex = key_pair.public_key_hex();

        for input in &mut self.inputs {
            input.signature = key_pair.sign(&signing_hash)?;
            input.public_key = public_key_hex.clone();
        }
        Ok(())
    }

    // =========================================================================
    // Validation
    // =========================================================================

    /// Context-free checks on the shape of the transaction
    pub fn validate_structure(&self) -> Result<(), TransactionError> {
        if self.inputs.is_empty() && self.outputs.is_empty() {
            return Err(TransactionError::Empty);
        }

        for (index, output) in self.outputs.iter().enumerate() {
            if output.amount < 0 {
                return Err(TransactionError::NegativeAmount(index, output.amount));
            }
            if output.address.is_empty() {
                return Err(TransactionError::MissingAddress(index));
            }
        }

        let mut seen = HashSet::new();
        for outpoint in self.spent_outpoints() {
            if !seen.insert(outpoint.clone()) {
                return Err(TransactionError::DuplicateInput(outpoint));
            }
        }

        Ok(())
    }

    /// Check that every input is signed by the key entitled to spend the
    /// output it references in `utxos`
    pub fn verify_authorization(&self, utxos: &UtxoSet) -> Result<(), TransactionError> {
        if self.inputs.is_empty() {
            return Ok(());
        }

        let signing_hash = self.signing_hash();

        for (index, input) in self.inputs.iter().enumerate() {
            let outpoint = input.outpoint();
            let entry = utxos
                .get(&input.txid, input.vout)
                .ok_or_else(|| TransactionError::UnknownInput(outpoint.clone()))?;

            if input.signature.is_empty() || input.public_key.is_empty() {
                return Err(TransactionError::MissingSignature(index));
            }

            let public_key = public_key_from_hex(&input.public_key)?;
            if !verify_signature(&public_key, &signing_hash, &input.signature)? {
                return Err(TransactionError::InvalidSignature(index));
            }

            if public_key_to_address(&public_key) != entry.address {
                return Err(TransactionError::NotOwner(outpoint));
            }
        }

        Ok(())
    }

    /// Structure, authorization and spendability against a UTXO view
    pub fn validate_against(&self, utxos: &UtxoSet) -> Result<(), TransactionError> {
        self.validate_structure()?;
        self.verify_authorization(utxos)?;
        utxos.check_spendable(self)?;
        Ok(())
    }
}

/// Append `value` as `len:value`
pub(crate) fn push_field(buf: &mut Vec<u8>, value: &str) {
    buf.extend_from_slice(value.len().to_string().as_bytes());
    buf.push(b':');
    buf.extend_from_slice(value.as_bytes());
}

// =============================================================================
// Transaction Builder
// =============================================================================

/// Builder for wallet-side construction of transactions
#[derive(Debug, Default)]
pub struct TransactionBuilder {
    inputs: Vec<TransactionInput>,
    outputs: Vec<TransactionOutput>,
}

impl TransactionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spend an existing output
    pub fn add_input(mut self, outpoint: &OutPoint) -> Self {
        self.inputs.push(TransactionInput::unsigned(outpoint));
        self
    }

    /// Add an output
    pub fn add_output(mut self, address: &str, amount: i64) -> Self {
        self.outputs.push(TransactionOutput::new(address, amount));
        self
    }

    /// Build without signing
    pub fn build(self) -> Transaction {
        Transaction::new(self.inputs, self.outputs)
    }

    /// Build and sign every input with one key
    pub fn build_and_sign(self, key_pair: &KeyPair) -> Result<Transaction, TransactionError> {
        let mut tx = self.build();
        tx.sign(key_pair)?;
        Ok(tx)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::utxo::UtxoSet;

    fn funded(key_pair: &KeyPair, amount: i64) -> (UtxoSet, OutPoint) {
        let mut utxos = UtxoSet::new();
        let issue = Transaction::issuance(vec![TransactionOutput::new(key_pair.address(), amount)]);
        utxos.apply(&issue).unwrap();
        (utxos, OutPoint::new(issue.id(), 0))
    }

    #[test]
    fn test_id_is_deterministic() {
        let tx1 = Transaction::issuance(vec![TransactionOutput::new("addr1", 50)]);
        let tx2 = Transaction::issuance(vec![TransactionOutput::new("addr1", 50)]);
        let tx3 = Transaction::issuance(vec![TransactionOutput::new("addr2", 50)]);
        assert_eq!(tx1.id(), tx2.id());
        assert_ne!(tx1.id(), tx3.id());
        assert_eq!(tx1.id().len(), 64);
    }

    #[test]
    fn test_id_survives_json() {
        let tx = TransactionBuilder::new()
            .add_input(&OutPoint::new("ab".repeat(32), 1))
            .add_output("addr", 7)
            .build();
        let json = serde_json::to_string(&tx).unwrap();
        assert!(json.contains("\"pubkey\""));
        let decoded: Transaction = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.id(), tx.id());
    }

    #[test]
    fn test_encoding_is_unambiguous() {
        let a = Transaction::issuance(vec![TransactionOutput::new("ab", 1)]);
        let b = Transaction::issuance(vec![TransactionOutput::new("a", 1)]);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_structure_rules() {
        assert!(matches!(
            Transaction::new(vec![], vec![]).validate_structure(),
            Err(TransactionError::Empty)
        ));

        let negative = Transaction::issuance(vec![
            TransactionOutput::new("a", 5),
            TransactionOutput::new("b", -1),
        ]);
        assert!(matches!(
            negative.validate_structure(),
            Err(TransactionError::NegativeAmount(1, -1))
        ));

        let zero = Transaction::issuance(vec![TransactionOutput::new("a", 0)]);
        assert!(zero.validate_structure().is_ok());

        let outpoint = OutPoint::new("cd".repeat(32), 0);
        let twice = TransactionBuilder::new()
            .add_input(&outpoint)
            .add_input(&outpoint)
            .build();
        assert!(matches!(
            twice.validate_structure(),
            Err(TransactionError::DuplicateInput(_))
        ));

        // Inputs only (burn) is structurally fine
        let burn = TransactionBuilder::new().add_input(&outpoint).build();
        assert!(burn.validate_structure().is_ok());
    }

    #[test]
    fn test_negative_amount_from_json() {
        let raw = r#"{"inputs":[],"outputs":[{"address":"a","amount":-5}]}"#;
        let tx: Transaction = serde_json::from_str(raw).unwrap();
        assert!(tx.validate_structure().is_err());
    }

    #[test]
    fn test_signed_spend_is_authorized() {
        let owner = KeyPair::generate();
        let (utxos, outpoint) = funded(&owner, 100);

        let tx = TransactionBuilder::new()
            .add_input(&outpoint)
            .add_output("recipient", 60)
            .add_output(&owner.address(), 40)
            .build_and_sign(&owner)
            .unwrap();

        assert!(tx.verify_authorization(&utxos).is_ok());
        assert!(tx.validate_against(&utxos).is_ok());
    }

    #[test]
    fn test_unsigned_spend_rejected() {
        let owner = KeyPair::generate();
        let (utxos, outpoint) = funded(&owner, 100);

        let tx = TransactionBuilder::new()
            .add_input(&outpoint)
            .add_output("recipient", 100)
            .build();
        assert!(matches!(
            tx.verify_authorization(&utxos),
            Err(TransactionError::MissingSignature(0))
        ));
    }

    #[test]
    fn test_foreign_key_rejected() {
        let owner = KeyPair::generate();
        let thief = KeyPair::generate();
        let (utxos, outpoint) = funded(&owner, 100);

        let tx = TransactionBuilder::new()
            .add_input(&outpoint)
            .add_output(&thief.address(), 100)
            .build_and_sign(&thief)
            .unwrap();
        let err = tx.verify_authorization(&utxos).unwrap_err();
        assert!(matches!(err, TransactionError::NotOwner(_)));
        assert!(err.is_authorization());
    }

    #[test]
    fn test_tampered_output_breaks_signature() {
        let owner = KeyPair::generate();
        let (utxos, outpoint) = funded(&owner, 100);

        let mut tx = TransactionBuilder::new()
            .add_input(&outpoint)
            .add_output("recipient", 10)
            .build_and_sign(&owner)
            .unwrap();
        tx.outputs[0].amount = 90;

        assert!(matches!(
            tx.verify_authorization(&utxos),
            Err(TransactionError::InvalidSignature(0))
        ));
    }

    #[test]
    fn test_unknown_input_rejected() {
        let owner = KeyPair::generate();
        let utxos = UtxoSet::new();
        let tx = TransactionBuilder::new()
            .add_input(&OutPoint::new("ef".repeat(32), 0))
            .add_output("recipient", 1)
            .build_and_sign(&owner)
            .unwrap();
        assert!(matches!(
            tx.verify_authorization(&utxos),
            Err(TransactionError::UnknownInput(_))
        ));
    }

    #[test]
    fn test_overspend_rejected() {
        let owner = KeyPair::generate();
        let (utxos, outpoint) = funded(&owner, 10);

        let tx = TransactionBuilder::new()
            .add_input(&outpoint)
            .add_output("recipient", 11)
            .build_and_sign(&owner)
            .unwrap();
        assert!(matches!(
            tx.validate_against(&utxos),
            Err(TransactionError::Unspendable(UtxoError::InsufficientInputs { .. }))
        ));
    }
}
