//! CLI commands for the node
//!
//! Implements the command handlers behind `mini-chain start`, `keygen` and
//! `sign-tx`.

use crate::api::{self, ApiState};
use crate::core::{OutPoint, Transaction, TransactionBuilder};
use crate::crypto::KeyPair;
use crate::network::{Node, NodeConfig};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Options for `start`
#[derive(Debug, Clone)]
pub struct StartOptions {
    pub host: String,
    pub port: u16,
    pub peers: Vec<String>,
    pub api_port: Option<u16>,
    pub difficulty: u32,
    pub mine: bool,
    pub idle_interval: Duration,
}

impl StartOptions {
    pub fn to_config(&self) -> NodeConfig {
        NodeConfig {
            listen_addr: format!("{}:{}", self.host, self.port),
            api_addr: self.api_port.map(|port| format!("{}:{}", self.host, port)),
            peers: self.peers.clone(),
            difficulty: self.difficulty,
            mine: self.mine,
            idle_interval: self.idle_interval,
            ..NodeConfig::default()
        }
    }
}

/// Split a comma-separated peer list, dropping blanks
pub fn parse_peers(peers: Option<&str>) -> Vec<String> {
    peers
        .map(|p| {
            p.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Run a node until Ctrl-C
pub async fn cmd_start(options: StartOptions) -> CliResult<()> {
    let config = options.to_config();
    let node = Node::from_config(config.clone())?;

    println!("🌐 Starting node on {}...", config.listen_addr);
    if !config.peers.is_empty() {
        println!("   Peers: {}", config.peers.join(", "));
    }
    println!("   Difficulty: {}", config.difficulty);
    println!("   Mining: {}", if config.mine { "on" } else { "off" });

    node.start().await?;

    let stop = CancellationToken::new();
    let api_task = config.api_addr.clone().map(|addr| {
        println!("🚀 REST API on http://{}", addr);
        let state = ApiState::new(node.clone());
        let stop = stop.clone();
        tokio::spawn(async move {
            if let Err(e) = api::serve(&addr, state, stop).await {
                log::error!("API server error: {}", e);
            }
        })
    });

    tokio::signal::ctrl_c().await?;
    println!("\n📴 Shutting down node...");

    stop.cancel();
    node.shutdown().await;
    if let Some(task) = api_task {
        task.await?;
    }

    let status = node.status().await;
    println!("✅ Stopped at height {} ({})", status.height, status.latest_hash);
    Ok(())
}

/// Generate and print a new key pair
pub fn cmd_keygen() -> CliResult<()> {
    let key_pair = KeyPair::generate();

    println!("🔐 New key pair");
    println!("   📍 Address:     {}", key_pair.address());
    println!("   🔑 Public key:  {}", key_pair.public_key_hex());
    println!("   🗝️  Private key: {}", key_pair.private_key_hex());
    println!("\n   ⚠️  Keep the private key secret; it is the only way to spend.");

    Ok(())
}

/// Build and sign a transfer spending one output
///
/// Sends `amount` to `to`; a non-zero `change` goes back to the signer.
pub fn signed_transfer(
    private_key: &str,
    outpoint: &OutPoint,
    to: &str,
    amount: i64,
    change: i64,
) -> CliResult<Transaction> {
    let key_pair = KeyPair::from_private_key_hex(private_key)?;

    let mut builder = TransactionBuilder::new()
        .add_input(outpoint)
        .add_output(to, amount);
    if change > 0 {
        builder = builder.add_output(&key_pair.address(), change);
    }

    let tx = builder.build_and_sign(&key_pair)?;
    tx.validate_structure()?;
    Ok(tx)
}

/// Print a signed transfer as the JSON body for `POST /tx`
pub fn cmd_sign_tx(
    private_key: &str,
    txid: &str,
    vout: u32,
    to: &str,
    amount: i64,
    change: i64,
) -> CliResult<()> {
    let tx = signed_transfer(private_key, &OutPoint::new(txid, vout), to, amount, change)?;

    eprintln!("📤 Signed transaction {}", tx.id());
    println!("{}", serde_json::to_string_pretty(&tx)?);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{TransactionOutput, UtxoSet};

    #[test]
    fn test_parse_peers() {
        assert!(parse_peers(None).is_empty());
        assert_eq!(
            parse_peers(Some("127.0.0.1:3001, 127.0.0.1:3002,,")),
            vec!["127.0.0.1:3001".to_string(), "127.0.0.1:3002".to_string()]
        );
    }

    #[test]
    fn test_start_options_to_config() {
        let options = StartOptions {
            host: "127.0.0.1".to_string(),
            port: 3001,
            peers: vec!["127.0.0.1:3000".to_string()],
            api_port: Some(8080),
            difficulty: 2,
            mine: false,
            idle_interval: Duration::from_secs(1),
        };
        let config = options.to_config();
        assert_eq!(config.listen_addr, "127.0.0.1:3001");
        assert_eq!(config.api_addr.as_deref(), Some("127.0.0.1:8080"));
        assert_eq!(config.peers, options.peers);
        assert_eq!(config.difficulty, 2);
        assert!(!config.mine);
    }

    #[test]
    fn test_signed_transfer_spends_owned_output() {
        let owner = KeyPair::generate();
        let funding = Transaction::issuance(vec![TransactionOutput::new(owner.address(), 10)]);
        let mut utxos = UtxoSet::new();
        utxos.apply(&funding).unwrap();

        let tx = signed_transfer(
            &owner.private_key_hex(),
            &OutPoint::new(funding.id(), 0),
            "bob",
            7,
            3,
        )
        .unwrap();

        assert_eq!(tx.outputs.len(), 2);
        assert_eq!(tx.outputs[1].address, owner.address());
        assert!(tx.validate_against(&utxos).is_ok());

        let json = serde_json::to_string(&tx).unwrap();
        let parsed: Transaction = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id(), tx.id());
    }

    #[test]
    fn test_signed_transfer_rejects_bad_input() {
        let outpoint = OutPoint::new("abc", 0);
        assert!(signed_transfer("not-hex", &outpoint, "bob", 1, 0).is_err());

        let key = KeyPair::generate().private_key_hex();
        assert!(signed_transfer(&key, &outpoint, "bob", -1, 0).is_err());
    }
}
