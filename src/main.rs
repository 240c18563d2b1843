//! Mini-Chain node binary
//!
//! Runs a node, or generates keys and signs transfers for it.

use clap::{Parser, Subcommand};
use mini_chain::cli::{self, StartOptions};
use mini_chain::core::DEFAULT_DIFFICULTY;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "mini-chain")]
#[command(author = "Darshan")]
#[command(version = "0.1.0")]
#[command(about = "A minimal proof-of-work UTXO blockchain node", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a node
    Start {
        /// Host to bind the P2P and API listeners to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to listen on for peers
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Initial peers to connect to (comma-separated host:port)
        #[arg(long)]
        peers: Option<String>,

        /// Serve the HTTP API on this port
        #[arg(long)]
        api_port: Option<u16>,

        /// Mining difficulty (number of leading zero hex digits)
        #[arg(short, long, default_value_t = DEFAULT_DIFFICULTY)]
        difficulty: u32,

        /// Do not run the background miner
        #[arg(long)]
        no_mine: bool,

        /// Miner sleep in milliseconds when the mempool is empty
        #[arg(long, default_value = "2000")]
        idle_ms: u64,
    },

    /// Generate a new key pair and address
    Keygen,

    /// Build and sign a transfer, printing the JSON for POST /tx
    SignTx {
        /// Hex private key of the output owner
        #[arg(short, long)]
        key: String,

        /// Transaction id of the output to spend
        #[arg(long)]
        txid: String,

        /// Output index to spend
        #[arg(long)]
        vout: u32,

        /// Recipient address
        #[arg(short, long)]
        to: String,

        /// Amount to send
        #[arg(short, long)]
        amount: i64,

        /// Amount returned to the signer's address
        #[arg(long, default_value = "0")]
        change: i64,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            host,
            port,
            peers,
            api_port,
            difficulty,
            no_mine,
            idle_ms,
        } => {
            let options = StartOptions {
                host,
                port,
                peers: cli::parse_peers(peers.as_deref()),
                api_port,
                difficulty,
                mine: !no_mine,
                idle_interval: Duration::from_millis(idle_ms),
            };

            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(cli::cmd_start(options))?;
        }

        Commands::Keygen => {
            cli::cmd_keygen()?;
        }

        Commands::SignTx {
            key,
            txid,
            vout,
            to,
            amount,
            change,
        } => {
            cli::cmd_sign_tx(&key, &txid, vout, &to, amount, change)?;
        }
    }

    Ok(())
}
