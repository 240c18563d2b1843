//! REST API module
//!
//! Provides an HTTP admin API for a running node.
//!
//! # Endpoints
//!
//! ## Chain
//! - `GET /chain` - Current tip block
//! - `GET /chain/blocks` - Full chain
//! - `GET /chain/blocks/{index}` - Block by index
//! - `GET /block/{hash}` - Block by hash
//!
//! ## State
//! - `GET /mempool` - Pending transaction ids
//! - `GET /utxo/{txid}/{vout}` - Unspent output lookup
//! - `GET /address/{address}/balance` - Balance and unspent outputs
//!
//! ## Transactions
//! - `POST /tx` - Submit a signed transaction
//! - `GET /tx/{txid}` - Confirmed or pending transaction
//!
//! ## WebSocket
//! - `GET /ws` - Real-time updates (TransactionAccepted, BlockAccepted, ChainReplaced)

pub mod handlers;
pub mod routes;
pub mod websocket;

pub use handlers::ApiState;
pub use routes::{create_router, serve};
