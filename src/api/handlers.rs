//! REST API handlers for node operations

use crate::core::{Block, Transaction, TxId, Utxo};
use crate::network::Node;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

/// Shared application state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub node: Node,
}

impl ApiState {
    pub fn new(node: Node) -> Self {
        Self { node }
    }
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct MempoolResponse {
    pub pending_transactions: usize,
    pub transactions: Vec<TxId>,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub address: String,
    pub balance: i64,
    pub utxos: Vec<Utxo>,
}

#[derive(Debug, Serialize)]
pub struct TransactionResponse {
    pub txid: TxId,
    pub confirmed: bool,
    pub transaction: Transaction,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub txid: TxId,
    pub accepted: bool,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
}

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

fn api_error(status: StatusCode, error: String) -> (StatusCode, Json<ApiError>) {
    (status, Json(ApiError { error }))
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "OK"
}

/// GET /chain - Current tip
pub async fn get_tip(State(state): State<ApiState>) -> Json<Block> {
    let chain = state.node.chain().read().await;
    Json(chain.latest_block().clone())
}

/// GET /chain/blocks - Full chain from genesis
pub async fn get_blocks(State(state): State<ApiState>) -> Json<Vec<Block>> {
    let chain = state.node.chain().read().await;
    Json(chain.blocks().to_vec())
}

/// GET /chain/blocks/{index} - Get block by index
pub async fn get_block_by_index(
    State(state): State<ApiState>,
    Path(index): Path<u64>,
) -> ApiResult<Json<Block>> {
    let chain = state.node.chain().read().await;

    chain.get_block(index).cloned().map(Json).ok_or_else(|| {
        api_error(
            StatusCode::NOT_FOUND,
            format!("Block at index {} not found", index),
        )
    })
}

/// GET /block/{hash} - Get block by hash
pub async fn get_block_by_hash(
    State(state): State<ApiState>,
    Path(hash): Path<String>,
) -> ApiResult<Json<Block>> {
    let chain = state.node.chain().read().await;

    chain
        .get_block_by_hash(&hash)
        .cloned()
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("Block {} not found", hash)))
}

/// GET /tx/{txid} - Confirmed or pending transaction
pub async fn get_transaction(
    State(state): State<ApiState>,
    Path(txid): Path<String>,
) -> ApiResult<Json<TransactionResponse>> {
    let chain = state.node.chain().read().await;

    match chain.get_transaction(&txid) {
        Some(tx) => Ok(Json(TransactionResponse {
            confirmed: chain.is_confirmed(&txid),
            transaction: tx.clone(),
            txid,
        })),
        None => Err(api_error(
            StatusCode::NOT_FOUND,
            format!("Transaction {} not found", txid),
        )),
    }
}

/// GET /mempool - Pending transactions
pub async fn get_mempool(State(state): State<ApiState>) -> Json<MempoolResponse> {
    let chain = state.node.chain().read().await;
    let mempool = chain.mempool();

    Json(MempoolResponse {
        pending_transactions: mempool.len(),
        transactions: mempool.transaction_ids(),
    })
}

/// GET /utxo/{txid}/{vout} - Look up one unspent output
pub async fn get_utxo(
    State(state): State<ApiState>,
    Path((txid, vout)): Path<(String, u32)>,
) -> ApiResult<Json<Utxo>> {
    let chain = state.node.chain().read().await;

    chain.utxos().get(&txid, vout).cloned().map(Json).ok_or_else(|| {
        api_error(
            StatusCode::NOT_FOUND,
            format!("Output {}:{} not found or already spent", txid, vout),
        )
    })
}

/// GET /address/{address}/balance - Balance and unspent outputs
pub async fn get_balance(
    State(state): State<ApiState>,
    Path(address): Path<String>,
) -> Json<BalanceResponse> {
    let chain = state.node.chain().read().await;
    let utxos: Vec<Utxo> = chain
        .utxos()
        .find_for_address(&address)
        .into_iter()
        .cloned()
        .collect();
    let balance = chain.utxos().balance(&address);

    Json(BalanceResponse {
        address,
        balance,
        utxos,
    })
}

/// POST /tx - Submit a signed transaction
///
/// Bodies that do not decode as a transaction are a bad request like any
/// other structural error.
pub async fn submit_transaction(
    State(state): State<ApiState>,
    payload: Result<Json<Transaction>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let Json(tx) = payload.map_err(|rejection| {
        log::warn!("Rejected malformed transaction via API: {}", rejection);
        api_error(
            StatusCode::BAD_REQUEST,
            format!("Malformed transaction: {}", rejection.body_text()),
        )
    })?;
    let txid = tx.id();

    match state.node.submit_transaction(tx).await {
        Ok(true) => {
            log::info!("Accepted transaction {} via API", txid);
            Ok((
                StatusCode::CREATED,
                Json(SubmitResponse {
                    txid,
                    accepted: true,
                }),
            ))
        }
        Ok(false) => Ok((
            StatusCode::OK,
            Json(SubmitResponse {
                txid,
                accepted: false,
            }),
        )),
        Err(e) => {
            log::warn!("Rejected transaction {} via API: {}", txid, e);
            Err(api_error(StatusCode::BAD_REQUEST, e.to_string()))
        }
    }
}
