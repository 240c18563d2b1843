//! REST API routes configuration

use crate::api::handlers::{self, ApiState};
use crate::api::websocket::ws_handler;
use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

/// Create the API router with all routes
pub fn create_router(state: ApiState) -> Router {
    // Configure CORS for browser access
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // WebSocket for real-time updates
        .route("/ws", get(ws_handler))
        // Chain
        .route("/chain", get(handlers::get_tip))
        .route("/chain/blocks", get(handlers::get_blocks))
        .route("/chain/blocks/{index}", get(handlers::get_block_by_index))
        .route("/block/{hash}", get(handlers::get_block_by_hash))
        // State queries
        .route("/mempool", get(handlers::get_mempool))
        .route("/utxo/{txid}/{vout}", get(handlers::get_utxo))
        .route("/address/{address}/balance", get(handlers::get_balance))
        // Transactions
        .route("/tx", post(handlers::submit_transaction))
        .route("/tx/{txid}", get(handlers::get_transaction))
        .with_state(state)
        .layer(cors)
}

/// Serve the API on `addr` until `stop` is cancelled
pub async fn serve(
    addr: &str,
    state: ApiState,
    stop: CancellationToken,
) -> Result<(), std::io::Error> {
    let listener = TcpListener::bind(addr).await?;
    log::info!("API server listening on http://{}", listener.local_addr()?);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move { stop.cancelled().await })
        .await
}
