//! HTTP/SSE/WS front door.

pub mod auth;
pub mod handlers;
pub mod sse;
pub mod ws;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::{middleware, Router};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use lib_crypto::NodeKeypair;
use lib_deliberation::{DeliberationEngine, DeliberationEvent};
use lib_governance::GovernanceStore;
use lib_ledger::{LedgerEvent, LedgerHandle};
use lib_network::Mesh;

/// Shared application state behind every handler.
#[derive(Clone)]
pub struct AppState {
    pub keypair: Arc<NodeKeypair>,
    pub ledger: LedgerHandle,
    pub mesh: Mesh,
    pub engine: Arc<DeliberationEngine>,
    pub governance: GovernanceStore,
    pub ledger_events: broadcast::Sender<LedgerEvent>,
    pub deliberation_events: broadcast::Sender<DeliberationEvent>,
}

/// Build the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/ledger/blocks", get(handlers::blocks))
        .route("/api/ledger/transactions", get(handlers::transactions))
        .route("/api/ledger/tx/:id", get(handlers::tx_by_id))
        .route("/api/wallet", get(handlers::wallet))
        .route("/api/events", get(sse::events))
        .route("/api/peers", get(handlers::peers).post(handlers::add_peer))
        .route("/api/tx", post(handlers::submit_tx))
        .route("/api/proposal", post(handlers::submit_proposal))
        .route("/ws/p2p", get(ws::upgrade))
        .with_state(state)
        .layer(middleware::from_fn(auth::require_signature))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
