//! REST handlers over the ledger, wallet, mesh and deliberation engine.

use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use lib_deliberation::{EngineError, Proposal, ProposalDomain};
use lib_governance::ProposalCategory;
use lib_ledger::{Transaction, TxError};

use super::auth::AuthedPubkey;
use super::AppState;

const DEFAULT_PAGE: usize = 20;
const MAX_PAGE: usize = 100;

fn error_response(status: StatusCode, detail: impl Into<String>) -> Response {
    (status, Json(json!({"detail": detail.into()}))).into_response()
}

fn tx_error_response(error: TxError) -> Response {
    let status = match &error {
        TxError::MalformedTx(_) => StatusCode::BAD_REQUEST,
        TxError::InvalidSignature => StatusCode::UNAUTHORIZED,
        TxError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
        TxError::DuplicateTx(_) => StatusCode::CONFLICT,
        TxError::Backpressure => StatusCode::TOO_MANY_REQUESTS,
        TxError::NotAuthority => StatusCode::FORBIDDEN,
        TxError::WorkerUnavailable => StatusCode::SERVICE_UNAVAILABLE,
    };
    error_response(status, error.to_string())
}

#[derive(Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub offset: usize,
    pub limit: Option<usize>,
}

impl PageQuery {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_PAGE).min(MAX_PAGE)
    }
}

pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let snapshot = state.ledger.snapshot();
    Json(json!({
        "status": "ok",
        "node_id": state.keypair.node_id(),
        "height": snapshot.height,
        "mempool": snapshot.mempool_len,
        "peers": state.mesh.connection_count(),
    }))
}

/// Page of blocks, descending by height.
pub async fn blocks(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
) -> Json<serde_json::Value> {
    let snapshot = state.ledger.snapshot();
    let blocks = snapshot.blocks_desc(page.offset, page.limit());
    Json(json!({
        "height": snapshot.height,
        "blocks": blocks.iter().map(|b| &**b).collect::<Vec<_>>(),
    }))
}

/// Page of canonical transactions, newest first.
pub async fn transactions(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
) -> Json<serde_json::Value> {
    let snapshot = state.ledger.snapshot();
    let txs: Vec<serde_json::Value> = snapshot
        .txs_desc(page.offset, page.limit())
        .into_iter()
        .map(|(tx, height)| json!({"tx": tx, "block_height": height}))
        .collect();
    Json(json!({"transactions": txs}))
}

pub async fn tx_by_id(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.ledger.snapshot().get_tx(&id) {
        Some((tx, height)) => Json(json!({"tx": tx, "block_height": height})).into_response(),
        None => error_response(StatusCode::NOT_FOUND, format!("unknown transaction {id}")),
    }
}

#[derive(Deserialize)]
pub struct WalletQuery {
    pub address: Option<String>,
}

fn valid_address(address: &str) -> bool {
    address == lib_ledger::types::TREASURY_ADDRESS
        || (address.len() == 64 && address.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Wallet view; defaults to the node's own address.
pub async fn wallet(
    State(state): State<AppState>,
    Query(query): Query<WalletQuery>,
) -> Response {
    let address = query.address.unwrap_or_else(|| state.keypair.node_id());
    if !valid_address(&address) {
        return error_response(StatusCode::NOT_FOUND, format!("unknown address {address}"));
    }
    Json(state.ledger.snapshot().wallet(&address)).into_response()
}

/// Submit a signed transaction.
pub async fn submit_tx(
    State(state): State<AppState>,
    Extension(authed): Extension<AuthedPubkey>,
    Json(tx): Json<Transaction>,
) -> Response {
    if tx.sender != authed.0 {
        return error_response(
            StatusCode::UNAUTHORIZED,
            "transaction sender does not match request signer",
        );
    }
    match state.ledger.submit_tx(tx.clone()).await {
        Ok(()) => {
            state.mesh.broadcast_tx(tx.clone());
            Json(json!({"id": tx.id, "status": "pending"})).into_response()
        }
        Err(error) => tx_error_response(error),
    }
}

#[derive(Deserialize)]
pub struct ProposalRequest {
    pub title: String,
    pub description: String,
    pub category: ProposalCategory,
    #[serde(default)]
    pub domain: ProposalDomain,
}

/// Admit a proposal and start its deliberation.
pub async fn submit_proposal(
    State(state): State<AppState>,
    Extension(authed): Extension<AuthedPubkey>,
    Json(request): Json<ProposalRequest>,
) -> Response {
    if request.title.len() < 10 || request.title.len() > 200 {
        return error_response(StatusCode::BAD_REQUEST, "title must be 10..=200 characters");
    }
    if request.description.len() < 50 {
        return error_response(
            StatusCode::BAD_REQUEST,
            "description must be at least 50 characters",
        );
    }

    let proposal = Proposal::new(
        request.title,
        request.description,
        request.category,
        request.domain,
        authed.0,
    );
    let proposal_id = proposal.id;
    match state.engine.spawn_deliberation(proposal) {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(json!({"proposal_id": proposal_id, "status": "deliberating"})),
        )
            .into_response(),
        Err(EngineError::Busy) => {
            error_response(StatusCode::TOO_MANY_REQUESTS, "deliberation pool at capacity")
        }
        Err(error) => {
            warn!(%error, "failed to admit proposal");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
        }
    }
}

pub async fn peers(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "connections": state.mesh.connection_count(),
        "peers": state.mesh.peer_list(),
    }))
}

#[derive(Deserialize)]
pub struct AddPeerRequest {
    pub address: String,
}

/// Register and dial a seed peer.
pub async fn add_peer(
    State(state): State<AppState>,
    Json(request): Json<AddPeerRequest>,
) -> Response {
    if request.address.trim().is_empty() || !request.address.contains(':') {
        return error_response(StatusCode::BAD_REQUEST, "address must be host:port");
    }
    let mesh = state.mesh.clone();
    let address = request.address.clone();
    tokio::spawn(async move {
        if let Err(error) = mesh.dial(&address).await {
            warn!(%address, %error, "failed to dial added peer");
        }
    });
    Json(json!({"status": "dialing", "address": request.address})).into_response()
}
