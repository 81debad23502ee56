//! API integration tests driven through the router.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::util::ServiceExt;

use lib_crypto::{sign_request, unix_now, NodeKeypair};
use lib_deliberation::{Council, DeliberationEngine, MockProvider};
use lib_governance::GovernanceStore;
use lib_ledger::{LedgerWorker, Transaction, TxKind};
use lib_memory::MemoryDag;
use lib_network::{Mesh, MeshConfig};

use orbis::api::{router, AppState};

struct TestApp {
    state: AppState,
    provider: Arc<MockProvider>,
    submitter: NodeKeypair,
}

fn test_app() -> TestApp {
    let keypair = Arc::new(NodeKeypair::generate().unwrap());
    let governance = GovernanceStore::new_default();
    let (ledger_events, _) = lib_ledger::events::channel();
    let (worker, ledger) = LedgerWorker::bootstrap(
        None,
        keypair.node_id(),
        governance.clone(),
        ledger_events.clone(),
        keypair.clone(),
    )
    .unwrap();
    tokio::spawn(worker.run());

    let provider = Arc::new(MockProvider::new());
    let dag = MemoryDag::ephemeral();
    let council = Arc::new(Council::standard(provider.clone(), dag.clone()).unwrap());
    let (deliberation_events, _) = lib_deliberation::events::channel();
    let engine = Arc::new(DeliberationEngine::new(
        council,
        ledger.clone(),
        governance.clone(),
        dag,
        deliberation_events.clone(),
        keypair.clone(),
    ));
    let mesh = Mesh::new(
        keypair.clone(),
        ledger.clone(),
        governance.clone(),
        MeshConfig {
            listen_addr: "127.0.0.1:0".into(),
            advertise_addr: "127.0.0.1:0".into(),
            seed_nodes: vec![],
            peers_path: None,
        },
    );

    TestApp {
        state: AppState {
            keypair,
            ledger,
            mesh,
            engine,
            governance,
            ledger_events,
            deliberation_events,
        },
        provider,
        submitter: NodeKeypair::generate().unwrap(),
    }
}

fn signed_post(keypair: &NodeKeypair, path: &str, body: &Value) -> Request<Body> {
    let headers = sign_request(keypair, "POST", path, body);
    Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .header("X-Pubkey", headers.pubkey)
        .header("X-Timestamp", headers.timestamp)
        .header("X-Signature", headers.signature)
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

#[tokio::test]
async fn test_health_reports_height() {
    let app = test_app();
    let response = router(app.state.clone())
        .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["height"], 0);
}

#[tokio::test]
async fn test_mutating_request_without_headers_is_401() {
    let app = test_app();
    let request = Request::post("/api/proposal")
        .header("content-type", "application/json")
        .body(Body::from("{}"))
        .unwrap();
    let response = router(app.state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_replay_defense_rejects_stale_timestamp() {
    let app = test_app();
    let body = json!({"address": "127.0.0.1:1"});

    // hand-build headers with a timestamp 600s in the past
    let stale = (unix_now() - 600).to_string();
    let payload = format!(
        "POST:/api/peers:{}:{}",
        stale,
        lib_crypto::canonical_json(&body)
    );
    let signature = app.submitter.sign_hex(payload.as_bytes());

    let request = Request::post("/api/peers")
        .header("content-type", "application/json")
        .header("X-Pubkey", app.submitter.node_id())
        .header("X-Timestamp", stale)
        .header("X-Signature", signature)
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = router(app.state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let detail = body_json(response).await;
    assert!(detail["detail"].as_str().unwrap().contains("replay window"));

    // identical request with a fresh signature succeeds
    let request = signed_post(&app.submitter, "/api/peers", &body);
    let response = router(app.state.clone()).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_submit_signed_tx_roundtrip() {
    let app = test_app();
    let tx = Transaction::signed(
        &app.submitter,
        TxKind::KnowledgeIngest,
        None,
        None,
        json!({"source": "api-test"}),
    );
    let body = serde_json::to_value(&tx).unwrap();
    let response = router(app.state.clone())
        .oneshot(signed_post(&app.submitter, "/api/tx", &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let reply = body_json(response).await;
    assert_eq!(reply["status"], "pending");
    assert_eq!(app.state.ledger.snapshot().mempool_len, 1);

    // duplicate is a 409
    let response = router(app.state.clone())
        .oneshot(signed_post(&app.submitter, "/api/tx", &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_tx_sender_must_match_signer() {
    let app = test_app();
    let other = NodeKeypair::generate().unwrap();
    let tx = Transaction::signed(&other, TxKind::KnowledgeIngest, None, None, json!({}));
    let body = serde_json::to_value(&tx).unwrap();
    // signed by submitter, but the tx sender is `other`
    let response = router(app.state.clone())
        .oneshot(signed_post(&app.submitter, "/api/tx", &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_proposal_admission_and_deliberation() {
    let app = test_app();
    for role in ["seeker", "healer", "guardian", "creator", "arbiter"] {
        app.provider.script_vote(role, "approve", (0.9, 0.8, 0.1, 0.1), 0.9);
    }

    let body = json!({
        "title": "Community shade trees",
        "description": "Plant drought-resistant shade trees along every arterial street in the city.",
        "category": "routine",
    });
    let response = router(app.state.clone())
        .oneshot(signed_post(&app.submitter, "/api/proposal", &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let reply = body_json(response).await;
    assert!(reply["proposal_id"].is_string());

    // the background deliberation approves and queues terminal txs
    for _ in 0..100 {
        if app.state.ledger.snapshot().mempool_len >= 2 {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    assert!(app.state.ledger.snapshot().mempool_len >= 2);

    let block = app.state.ledger.propose_block().await.unwrap().expect("block");
    let kinds: Vec<TxKind> = block.transactions.iter().map(|tx| tx.kind).collect();
    assert!(kinds.contains(&TxKind::DecisionRecord));
    assert!(kinds.contains(&TxKind::MintReward));
    let wallet = app.state.ledger.snapshot().wallet(&app.submitter.node_id());
    assert_eq!(wallet.liquid_balance, 10);
}

#[tokio::test]
async fn test_short_title_is_400() {
    let app = test_app();
    let body = json!({
        "title": "short",
        "description": "This description is certainly long enough to pass the length validation gate.",
        "category": "routine",
    });
    let response = router(app.state.clone())
        .oneshot(signed_post(&app.submitter, "/api/proposal", &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_wallet_defaults_to_self_and_rejects_garbage() {
    let app = test_app();
    let response = router(app.state.clone())
        .oneshot(Request::get("/api/wallet").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["address"], app.state.keypair.node_id());
    assert_eq!(body["liquid_balance"], 0);

    let response = router(app.state.clone())
        .oneshot(
            Request::get("/api/wallet?address=not-an-address")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_tx_is_404() {
    let app = test_app();
    let response = router(app.state.clone())
        .oneshot(
            Request::get("/api/ledger/tx/deadbeef")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_blocks_page_descending() {
    let app = test_app();
    for i in 0u64..3 {
        let mint = Transaction::system(
            TxKind::MintReward,
            Some(format!("a{i}")),
            Some(1),
            json!({"n": i}),
        );
        app.state.ledger.submit_internal(mint).await.unwrap();
        app.state.ledger.propose_block().await.unwrap().unwrap();
    }
    let response = router(app.state.clone())
        .oneshot(
            Request::get("/api/ledger/blocks?limit=2")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["height"], 3);
    let blocks = body["blocks"].as_array().unwrap();
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0]["height"], 3);
    assert_eq!(blocks[1]["height"], 2);
}
