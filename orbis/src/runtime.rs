//! Node lifecycle orchestration.
//!
//! Startup order: unlock identity, load governance, open stores, replay the
//! chain, start the ledger worker, council, mesh, sealer and API. Shutdown
//! drains in reverse: stop intake, flush a mid-seal block, then give peer
//! tasks a short grace period.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use lib_crypto::{load_encrypted, store_encrypted, KeystoreError, NodeKeypair};
use lib_deliberation::{
    Council, DeliberationEngine, GenerativeCapability, HttpProvider, MockProvider,
};
use lib_governance::GovernanceStore;
use lib_ledger::{LedgerWorker, StoreError};
use lib_memory::MemoryDag;
use lib_network::{Mesh, MeshConfig};

use crate::api::{self, AppState};
use crate::config::{ConfigError, NodeConfig, ProviderKind};

/// Block seal cadence for the local proposer.
const SEAL_INTERVAL_SECS: u64 = 5;
/// Grace period for peer tasks at shutdown.
const SHUTDOWN_GRACE_SECS: u64 = 5;

/// Fatal startup failures, mapped to process exit codes by `main`.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Exit code 1.
    #[error("configuration error: {0}")]
    Config(String),

    /// Exit code 2.
    #[error("failed to unlock node identity: {0}")]
    Unlock(#[from] KeystoreError),

    /// Exit code 3.
    #[error("integrity failure: {0}")]
    Integrity(String),
}

impl From<ConfigError> for RuntimeError {
    fn from(error: ConfigError) -> Self {
        RuntimeError::Config(error.to_string())
    }
}

/// Load the node identity, generating and sealing a fresh one at first boot.
fn load_identity(config: &NodeConfig) -> Result<NodeKeypair, RuntimeError> {
    let path = config.identity_path();
    if path.exists() {
        let keypair = load_encrypted(&path, &config.key_password)?;
        info!(node_id = %keypair.node_id(), "node identity unlocked");
        Ok(keypair)
    } else {
        let keypair =
            NodeKeypair::generate().map_err(|e| RuntimeError::Config(e.to_string()))?;
        store_encrypted(&keypair, &path, &config.key_password)?;
        info!(node_id = %keypair.node_id(), "generated new node identity");
        Ok(keypair)
    }
}

/// Run the node until shutdown.
pub async fn run(config: NodeConfig) -> Result<(), RuntimeError> {
    std::fs::create_dir_all(config.keys_dir())
        .map_err(|e| RuntimeError::Config(format!("cannot create data dir: {e}")))?;

    let keypair = Arc::new(load_identity(&config)?);
    let governance = GovernanceStore::load(&config.governance_config_path())
        .map_err(|e| RuntimeError::Config(e.to_string()))?;
    let dag = MemoryDag::open(&config.memory_db_path())
        .map_err(|e| RuntimeError::Integrity(format!("memory store: {e}")))?;

    let chain_db = lib_ledger::ChainDb::open(&config.chain_db_path())
        .map_err(|e| RuntimeError::Integrity(format!("chain store: {e}")))?;
    let designated_validator = config
        .genesis_validator
        .clone()
        .unwrap_or_else(|| keypair.node_id());
    let (ledger_events, _) = lib_ledger::events::channel();
    let (worker, ledger) = LedgerWorker::bootstrap(
        Some(chain_db),
        designated_validator,
        governance.clone(),
        ledger_events.clone(),
        keypair.clone(),
    )
    .map_err(|e| match e {
        StoreError::Sled(e) => RuntimeError::Config(format!("chain store: {e}")),
        other => RuntimeError::Integrity(other.to_string()),
    })?;
    tokio::spawn(worker.run());

    let provider: Arc<dyn GenerativeCapability> = match config.provider {
        ProviderKind::Mock => {
            info!("using mock generative provider");
            Arc::new(MockProvider::new())
        }
        ProviderKind::External => {
            info!(url = %config.provider_base_url, model = %config.provider_model, "using external generative provider");
            Arc::new(HttpProvider::new(
                config.provider_base_url.clone(),
                config.provider_model.clone(),
                config.provider_api_key.clone(),
            ))
        }
    };
    let council = Arc::new(
        Council::standard(provider, dag.clone())
            .map_err(|e| RuntimeError::Config(e.to_string()))?,
    );
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
            listen_addr: config.p2p_addr(),
            advertise_addr: config.p2p_addr(),
            seed_nodes: config.seed_nodes.clone(),
            peers_path: Some(config.peers_path()),
        },
    );
    mesh.start()
        .await
        .map_err(|e| RuntimeError::Config(e.to_string()))?;

    // Local proposer: seal pending txs on a fixed cadence and gossip the
    // result. Non-authorities fail the propose call and simply wait.
    let sealer_ledger = ledger.clone();
    let sealer_mesh = mesh.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(SEAL_INTERVAL_SECS));
        loop {
            ticker.tick().await;
            if sealer_ledger.snapshot().mempool_len == 0 {
                continue;
            }
            match sealer_ledger.propose_block().await {
                Ok(Some(block)) => sealer_mesh.broadcast_block(block),
                Ok(None) => {}
                Err(lib_ledger::BlockError::StaleAuthority { .. }) => {}
                Err(e) => warn!(error = %e, "block proposal failed"),
            }
        }
    });

    let state = AppState {
        keypair,
        ledger: ledger.clone(),
        mesh,
        engine,
        governance,
        ledger_events,
        deliberation_events,
    };
    let router = api::router(state);
    let listener = TcpListener::bind(&config.api_addr())
        .await
        .map_err(|e| RuntimeError::Config(format!("cannot bind {}: {e}", config.api_addr())))?;
    info!(addr = %config.api_addr(), "http api listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| RuntimeError::Config(e.to_string()))?;

    // Shutdown: intake has stopped with the server; flush a mid-seal block,
    // then give peer and event tasks a grace period.
    info!("shutting down: flushing pending block");
    if ledger.snapshot().mempool_len > 0 {
        if let Err(e) = ledger.propose_block().await {
            warn!(error = %e, "final block flush failed");
        }
    }
    tokio::time::sleep(Duration::from_secs(SHUTDOWN_GRACE_SECS)).await;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }
}
