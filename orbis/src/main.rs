//! Orbis Ethica node entry point.
//!
//! Exit codes: 0 normal, 1 fatal config error, 2 unlock failure,
//! 3 integrity failure on replay.

use std::process::ExitCode;

use tracing::error;
use tracing_subscriber::EnvFilter;

use orbis::config::NodeConfig;
use orbis::runtime::{self, RuntimeError};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match NodeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::from(1);
        }
    };

    match runtime::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e @ RuntimeError::Config(_)) => {
            error!(error = %e, "fatal configuration error");
            ExitCode::from(1)
        }
        Err(e @ RuntimeError::Unlock(_)) => {
            error!(error = %e, "could not unlock node identity");
            ExitCode::from(2)
        }
        Err(e @ RuntimeError::Integrity(_)) => {
            error!(error = %e, "integrity failure, refusing to serve");
            ExitCode::from(3)
        }
    }
}
