//! Environment-driven node configuration.
//!
//! The data directory holds `chain.db`, `memory.db`, `.keys/`, `config.json`
//! and `peers.json`. `KEY_PASSWORD` must be present: the signing key is
//! never stored unencrypted.

use std::path::PathBuf;

use thiserror::Error;

/// Default HTTP API port.
pub const DEFAULT_NODE_PORT: u16 = 6429;
/// Default p2p mesh port.
pub const DEFAULT_P2P_PORT: u16 = 6430;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value}")]
    Invalid { name: String, value: String },

    #[error("KEY_PASSWORD is required to unlock the signing key")]
    MissingKeyPassword,
}

/// Which generative provider backs the council.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderKind {
    Mock,
    External,
}

/// Resolved node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub host: String,
    pub port: u16,
    pub p2p_port: u16,
    pub seed_nodes: Vec<String>,
    pub data_dir: PathBuf,
    pub key_password: String,
    pub provider: ProviderKind,
    pub provider_base_url: String,
    pub provider_model: String,
    pub provider_api_key: Option<String>,
    /// Designated genesis validator; defaults to the node's own key.
    pub genesis_validator: Option<String>,
}

impl NodeConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        let port = |name: &str, default: u16| -> Result<u16, ConfigError> {
            match var(name) {
                None => Ok(default),
                Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                    name: name.to_string(),
                    value: raw,
                }),
            }
        };

        let provider = match var("GENERATIVE_PROVIDER").as_deref() {
            None | Some("mock") => ProviderKind::Mock,
            Some("external") => ProviderKind::External,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "GENERATIVE_PROVIDER".to_string(),
                    value: other.to_string(),
                })
            }
        };

        Ok(Self {
            host: var("NODE_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: port("NODE_PORT", DEFAULT_NODE_PORT)?,
            p2p_port: port("P2P_PORT", DEFAULT_P2P_PORT)?,
            seed_nodes: var("SEED_NODES")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            data_dir: var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            key_password: var("KEY_PASSWORD").ok_or(ConfigError::MissingKeyPassword)?,
            provider,
            provider_base_url: var("PROVIDER_BASE_URL")
                .unwrap_or_else(|| "http://127.0.0.1:11434".to_string()),
            provider_model: var("PROVIDER_MODEL").unwrap_or_else(|| "llama3".to_string()),
            provider_api_key: var("PROVIDER_API_KEY"),
            genesis_validator: var("GENESIS_VALIDATOR"),
        })
    }

    pub fn keys_dir(&self) -> PathBuf {
        self.data_dir.join(".keys")
    }

    pub fn identity_path(&self) -> PathBuf {
        self.keys_dir().join("node_identity.sk")
    }

    pub fn chain_db_path(&self) -> PathBuf {
        self.data_dir.join("chain.db")
    }

    pub fn memory_db_path(&self) -> PathBuf {
        self.data_dir.join("memory.db")
    }

    pub fn governance_config_path(&self) -> PathBuf {
        self.data_dir.join("config.json")
    }

    pub fn peers_path(&self) -> PathBuf {
        self.data_dir.join("peers.json")
    }

    pub fn api_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn p2p_addr(&self) -> String {
        format!("{}:{}", self.host, self.p2p_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_dir_layout() {
        let config = NodeConfig {
            host: "127.0.0.1".into(),
            port: DEFAULT_NODE_PORT,
            p2p_port: DEFAULT_P2P_PORT,
            seed_nodes: vec![],
            data_dir: PathBuf::from("/tmp/orbis-test"),
            key_password: "pw".into(),
            provider: ProviderKind::Mock,
            provider_base_url: String::new(),
            provider_model: String::new(),
            provider_api_key: None,
            genesis_validator: None,
        };
        assert_eq!(
            config.identity_path(),
            PathBuf::from("/tmp/orbis-test/.keys/node_identity.sk")
        );
        assert_eq!(config.chain_db_path(), PathBuf::from("/tmp/orbis-test/chain.db"));
        assert_eq!(config.api_addr(), "127.0.0.1:6429");
    }
}
