use serde::{Serialize, Deserialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use std::fs;

use crate::errors::ConfigurationError;
use crate::types::{ChainId, DeployerIdentity};

/// Well-known anvil development key, funded on every supersim chain.
pub const DEV_PRIVATE_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

pub const ENV_VAR: &str = "SUPERCHAIN_ENV";
pub const PRIVATE_KEY_VAR: &str = "PRIVATE_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub chains: Vec<ChainConfig>,
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub deployer: DeployerIdentity,
    #[serde(default)]
    pub observer: ObserverConfig,
    #[serde(default)]
    pub logging: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: ChainId,
    pub rpc_url: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
    pub poll_interval_ms: u64,
    pub wait_timeout_ms: u64,
    pub max_block_range: u64,
    pub request_timeout_ms: u64,
    pub receipt_timeout_ms: u64,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            wait_timeout_ms: 10_000,
            max_block_range: 1_000,
            request_timeout_ms: 15_000,
            receipt_timeout_ms: 60_000,
        }
    }
}

impl ObserverConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_millis(self.receipt_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Plain,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Plain,
    Json,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigurationError> {
        let contents = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Two local chains started by `supersim`.
    pub fn supersim() -> Self {
        Self {
            chains: vec![
                ChainConfig::new(901, "http://localhost:9545", "OPChainA"),
                ChainConfig::new(902, "http://localhost:9546", "OPChainB"),
            ],
            private_key: Some(DEV_PRIVATE_KEY.into()),
            deployer: DeployerIdentity::default(),
            observer: ObserverConfig::default(),
            logging: LogConfig::default(),
        }
    }

    /// Public interop devnet. The key comes from `PRIVATE_KEY` when set.
    pub fn devnet() -> Self {
        let private_key = std::env::var(PRIVATE_KEY_VAR)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .unwrap_or_else(|| DEV_PRIVATE_KEY.into());

        Self {
            chains: vec![
                ChainConfig::new(420120000, "https://interop-alpha-0.optimism.io", "interop-alpha-0"),
                ChainConfig::new(420120001, "https://interop-alpha-1.optimism.io", "interop-alpha-1"),
            ],
            private_key: Some(private_key),
            deployer: DeployerIdentity::default(),
            observer: ObserverConfig {
                poll_interval_ms: 2_000,
                wait_timeout_ms: 120_000,
                ..ObserverConfig::default()
            },
            logging: LogConfig::default(),
        }
    }

    pub fn for_environment(name: &str) -> Result<Self, ConfigurationError> {
        match name {
            "supersim" => Ok(Self::supersim()),
            "devnet" => Ok(Self::devnet()),
            other => Err(ConfigurationError::Invalid(format!("Unknown environment: {}", other))),
        }
    }

    /// Environment picked by `SUPERCHAIN_ENV`, `supersim` when unset.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        let env = std::env::var(ENV_VAR).unwrap_or_else(|_| "supersim".into());
        Self::for_environment(&env)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.chains.is_empty() {
            return Err(ConfigurationError::Invalid("At least one chain must be configured".into()));
        }

        let mut seen = HashSet::new();
        for chain in &self.chains {
            if !seen.insert(chain.chain_id) {
                return Err(ConfigurationError::DuplicateChain(chain.chain_id));
            }
            validate_endpoint(chain.chain_id, &chain.rpc_url)?;
        }

        if let Some(key) = &self.private_key {
            let bytes = crate::utils::parse_hex(key)
                .map_err(|e| ConfigurationError::InvalidKey(e.to_string()))?;
            if bytes.len() != 32 {
                return Err(ConfigurationError::InvalidKey(format!(
                    "expected 32 bytes, got {}",
                    bytes.len()
                )));
            }
        }

        if self.observer.poll_interval_ms == 0 {
            return Err(ConfigurationError::Invalid("Poll interval must be greater than 0".into()));
        }
        if self.observer.wait_timeout_ms < self.observer.poll_interval_ms {
            return Err(ConfigurationError::Invalid(
                "Wait timeout must not be shorter than the poll interval".into(),
            ));
        }
        if self.observer.max_block_range == 0 {
            return Err(ConfigurationError::Invalid("Max block range must be greater than 0".into()));
        }

        Ok(())
    }

    pub fn chain(&self, chain_id: ChainId) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.chain_id == chain_id)
    }
}

impl ChainConfig {
    pub fn new(chain_id: ChainId, rpc_url: &str, name: &str) -> Self {
        Self {
            chain_id,
            rpc_url: rpc_url.into(),
            name: Some(name.into()),
        }
    }
}

/// Checks that an endpoint looks like an http(s) or ws(s) URL with a host.
pub fn validate_endpoint(chain_id: ChainId, url: &str) -> Result<(), ConfigurationError> {
    let invalid = |reason: &str| ConfigurationError::InvalidEndpoint {
        chain_id,
        reason: reason.to_string(),
    };

    if url.trim().is_empty() {
        return Err(invalid("RPC URL cannot be empty"));
    }

    let rest = ["http://", "https://", "ws://", "wss://"]
        .iter()
        .find_map(|scheme| url.strip_prefix(scheme))
        .ok_or_else(|| invalid(&format!("unsupported scheme in {}", url)))?;

    if rest.is_empty() || rest.starts_with('/') {
        return Err(invalid(&format!("missing host in {}", url)));
    }

    Ok(())
}
