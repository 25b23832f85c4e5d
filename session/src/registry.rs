use std::collections::BTreeMap;

use superchain_common::config::validate_endpoint;
use superchain_common::{ChainConfig, ChainId, ConfigurationError};

/// Chain id to RPC endpoint. Lookups are pure and never touch the network.
#[derive(Debug, Clone, Default)]
pub struct ChainEndpointRegistry {
    endpoints: BTreeMap<ChainId, String>,
}

impl ChainEndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_chains(chains: &[ChainConfig]) -> Result<Self, ConfigurationError> {
        let mut registry = Self::new();
        for chain in chains {
            registry.insert(chain.chain_id, &chain.rpc_url)?;
        }
        Ok(registry)
    }

    pub fn insert(&mut self, chain_id: ChainId, endpoint: &str) -> Result<(), ConfigurationError> {
        validate_endpoint(chain_id, endpoint)?;
        if self.endpoints.contains_key(&chain_id) {
            return Err(ConfigurationError::DuplicateChain(chain_id));
        }
        self.endpoints.insert(chain_id, endpoint.to_string());
        Ok(())
    }

    pub fn endpoint_for(&self, chain_id: ChainId) -> Result<&str, ConfigurationError> {
        self.endpoints
            .get(&chain_id)
            .map(String::as_str)
            .ok_or(ConfigurationError::UnknownChain(chain_id))
    }

    pub fn contains(&self, chain_id: ChainId) -> bool {
        self.endpoints.contains_key(&chain_id)
    }

    /// Configured chains in ascending order.
    pub fn chain_ids(&self) -> Vec<ChainId> {
        self.endpoints.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
