use serde::{Serialize, Deserialize};
use ethers::types::{Address, Bytes, H160, H256, U256};

/// Numeric chain identifier, e.g. 901 and 902 on a local supersim.
pub type ChainId = u64;

/// Address of the deterministic-deployment proxy present on every OP Stack chain.
pub const DEFAULT_CREATE2_FACTORY: Address = H160([
    0x4e, 0x59, 0xb4, 0x48, 0x47, 0xb3, 0x79, 0x57, 0x85, 0x88,
    0x92, 0x0c, 0xa7, 0x8f, 0xbf, 0x26, 0xc0, 0xb4, 0x95, 0x6c,
]);

/// Who deploys the contract. Together with the bytecode this fixes the
/// contract address on every chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployerIdentity {
    pub factory: Address,
    pub salt: H256,
}

impl Default for DeployerIdentity {
    fn default() -> Self {
        Self {
            factory: DEFAULT_CREATE2_FACTORY,
            salt: H256::zero(),
        }
    }
}

/// Receipt of a transaction included on its submitting chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub transaction_hash: H256,
    pub block_number: u64,
    pub chain_id: ChainId,
    pub gas_used: Option<U256>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLog {
    pub chain_id: ChainId,
    pub address: Address,
    pub topics: Vec<H256>,
    pub data: Bytes,
    pub block_number: u64,
    pub transaction_hash: Option<H256>,
    pub log_index: Option<U256>,
}

impl EventLog {
    /// Event signature hash, if the log has one.
    pub fn topic0(&self) -> Option<H256> {
        self.topics.first().copied()
    }

    /// Position used to order logs within a chain.
    pub fn position(&self) -> (u64, U256) {
        (self.block_number, self.log_index.unwrap_or_default())
    }
}
