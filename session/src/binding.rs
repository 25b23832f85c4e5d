use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use ethers::abi::{Abi, Function, RawLog, Token};
use ethers::types::{Address, Bytes, H256};
use log::{debug, info};
use thiserror::Error;
use tokio::sync::Mutex;

use superchain_common::crypto::{create2_address, create2_deploy_calldata};
use superchain_common::errors::{BoxError, Result};
use superchain_common::utils::parse_bytes;
use superchain_common::{
    ChainId, ConfigurationError, DeployerIdentity, EventLog, SessionError,
};

use crate::call::DecodedValue;
use crate::rpc::{ChainRpc, RpcError};
use crate::transaction::TransactionExecutor;

#[derive(Error, Debug)]
pub enum DeploymentFailure {
    #[error("No code at {address:?} after deployment transaction {transaction_hash:?}")]
    CodeMissing {
        address: Address,
        transaction_hash: H256,
    },
}

/// Contract interface plus creation bytecode. Never mutated once built.
#[derive(Debug, Clone)]
pub struct ContractDescriptor {
    abi: Abi,
    bytecode: Bytes,
}

impl ContractDescriptor {
    pub fn new(abi: Abi, bytecode: Bytes) -> std::result::Result<Self, ConfigurationError> {
        if bytecode.is_empty() {
            return Err(ConfigurationError::InvalidArtifact("bytecode is empty".into()));
        }
        Ok(Self { abi, bytecode })
    }

    /// Parses a Foundry artifact: `abi` plus `bytecode` given either as a hex
    /// string or as `{ "object": "0x.." }`.
    pub fn from_artifact_json(json: &str) -> std::result::Result<Self, ConfigurationError> {
        let artifact: serde_json::Value = serde_json::from_str(json)?;
        let invalid = |reason: String| ConfigurationError::InvalidArtifact(reason);

        let abi = artifact
            .get("abi")
            .cloned()
            .ok_or_else(|| invalid("missing `abi`".into()))?;
        let abi: Abi = serde_json::from_value(abi).map_err(|e| invalid(format!("bad `abi`: {}", e)))?;

        let bytecode = match artifact.get("bytecode") {
            Some(serde_json::Value::String(hex)) => hex.as_str(),
            Some(serde_json::Value::Object(object)) => object
                .get("object")
                .and_then(|o| o.as_str())
                .ok_or_else(|| invalid("missing `bytecode.object`".into()))?,
            _ => return Err(invalid("missing `bytecode`".into())),
        };
        let bytecode = parse_bytes(bytecode).map_err(|e| invalid(format!("bad bytecode: {}", e)))?;

        Self::new(abi, bytecode)
    }

    pub fn load_artifact<P: AsRef<Path>>(path: P) -> std::result::Result<Self, ConfigurationError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_artifact_json(&json)
    }

    pub fn abi(&self) -> &Abi {
        &self.abi
    }

    pub fn bytecode(&self) -> &Bytes {
        &self.bytecode
    }
}

/// Address of `descriptor` when deployed by `deployer`. No network access:
/// the result is the same for every chain.
pub fn derive_address(descriptor: &ContractDescriptor, deployer: &DeployerIdentity) -> Address {
    create2_address(deployer, &descriptor.bytecode)
}

/// Per-chain view of the bound contract.
pub struct ChainHandle {
    chain_id: ChainId,
    rpc: Arc<dyn ChainRpc>,
    deployed: Mutex<bool>,
}

impl ChainHandle {
    fn new(chain_id: ChainId, rpc: Arc<dyn ChainRpc>) -> Self {
        Self {
            chain_id,
            rpc,
            deployed: Mutex::new(false),
        }
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    pub fn rpc(&self) -> &Arc<dyn ChainRpc> {
        &self.rpc
    }
}

/// One logical contract resolved to the same address on every session chain.
pub struct ContractBinding {
    descriptor: ContractDescriptor,
    deployer: DeployerIdentity,
    address: Address,
    chains: BTreeMap<ChainId, ChainHandle>,
}

impl ContractBinding {
    pub fn new<I>(descriptor: ContractDescriptor, deployer: DeployerIdentity, clients: I) -> Self
    where
        I: IntoIterator<Item = (ChainId, Arc<dyn ChainRpc>)>,
    {
        let address = derive_address(&descriptor, &deployer);
        let chains = clients
            .into_iter()
            .map(|(chain_id, rpc)| (chain_id, ChainHandle::new(chain_id, rpc)))
            .collect();

        Self {
            descriptor,
            deployer,
            address,
            chains,
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn descriptor(&self) -> &ContractDescriptor {
        &self.descriptor
    }

    pub fn deployer(&self) -> &DeployerIdentity {
        &self.deployer
    }

    pub fn chain_ids(&self) -> Vec<ChainId> {
        self.chains.keys().copied().collect()
    }

    pub fn handle(&self, chain_id: ChainId) -> std::result::Result<&ChainHandle, ConfigurationError> {
        self.chains
            .get(&chain_id)
            .ok_or(ConfigurationError::UnknownChain(chain_id))
    }

    pub fn function(&self, name: &str) -> std::result::Result<&Function, ethers::abi::Error> {
        self.descriptor.abi.function(name)
    }

    pub fn encode_call(&self, function: &str, args: &[Token]) -> std::result::Result<Bytes, ethers::abi::Error> {
        let data = self.function(function)?.encode_input(args)?;
        Ok(data.into())
    }

    pub fn decode_output(&self, function: &str, data: &[u8]) -> std::result::Result<DecodedValue, ethers::abi::Error> {
        let tokens = self.function(function)?.decode_output(data)?;
        Ok(DecodedValue::new(tokens))
    }

    /// Signature hash of `event`, i.e. the topic0 its logs carry.
    pub fn event_topic(&self, event: &str) -> std::result::Result<H256, ethers::abi::Error> {
        Ok(self.descriptor.abi.event(event)?.signature())
    }

    pub fn decode_event(
        &self,
        event: &str,
        log: &EventLog,
    ) -> std::result::Result<Vec<(String, Token)>, ethers::abi::Error> {
        let parsed = self.descriptor.abi.event(event)?.parse_log(RawLog {
            topics: log.topics.clone(),
            data: log.data.to_vec(),
        })?;

        Ok(parsed
            .params
            .into_iter()
            .map(|param| (param.name, param.value))
            .collect())
    }

    /// Whether this session has already seen code at the contract address on
    /// `chain_id`. Does not query the chain.
    pub async fn is_known_deployed(&self, chain_id: ChainId) -> Result<bool> {
        let handle = self.handle(chain_id)?;
        let deployed = *handle.deployed.lock().await;
        Ok(deployed)
    }

    /// Deploys the contract on `chain_id` unless code is already there.
    ///
    /// The per-chain lock is held for the whole check-and-deploy, so racing
    /// callers wait for the first deployment instead of submitting another.
    /// A failed deployment is not retried.
    pub async fn ensure_deployed(&self, chain_id: ChainId, transactions: &TransactionExecutor) -> Result<()> {
        self.deploy_if_missing(chain_id, transactions, |e| SessionError::deployment(chain_id, e))
            .await
    }

    /// [`ensure_deployed`](Self::ensure_deployed) on behalf of another
    /// operation: a failure to look up existing code is reported through
    /// `lookup_failed`, so it carries the caller's error kind. Failures of
    /// the deployment itself stay `SessionError::Deployment`.
    pub(crate) async fn deploy_if_missing<F>(
        &self,
        chain_id: ChainId,
        transactions: &TransactionExecutor,
        lookup_failed: F,
    ) -> Result<()>
    where
        F: FnOnce(RpcError) -> SessionError,
    {
        let handle = self.handle(chain_id)?;
        let mut deployed = handle.deployed.lock().await;
        if *deployed {
            return Ok(());
        }

        let code = handle.rpc.get_code(self.address).await.map_err(lookup_failed)?;
        if !code.is_empty() {
            debug!("Contract already present at {:?} on chain {}", self.address, chain_id);
            *deployed = true;
            return Ok(());
        }

        info!("Deploying contract to {:?} on chain {}", self.address, chain_id);
        let data = create2_deploy_calldata(&self.deployer, &self.descriptor.bytecode);
        let receipt = transactions
            .submit(chain_id, self.deployer.factory, data.into())
            .await
            .map_err(|e| SessionError::deployment(chain_id, into_cause(e)))?;

        let code = handle
            .rpc
            .get_code(self.address)
            .await
            .map_err(|e| SessionError::deployment(chain_id, e))?;
        if code.is_empty() {
            return Err(SessionError::deployment(
                chain_id,
                DeploymentFailure::CodeMissing {
                    address: self.address,
                    transaction_hash: receipt.transaction_hash,
                },
            ));
        }

        info!(
            "Deployed contract at {:?} on chain {} in block {}",
            self.address, chain_id, receipt.block_number
        );
        *deployed = true;
        Ok(())
    }
}

fn into_cause(err: SessionError) -> BoxError {
    match err {
        SessionError::Call { cause, .. }
        | SessionError::Transaction { cause, .. }
        | SessionError::Deployment { cause, .. } => cause,
        other => Box::new(other),
    }
}
