use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ethers::abi::Token;
use ethers::types::Address;
use futures::future::join_all;
use log::{error, info, warn};

use superchain_common::errors::Result;
use superchain_common::{
    ChainId, Config, ConfigurationError, DeployerIdentity, EventLog, ObserverConfig, SessionError,
    TransactionReceipt,
};

use crate::binding::{ContractBinding, ContractDescriptor};
use crate::call::{CallExecutor, DecodedValue};
use crate::observer::{CrossChainObserver, Subscription};
use crate::registry::ChainEndpointRegistry;
use crate::rpc::{ChainRpc, EthersRpc};
use crate::signer::{wallet_from_key, TransactionSigner};
use crate::transaction::TransactionExecutor;

/// One contract, one signer, many chains.
///
/// Built once and passed by reference to every operation. Owns the per-chain
/// handles; the only resources needing teardown are subscriptions, which the
/// caller cancels.
pub struct Session {
    registry: ChainEndpointRegistry,
    binding: Arc<ContractBinding>,
    transactions: Arc<TransactionExecutor>,
    calls: CallExecutor,
    observer: CrossChainObserver,
}

impl Session {
    /// Session over HTTP providers for every chain in `config`, signing with
    /// its private key.
    pub fn from_config(config: &Config, descriptor: ContractDescriptor) -> std::result::Result<Self, ConfigurationError> {
        config.validate()?;
        let key = config
            .private_key
            .as_deref()
            .ok_or_else(|| ConfigurationError::InvalidKey("no private key configured".into()))?;
        let wallet = wallet_from_key(key)?;

        Self::connect(
            ChainEndpointRegistry::from_chains(&config.chains)?,
            Arc::new(wallet),
            descriptor,
            config.deployer,
            config.observer.clone(),
        )
    }

    pub fn connect(
        registry: ChainEndpointRegistry,
        signer: Arc<dyn TransactionSigner>,
        descriptor: ContractDescriptor,
        deployer: DeployerIdentity,
        observer: ObserverConfig,
    ) -> std::result::Result<Self, ConfigurationError> {
        let mut clients: BTreeMap<ChainId, Arc<dyn ChainRpc>> = BTreeMap::new();
        for chain_id in registry.chain_ids() {
            let endpoint = registry.endpoint_for(chain_id)?;
            clients.insert(chain_id, Arc::new(EthersRpc::connect(chain_id, endpoint, &observer)?));
        }

        Self::with_clients(registry, clients, signer, descriptor, deployer, observer)
    }

    /// Session over caller-supplied chain clients, one per registry entry.
    pub fn with_clients(
        registry: ChainEndpointRegistry,
        clients: BTreeMap<ChainId, Arc<dyn ChainRpc>>,
        signer: Arc<dyn TransactionSigner>,
        descriptor: ContractDescriptor,
        deployer: DeployerIdentity,
        observer: ObserverConfig,
    ) -> std::result::Result<Self, ConfigurationError> {
        if let Some(chain_id) = clients.keys().find(|id| !registry.contains(**id)) {
            return Err(ConfigurationError::UnknownChain(*chain_id));
        }
        if let Some(chain_id) = registry.chain_ids().into_iter().find(|id| !clients.contains_key(id)) {
            return Err(ConfigurationError::Invalid(format!("No client for chain {}", chain_id)));
        }

        let binding = Arc::new(ContractBinding::new(descriptor, deployer, clients));
        let transactions = Arc::new(TransactionExecutor::new(binding.clone(), signer));
        let calls = CallExecutor::new(binding.clone(), transactions.clone());
        let observer = CrossChainObserver::new(binding.clone(), observer);

        info!(
            "Session for contract {:?} on chains {:?}",
            binding.address(),
            registry.chain_ids()
        );

        Ok(Self {
            registry,
            binding,
            transactions,
            calls,
            observer,
        })
    }

    /// Contract address, the same on every chain of the session.
    pub fn address(&self) -> Address {
        self.binding.address()
    }

    pub fn signer_address(&self) -> Address {
        self.transactions.signer_address()
    }

    pub fn chain_ids(&self) -> Vec<ChainId> {
        self.registry.chain_ids()
    }

    pub fn endpoint_for(&self, chain_id: ChainId) -> std::result::Result<&str, ConfigurationError> {
        self.registry.endpoint_for(chain_id)
    }

    pub fn binding(&self) -> &ContractBinding {
        &self.binding
    }

    pub fn observer_config(&self) -> &ObserverConfig {
        self.observer.config()
    }

    pub async fn ensure_deployed(&self, chain_id: ChainId) -> Result<()> {
        self.binding.ensure_deployed(chain_id, &self.transactions).await
    }

    pub async fn call(&self, chain_id: ChainId, function: &str, args: &[Token]) -> Result<DecodedValue> {
        self.calls.call(chain_id, function, args).await
    }

    /// Reads `function` on every chain concurrently, in chain id order.
    pub async fn call_all(&self, function: &str, args: &[Token]) -> Vec<(ChainId, Result<DecodedValue>)> {
        let chain_ids = self.chain_ids();
        let results = join_all(
            chain_ids
                .iter()
                .map(|chain_id| self.calls.call(*chain_id, function, args)),
        )
        .await;

        chain_ids.into_iter().zip(results).collect()
    }

    pub async fn send_tx(&self, chain_id: ChainId, function: &str, args: &[Token]) -> Result<TransactionReceipt> {
        self.transactions.send_tx(chain_id, function, args).await
    }

    pub async fn block_number(&self, chain_id: ChainId) -> Result<u64> {
        let handle = self.binding.handle(chain_id)?;
        handle
            .rpc()
            .block_number()
            .await
            .map_err(|e| SessionError::call(chain_id, "eth_blockNumber", e))
    }

    pub async fn wait_until<F, Fut>(&self, predicate: F, timeout: Duration, interval: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = bool>,
    {
        self.observer.wait_until(predicate, timeout, interval).await
    }

    /// Polls `function` on `chain_id` until `check` accepts its result.
    ///
    /// Failed reads count as "not observed yet". A failure that is not
    /// retryable, such as a failed implicit deployment, ends the wait with
    /// `false` so the deployment is never resubmitted from the poll loop.
    pub async fn wait_for_call<P>(
        &self,
        chain_id: ChainId,
        function: &str,
        args: &[Token],
        timeout: Duration,
        interval: Duration,
        check: P,
    ) -> bool
    where
        P: Fn(&DecodedValue) -> bool,
    {
        let check = &check;
        let gave_up = AtomicBool::new(false);
        let gave_up_ref = &gave_up;

        let finished = self
            .wait_until(
                move || async move {
                    match self.call(chain_id, function, args).await {
                        Ok(value) => check(&value),
                        Err(e) if e.is_retryable() => {
                            warn!("Read of {} on chain {} failed while waiting: {}", function, chain_id, e);
                            false
                        }
                        Err(e) => {
                            error!("Giving up on {} on chain {}: {}", function, chain_id, e);
                            gave_up_ref.store(true, Ordering::SeqCst);
                            true
                        }
                    }
                },
                timeout,
                interval,
            )
            .await;

        finished && !gave_up.load(Ordering::SeqCst)
    }

    pub fn watch_events<F>(&self, chain_id: ChainId, from_block: u64, on_log: F) -> std::result::Result<Subscription, ConfigurationError>
    where
        F: FnMut(EventLog) + Send + 'static,
    {
        self.observer.watch_events(chain_id, from_block, on_log)
    }

    pub fn watch_contract_events<F>(
        &self,
        chain_id: ChainId,
        from_block: u64,
        event: Option<&str>,
        on_log: F,
    ) -> std::result::Result<Subscription, ConfigurationError>
    where
        F: FnMut(EventLog) + Send + 'static,
    {
        self.observer
            .watch_contract_events(chain_id, from_block, event, on_log)
    }
}
