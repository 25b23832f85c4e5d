//! Chain capabilities the session needs from a node: reads, code lookup,
//! nonce lookup, submission, receipts, logs and the head block.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use ethers::providers::{Http, Middleware, PendingTransaction, Provider, ProviderError};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{
    Address, BlockNumber, Bytes, Filter, Log, TransactionReceipt as ChainReceipt, H256, U256,
};
use log::debug;
use thiserror::Error;

use superchain_common::{ChainId, ConfigurationError, ObserverConfig};

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transaction {0:?} was dropped before inclusion")]
    Dropped(H256),

    #[error("Transport error: {0}")]
    Transport(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn block_number(&self) -> Result<u64, RpcError>;

    /// `eth_call` against the latest block.
    async fn call(&self, tx: &TypedTransaction) -> Result<Bytes, RpcError>;

    async fn get_code(&self, address: Address) -> Result<Bytes, RpcError>;

    /// Pending transaction count, i.e. the next usable nonce.
    async fn transaction_count(&self, address: Address) -> Result<U256, RpcError>;

    /// Fills gas limit and fee fields that are still unset.
    async fn fill_transaction(&self, tx: &mut TypedTransaction) -> Result<(), RpcError>;

    /// Returns once the node has accepted the payload into its pool.
    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, RpcError>;

    async fn wait_for_receipt(&self, tx_hash: H256) -> Result<ChainReceipt, RpcError>;

    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, RpcError>;
}

/// `ChainRpc` over an ethers HTTP provider.
pub struct EthersRpc {
    chain_id: ChainId,
    provider: Provider<Http>,
    request_timeout: Duration,
    receipt_timeout: Duration,
}

impl EthersRpc {
    pub fn connect(
        chain_id: ChainId,
        endpoint: &str,
        config: &ObserverConfig,
    ) -> Result<Self, ConfigurationError> {
        let provider = Provider::<Http>::try_from(endpoint)
            .map_err(|e| ConfigurationError::InvalidEndpoint {
                chain_id,
                reason: e.to_string(),
            })?
            .interval(config.poll_interval());

        Ok(Self {
            chain_id,
            provider,
            request_timeout: config.request_timeout(),
            receipt_timeout: config.receipt_timeout(),
        })
    }

    pub fn chain_id(&self) -> ChainId {
        self.chain_id
    }

    async fn timed<T, F>(&self, request: F) -> Result<T, RpcError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        match tokio::time::timeout(self.request_timeout, request).await {
            Ok(result) => result.map_err(RpcError::from),
            Err(_) => Err(RpcError::Timeout(self.request_timeout)),
        }
    }
}

#[async_trait]
impl ChainRpc for EthersRpc {
    async fn block_number(&self) -> Result<u64, RpcError> {
        let block = self.timed(self.provider.get_block_number()).await?;
        Ok(block.as_u64())
    }

    async fn call(&self, tx: &TypedTransaction) -> Result<Bytes, RpcError> {
        self.timed(self.provider.call(tx, None)).await
    }

    async fn get_code(&self, address: Address) -> Result<Bytes, RpcError> {
        self.timed(self.provider.get_code(address, None)).await
    }

    async fn transaction_count(&self, address: Address) -> Result<U256, RpcError> {
        self.timed(
            self.provider
                .get_transaction_count(address, Some(BlockNumber::Pending.into())),
        )
        .await
    }

    async fn fill_transaction(&self, tx: &mut TypedTransaction) -> Result<(), RpcError> {
        self.timed(self.provider.fill_transaction(tx, None)).await
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<H256, RpcError> {
        let pending = self.timed(self.provider.send_raw_transaction(raw)).await?;
        let tx_hash = pending.tx_hash();
        debug!("Chain {} accepted transaction {:?}", self.chain_id, tx_hash);
        Ok(tx_hash)
    }

    async fn wait_for_receipt(&self, tx_hash: H256) -> Result<ChainReceipt, RpcError> {
        let pending = PendingTransaction::new(tx_hash, &self.provider);
        match tokio::time::timeout(self.receipt_timeout, pending).await {
            Ok(Ok(Some(receipt))) => Ok(receipt),
            Ok(Ok(None)) => Err(RpcError::Dropped(tx_hash)),
            Ok(Err(e)) => Err(RpcError::Provider(e)),
            Err(_) => Err(RpcError::Timeout(self.receipt_timeout)),
        }
    }

    async fn get_logs(&self, filter: &Filter) -> Result<Vec<Log>, RpcError> {
        self.timed(self.provider.get_logs(filter)).await
    }
}
