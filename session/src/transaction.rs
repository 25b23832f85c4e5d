use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use ethers::abi::Token;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Eip1559TransactionRequest, H256, U256, U64};
use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::Mutex;

use superchain_common::errors::Result;
use superchain_common::metrics::MetricsCollector;
use superchain_common::{ChainId, ConfigurationError, SessionError, TransactionReceipt};

use crate::binding::ContractBinding;
use crate::rpc::RpcError;
use crate::signer::TransactionSigner;

#[derive(Error, Debug)]
pub enum TransactionFailure {
    #[error("Transaction {transaction_hash:?} reverted in block {block_number}")]
    Reverted {
        transaction_hash: H256,
        block_number: u64,
    },

    #[error("Receipt for {0:?} has no block number")]
    MissingBlock(H256),
}

/// Builds, signs and submits state-changing transactions.
///
/// Each chain has its own nonce slot. The slot stays locked from nonce
/// assignment until the node accepts the payload, so two sends on one chain
/// never race for the same nonce while sends on different chains proceed in
/// parallel.
pub struct TransactionExecutor {
    binding: Arc<ContractBinding>,
    signer: Arc<dyn TransactionSigner>,
    nonces: HashMap<ChainId, Mutex<Option<U256>>>,
    metrics: MetricsCollector,
}

impl TransactionExecutor {
    pub fn new(binding: Arc<ContractBinding>, signer: Arc<dyn TransactionSigner>) -> Self {
        let nonces = binding
            .chain_ids()
            .into_iter()
            .map(|chain_id| (chain_id, Mutex::new(None)))
            .collect();

        Self {
            binding,
            signer,
            nonces,
            metrics: MetricsCollector::new(),
        }
    }

    pub fn signer_address(&self) -> Address {
        self.signer.account()
    }

    /// Calls `function` on the contract as a transaction and waits for it to
    /// be included on `chain_id`. Does not wait for any cross-chain effect.
    pub async fn send_tx(&self, chain_id: ChainId, function: &str, args: &[Token]) -> Result<TransactionReceipt> {
        self.binding.handle(chain_id)?;
        let data = self
            .binding
            .encode_call(function, args)
            .map_err(|e| SessionError::transaction(chain_id, e))?;

        self.binding
            .deploy_if_missing(chain_id, self, |e| self.failed(chain_id, e))
            .await?;

        info!("Sending {}() on chain {}", function, chain_id);
        self.submit(chain_id, self.binding.address(), data).await
    }

    /// Signs and submits a call to `to` with raw calldata.
    pub async fn submit(&self, chain_id: ChainId, to: Address, data: Bytes) -> Result<TransactionReceipt> {
        let handle = self.binding.handle(chain_id)?;
        let slot = self
            .nonces
            .get(&chain_id)
            .ok_or(ConfigurationError::UnknownChain(chain_id))?;
        let rpc = handle.rpc();
        let from = self.signer.account();
        let started = Instant::now();

        let tx_hash = {
            let mut next_nonce = slot.lock().await;

            let nonce = match *next_nonce {
                Some(nonce) => nonce,
                None => rpc
                    .transaction_count(from)
                    .await
                    .map_err(|e| self.failed(chain_id, e))?,
            };

            let mut tx: TypedTransaction = Eip1559TransactionRequest::new()
                .from(from)
                .to(to)
                .data(data)
                .nonce(nonce)
                .chain_id(chain_id)
                .into();

            if let Err(e) = rpc.fill_transaction(&mut tx).await {
                *next_nonce = None;
                return Err(self.failed(chain_id, e));
            }

            let raw = match self.signer.sign(chain_id, &tx).await {
                Ok(raw) => raw,
                Err(e) => {
                    *next_nonce = None;
                    return Err(self.failed(chain_id, e));
                }
            };

            match rpc.send_raw_transaction(raw).await {
                Ok(tx_hash) => {
                    *next_nonce = Some(nonce + U256::one());
                    debug!("Submitted {:?} on chain {} with nonce {}", tx_hash, chain_id, nonce);
                    tx_hash
                }
                Err(e) => {
                    *next_nonce = None;
                    return Err(self.failed(chain_id, e));
                }
            }
        };

        let receipt = match rpc.wait_for_receipt(tx_hash).await {
            Ok(receipt) => receipt,
            Err(e) => {
                if matches!(e, RpcError::Dropped(_)) {
                    // The nonce was never consumed on chain.
                    *slot.lock().await = None;
                }
                return Err(self.failed(chain_id, e));
            }
        };

        let block_number = receipt
            .block_number
            .map(|block| block.as_u64())
            .ok_or_else(|| self.failed(chain_id, TransactionFailure::MissingBlock(tx_hash)))?;

        if receipt.status == Some(U64::zero()) {
            warn!("Transaction {:?} reverted on chain {}", tx_hash, chain_id);
            return Err(self.failed(
                chain_id,
                TransactionFailure::Reverted {
                    transaction_hash: tx_hash,
                    block_number,
                },
            ));
        }

        self.metrics.increment_successful_transaction();
        self.metrics
            .record_transaction_latency(started.elapsed().as_secs_f64());
        info!("Transaction {:?} included on chain {} in block {}", tx_hash, chain_id, block_number);

        Ok(TransactionReceipt {
            transaction_hash: tx_hash,
            block_number,
            chain_id,
            gas_used: receipt.gas_used,
        })
    }

    fn failed<E>(&self, chain_id: ChainId, cause: E) -> SessionError
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.metrics.increment_failed_transaction();
        SessionError::transaction(chain_id, cause)
    }
}
