use std::sync::Arc;

use ethers::abi::Token;
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, TransactionRequest, U256};
use log::debug;

use superchain_common::errors::Result;
use superchain_common::metrics::MetricsCollector;
use superchain_common::{ChainId, SessionError};

use crate::binding::ContractBinding;
use crate::transaction::TransactionExecutor;

/// Tokens returned by a contract function, in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedValue(Vec<Token>);

impl DecodedValue {
    pub fn new(tokens: Vec<Token>) -> Self {
        Self(tokens)
    }

    pub fn tokens(&self) -> &[Token] {
        &self.0
    }

    pub fn into_tokens(self) -> Vec<Token> {
        self.0
    }

    pub fn first(&self) -> Option<&Token> {
        self.0.first()
    }

    /// The value of a function returning a single `uint`.
    pub fn as_uint(&self) -> Option<U256> {
        match self.0.as_slice() {
            [Token::Uint(value)] => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self.0.as_slice() {
            [Token::Bool(value)] => Some(*value),
            _ => None,
        }
    }

    pub fn as_address(&self) -> Option<Address> {
        match self.0.as_slice() {
            [Token::Address(value)] => Some(*value),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Read-only calls. Never retries; pollers bring their own loop.
pub struct CallExecutor {
    binding: Arc<ContractBinding>,
    transactions: Arc<TransactionExecutor>,
    metrics: MetricsCollector,
}

impl CallExecutor {
    pub fn new(binding: Arc<ContractBinding>, transactions: Arc<TransactionExecutor>) -> Self {
        Self {
            binding,
            transactions,
            metrics: MetricsCollector::new(),
        }
    }

    /// Calls `function` on `chain_id`, deploying the contract first if this
    /// session has not seen it there yet.
    pub async fn call(&self, chain_id: ChainId, function: &str, args: &[Token]) -> Result<DecodedValue> {
        let handle = self.binding.handle(chain_id)?;
        let data = self
            .binding
            .encode_call(function, args)
            .map_err(|e| self.failed(chain_id, function, e))?;

        self.binding
            .deploy_if_missing(chain_id, &self.transactions, |e| self.failed(chain_id, function, e))
            .await?;

        let tx: TypedTransaction = TransactionRequest::new()
            .from(self.transactions.signer_address())
            .to(self.binding.address())
            .data(data)
            .into();

        self.metrics.increment_call();
        let output = handle
            .rpc()
            .call(&tx)
            .await
            .map_err(|e| self.failed(chain_id, function, e))?;

        let value = self
            .binding
            .decode_output(function, &output)
            .map_err(|e| self.failed(chain_id, function, e))?;

        debug!("{}() on chain {} returned {:?}", function, chain_id, value.tokens());
        Ok(value)
    }

    fn failed<E>(&self, chain_id: ChainId, function: &str, cause: E) -> SessionError
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.metrics.increment_failed_call();
        SessionError::call(chain_id, function, cause)
    }
}
