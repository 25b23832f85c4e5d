use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer, WalletError};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes};
use thiserror::Error;

use superchain_common::utils::parse_hex;
use superchain_common::{ChainId, ConfigurationError};

#[derive(Error, Debug)]
pub enum SignerError {
    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),

    #[error("Signer error: {0}")]
    Other(String),
}

/// Signing capability injected into a session. Key material never leaves
/// the implementation.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    /// Account that pays for and sends every transaction.
    fn account(&self) -> Address;

    /// Returns the signed, RLP-encoded payload ready for `eth_sendRawTransaction`.
    async fn sign(&self, chain_id: ChainId, tx: &TypedTransaction) -> Result<Bytes, SignerError>;
}

#[async_trait]
impl TransactionSigner for LocalWallet {
    fn account(&self) -> Address {
        Signer::address(self)
    }

    async fn sign(&self, chain_id: ChainId, tx: &TypedTransaction) -> Result<Bytes, SignerError> {
        let mut tx = tx.clone();
        tx.set_chain_id(chain_id);
        if tx.from().is_none() {
            tx.set_from(Signer::address(self));
        }

        let signature = self.sign_transaction_sync(&tx)?;
        Ok(tx.rlp_signed(&signature))
    }
}

pub fn wallet_from_key(private_key: &str) -> Result<LocalWallet, ConfigurationError> {
    let bytes = parse_hex(private_key).map_err(|e| ConfigurationError::InvalidKey(e.to_string()))?;
    if bytes.len() != 32 {
        return Err(ConfigurationError::InvalidKey(format!(
            "expected 32 bytes, got {}",
            bytes.len()
        )));
    }
    LocalWallet::from_bytes(&bytes).map_err(|e| ConfigurationError::InvalidKey(e.to_string()))
}
