//! Client session for one contract deployed at the same address on several
//! chains: reads and writes per chain, plus polling and log subscriptions to
//! observe effects that arrive later through cross-chain messages.

pub mod binding;
pub mod call;
pub mod observer;
pub mod registry;
pub mod rpc;
pub mod session;
pub mod signer;
pub mod transaction;

#[cfg(test)]
pub(crate) mod testing;

pub use binding::{derive_address, ContractBinding, ContractDescriptor};
pub use call::{CallExecutor, DecodedValue};
pub use observer::{wait_until, CrossChainObserver, LogFilter, Subscription, MIN_POLL_INTERVAL};
pub use registry::ChainEndpointRegistry;
pub use rpc::{ChainRpc, EthersRpc, RpcError};
pub use session::Session;
pub use signer::{wallet_from_key, TransactionSigner};
pub use transaction::TransactionExecutor;

pub use superchain_common::{
    ChainId, Config, ConfigurationError, DeployerIdentity, EventLog, SessionError,
    TransactionReceipt,
};
