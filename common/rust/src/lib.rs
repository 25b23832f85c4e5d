pub mod config;
pub mod crypto;
pub mod errors;
pub mod logging;
pub mod metrics;
pub mod types;
pub mod utils;

pub use config::{ChainConfig, Config, LogConfig, LogFormat, ObserverConfig};
pub use errors::{BoxError, ConfigurationError, SessionError};
pub use types::{ChainId, DeployerIdentity, EventLog, TransactionReceipt};
