use thiserror::Error;

use crate::types::ChainId;

/// Boxed cause carried by session failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Unknown chain id: {0}")]
    UnknownChain(ChainId),

    #[error("Invalid endpoint for chain {chain_id}: {reason}")]
    InvalidEndpoint { chain_id: ChainId, reason: String },

    #[error("Duplicate chain id: {0}")]
    DuplicateChain(ChainId),

    #[error("Invalid private key: {0}")]
    InvalidKey(String),

    #[error("Invalid contract artifact: {0}")]
    InvalidArtifact(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error("Call to {function} on chain {chain_id} failed: {cause}")]
    Call {
        chain_id: ChainId,
        function: String,
        #[source]
        cause: BoxError,
    },

    #[error("Transaction on chain {chain_id} failed: {cause}")]
    Transaction {
        chain_id: ChainId,
        #[source]
        cause: BoxError,
    },

    #[error("Deployment on chain {chain_id} failed: {cause}")]
    Deployment {
        chain_id: ChainId,
        #[source]
        cause: BoxError,
    },
}

impl SessionError {
    pub fn call(chain_id: ChainId, function: &str, cause: impl Into<BoxError>) -> Self {
        SessionError::Call {
            chain_id,
            function: function.to_string(),
            cause: cause.into(),
        }
    }

    pub fn transaction(chain_id: ChainId, cause: impl Into<BoxError>) -> Self {
        SessionError::Transaction {
            chain_id,
            cause: cause.into(),
        }
    }

    pub fn deployment(chain_id: ChainId, cause: impl Into<BoxError>) -> Self {
        SessionError::Deployment {
            chain_id,
            cause: cause.into(),
        }
    }

    /// Reads can be retried by the caller. Writes and deployments must not be
    /// retried blindly since they may already have mutated chain state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::Call { .. })
    }

    pub fn chain_id(&self) -> Option<ChainId> {
        match self {
            SessionError::Configuration(ConfigurationError::UnknownChain(id)) => Some(*id),
            SessionError::Configuration(_) => None,
            SessionError::Call { chain_id, .. }
            | SessionError::Transaction { chain_id, .. }
            | SessionError::Deployment { chain_id, .. } => Some(*chain_id),
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
