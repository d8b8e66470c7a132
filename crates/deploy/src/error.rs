//! Error taxonomy for the deployment library.

use std::{path::PathBuf, time::Duration};

use starknet::core::types::Felt;

/// Result alias used across the crate.
pub type Result<T, E = DeployError> = std::result::Result<T, E>;

/// Errors surfaced by artifact loading, calldata encoding, deployments and wiring.
///
/// None of these are recovered locally: every failure aborts the current run.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    /// A build artifact is missing, unreadable or malformed.
    #[error("artifact for contract `{name}` unavailable at {}: {reason}", .path.display())]
    ArtifactNotFound {
        name: String,
        path: PathBuf,
        reason: String,
    },

    /// Arguments do not match the declared ABI.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The chain rejected a declaration or deployment.
    #[error("failed to deploy contract `{contract}`")]
    DeploymentFailed {
        contract: String,
        #[source]
        source: ChainError,
    },

    /// A wiring or smoke-test invocation did not reach a successful final state.
    #[error("transaction `{contract}.{entrypoint}` failed")]
    TransactionFailed {
        contract: String,
        entrypoint: String,
        #[source]
        source: ChainError,
    },

    /// A required configuration value is absent or invalid.
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Failures reported by the remote node, classified for retry decisions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    /// Transport failure or rate limiting. Safe to retry for read-only requests.
    #[error("transient RPC failure: {0}")]
    Transient(String),

    /// The node refused the request.
    #[error("rejected by the node: {0}")]
    Rejected(String),

    /// The transaction was included but its execution reverted.
    #[error("transaction {} reverted: {reason}", .tx_hash.to_fixed_hex_string())]
    Reverted { tx_hash: Felt, reason: String },

    /// The transaction did not reach finality in time.
    #[error("transaction {} not final after {elapsed:?}", .tx_hash.to_fixed_hex_string())]
    Timeout { tx_hash: Felt, elapsed: Duration },

    /// Anything else (local class hashing, signing, malformed responses).
    #[error("{0}")]
    Other(String),
}

impl ChainError {
    /// Whether the failure may disappear on its own.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainError::Transient(_))
    }
}
