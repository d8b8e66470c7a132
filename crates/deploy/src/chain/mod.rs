//! Remote node operations needed to deploy and wire the protocol.
//!
//! The orchestrator only talks to the chain through [`ChainClient`], so a run
//! can be replayed against an in-memory implementation in tests.

use std::future::Future;

use ::starknet::core::types::Felt;

use crate::{artifact::ContractArtifact, error::ChainError};

pub mod starknet;
pub use self::starknet::StarknetChain;

/// Outcome of a class declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Declaration {
    pub class_hash: Felt,
    /// `None` when the class was already declared and nothing was submitted.
    pub transaction_hash: Option<Felt>,
}

/// A deployment accepted by the node, not yet final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeploySubmission {
    /// Address the contract will live at once the transaction is final.
    pub address: Felt,
    pub class_hash: Felt,
    pub transaction_hash: Felt,
}

/// A single call to an external entrypoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub to: Felt,
    pub selector: Felt,
    pub calldata: Vec<Felt>,
}

/// Status of a submitted transaction as seen by the node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    /// Not yet included, or included without a final status.
    Pending,
    /// Accepted with a successful execution.
    Succeeded,
    /// Included but execution reverted.
    Reverted(String),
    /// Refused by the sequencer and never included.
    Rejected(String),
}

/// Operations the deployment tool performs against a Starknet node.
///
/// Submissions return as soon as the node accepts the transaction; finality is
/// observed separately through [`ChainClient::transaction_status`].
pub trait ChainClient: Send + Sync + 'static {
    /// Address of the account paying for and signing every transaction.
    fn account_address(&self) -> Felt;

    /// Declare the class of an artifact, skipping the submission when the class
    /// is already known to the node.
    fn declare(
        &self,
        artifact: &ContractArtifact,
    ) -> impl Future<Output = Result<Declaration, ChainError>> + Send;

    /// Deploy an instance of a declared class through the universal deployer.
    fn deploy(
        &self,
        class_hash: Felt,
        calldata: Vec<Felt>,
        salt: Felt,
    ) -> impl Future<Output = Result<DeploySubmission, ChainError>> + Send;

    /// Submit a state-changing call. Returns the transaction hash.
    fn invoke(
        &self,
        invocation: Invocation,
    ) -> impl Future<Output = Result<Felt, ChainError>> + Send;

    /// Read-only call against the latest state.
    fn call(
        &self,
        invocation: Invocation,
    ) -> impl Future<Output = Result<Vec<Felt>, ChainError>> + Send;

    /// Current status of a submitted transaction.
    fn transaction_status(
        &self,
        transaction_hash: Felt,
    ) -> impl Future<Output = Result<TxStatus, ChainError>> + Send;
}
