//! Declare-and-deploy of single contracts, and handles to deployed contracts.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};
use starknet::core::{types::Felt, utils::get_selector_from_name};

use crate::{
    abi::Abi,
    artifact::ArtifactStore,
    chain::{ChainClient, Invocation, TxStatus},
    encoder::{ArgValue, Args, encode_constructor, encode_function, encode_function_positional},
    error::{ChainError, DeployError, Result},
};

/// Default interval between two transaction status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Default time a transaction may take to become final.
pub const DEFAULT_FINALITY_TIMEOUT: Duration = Duration::from_secs(300);

/// Default number of retries of a status poll failing with a transient error.
pub const DEFAULT_MAX_TRANSIENT_RETRIES: usize = 5;

/// How long and how often to wait for a transaction to become final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalityPolicy {
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub max_transient_retries: usize,
}

impl Default for FinalityPolicy {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_FINALITY_TIMEOUT,
            max_transient_retries: DEFAULT_MAX_TRANSIENT_RETRIES,
        }
    }
}

impl FinalityPolicy {
    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.poll_interval)
            .with_max_delay(self.poll_interval * 8)
            .with_max_times(self.max_transient_retries)
    }
}

/// Everything an operation needs to reach the chain.
///
/// Passed explicitly to every deployment step; cloning is cheap.
pub struct DeployContext<C> {
    chain: Arc<C>,
    artifacts: Arc<ArtifactStore>,
    finality: FinalityPolicy,
}

impl<C> Clone for DeployContext<C> {
    fn clone(&self) -> Self {
        Self {
            chain: Arc::clone(&self.chain),
            artifacts: Arc::clone(&self.artifacts),
            finality: self.finality,
        }
    }
}

impl<C> std::fmt::Debug for DeployContext<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployContext")
            .field("artifacts", &self.artifacts)
            .field("finality", &self.finality)
            .finish_non_exhaustive()
    }
}

impl<C: ChainClient> DeployContext<C> {
    pub fn new(chain: C, artifacts: ArtifactStore, finality: FinalityPolicy) -> Self {
        Self {
            chain: Arc::new(chain),
            artifacts: Arc::new(artifacts),
            finality,
        }
    }

    pub fn chain(&self) -> &C {
        &self.chain
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn finality(&self) -> FinalityPolicy {
        self.finality
    }

    /// Address of the account signing every transaction.
    pub fn deployer_address(&self) -> Felt {
        self.chain.account_address()
    }

    /// Load, encode, declare if needed, deploy, and wait until the contract exists.
    pub async fn deploy(&self, name: &str, args: &Args) -> Result<DeployedContract<C>> {
        let artifact = self.artifacts.load(name)?;
        let calldata = encode_constructor(&artifact.abi, args)?;

        tracing::debug!(contract = name, felts = calldata.len(), "Encoded constructor calldata");

        let failed = |source| DeployError::DeploymentFailed {
            contract: name.to_string(),
            source,
        };

        let declaration = self.chain.declare(&artifact).await.map_err(failed)?;
        if let Some(tx_hash) = declaration.transaction_hash {
            self.wait_for_finality(tx_hash).await.map_err(failed)?;
            tracing::debug!(
                contract = name,
                class_hash = %declaration.class_hash.to_fixed_hex_string(),
                "Class declared"
            );
        }

        let submission = self
            .chain
            .deploy(declaration.class_hash, calldata, random_salt())
            .await
            .map_err(failed)?;
        self.wait_for_finality(submission.transaction_hash)
            .await
            .map_err(failed)?;

        tracing::info!(
            contract = name,
            address = %submission.address.to_fixed_hex_string(),
            "Contract deployed"
        );

        Ok(DeployedContract {
            name: name.to_string(),
            address: submission.address,
            abi: artifact.abi,
            ctx: self.clone(),
        })
    }

    /// Handle to a contract already living at `address`. No network call.
    pub fn connect(&self, address: Felt, name: &str) -> Result<DeployedContract<C>> {
        let abi = self.artifacts.load_abi(name)?;

        tracing::debug!(
            contract = name,
            address = %address.to_fixed_hex_string(),
            "Connected to contract"
        );

        Ok(DeployedContract {
            name: name.to_string(),
            address,
            abi: Arc::new(abi),
            ctx: self.clone(),
        })
    }

    /// Poll until the node reports a terminal status for `tx_hash`.
    ///
    /// Transient failures of a single poll are retried with exponential backoff;
    /// a revert, a rejection, a permanent RPC failure or the timeout end the wait.
    /// The timeout also bounds a poll that never returns.
    pub async fn wait_for_finality(&self, tx_hash: Felt) -> Result<(), ChainError> {
        let start = Instant::now();
        let timed_out = || ChainError::Timeout {
            tx_hash,
            elapsed: start.elapsed(),
        };

        loop {
            let remaining = self.finality.timeout.saturating_sub(start.elapsed());
            let poll = (|| self.chain.transaction_status(tx_hash))
                .retry(self.finality.backoff())
                .when(ChainError::is_transient)
                .notify(|err, delay| {
                    tracing::warn!(error = %err, ?delay, "Transaction status poll failed, retrying");
                });
            let status = tokio::time::timeout(remaining, poll)
                .await
                .map_err(|_| timed_out())??;

            match status {
                TxStatus::Succeeded => return Ok(()),
                TxStatus::Reverted(reason) => return Err(ChainError::Reverted { tx_hash, reason }),
                TxStatus::Rejected(reason) => return Err(ChainError::Rejected(reason)),
                TxStatus::Pending => {}
            }

            let elapsed = start.elapsed();
            if elapsed >= self.finality.timeout {
                return Err(timed_out());
            }

            tracing::trace!(
                tx_hash = %tx_hash.to_fixed_hex_string(),
                ?elapsed,
                "Transaction not final yet"
            );
            tokio::time::sleep(self.finality.poll_interval).await;
        }
    }
}

/// A contract at a known address, callable through its ABI.
pub struct DeployedContract<C> {
    name: String,
    address: Felt,
    abi: Arc<Abi>,
    ctx: DeployContext<C>,
}

impl<C> Clone for DeployedContract<C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            address: self.address,
            abi: Arc::clone(&self.abi),
            ctx: self.ctx.clone(),
        }
    }
}

impl<C> std::fmt::Debug for DeployedContract<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployedContract")
            .field("name", &self.name)
            .field("address", &self.address.to_fixed_hex_string())
            .finish_non_exhaustive()
    }
}

impl<C> From<&DeployedContract<C>> for ArgValue {
    fn from(contract: &DeployedContract<C>) -> Self {
        ArgValue::Felt(contract.address)
    }
}

impl<C> DeployedContract<C> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> Felt {
        self.address
    }

    pub fn abi(&self) -> &Abi {
        &self.abi
    }

    /// The context this contract was deployed or connected through.
    pub fn context(&self) -> &DeployContext<C> {
        &self.ctx
    }
}

impl<C: ChainClient> DeployedContract<C> {
    /// Invoke `entrypoint` with named arguments and wait for finality.
    pub async fn invoke(&self, entrypoint: &str, args: &Args) -> Result<Felt> {
        let calldata = encode_function(&self.abi, entrypoint, args)?;
        self.submit(entrypoint, calldata).await
    }

    /// Invoke `entrypoint` with arguments in declared order and wait for finality.
    pub async fn invoke_positional(&self, entrypoint: &str, values: &[ArgValue]) -> Result<Felt> {
        let calldata = encode_function_positional(&self.abi, entrypoint, values)?;
        self.submit(entrypoint, calldata).await
    }

    /// Read-only call returning the raw result felts.
    pub async fn call(&self, entrypoint: &str, args: &Args) -> Result<Vec<Felt>> {
        let calldata = encode_function(&self.abi, entrypoint, args)?;
        let invocation = Invocation {
            to: self.address,
            selector: selector(entrypoint)?,
            calldata,
        };

        let result = (|| self.ctx.chain.call(invocation.clone()))
            .retry(self.ctx.finality.backoff())
            .when(ChainError::is_transient)
            .await
            .map_err(|source| self.failure(entrypoint, source))?;

        tracing::trace!(contract = %self.name, entrypoint, ?result, "Call result");
        Ok(result)
    }

    async fn submit(&self, entrypoint: &str, calldata: Vec<Felt>) -> Result<Felt> {
        tracing::debug!(
            contract = %self.name,
            entrypoint,
            felts = calldata.len(),
            "Submitting invocation"
        );

        let invocation = Invocation {
            to: self.address,
            selector: selector(entrypoint)?,
            calldata,
        };

        let tx_hash = self
            .ctx
            .chain
            .invoke(invocation)
            .await
            .map_err(|source| self.failure(entrypoint, source))?;
        self.ctx
            .wait_for_finality(tx_hash)
            .await
            .map_err(|source| self.failure(entrypoint, source))?;

        tracing::info!(
            contract = %self.name,
            entrypoint,
            tx_hash = %tx_hash.to_fixed_hex_string(),
            "Transaction confirmed"
        );
        Ok(tx_hash)
    }

    fn failure(&self, entrypoint: &str, source: ChainError) -> DeployError {
        DeployError::TransactionFailed {
            contract: self.name.clone(),
            entrypoint: entrypoint.to_string(),
            source,
        }
    }
}

fn selector(entrypoint: &str) -> Result<Felt> {
    get_selector_from_name(entrypoint)
        .map_err(|e| DeployError::Encoding(format!("invalid entrypoint name `{entrypoint}`: {e}")))
}

/// 248 random bits, always below the field prime.
fn random_salt() -> Felt {
    let bytes: [u8; 31] = rand::random();
    Felt::from_bytes_be_slice(&bytes)
}
