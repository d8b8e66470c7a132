//! [`ChainClient`] over a Starknet JSON-RPC node with a single-owner account.

use std::sync::Arc;

use starknet::{
    accounts::{Account, AccountError, ConnectedAccount, ExecutionEncoding, SingleOwnerAccount},
    contract::ContractFactory,
    core::types::{
        BlockId, BlockTag, Call, ExecutionResult, Felt, FunctionCall, StarknetError,
        TransactionExecutionStatus, TransactionStatus,
        contract::{CompiledClass, SierraClass},
    },
    providers::{
        JsonRpcClient, Provider, ProviderError,
        jsonrpc::{HttpTransport, HttpTransportError, JsonRpcClientError},
    },
    signers::{LocalWallet, SigningKey},
};
use url::Url;

use super::{ChainClient, Declaration, DeploySubmission, Invocation, TxStatus};
use crate::{artifact::ContractArtifact, error::ChainError, rpc};

type RpcAccount = SingleOwnerAccount<JsonRpcClient<HttpTransport>, LocalWallet>;

/// Block every read and nonce lookup is resolved against.
const BLOCK: BlockId = BlockId::Tag(BlockTag::Pending);

/// Production chain client.
pub struct StarknetChain {
    account: RpcAccount,
}

impl std::fmt::Debug for StarknetChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StarknetChain")
            .field("address", &self.account.address().to_fixed_hex_string())
            .field("chain_id", &self.account.chain_id().to_fixed_hex_string())
            .finish()
    }
}

impl StarknetChain {
    /// Wait up to `ready_timeout_secs` for the node, then build the account for
    /// `address` on the chain the node reports.
    pub async fn connect(
        rpc_url: &Url,
        address: Felt,
        private_key: Felt,
        ready_timeout_secs: u64,
    ) -> Result<Self, anyhow::Error> {
        let provider = rpc::provider(rpc_url);
        let chain_id = rpc::preflight(&provider, rpc_url, ready_timeout_secs).await?;

        let signer = LocalWallet::from(SigningKey::from_secret_scalar(private_key));
        let mut account =
            SingleOwnerAccount::new(provider, signer, address, chain_id, ExecutionEncoding::New);
        account.set_block_id(BLOCK);

        tracing::info!(
            rpc_url = %rpc_url,
            account = %address.to_fixed_hex_string(),
            chain_id = %chain_id.to_fixed_hex_string(),
            "Connected deployer account"
        );

        Ok(Self { account })
    }

    pub fn chain_id(&self) -> Felt {
        self.account.chain_id()
    }
}

impl ChainClient for StarknetChain {
    fn account_address(&self) -> Felt {
        self.account.address()
    }

    async fn declare(&self, artifact: &ContractArtifact) -> Result<Declaration, ChainError> {
        let sierra: SierraClass = serde_json::from_value(artifact.class.clone())
            .map_err(|e| ChainError::Other(format!("invalid Sierra class `{}`: {e}", artifact.name)))?;
        let flattened = sierra
            .flatten()
            .map_err(|e| ChainError::Other(format!("failed to flatten `{}`: {e}", artifact.name)))?;
        let class_hash = flattened.class_hash();

        let compiled: CompiledClass = serde_json::from_value(artifact.compiled_class.clone())
            .map_err(|e| {
                ChainError::Other(format!("invalid compiled class `{}`: {e}", artifact.name))
            })?;
        let compiled_class_hash = compiled
            .class_hash()
            .map_err(|e| ChainError::Other(format!("failed to hash `{}`: {e}", artifact.name)))?;

        match self.account.provider().get_class(BLOCK, class_hash).await {
            Ok(_) => {
                tracing::debug!(
                    contract = %artifact.name,
                    class_hash = %class_hash.to_fixed_hex_string(),
                    "Class already declared"
                );
                return Ok(Declaration {
                    class_hash,
                    transaction_hash: None,
                });
            }
            Err(ProviderError::StarknetError(StarknetError::ClassHashNotFound)) => {}
            Err(e) => return Err(e.into()),
        }

        let result = self
            .account
            .declare_v3(Arc::new(flattened), compiled_class_hash)
            .send()
            .await
            .map_err(account_error)?;

        tracing::trace!(?result, "Declaration result");

        Ok(Declaration {
            class_hash: result.class_hash,
            transaction_hash: Some(result.transaction_hash),
        })
    }

    async fn deploy(
        &self,
        class_hash: Felt,
        calldata: Vec<Felt>,
        salt: Felt,
    ) -> Result<DeploySubmission, ChainError> {
        let factory = ContractFactory::new(class_hash, &self.account);
        let deployment = factory.deploy_v3(calldata, salt, true);
        let address = deployment.deployed_address();

        let result = deployment.send().await.map_err(account_error)?;
        tracing::trace!(?result, "Deploy result");

        Ok(DeploySubmission {
            address,
            class_hash,
            transaction_hash: result.transaction_hash,
        })
    }

    async fn invoke(&self, invocation: Invocation) -> Result<Felt, ChainError> {
        let result = self
            .account
            .execute_v3(vec![Call {
                to: invocation.to,
                selector: invocation.selector,
                calldata: invocation.calldata,
            }])
            .send()
            .await
            .map_err(account_error)?;

        tracing::trace!(?result, "Invoke result");
        Ok(result.transaction_hash)
    }

    async fn call(&self, invocation: Invocation) -> Result<Vec<Felt>, ChainError> {
        let result = self
            .account
            .provider()
            .call(
                FunctionCall {
                    contract_address: invocation.to,
                    entry_point_selector: invocation.selector,
                    calldata: invocation.calldata,
                },
                BLOCK,
            )
            .await?;
        Ok(result)
    }

    async fn transaction_status(&self, transaction_hash: Felt) -> Result<TxStatus, ChainError> {
        let provider = self.account.provider();
        let status = match provider.get_transaction_status(transaction_hash).await {
            Ok(status) => status,
            Err(ProviderError::StarknetError(StarknetError::TransactionHashNotFound)) => {
                return Ok(TxStatus::Pending);
            }
            Err(e) => return Err(e.into()),
        };

        let execution = match status {
            TransactionStatus::Received => return Ok(TxStatus::Pending),
            TransactionStatus::Rejected { .. } => {
                return Ok(TxStatus::Rejected("rejected by the sequencer".to_string()));
            }
            TransactionStatus::AcceptedOnL2(execution) | TransactionStatus::AcceptedOnL1(execution) => {
                execution
            }
        };

        match execution {
            TransactionExecutionStatus::Succeeded => Ok(TxStatus::Succeeded),
            TransactionExecutionStatus::Reverted => {
                let receipt = provider.get_transaction_receipt(transaction_hash).await?;
                let reason = match receipt.receipt.execution_result() {
                    ExecutionResult::Reverted { reason } => reason.clone(),
                    ExecutionResult::Succeeded => "execution reverted".to_string(),
                };
                Ok(TxStatus::Reverted(reason))
            }
        }
    }
}

impl From<ProviderError> for ChainError {
    fn from(err: ProviderError) -> Self {
        classify(err)
    }
}

/// Only network-level failures of the HTTP transport are worth retrying; the
/// response body is decoded separately and lands in the `Json` variants.
/// Malformed responses and unexpected JSON-RPC errors are permanent.
fn classify(err: ProviderError) -> ChainError {
    match err {
        ProviderError::RateLimited => ChainError::Transient("rate limited".to_string()),
        ProviderError::StarknetError(e) => ChainError::Rejected(e.to_string()),
        ProviderError::Other(e) => {
            let transient = matches!(
                e.as_any().downcast_ref::<JsonRpcClientError<HttpTransportError>>(),
                Some(JsonRpcClientError::TransportError(HttpTransportError::Reqwest(_)))
            );
            if transient {
                ChainError::Transient(e.to_string())
            } else {
                ChainError::Other(e.to_string())
            }
        }
        other => ChainError::Other(other.to_string()),
    }
}

fn account_error<S: std::error::Error>(err: AccountError<S>) -> ChainError {
    match err {
        AccountError::Provider(e) => e.into(),
        other => ChainError::Other(other.to_string()),
    }
}
