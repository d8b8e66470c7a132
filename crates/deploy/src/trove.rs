//! Smoke test against a deployed branch: open one trove.

use alloy_core::primitives::U256;
use serde::{Deserialize, Serialize};
use starknet::core::types::Felt;

use crate::{
    chain::ChainClient,
    deployer::DeployedContract,
    encoder::{ArgValue, Args},
    error::Result,
    params::DECIMAL_PRECISION,
};

/// Arguments of `BorrowerOperations.open_trove`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenTroveParams {
    /// Trove owner; the deployer account when unset.
    pub owner: Option<Felt>,
    pub owner_index: U256,
    /// Collateral minted, approved and locked.
    pub coll_amount: U256,
    /// Debt drawn.
    pub bitusd_amount: U256,
    pub upper_hint: U256,
    pub lower_hint: U256,
    /// Scaled by 10^18.
    pub annual_interest_rate: U256,
    pub max_upfront_fee: U256,
    pub add_manager: Felt,
    pub remove_manager: Felt,
    pub receiver: Felt,
}

impl Default for OpenTroveParams {
    fn default() -> Self {
        Self {
            owner: None,
            owner_index: U256::ZERO,
            coll_amount: DECIMAL_PRECISION,
            bitusd_amount: U256::from(50_000u64) * DECIMAL_PRECISION,
            upper_hint: U256::ZERO,
            lower_hint: U256::ZERO,
            annual_interest_rate: U256::from(50_000_000_000_000_000u64),
            max_upfront_fee: U256::MAX,
            add_manager: Felt::ZERO,
            remove_manager: Felt::ZERO,
            receiver: Felt::ZERO,
        }
    }
}

impl OpenTroveParams {
    fn to_args(&self, owner: Felt) -> Args {
        Args::new()
            .with("owner", owner)
            .with("owner_index", self.owner_index)
            .with("coll_amount", self.coll_amount)
            .with("bitusd_amount", self.bitusd_amount)
            .with("upper_hint", self.upper_hint)
            .with("lower_hint", self.lower_hint)
            .with("annual_interest_rate", self.annual_interest_rate)
            .with("max_upfront_fee", self.max_upfront_fee)
            .with("add_manager", self.add_manager)
            .with("remove_manager", self.remove_manager)
            .with("receiver", self.receiver)
    }
}

/// Mint collateral to the deployer, approve borrower operations and open a trove.
///
/// Returns the hash of the `open_trove` transaction.
pub async fn open_trove<C: ChainClient>(
    borrower_operations: &DeployedContract<C>,
    collateral: &DeployedContract<C>,
    params: &OpenTroveParams,
) -> Result<Felt> {
    let deployer = borrower_operations.context().deployer_address();
    let owner = params.owner.unwrap_or(deployer);

    tracing::info!(
        collateral = %collateral.address().to_fixed_hex_string(),
        coll_amount = %params.coll_amount,
        bitusd_amount = %params.bitusd_amount,
        "Minting collateral"
    );
    collateral
        .invoke_positional(
            "mint",
            &[ArgValue::Felt(deployer), ArgValue::Uint(params.coll_amount)],
        )
        .await?;

    tracing::info!(
        spender = %borrower_operations.address().to_fixed_hex_string(),
        "Approving collateral"
    );
    collateral
        .invoke_positional(
            "approve",
            &[
                ArgValue::from(borrower_operations),
                ArgValue::Uint(params.coll_amount),
            ],
        )
        .await?;

    let tx_hash = borrower_operations
        .invoke("open_trove", &params.to_args(owner))
        .await?;

    tracing::info!(tx_hash = %tx_hash.to_fixed_hex_string(), "Trove opened");
    Ok(tx_hash)
}
