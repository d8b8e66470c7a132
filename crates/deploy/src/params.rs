//! Risk parameters of a collateral branch.

use alloy_core::primitives::U256;
use serde::{Deserialize, Serialize};

use crate::encoder::Args;

/// Fixed-point scale of every ratio.
pub const DECIMAL_PRECISION: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

/// One percent, scaled.
pub const ONE_PERCENT: U256 = U256::from_limbs([10_000_000_000_000_000, 0, 0, 0]);

/// `pct` percent, scaled by [`DECIMAL_PRECISION`].
pub fn percent(pct: u64) -> U256 {
    U256::from(pct) * ONE_PERCENT
}

/// Ratio thresholds and liquidation penalties handed to the addresses registry.
///
/// The values are opaque to this tool; they are only encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TroveManagerParams {
    /// Critical collateral ratio.
    pub ccr: U256,
    /// Minimum collateral ratio.
    pub mcr: U256,
    /// Batch collateral ratio buffer, on top of MCR.
    pub bcr: U256,
    /// Shutdown collateral ratio.
    pub scr: U256,
    pub liquidation_penalty_sp: U256,
    pub liquidation_penalty_redistribution: U256,
}

impl Default for TroveManagerParams {
    fn default() -> Self {
        Self {
            ccr: percent(150),
            mcr: percent(110),
            bcr: percent(10),
            scr: percent(110),
            liquidation_penalty_sp: percent(5),
            liquidation_penalty_redistribution: percent(10),
        }
    }
}

impl TroveManagerParams {
    /// Constructor arguments of the addresses registry, minus its owner.
    pub fn to_args(&self) -> Args {
        Args::new()
            .with("ccr", self.ccr)
            .with("mcr", self.mcr)
            .with("bcr", self.bcr)
            .with("scr", self.scr)
            .with("liquidation_penalty_sp", self.liquidation_penalty_sp)
            .with(
                "liquidation_penalty_redistribution",
                self.liquidation_penalty_redistribution,
            )
    }
}
