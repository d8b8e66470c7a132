//! Post-deployment wiring of a collateral branch.
//!
//! The addresses registry must know the borrower operations address, but
//! borrower operations can only be deployed once the registry holds every
//! other address. The registry is therefore written twice, and the contracts
//! that cached addresses on construction are refreshed afterwards. Each step
//! consumes the previous state, so the sequence cannot be reordered or cut
//! short:
//!
//! `Unwired -> PlaceholderWired -> BoPending -> FullyWired`

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use starknet::core::types::Felt;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

use crate::{
    chain::ChainClient,
    deployer::{DeployContext, DeployedContract},
    encoder::{ArgValue, Args},
    error::Result,
    protocol::{BranchContracts, BranchCore, ProtocolContract, SharedContracts},
};

/// Parameter slots of `AddressesRegistry.set_addresses`, in declared order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "snake_case")]
pub enum RegistrySlot {
    ActivePool,
    DefaultPool,
    PriceFeed,
    HintHelpers,
    MultiTroveGetter,
    MetadataNft,
    GasToken,
    BorrowerOperations,
    TroveManager,
    TroveNft,
    GasPool,
    CollSurplusPool,
    SortedTroves,
    CollateralRegistry,
    BitusdToken,
    InterestRouter,
    StabilityPool,
    CollToken,
}

/// Parameter slots of `TroveManager.set_addresses`, in declared order.
pub const TROVE_MANAGER_SLOTS: [RegistrySlot; 12] = [
    RegistrySlot::ActivePool,
    RegistrySlot::DefaultPool,
    RegistrySlot::PriceFeed,
    RegistrySlot::GasToken,
    RegistrySlot::BorrowerOperations,
    RegistrySlot::TroveNft,
    RegistrySlot::GasPool,
    RegistrySlot::CollSurplusPool,
    RegistrySlot::SortedTroves,
    RegistrySlot::CollateralRegistry,
    RegistrySlot::BitusdToken,
    RegistrySlot::StabilityPool,
];

/// Slots whose contracts this tool never deploys. They keep the placeholder.
pub const EXTERNAL_SLOTS: [RegistrySlot; 2] = [RegistrySlot::MetadataNft, RegistrySlot::GasPool];

/// Value written into registry slots whose contract does not exist yet.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum PlaceholderPolicy {
    /// The branch's active pool, which the deployed contracts accept as a stand-in.
    #[default]
    ActivePool,
    /// The zero address.
    Zero,
}

/// A full assignment of the eighteen registry slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryAddresses {
    slots: BTreeMap<RegistrySlot, Felt>,
}

impl RegistryAddresses {
    /// Every slot set to `placeholder`.
    pub fn filled(placeholder: Felt) -> Self {
        Self {
            slots: RegistrySlot::iter().map(|slot| (slot, placeholder)).collect(),
        }
    }

    pub fn set(&mut self, slot: RegistrySlot, address: Felt) -> &mut Self {
        self.slots.insert(slot, address);
        self
    }

    pub fn get(&self, slot: RegistrySlot) -> Felt {
        self.slots.get(&slot).copied().unwrap_or(Felt::ZERO)
    }

    /// Named arguments of the registry's `set_addresses`.
    pub fn to_args(&self) -> Args {
        self.to_args_for(&RegistrySlot::iter().collect::<Vec<_>>())
    }

    /// Named arguments restricted to `slots`.
    pub fn to_args_for(&self, slots: &[RegistrySlot]) -> Args {
        slots
            .iter()
            .map(|slot| (slot.to_string(), ArgValue::Felt(self.get(*slot))))
            .collect()
    }
}

mod sealed {
    pub trait Sealed {}
    impl Sealed for super::Unwired {}
    impl Sealed for super::PlaceholderWired {}
    impl<C> Sealed for super::BoPending<C> {}
    impl<C> Sealed for super::FullyWired<C> {}
}

/// Marker trait for wiring states.
pub trait WiringPhase: sealed::Sealed {
    /// Address of borrower operations, once deployed.
    fn borrower_operations_address(&self) -> Option<Felt> {
        None
    }
}

/// Every branch contract except borrower operations is deployed, nothing is wired.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unwired;

/// The registry holds real addresses plus placeholders.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderWired;

/// Borrower operations is deployed but not registered anywhere.
#[derive(Debug)]
pub struct BoPending<C> {
    borrower_operations: DeployedContract<C>,
}

/// Registry and satellites hold every real address.
#[derive(Debug)]
pub struct FullyWired<C> {
    borrower_operations: DeployedContract<C>,
}

impl WiringPhase for Unwired {}
impl WiringPhase for PlaceholderWired {}

impl<C> WiringPhase for BoPending<C> {
    fn borrower_operations_address(&self) -> Option<Felt> {
        Some(self.borrower_operations.address())
    }
}

impl<C> WiringPhase for FullyWired<C> {
    fn borrower_operations_address(&self) -> Option<Felt> {
        Some(self.borrower_operations.address())
    }
}

/// Wiring progress of one branch.
pub struct BranchWiring<'a, C, P: WiringPhase> {
    ctx: DeployContext<C>,
    shared: &'a SharedContracts<C>,
    core: BranchCore<C>,
    placeholder: Felt,
    phase: P,
}

impl<'a, C: ChainClient, P: WiringPhase> BranchWiring<'a, C, P> {
    pub fn core(&self) -> &BranchCore<C> {
        &self.core
    }

    pub fn placeholder(&self) -> Felt {
        self.placeholder
    }

    fn advance<Q: WiringPhase>(self, phase: Q) -> BranchWiring<'a, C, Q> {
        BranchWiring {
            ctx: self.ctx,
            shared: self.shared,
            core: self.core,
            placeholder: self.placeholder,
            phase,
        }
    }

    /// Slots whose contract is known at this point of the wiring.
    fn resolved(&self) -> BTreeMap<RegistrySlot, Felt> {
        let core = &self.core;
        let mut resolved = BTreeMap::from([
            (RegistrySlot::ActivePool, core.active_pool.address()),
            (RegistrySlot::DefaultPool, core.default_pool.address()),
            (RegistrySlot::PriceFeed, core.price_feed.address()),
            (RegistrySlot::GasToken, self.shared.gas_token),
            (RegistrySlot::TroveManager, core.trove_manager.address()),
            (RegistrySlot::TroveNft, core.trove_nft.address()),
            (RegistrySlot::CollSurplusPool, core.coll_surplus_pool.address()),
            (RegistrySlot::SortedTroves, core.sorted_troves.address()),
            (
                RegistrySlot::CollateralRegistry,
                self.shared.collateral_registry.address(),
            ),
            (RegistrySlot::BitusdToken, self.shared.bitusd.address()),
            (RegistrySlot::InterestRouter, core.interest_router.address()),
            (RegistrySlot::StabilityPool, core.stability_pool.address()),
            (RegistrySlot::CollToken, core.coll_token),
        ]);

        if let Some(hint_helpers) = &self.shared.hint_helpers {
            resolved.insert(RegistrySlot::HintHelpers, hint_helpers.address());
        }
        if let Some(multi_trove_getter) = &self.shared.multi_trove_getter {
            resolved.insert(RegistrySlot::MultiTroveGetter, multi_trove_getter.address());
        }
        if let Some(borrower_operations) = self.phase.borrower_operations_address() {
            resolved.insert(RegistrySlot::BorrowerOperations, borrower_operations);
        }

        resolved
    }

    /// Registry assignment from everything deployed so far.
    pub fn registry_addresses(&self) -> RegistryAddresses {
        let mut addresses = RegistryAddresses::filled(self.placeholder);
        for (slot, address) in self.resolved() {
            addresses.set(slot, address);
        }
        addresses
    }

    /// Slots left on the placeholder because their contract is not deployed yet.
    /// [`EXTERNAL_SLOTS`] are never resolved by this tool and are not listed.
    pub fn unresolved_slots(&self) -> Vec<RegistrySlot> {
        let resolved = self.resolved();
        RegistrySlot::iter()
            .filter(|slot| !resolved.contains_key(slot) && !EXTERNAL_SLOTS.contains(slot))
            .collect()
    }

    async fn write_registry(&self) -> Result<RegistryAddresses> {
        let addresses = self.registry_addresses();
        tracing::debug!(
            registry = %self.core.addresses_registry.address().to_fixed_hex_string(),
            ?addresses,
            unresolved = ?self.unresolved_slots(),
            "Writing registry addresses"
        );
        self.core
            .addresses_registry
            .invoke("set_addresses", &addresses.to_args())
            .await?;
        Ok(addresses)
    }
}

impl<'a, C: ChainClient> BranchWiring<'a, C, Unwired> {
    pub fn new(
        ctx: DeployContext<C>,
        shared: &'a SharedContracts<C>,
        core: BranchCore<C>,
        policy: PlaceholderPolicy,
    ) -> Self {
        let placeholder = match policy {
            PlaceholderPolicy::ActivePool => core.active_pool.address(),
            PlaceholderPolicy::Zero => Felt::ZERO,
        };

        Self {
            ctx,
            shared,
            core,
            placeholder,
            phase: Unwired,
        }
    }

    /// First registry pass: real addresses plus placeholders.
    pub async fn wire_placeholders(self) -> Result<BranchWiring<'a, C, PlaceholderWired>> {
        self.write_registry().await?;
        tracing::info!(
            registry = %self.core.addresses_registry.address().to_fixed_hex_string(),
            "Registry wired with placeholders"
        );
        Ok(self.advance(PlaceholderWired))
    }
}

impl<'a, C: ChainClient> BranchWiring<'a, C, PlaceholderWired> {
    /// Deploy borrower operations against the partially wired registry.
    pub async fn deploy_borrower_operations(self) -> Result<BranchWiring<'a, C, BoPending<C>>> {
        let args = Args::new().with("addresses_registry", &self.core.addresses_registry);
        let borrower_operations = self
            .ctx
            .deploy(ProtocolContract::BorrowerOperations.as_ref(), &args)
            .await?;

        Ok(self.advance(BoPending {
            borrower_operations,
        }))
    }
}

impl<'a, C: ChainClient> BranchWiring<'a, C, BoPending<C>> {
    pub fn borrower_operations(&self) -> &DeployedContract<C> {
        &self.phase.borrower_operations
    }

    /// Second registry pass with every real address, then refresh the
    /// contracts that read the registry on construction.
    pub async fn finalize(self) -> Result<BranchWiring<'a, C, FullyWired<C>>> {
        self.write_registry().await?;

        let core = &self.core;
        let registry = ArgValue::from(&core.addresses_registry);

        core.addresses_registry
            .invoke_positional(
                "set_borrower_operations",
                &[ArgValue::from(&self.phase.borrower_operations)],
            )
            .await?;

        for satellite in [
            &core.active_pool,
            &core.coll_surplus_pool,
            &core.sorted_troves,
        ] {
            satellite
                .invoke_positional("set_addresses", std::slice::from_ref(&registry))
                .await?;
        }

        let addresses = self.registry_addresses();
        core.trove_manager
            .invoke("set_addresses", &addresses.to_args_for(&TROVE_MANAGER_SLOTS))
            .await?;

        for satellite in [&core.trove_nft, &core.stability_pool] {
            satellite
                .invoke_positional("set_addresses", std::slice::from_ref(&registry))
                .await?;
        }

        tracing::info!(
            registry = %core.addresses_registry.address().to_fixed_hex_string(),
            "Branch fully wired"
        );

        let borrower_operations = self.phase.borrower_operations.clone();
        Ok(self.advance(FullyWired {
            borrower_operations,
        }))
    }
}

impl<'a, C: ChainClient> BranchWiring<'a, C, FullyWired<C>> {
    pub fn borrower_operations(&self) -> &DeployedContract<C> {
        &self.phase.borrower_operations
    }

    /// Register the branch on the stablecoin and hand back its contracts.
    pub async fn link_stablecoin(self) -> Result<BranchContracts<C>> {
        let core = &self.core;
        let borrower_operations = &self.phase.borrower_operations;

        self.shared
            .bitusd
            .invoke_positional(
                "set_branch_addresses",
                &[
                    ArgValue::from(&core.trove_manager),
                    ArgValue::from(&core.stability_pool),
                    ArgValue::from(borrower_operations),
                    ArgValue::from(&core.active_pool),
                ],
            )
            .await?;

        tracing::info!(
            trove_manager = %core.trove_manager.address().to_fixed_hex_string(),
            "Branch registered on the stablecoin"
        );

        Ok(self.core.with_borrower_operations(self.phase.borrower_operations))
    }
}
