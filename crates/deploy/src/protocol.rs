//! Full protocol deployment: shared contracts, every collateral branch, and
//! the wiring between them.

use derive_more::Deref;
use serde::{Deserialize, Serialize};
use starknet::core::types::Felt;
use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::{
    chain::ChainClient,
    deployer::{DeployContext, DeployedContract},
    encoder::{ArgValue, Args},
    error::{DeployError, Result},
    params::TroveManagerParams,
    wiring::{BranchWiring, PlaceholderPolicy},
};

/// Fee token address shared by mainnet and sepolia.
pub const DEFAULT_GAS_TOKEN: &str =
    "0x049d36570d4e46f48e99674bd3fcc84644ddd6b96f7c741b1562b82f9e004dc7";

/// Artifact names of the protocol contracts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumString, EnumIter)]
pub enum ProtocolContract {
    #[strum(serialize = "BitUSD")]
    BitUsd,
    #[strum(serialize = "TBTC")]
    Tbtc,
    PriceFeed,
    AddressesRegistry,
    TroveManager,
    CollateralRegistry,
    HintHelpers,
    MultiTroveGetter,
    #[strum(serialize = "TroveNFT")]
    TroveNft,
    StabilityPool,
    ActivePool,
    InterestRouterMock,
    DefaultPool,
    CollSurplusPool,
    SortedTroves,
    BorrowerOperations,
}

/// Name and symbol of the stablecoin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
}

impl Default for TokenMetadata {
    fn default() -> Self {
        Self {
            name: "bitUSD".to_string(),
            symbol: "bitUSD".to_string(),
        }
    }
}

/// Metadata of the trove NFT collection of each branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NftMetadata {
    pub name: String,
    pub symbol: String,
    pub uri: String,
}

impl Default for NftMetadata {
    fn default() -> Self {
        Self {
            name: "TroveNFT".to_string(),
            symbol: "TNFT".to_string(),
            uri: String::new(),
        }
    }
}

/// Where the collateral token of a branch comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind")]
pub enum CollateralSource {
    /// Deploy a token from the named artifact (no constructor arguments).
    Deploy { artifact: String },
    /// Use a token that already exists.
    Existing { address: Felt },
}

impl Default for CollateralSource {
    fn default() -> Self {
        CollateralSource::Deploy {
            artifact: ProtocolContract::Tbtc.to_string(),
        }
    }
}

/// One collateral branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchSpec {
    /// Label used in logs and in the manifest.
    pub label: String,
    #[serde(default)]
    pub collateral: CollateralSource,
    /// Artifact name of the branch price feed.
    #[serde(default = "default_price_feed")]
    pub price_feed: String,
    #[serde(default)]
    pub params: TroveManagerParams,
}

fn default_price_feed() -> String {
    ProtocolContract::PriceFeed.to_string()
}

impl Default for BranchSpec {
    fn default() -> Self {
        Self {
            label: "tbtc".to_string(),
            collateral: CollateralSource::default(),
            price_feed: default_price_feed(),
            params: TroveManagerParams::default(),
        }
    }
}

/// Topology and metadata of a protocol deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    pub stablecoin: TokenMetadata,
    pub trove_nft: NftMetadata,
    pub branches: Vec<BranchSpec>,
    /// Address registered in the gas token slot of every branch.
    pub gas_token: Felt,
    pub placeholder: PlaceholderPolicy,
    /// Deploy `HintHelpers` and `MultiTroveGetter`.
    pub deploy_periphery: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            stablecoin: TokenMetadata::default(),
            trove_nft: NftMetadata::default(),
            branches: vec![BranchSpec::default()],
            gas_token: Felt::from_hex_unchecked(DEFAULT_GAS_TOKEN),
            placeholder: PlaceholderPolicy::default(),
            deploy_periphery: false,
        }
    }
}

/// Steps of a protocol deployment, in execution order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum DeploymentPhase {
    /// Stablecoin, collateral tokens and price feeds.
    Leaves,
    AddressesRegistries,
    TroveManagers,
    /// Collateral registry and optional periphery.
    CollateralRegistry,
    /// Remaining per-branch contracts.
    BranchContracts,
    PlaceholderWiring,
    BorrowerOperations,
    /// Second registry pass and refresh of the satellites.
    FinalWiring,
    StablecoinLink,
    CollateralRegistryLink,
}

/// A contract deployed during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub phase: DeploymentPhase,
    /// Branch label, for per-branch contracts.
    pub branch: Option<String>,
    pub contract: String,
    pub address: Felt,
}

/// Append-only record of a run. Survives failures.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeploymentLog {
    entries: Vec<LogEntry>,
    completed: Vec<DeploymentPhase>,
    current: Option<DeploymentPhase>,
}

impl DeploymentLog {
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Every deployment of the named contract, in order.
    pub fn by_name<'a>(&'a self, contract: &'a str) -> impl Iterator<Item = &'a LogEntry> + 'a {
        self.entries.iter().filter(move |e| e.contract == contract)
    }

    pub fn by_address(&self, address: Felt) -> Option<&LogEntry> {
        self.entries.iter().find(|e| e.address == address)
    }

    pub fn completed_phases(&self) -> &[DeploymentPhase] {
        &self.completed
    }

    /// The phase that started but never completed, if the run stopped early.
    pub fn failed_phase(&self) -> Option<DeploymentPhase> {
        self.current.filter(|phase| !self.completed.contains(phase))
    }

    fn begin(&mut self, phase: DeploymentPhase) {
        tracing::info!(%phase, "Starting deployment phase");
        self.current = Some(phase);
    }

    fn complete(&mut self, phase: DeploymentPhase) {
        self.completed.push(phase);
    }

    fn record<C>(
        &mut self,
        phase: DeploymentPhase,
        branch: Option<&str>,
        contract: &DeployedContract<C>,
    ) {
        self.entries.push(LogEntry {
            phase,
            branch: branch.map(str::to_string),
            contract: contract.name().to_string(),
            address: contract.address(),
        });
    }
}

/// Contracts shared by every branch.
#[derive(Debug)]
pub struct SharedContracts<C> {
    pub bitusd: DeployedContract<C>,
    pub collateral_registry: DeployedContract<C>,
    pub hint_helpers: Option<DeployedContract<C>>,
    pub multi_trove_getter: Option<DeployedContract<C>>,
    pub gas_token: Felt,
}

/// Every contract of a branch except borrower operations.
#[derive(Debug)]
pub struct BranchCore<C> {
    pub label: String,
    pub coll_token: Felt,
    /// Handle to the collateral token when it was deployed by this run.
    pub collateral: Option<DeployedContract<C>>,
    pub price_feed: DeployedContract<C>,
    pub addresses_registry: DeployedContract<C>,
    pub trove_manager: DeployedContract<C>,
    pub trove_nft: DeployedContract<C>,
    pub stability_pool: DeployedContract<C>,
    pub active_pool: DeployedContract<C>,
    pub interest_router: DeployedContract<C>,
    pub default_pool: DeployedContract<C>,
    pub coll_surplus_pool: DeployedContract<C>,
    pub sorted_troves: DeployedContract<C>,
}

impl<C> BranchCore<C> {
    pub fn with_borrower_operations(
        self,
        borrower_operations: DeployedContract<C>,
    ) -> BranchContracts<C> {
        BranchContracts {
            core: self,
            borrower_operations,
        }
    }
}

/// All contracts of a wired branch.
#[derive(Debug, Deref)]
pub struct BranchContracts<C> {
    #[deref]
    pub core: BranchCore<C>,
    pub borrower_operations: DeployedContract<C>,
}

impl<C> BranchContracts<C> {
    /// `(contract, address)` pairs, for reporting.
    pub fn addresses(&self) -> Vec<(&str, Felt)> {
        let core = &self.core;
        let mut out = vec![("collateral", core.coll_token)];
        out.extend(
            [
                &core.price_feed,
                &core.addresses_registry,
                &core.trove_manager,
                &core.trove_nft,
                &core.stability_pool,
                &core.active_pool,
                &core.interest_router,
                &core.default_pool,
                &core.coll_surplus_pool,
                &core.sorted_troves,
                &self.borrower_operations,
            ]
            .into_iter()
            .map(|c| (c.name(), c.address())),
        );
        out
    }
}

/// Outcome of a successful run.
#[derive(Debug)]
pub struct ProtocolDeployment<C> {
    pub shared: SharedContracts<C>,
    pub branches: Vec<BranchContracts<C>>,
}

impl<C> ProtocolDeployment<C> {
    pub fn num_collaterals(&self) -> usize {
        self.branches.len()
    }

    pub fn collaterals(&self) -> Vec<Felt> {
        self.branches.iter().map(|b| b.coll_token).collect()
    }

    pub fn addresses_registries(&self) -> Vec<Felt> {
        self.branches
            .iter()
            .map(|b| b.addresses_registry.address())
            .collect()
    }

    pub fn trove_managers(&self) -> Vec<Felt> {
        self.branches
            .iter()
            .map(|b| b.trove_manager.address())
            .collect()
    }
}

/// Deploy the collateral registry for parallel lists of collaterals and trove managers.
///
/// Mismatched list lengths are rejected before anything is submitted.
pub async fn deploy_collateral_registry<C: ChainClient>(
    ctx: &DeployContext<C>,
    bitusd: &DeployedContract<C>,
    collaterals: &[Felt],
    trove_managers: &[Felt],
) -> Result<DeployedContract<C>> {
    if collaterals.len() != trove_managers.len() {
        return Err(DeployError::Encoding(format!(
            "collateral registry needs one trove manager per collateral, got {} collaterals and {} trove managers",
            collaterals.len(),
            trove_managers.len()
        )));
    }

    let felts = |list: &[Felt]| list.iter().copied().map(ArgValue::Felt).collect::<Vec<_>>();
    let args = Args::new()
        .with("bit_usd", bitusd)
        .with("collateral_tokens", felts(collaterals))
        .with("trove_managers", felts(trove_managers));

    ctx.deploy(ProtocolContract::CollateralRegistry.as_ref(), &args)
        .await
}

/// Leaves of one branch, from the first phase.
struct BranchLeaves<C> {
    coll_token: Felt,
    collateral: Option<DeployedContract<C>>,
    price_feed: DeployedContract<C>,
}

/// Runs the phased deployment of the whole protocol.
pub struct ProtocolDeployer<C> {
    ctx: DeployContext<C>,
    config: ProtocolConfig,
    log: DeploymentLog,
}

impl<C: ChainClient> ProtocolDeployer<C> {
    pub fn new(ctx: DeployContext<C>, config: ProtocolConfig) -> Self {
        Self {
            ctx,
            config,
            log: DeploymentLog::default(),
        }
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Record of what was deployed so far, including after a failure.
    pub fn log(&self) -> &DeploymentLog {
        &self.log
    }

    /// Deploy and wire the whole protocol. Stops at the first failure.
    pub async fn run(&mut self) -> Result<ProtocolDeployment<C>> {
        if self.config.branches.is_empty() {
            return Err(DeployError::Configuration(
                "at least one collateral branch is required".to_string(),
            ));
        }

        let branches = self.config.branches.clone();
        let deployer = self.ctx.deployer_address();

        tracing::info!(
            deployer = %deployer.to_fixed_hex_string(),
            branches = branches.len(),
            "Deploying protocol"
        );

        // Phase 1
        self.log.begin(DeploymentPhase::Leaves);
        let stablecoin_args = Args::new()
            .with("owner", deployer)
            .with("name", self.config.stablecoin.name.as_str())
            .with("symbol", self.config.stablecoin.symbol.as_str());
        let bitusd = self
            .deploy(None, ProtocolContract::BitUsd.as_ref(), &stablecoin_args)
            .await?;

        let mut leaves = Vec::with_capacity(branches.len());
        for branch in &branches {
            let label = Some(branch.label.as_str());
            let (coll_token, collateral) = match &branch.collateral {
                CollateralSource::Deploy { artifact } => {
                    let token = self.deploy(label, artifact, &Args::new()).await?;
                    (token.address(), Some(token))
                }
                CollateralSource::Existing { address } => {
                    tracing::info!(
                        branch = %branch.label,
                        address = %address.to_fixed_hex_string(),
                        "Using existing collateral token"
                    );
                    (*address, None)
                }
            };
            let price_feed = self.deploy(label, &branch.price_feed, &Args::new()).await?;
            leaves.push(BranchLeaves {
                coll_token,
                collateral,
                price_feed,
            });
        }
        self.log.complete(DeploymentPhase::Leaves);

        // Phase 2
        self.log.begin(DeploymentPhase::AddressesRegistries);
        let mut registries = Vec::with_capacity(branches.len());
        for branch in &branches {
            let args = branch.params.to_args().with("owner", deployer);
            let registry = self
                .deploy(
                    Some(&branch.label),
                    ProtocolContract::AddressesRegistry.as_ref(),
                    &args,
                )
                .await?;
            registries.push(registry);
        }
        self.log.complete(DeploymentPhase::AddressesRegistries);

        // Phase 3
        self.log.begin(DeploymentPhase::TroveManagers);
        let mut trove_managers = Vec::with_capacity(branches.len());
        for (branch, registry) in branches.iter().zip(&registries) {
            let args = Args::new().with("addresses_registry", registry);
            let trove_manager = self
                .deploy(
                    Some(&branch.label),
                    ProtocolContract::TroveManager.as_ref(),
                    &args,
                )
                .await?;
            trove_managers.push(trove_manager);
        }
        self.log.complete(DeploymentPhase::TroveManagers);

        // Phase 4
        self.log.begin(DeploymentPhase::CollateralRegistry);
        let collaterals: Vec<Felt> = leaves.iter().map(|l| l.coll_token).collect();
        let tm_addresses: Vec<Felt> = trove_managers.iter().map(|tm| tm.address()).collect();
        let collateral_registry =
            deploy_collateral_registry(&self.ctx, &bitusd, &collaterals, &tm_addresses).await?;
        self.log.record(
            DeploymentPhase::CollateralRegistry,
            None,
            &collateral_registry,
        );

        let (hint_helpers, multi_trove_getter) = if self.config.deploy_periphery {
            let args = Args::new().with("collateral_registry", &collateral_registry);
            let hint_helpers = self
                .deploy(None, ProtocolContract::HintHelpers.as_ref(), &args)
                .await?;
            let multi_trove_getter = self
                .deploy(None, ProtocolContract::MultiTroveGetter.as_ref(), &args)
                .await?;
            (Some(hint_helpers), Some(multi_trove_getter))
        } else {
            (None, None)
        };
        self.log.complete(DeploymentPhase::CollateralRegistry);

        let shared = SharedContracts {
            bitusd,
            collateral_registry,
            hint_helpers,
            multi_trove_getter,
            gas_token: self.config.gas_token,
        };

        // Phase 5
        self.log.begin(DeploymentPhase::BranchContracts);
        let mut cores = Vec::with_capacity(branches.len());
        for (((branch, leaves), addresses_registry), trove_manager) in branches
            .iter()
            .zip(leaves)
            .zip(registries)
            .zip(trove_managers)
        {
            let core = self
                .deploy_branch_contracts(branch, &shared, leaves, addresses_registry, trove_manager)
                .await?;
            cores.push(core);
        }
        self.log.complete(DeploymentPhase::BranchContracts);

        // Phase 6
        self.log.begin(DeploymentPhase::PlaceholderWiring);
        let mut placeholder_wired = Vec::with_capacity(cores.len());
        for core in cores {
            let wiring = BranchWiring::new(self.ctx.clone(), &shared, core, self.config.placeholder);
            placeholder_wired.push(wiring.wire_placeholders().await?);
        }
        self.log.complete(DeploymentPhase::PlaceholderWiring);

        // Phase 7
        self.log.begin(DeploymentPhase::BorrowerOperations);
        let mut bo_pending = Vec::with_capacity(placeholder_wired.len());
        for wiring in placeholder_wired {
            let wiring = wiring.deploy_borrower_operations().await?;
            self.log.record(
                DeploymentPhase::BorrowerOperations,
                Some(&wiring.core().label),
                wiring.borrower_operations(),
            );
            bo_pending.push(wiring);
        }
        self.log.complete(DeploymentPhase::BorrowerOperations);

        // Phases 8 and 9
        self.log.begin(DeploymentPhase::FinalWiring);
        let mut fully_wired = Vec::with_capacity(bo_pending.len());
        for wiring in bo_pending {
            fully_wired.push(wiring.finalize().await?);
        }
        self.log.complete(DeploymentPhase::FinalWiring);

        // Phase 10
        self.log.begin(DeploymentPhase::StablecoinLink);
        let mut branch_contracts = Vec::with_capacity(fully_wired.len());
        for wiring in fully_wired {
            branch_contracts.push(wiring.link_stablecoin().await?);
        }
        self.log.complete(DeploymentPhase::StablecoinLink);

        // Phase 11
        self.log.begin(DeploymentPhase::CollateralRegistryLink);
        shared
            .bitusd
            .invoke_positional(
                "set_collateral_registry",
                &[ArgValue::from(&shared.collateral_registry)],
            )
            .await?;
        self.log.complete(DeploymentPhase::CollateralRegistryLink);

        tracing::info!(
            collaterals = branch_contracts.len(),
            stablecoin = %shared.bitusd.address().to_fixed_hex_string(),
            collateral_registry = %shared.collateral_registry.address().to_fixed_hex_string(),
            "Protocol deployed"
        );

        Ok(ProtocolDeployment {
            shared,
            branches: branch_contracts,
        })
    }

    async fn deploy_branch_contracts(
        &mut self,
        branch: &BranchSpec,
        shared: &SharedContracts<C>,
        leaves: BranchLeaves<C>,
        addresses_registry: DeployedContract<C>,
        trove_manager: DeployedContract<C>,
    ) -> Result<BranchCore<C>> {
        let label = Some(branch.label.as_str());
        let registry_args = Args::new().with("addresses_registry", &addresses_registry);

        let nft = &self.config.trove_nft;
        let nft_args = registry_args
            .clone()
            .with("name", nft.name.as_str())
            .with("symbol", nft.symbol.as_str())
            .with("uri", nft.uri.as_str());
        let trove_nft = self
            .deploy(label, ProtocolContract::TroveNft.as_ref(), &nft_args)
            .await?;

        let stability_pool = self
            .deploy(label, ProtocolContract::StabilityPool.as_ref(), &registry_args)
            .await?;
        let active_pool = self
            .deploy(label, ProtocolContract::ActivePool.as_ref(), &registry_args)
            .await?;
        let interest_router = self
            .deploy(
                label,
                ProtocolContract::InterestRouterMock.as_ref(),
                &Args::new().with("bitusd", &shared.bitusd),
            )
            .await?;
        let default_pool = self
            .deploy(label, ProtocolContract::DefaultPool.as_ref(), &registry_args)
            .await?;
        let coll_surplus_pool = self
            .deploy(label, ProtocolContract::CollSurplusPool.as_ref(), &registry_args)
            .await?;
        let sorted_troves = self
            .deploy(label, ProtocolContract::SortedTroves.as_ref(), &registry_args)
            .await?;

        Ok(BranchCore {
            label: branch.label.clone(),
            coll_token: leaves.coll_token,
            collateral: leaves.collateral,
            price_feed: leaves.price_feed,
            addresses_registry,
            trove_manager,
            trove_nft,
            stability_pool,
            active_pool,
            interest_router,
            default_pool,
            coll_surplus_pool,
            sorted_troves,
        })
    }

    /// Deploy one contract and record it under the current phase.
    async fn deploy(
        &mut self,
        branch: Option<&str>,
        name: &str,
        args: &Args,
    ) -> Result<DeployedContract<C>> {
        let contract = self.ctx.deploy(name, args).await?;
        let phase = self.log.current.unwrap_or(DeploymentPhase::Leaves);
        self.log.record(phase, branch, &contract);
        Ok(contract)
    }
}
