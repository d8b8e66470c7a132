//! End-to-end runs of the protocol deployment against an in-memory chain.
//!
//! Run with: cargo test --test orchestration_test

mod common;

use bitusd_deploy::{
    BranchSpec, ChainError, CollateralSource, DeployError, DeployedContract, DeploymentManifest,
    DeploymentPhase, OpenTroveParams, PlaceholderPolicy, ProtocolConfig, ProtocolDeployer,
    RegistrySlot, deploy_collateral_registry, open_trove,
    params::percent,
    protocol::{BranchCore, SharedContracts},
    wiring::{BranchWiring, EXTERNAL_SLOTS},
};
use common::{DEPLOYER, Harness, MockChain};
use starknet::core::types::Felt;
use strum::IntoEnumIterator;

/// Position of a slot in the registry's `set_addresses` calldata.
fn slot_index(slot: RegistrySlot) -> usize {
    RegistrySlot::iter()
        .position(|s| s == slot)
        .expect("slot is declared")
}

fn u256_felts(value: u128) -> [Felt; 2] {
    [Felt::from(value), Felt::ZERO]
}

#[tokio::test]
async fn test_single_branch_deployment() {
    let harness = Harness::new(MockChain::new());
    let mut deployer = ProtocolDeployer::new(harness.ctx.clone(), ProtocolConfig::default());

    let deployment = deployer.run().await.expect("deployment should succeed");
    let chain = harness.chain();

    assert_eq!(deployment.num_collaterals(), 1);
    assert_eq!(
        chain.deployed_names(),
        vec![
            "BitUSD",
            "TBTC",
            "PriceFeed",
            "AddressesRegistry",
            "TroveManager",
            "CollateralRegistry",
            "TroveNFT",
            "StabilityPool",
            "ActivePool",
            "InterestRouterMock",
            "DefaultPool",
            "CollSurplusPool",
            "SortedTroves",
            "BorrowerOperations",
        ]
    );

    let log = deployer.log();
    assert_eq!(log.failed_phase(), None);
    assert_eq!(
        log.completed_phases(),
        &[
            DeploymentPhase::Leaves,
            DeploymentPhase::AddressesRegistries,
            DeploymentPhase::TroveManagers,
            DeploymentPhase::CollateralRegistry,
            DeploymentPhase::BranchContracts,
            DeploymentPhase::PlaceholderWiring,
            DeploymentPhase::BorrowerOperations,
            DeploymentPhase::FinalWiring,
            DeploymentPhase::StablecoinLink,
            DeploymentPhase::CollateralRegistryLink,
        ]
    );
    assert_eq!(log.entries().len(), 14);

    let branch = &deployment.branches[0];
    let bo_entry = log
        .by_address(branch.borrower_operations.address())
        .expect("borrower operations is logged");
    assert_eq!(bo_entry.phase, DeploymentPhase::BorrowerOperations);
    assert_eq!(bo_entry.branch.as_deref(), Some("tbtc"));
}

#[tokio::test]
async fn test_stablecoin_linked_to_branch_and_registry() {
    let harness = Harness::new(MockChain::new());
    let mut deployer = ProtocolDeployer::new(harness.ctx.clone(), ProtocolConfig::default());
    let deployment = deployer.run().await.expect("deployment should succeed");
    let chain = harness.chain();

    let branch = &deployment.branches[0];
    let links = chain.invocations_of("set_branch_addresses");
    assert_eq!(links.len(), 1);
    assert_eq!(links[0].to, deployment.shared.bitusd.address());
    assert_eq!(
        links[0].calldata,
        vec![
            branch.trove_manager.address(),
            branch.stability_pool.address(),
            branch.borrower_operations.address(),
            branch.active_pool.address(),
        ]
    );

    let last = chain.invocations().pop().expect("invocations were sent");
    assert_eq!(last.selector, common::selector("set_collateral_registry"));
    assert_eq!(last.to, deployment.shared.bitusd.address());
    assert_eq!(
        last.calldata,
        vec![deployment.shared.collateral_registry.address()]
    );
}

#[tokio::test]
async fn test_wiring_order() {
    let harness = Harness::new(MockChain::new());
    let mut deployer = ProtocolDeployer::new(harness.ctx.clone(), ProtocolConfig::default());
    let deployment = deployer.run().await.expect("deployment should succeed");
    let branch = &deployment.branches[0];

    let targets: Vec<(Felt, Felt)> = harness
        .chain()
        .invocations()
        .into_iter()
        .map(|i| (i.to, i.selector))
        .collect();

    let set_addresses = common::selector("set_addresses");
    assert_eq!(
        targets,
        vec![
            (branch.addresses_registry.address(), set_addresses),
            (branch.addresses_registry.address(), set_addresses),
            (
                branch.addresses_registry.address(),
                common::selector("set_borrower_operations")
            ),
            (branch.active_pool.address(), set_addresses),
            (branch.coll_surplus_pool.address(), set_addresses),
            (branch.sorted_troves.address(), set_addresses),
            (branch.trove_manager.address(), set_addresses),
            (branch.trove_nft.address(), set_addresses),
            (branch.stability_pool.address(), set_addresses),
            (
                deployment.shared.bitusd.address(),
                common::selector("set_branch_addresses")
            ),
            (
                deployment.shared.bitusd.address(),
                common::selector("set_collateral_registry")
            ),
        ]
    );
}

#[tokio::test]
async fn test_registry_written_with_placeholders_then_real_addresses() {
    let harness = Harness::new(MockChain::new());
    let config = ProtocolConfig::default();
    let mut deployer = ProtocolDeployer::new(harness.ctx.clone(), config.clone());
    let deployment = deployer.run().await.expect("deployment should succeed");
    let chain = harness.chain();

    let branch = &deployment.branches[0];
    let writes = chain.invocations_on(branch.addresses_registry.address(), "set_addresses");
    assert_eq!(writes.len(), 2);

    let placeholder = branch.active_pool.address();
    let bo_slot = slot_index(RegistrySlot::BorrowerOperations);

    let first = &writes[0].calldata;
    assert_eq!(first.len(), 18);
    assert_eq!(first[bo_slot], placeholder);

    let second = &writes[1].calldata;
    assert_eq!(second[bo_slot], branch.borrower_operations.address());
    assert_eq!(second[slot_index(RegistrySlot::ActivePool)], branch.active_pool.address());
    assert_eq!(second[slot_index(RegistrySlot::TroveManager)], branch.trove_manager.address());
    assert_eq!(second[slot_index(RegistrySlot::GasToken)], config.gas_token);
    assert_eq!(second[slot_index(RegistrySlot::CollToken)], branch.coll_token);
    assert_eq!(
        second[slot_index(RegistrySlot::BitusdToken)],
        deployment.shared.bitusd.address()
    );
    assert_eq!(
        second[slot_index(RegistrySlot::CollateralRegistry)],
        deployment.shared.collateral_registry.address()
    );

    // Never deployed by this tool, or periphery left out.
    for slot in EXTERNAL_SLOTS
        .into_iter()
        .chain([RegistrySlot::HintHelpers, RegistrySlot::MultiTroveGetter])
    {
        assert_eq!(second[slot_index(slot)], placeholder, "slot {slot}");
    }

    let bo_link = chain.invocations_on(branch.addresses_registry.address(), "set_borrower_operations");
    assert_eq!(bo_link.len(), 1);
    assert_eq!(bo_link[0].calldata, vec![branch.borrower_operations.address()]);

    let tm_write = chain.invocations_on(branch.trove_manager.address(), "set_addresses");
    assert_eq!(tm_write.len(), 1);
    assert_eq!(tm_write[0].calldata.len(), 12);
    assert_eq!(tm_write[0].calldata[4], branch.borrower_operations.address());
    assert_eq!(tm_write[0].calldata[11], branch.stability_pool.address());
}

#[tokio::test]
async fn test_zero_placeholder_policy() {
    let harness = Harness::new(MockChain::new());
    let config = ProtocolConfig {
        placeholder: PlaceholderPolicy::Zero,
        ..Default::default()
    };
    let mut deployer = ProtocolDeployer::new(harness.ctx.clone(), config);
    let deployment = deployer.run().await.expect("deployment should succeed");

    let branch = &deployment.branches[0];
    let writes = harness
        .chain()
        .invocations_on(branch.addresses_registry.address(), "set_addresses");

    assert_eq!(writes[0].calldata[slot_index(RegistrySlot::BorrowerOperations)], Felt::ZERO);
    for slot in EXTERNAL_SLOTS {
        assert_eq!(writes[1].calldata[slot_index(slot)], Felt::ZERO, "slot {slot}");
    }
}

#[tokio::test]
async fn test_periphery_fills_registry_slots() {
    let harness = Harness::new(MockChain::new());
    let config = ProtocolConfig {
        deploy_periphery: true,
        ..Default::default()
    };
    let mut deployer = ProtocolDeployer::new(harness.ctx.clone(), config);
    let deployment = deployer.run().await.expect("deployment should succeed");
    let chain = harness.chain();

    let hint_helpers = deployment.shared.hint_helpers.as_ref().expect("deployed");
    let multi_trove_getter = deployment.shared.multi_trove_getter.as_ref().expect("deployed");

    let record = chain.deploy_of("HintHelpers").expect("deployed");
    assert_eq!(record.calldata, vec![deployment.shared.collateral_registry.address()]);

    let branch = &deployment.branches[0];
    let writes = chain.invocations_on(branch.addresses_registry.address(), "set_addresses");
    assert_eq!(
        writes[1].calldata[slot_index(RegistrySlot::HintHelpers)],
        hint_helpers.address()
    );
    assert_eq!(
        writes[1].calldata[slot_index(RegistrySlot::MultiTroveGetter)],
        multi_trove_getter.address()
    );
}

#[tokio::test]
async fn test_registry_constructor_receives_scaled_ratios() {
    let harness = Harness::new(MockChain::new());
    let mut deployer = ProtocolDeployer::new(harness.ctx.clone(), ProtocolConfig::default());
    deployer.run().await.expect("deployment should succeed");

    let record = harness
        .chain()
        .deploy_of("AddressesRegistry")
        .expect("registry deployed");

    let mut expected = vec![DEPLOYER];
    for value in [
        1_500_000_000_000_000_000u128,
        1_100_000_000_000_000_000,
        100_000_000_000_000_000,
        1_100_000_000_000_000_000,
        50_000_000_000_000_000,
        100_000_000_000_000_000,
    ] {
        expected.extend(u256_felts(value));
    }
    assert_eq!(record.calldata, expected);
}

#[tokio::test]
async fn test_two_branches() {
    let existing = Felt::from_hex_unchecked("0xabc");
    let harness = Harness::new(MockChain::new());
    let config = ProtocolConfig {
        branches: vec![
            BranchSpec::default(),
            BranchSpec {
                label: "wbtc".to_string(),
                collateral: CollateralSource::Existing { address: existing },
                params: bitusd_deploy::TroveManagerParams {
                    mcr: percent(120),
                    ..Default::default()
                },
                ..Default::default()
            },
        ],
        ..Default::default()
    };
    let mut deployer = ProtocolDeployer::new(harness.ctx.clone(), config);
    let deployment = deployer.run().await.expect("deployment should succeed");
    let chain = harness.chain();

    assert_eq!(deployment.num_collaterals(), 2);
    assert_eq!(deployment.collaterals()[1], existing);
    assert!(deployment.branches[1].collateral.is_none());

    let names = chain.deployed_names();
    assert_eq!(names.iter().filter(|n| *n == "TBTC").count(), 1);
    assert_eq!(names.iter().filter(|n| *n == "BorrowerOperations").count(), 2);

    // Parallel lists: one trove manager per collateral, in branch order.
    let registry = chain.deploy_of("CollateralRegistry").expect("deployed");
    let tms = deployment.trove_managers();
    assert_eq!(
        registry.calldata,
        vec![
            deployment.shared.bitusd.address(),
            Felt::TWO,
            deployment.collaterals()[0],
            existing,
            Felt::TWO,
            tms[0],
            tms[1],
        ]
    );

    let registries: Vec<Felt> = chain
        .deploys()
        .into_iter()
        .filter(|d| d.name == "AddressesRegistry")
        .map(|d| d.address)
        .collect();
    assert_eq!(deployment.addresses_registries(), registries);

    let links = chain.invocations_of("set_branch_addresses");
    assert_eq!(links.len(), 2);
    assert_eq!(links[1].calldata[0], tms[1]);

    let mcr_calldata: Vec<Felt> = chain
        .deploys()
        .into_iter()
        .filter(|d| d.name == "AddressesRegistry")
        .map(|d| d.calldata[3])
        .collect();
    assert_eq!(
        mcr_calldata,
        vec![
            Felt::from(1_100_000_000_000_000_000u128),
            Felt::from(1_200_000_000_000_000_000u128)
        ]
    );

    let manifest = DeploymentManifest::new("devnet", DEPLOYER, deployer.config(), &deployment)
        .expect("manifest should build");
    assert_eq!(manifest.branches.len(), 2);
    assert_eq!(
        manifest.branch_contract("wbtc", "BorrowerOperations"),
        Some(deployment.branches[1].borrower_operations.address())
    );
    assert_eq!(manifest.branch_contract("wbtc", "collateral"), Some(existing));
}

#[tokio::test]
async fn test_failure_stops_run_and_keeps_log() {
    let harness = Harness::new(MockChain::new().reject_deploy("ActivePool"));
    let mut deployer = ProtocolDeployer::new(harness.ctx.clone(), ProtocolConfig::default());

    let err = deployer.run().await.expect_err("deployment should fail");
    match err {
        DeployError::DeploymentFailed { contract, source } => {
            assert_eq!(contract, "ActivePool");
            assert!(matches!(source, ChainError::Rejected(_)));
        }
        other => panic!("unexpected error: {other:?}"),
    }

    let log = deployer.log();
    assert_eq!(log.failed_phase(), Some(DeploymentPhase::BranchContracts));
    assert_eq!(
        log.completed_phases().last(),
        Some(&DeploymentPhase::CollateralRegistry)
    );
    assert_eq!(log.by_name("StabilityPool").count(), 1);
    assert_eq!(log.by_name("ActivePool").count(), 0);

    let chain = harness.chain();
    assert_eq!(chain.deployed_names().last().map(String::as_str), Some("StabilityPool"));
    assert!(chain.invocations().is_empty());
}

#[tokio::test]
async fn test_empty_branch_list_rejected() {
    let harness = Harness::new(MockChain::new());
    let config = ProtocolConfig {
        branches: vec![],
        ..Default::default()
    };
    let mut deployer = ProtocolDeployer::new(harness.ctx.clone(), config);

    let err = deployer.run().await.expect_err("no branch to deploy");
    assert!(matches!(err, DeployError::Configuration(_)));
    assert!(harness.chain().deploys().is_empty());
}

#[tokio::test]
async fn test_collateral_registry_length_mismatch() {
    let harness = Harness::new(MockChain::new());
    let bitusd = harness
        .ctx
        .connect(Felt::from_hex_unchecked("0xb17"), "BitUSD")
        .expect("artifact exists");

    let err = deploy_collateral_registry(
        &harness.ctx,
        &bitusd,
        &[Felt::ONE, Felt::TWO],
        &[Felt::from(3u64)],
    )
    .await
    .expect_err("lists differ in length");

    assert!(matches!(err, DeployError::Encoding(_)));
    assert_eq!(harness.chain().declarations(), 0);
    assert!(harness.chain().deploys().is_empty());
}

#[tokio::test]
async fn test_open_trove_call_sequence() {
    let harness = Harness::new(MockChain::new());
    let bo_address = Felt::from_hex_unchecked("0xb0");
    let coll_address = Felt::from_hex_unchecked("0xc011");
    let borrower_operations = harness
        .ctx
        .connect(bo_address, "BorrowerOperations")
        .expect("artifact exists");
    let collateral = harness.ctx.connect(coll_address, "TBTC").expect("artifact exists");

    let params = OpenTroveParams::default();
    open_trove(&borrower_operations, &collateral, &params)
        .await
        .expect("trove should open");

    let invocations = harness.chain().invocations();
    assert_eq!(invocations.len(), 3);

    let one_coin = u256_felts(1_000_000_000_000_000_000);
    assert_eq!(invocations[0].to, coll_address);
    assert_eq!(invocations[0].selector, common::selector("mint"));
    assert_eq!(invocations[0].calldata, vec![DEPLOYER, one_coin[0], one_coin[1]]);

    assert_eq!(invocations[1].selector, common::selector("approve"));
    assert_eq!(invocations[1].calldata, vec![bo_address, one_coin[0], one_coin[1]]);

    let open = &invocations[2];
    assert_eq!(open.to, bo_address);
    assert_eq!(open.selector, common::selector("open_trove"));
    assert_eq!(open.calldata.len(), 1 + 7 * 2 + 3);
    assert_eq!(open.calldata[0], DEPLOYER);
    // max_upfront_fee is unbounded.
    assert_eq!(open.calldata[13], Felt::from(u128::MAX));
    assert_eq!(open.calldata[14], Felt::from(u128::MAX));
    assert_eq!(&open.calldata[15..], &[Felt::ZERO; 3]);
}

fn connect(harness: &Harness, name: &str, address: u64) -> DeployedContract<MockChain> {
    harness
        .ctx
        .connect(Felt::from(address), name)
        .expect("artifact exists")
}

fn existing_shared(harness: &Harness) -> SharedContracts<MockChain> {
    SharedContracts {
        bitusd: connect(harness, "BitUSD", 0xb17),
        collateral_registry: connect(harness, "CollateralRegistry", 0xc0),
        hint_helpers: None,
        multi_trove_getter: None,
        gas_token: Felt::from(0x9a5u64),
    }
}

fn existing_core(harness: &Harness) -> BranchCore<MockChain> {
    BranchCore {
        label: "tbtc".to_string(),
        coll_token: Felt::from(0xc011u64),
        collateral: None,
        price_feed: connect(harness, "PriceFeed", 0x11),
        addresses_registry: connect(harness, "AddressesRegistry", 0x12),
        trove_manager: connect(harness, "TroveManager", 0x13),
        trove_nft: connect(harness, "TroveNFT", 0x14),
        stability_pool: connect(harness, "StabilityPool", 0x15),
        active_pool: connect(harness, "ActivePool", 0x16),
        interest_router: connect(harness, "InterestRouterMock", 0x17),
        default_pool: connect(harness, "DefaultPool", 0x18),
        coll_surplus_pool: connect(harness, "CollSurplusPool", 0x19),
        sorted_troves: connect(harness, "SortedTroves", 0x1a),
    }
}

#[tokio::test]
async fn test_placeholder_follows_policy() {
    let harness = Harness::new(MockChain::new());
    let shared = existing_shared(&harness);

    let wiring = BranchWiring::new(
        harness.ctx.clone(),
        &shared,
        existing_core(&harness),
        PlaceholderPolicy::ActivePool,
    );
    assert_eq!(wiring.placeholder(), Felt::from(0x16u64));

    let wiring = BranchWiring::new(
        harness.ctx.clone(),
        &shared,
        existing_core(&harness),
        PlaceholderPolicy::Zero,
    );
    assert_eq!(wiring.placeholder(), Felt::ZERO);
}

#[tokio::test]
async fn test_unresolved_slots_shrink_as_wiring_progresses() {
    let harness = Harness::new(MockChain::new());
    let shared = existing_shared(&harness);
    let wiring = BranchWiring::new(
        harness.ctx.clone(),
        &shared,
        existing_core(&harness),
        PlaceholderPolicy::ActivePool,
    );

    let wiring = wiring.wire_placeholders().await.expect("registry written");
    assert_eq!(
        wiring.unresolved_slots(),
        vec![
            RegistrySlot::HintHelpers,
            RegistrySlot::MultiTroveGetter,
            RegistrySlot::BorrowerOperations,
        ]
    );
    let written = harness
        .chain()
        .invocations_on(Felt::from(0x12u64), "set_addresses");
    assert_eq!(
        written[0].calldata[slot_index(RegistrySlot::BorrowerOperations)],
        wiring.placeholder()
    );

    let wiring = wiring
        .deploy_borrower_operations()
        .await
        .expect("borrower operations deployed");
    assert_eq!(
        wiring.unresolved_slots(),
        vec![RegistrySlot::HintHelpers, RegistrySlot::MultiTroveGetter]
    );
    assert_eq!(
        wiring.registry_addresses().get(RegistrySlot::BorrowerOperations),
        wiring.borrower_operations().address()
    );
    for slot in EXTERNAL_SLOTS {
        assert_eq!(wiring.registry_addresses().get(slot), wiring.placeholder());
    }
}
