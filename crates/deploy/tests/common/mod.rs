//! Shared fixtures: an in-memory chain and a build directory of contract artifacts.

#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet, VecDeque},
    path::Path,
    sync::Mutex,
    time::Duration,
};

use bitusd_deploy::{
    ArtifactStore, ChainClient, ChainError, ContractArtifact, DeployContext, Declaration,
    DeploySubmission, FinalityPolicy, Invocation, TxStatus,
};
use serde_json::{Value, json};
use starknet::core::{types::Felt, utils::get_selector_from_name};
use tempdir::TempDir;

/// Address of the account the mock signs with.
pub const DEPLOYER: Felt = Felt::from_hex_unchecked("0xde9107e4");

const ADDRESS: &str = "core::starknet::contract_address::ContractAddress";
const U256: &str = "core::integer::u256";
const BYTE_ARRAY: &str = "core::byte_array::ByteArray";
const ADDRESS_SPAN: &str = "core::array::Span::<core::starknet::contract_address::ContractAddress>";

const REGISTRY_SLOTS: [&str; 18] = [
    "active_pool",
    "default_pool",
    "price_feed",
    "hint_helpers",
    "multi_trove_getter",
    "metadata_nft",
    "gas_token",
    "borrower_operations",
    "trove_manager",
    "trove_nft",
    "gas_pool",
    "coll_surplus_pool",
    "sorted_troves",
    "collateral_registry",
    "bitusd_token",
    "interest_router",
    "stability_pool",
    "coll_token",
];

const TROVE_MANAGER_SLOTS: [&str; 12] = [
    "active_pool",
    "default_pool",
    "price_feed",
    "gas_token",
    "borrower_operations",
    "trove_nft",
    "gas_pool",
    "coll_surplus_pool",
    "sorted_troves",
    "collateral_registry",
    "bitusd_token",
    "stability_pool",
];

/// A contract deployment accepted by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployRecord {
    pub name: String,
    pub address: Felt,
    pub calldata: Vec<Felt>,
}

#[derive(Debug, Default)]
struct MockState {
    next_id: u64,
    classes: HashMap<Felt, String>,
    declared: HashSet<Felt>,
    deploys: Vec<DeployRecord>,
    invocations: Vec<Invocation>,
    calls: Vec<Invocation>,
    /// Consumed by status polls before anything else.
    scripted: VecDeque<Result<TxStatus, ChainError>>,
    reverted: HashSet<Felt>,
    default_status: Option<TxStatus>,
    reject_deploy: Option<String>,
    revert_deploy: Option<String>,
    revert_invoke: Option<Felt>,
    hang_status: bool,
    status_polls: usize,
}

impl MockState {
    fn next(&mut self) -> Felt {
        self.next_id += 1;
        Felt::from(0x1000 + self.next_id)
    }
}

/// In-memory [`ChainClient`] recording every submission.
///
/// Addresses and hashes are handed out from a counter, and every transaction
/// succeeds unless a fault was injected.
#[derive(Debug, Default)]
pub struct MockChain {
    state: Mutex<MockState>,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// The deployment of the named artifact is refused by the node.
    pub fn reject_deploy(self, name: &str) -> Self {
        self.state.lock().unwrap().reject_deploy = Some(name.to_string());
        self
    }

    /// The deployment of the named artifact is accepted, then reverts.
    pub fn revert_deploy(self, name: &str) -> Self {
        self.state.lock().unwrap().revert_deploy = Some(name.to_string());
        self
    }

    /// Every invocation of `entrypoint` is accepted, then reverts.
    pub fn revert_invoke(self, entrypoint: &str) -> Self {
        self.state.lock().unwrap().revert_invoke = Some(selector(entrypoint));
        self
    }

    /// Answers for the next status polls, in order.
    pub fn script_statuses(self, statuses: Vec<Result<TxStatus, ChainError>>) -> Self {
        self.state.lock().unwrap().scripted.extend(statuses);
        self
    }

    /// Status polls are counted, then never answer.
    pub fn hang_status(self) -> Self {
        self.state.lock().unwrap().hang_status = true;
        self
    }

    /// Status reported once the script is exhausted.
    pub fn default_status(self, status: TxStatus) -> Self {
        self.state.lock().unwrap().default_status = Some(status);
        self
    }

    pub fn deploys(&self) -> Vec<DeployRecord> {
        self.state.lock().unwrap().deploys.clone()
    }

    pub fn deployed_names(&self) -> Vec<String> {
        self.deploys().into_iter().map(|d| d.name).collect()
    }

    /// The first deployment of `name`.
    pub fn deploy_of(&self, name: &str) -> Option<DeployRecord> {
        self.deploys().into_iter().find(|d| d.name == name)
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.state.lock().unwrap().invocations.clone()
    }

    /// Invocations of `entrypoint` on any contract, in submission order.
    pub fn invocations_of(&self, entrypoint: &str) -> Vec<Invocation> {
        let selector = selector(entrypoint);
        self.invocations()
            .into_iter()
            .filter(|i| i.selector == selector)
            .collect()
    }

    /// Invocations of `entrypoint` on the contract at `to`.
    pub fn invocations_on(&self, to: Felt, entrypoint: &str) -> Vec<Invocation> {
        self.invocations_of(entrypoint)
            .into_iter()
            .filter(|i| i.to == to)
            .collect()
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn declarations(&self) -> usize {
        self.state.lock().unwrap().declared.len()
    }

    pub fn status_polls(&self) -> usize {
        self.state.lock().unwrap().status_polls
    }
}

impl ChainClient for MockChain {
    fn account_address(&self) -> Felt {
        DEPLOYER
    }

    async fn declare(&self, artifact: &ContractArtifact) -> Result<Declaration, ChainError> {
        let mut state = self.state.lock().unwrap();
        let class_hash = Felt::from_bytes_be_slice(artifact.name.as_bytes());
        state.classes.insert(class_hash, artifact.name.clone());

        let transaction_hash = if state.declared.insert(class_hash) {
            Some(state.next())
        } else {
            None
        };

        Ok(Declaration {
            class_hash,
            transaction_hash,
        })
    }

    async fn deploy(
        &self,
        class_hash: Felt,
        calldata: Vec<Felt>,
        _salt: Felt,
    ) -> Result<DeploySubmission, ChainError> {
        let mut state = self.state.lock().unwrap();
        let name = state
            .classes
            .get(&class_hash)
            .cloned()
            .ok_or_else(|| ChainError::Rejected("class is not declared".to_string()))?;

        if state.reject_deploy.as_deref() == Some(name.as_str()) {
            return Err(ChainError::Rejected(format!("cannot deploy {name}")));
        }

        let address = state.next();
        let transaction_hash = state.next();
        if state.revert_deploy.as_deref() == Some(name.as_str()) {
            state.reverted.insert(transaction_hash);
        }

        state.deploys.push(DeployRecord {
            name,
            address,
            calldata,
        });

        Ok(DeploySubmission {
            address,
            class_hash,
            transaction_hash,
        })
    }

    async fn invoke(&self, invocation: Invocation) -> Result<Felt, ChainError> {
        let mut state = self.state.lock().unwrap();
        let transaction_hash = state.next();
        if state.revert_invoke == Some(invocation.selector) {
            state.reverted.insert(transaction_hash);
        }
        state.invocations.push(invocation);
        Ok(transaction_hash)
    }

    async fn call(&self, invocation: Invocation) -> Result<Vec<Felt>, ChainError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(invocation);
        Ok(vec![Felt::ONE])
    }

    async fn transaction_status(&self, transaction_hash: Felt) -> Result<TxStatus, ChainError> {
        let hang = {
            let mut state = self.state.lock().unwrap();
            state.status_polls += 1;
            state.hang_status
        };
        if hang {
            std::future::pending::<()>().await;
        }

        let mut state = self.state.lock().unwrap();

        if let Some(scripted) = state.scripted.pop_front() {
            return scripted;
        }
        if state.reverted.contains(&transaction_hash) {
            return Ok(TxStatus::Reverted("execution reverted".to_string()));
        }
        Ok(state.default_status.clone().unwrap_or(TxStatus::Succeeded))
    }
}

pub fn selector(entrypoint: &str) -> Felt {
    get_selector_from_name(entrypoint).expect("valid entrypoint name")
}

/// Initialize tracing for tests (idempotent).
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init()
        .ok();
}

/// Finality settings small enough for tests.
pub fn fast_finality() -> FinalityPolicy {
    FinalityPolicy {
        poll_interval: Duration::from_millis(1),
        timeout: Duration::from_millis(200),
        max_transient_retries: 3,
    }
}

/// A deploy context over a temporary build directory.
pub struct Harness {
    _build_dir: TempDir,
    pub ctx: DeployContext<MockChain>,
}

impl Harness {
    pub fn new(chain: MockChain) -> Self {
        Self::with_finality(chain, fast_finality())
    }

    pub fn with_finality(chain: MockChain, finality: FinalityPolicy) -> Self {
        init_tracing();
        let build_dir = TempDir::new("bitusd-build").expect("Failed to create temp dir");
        let store = ArtifactStore::new(build_dir.path(), "bit_usd");
        write_artifacts(&store);

        Self {
            _build_dir: build_dir,
            ctx: DeployContext::new(chain, store, finality),
        }
    }

    pub fn chain(&self) -> &MockChain {
        self.ctx.chain()
    }
}

fn params(inputs: &[(&str, &str)]) -> Value {
    inputs
        .iter()
        .map(|(name, ty)| json!({ "name": name, "type": ty }))
        .collect()
}

fn constructor(inputs: &[(&str, &str)]) -> Value {
    json!({ "type": "constructor", "name": "constructor", "inputs": params(inputs) })
}

fn function(name: &str, inputs: &[(&str, &str)]) -> Value {
    json!({
        "type": "function",
        "name": name,
        "inputs": params(inputs),
        "outputs": [],
        "state_mutability": "external"
    })
}

fn interface(name: &str, items: Vec<Value>) -> Value {
    json!({ "type": "interface", "name": name, "items": items })
}

fn addresses<'a>(names: &[&'a str]) -> Vec<(&'a str, &'static str)> {
    names.iter().map(|name| (*name, ADDRESS)).collect()
}

fn registry_only() -> Value {
    constructor(&[("addresses_registry", ADDRESS)])
}

fn refresh() -> Value {
    function("set_addresses", &[("addresses_registry", ADDRESS)])
}

fn abis() -> Vec<(&'static str, Vec<Value>)> {
    let token = vec![
        function("mint", &[("account", ADDRESS), ("amount", U256)]),
        function("approve", &[("spender", ADDRESS), ("amount", U256)]),
    ];

    vec![
        (
            "BitUSD",
            vec![
                constructor(&[("owner", ADDRESS), ("name", BYTE_ARRAY), ("symbol", BYTE_ARRAY)]),
                interface(
                    "bit_usd::IBitUSD",
                    vec![
                        function("set_collateral_registry", &[("collateral_registry", ADDRESS)]),
                        function(
                            "set_branch_addresses",
                            &addresses(&[
                                "trove_manager",
                                "stability_pool",
                                "borrower_operations",
                                "active_pool",
                            ]),
                        ),
                    ],
                ),
            ],
        ),
        ("TBTC", token.clone()),
        ("WBTC", token),
        ("PriceFeed", vec![]),
        (
            "AddressesRegistry",
            vec![
                constructor(&[
                    ("owner", ADDRESS),
                    ("ccr", U256),
                    ("mcr", U256),
                    ("bcr", U256),
                    ("scr", U256),
                    ("liquidation_penalty_sp", U256),
                    ("liquidation_penalty_redistribution", U256),
                ]),
                function("set_addresses", &addresses(&REGISTRY_SLOTS)),
                function("set_borrower_operations", &[("borrower_operations", ADDRESS)]),
            ],
        ),
        (
            "TroveManager",
            vec![
                registry_only(),
                function("set_addresses", &addresses(&TROVE_MANAGER_SLOTS)),
                function("get_entire_branch_debt", &[]),
            ],
        ),
        (
            "CollateralRegistry",
            vec![constructor(&[
                ("bit_usd", ADDRESS),
                ("collateral_tokens", ADDRESS_SPAN),
                ("trove_managers", ADDRESS_SPAN),
            ])],
        ),
        (
            "HintHelpers",
            vec![constructor(&[("collateral_registry", ADDRESS)])],
        ),
        (
            "MultiTroveGetter",
            vec![constructor(&[("collateral_registry", ADDRESS)])],
        ),
        (
            "TroveNFT",
            vec![
                constructor(&[
                    ("addresses_registry", ADDRESS),
                    ("name", BYTE_ARRAY),
                    ("symbol", BYTE_ARRAY),
                    ("uri", BYTE_ARRAY),
                ]),
                refresh(),
            ],
        ),
        ("StabilityPool", vec![registry_only(), refresh()]),
        ("ActivePool", vec![registry_only(), refresh()]),
        (
            "InterestRouterMock",
            vec![constructor(&[("bitusd", ADDRESS)])],
        ),
        ("DefaultPool", vec![registry_only()]),
        ("CollSurplusPool", vec![registry_only(), refresh()]),
        ("SortedTroves", vec![registry_only(), refresh()]),
        (
            "BorrowerOperations",
            vec![
                registry_only(),
                function(
                    "open_trove",
                    &[
                        ("owner", ADDRESS),
                        ("owner_index", U256),
                        ("coll_amount", U256),
                        ("bitusd_amount", U256),
                        ("upper_hint", U256),
                        ("lower_hint", U256),
                        ("annual_interest_rate", U256),
                        ("max_upfront_fee", U256),
                        ("add_manager", ADDRESS),
                        ("remove_manager", ADDRESS),
                        ("receiver", ADDRESS),
                    ],
                ),
            ],
        ),
    ]
}

/// Write a class and a compiled class for every protocol contract.
pub fn write_artifacts(store: &ArtifactStore) {
    for (name, abi) in abis() {
        write_json(&store.class_path(name), &json!({ "abi": abi, "sierra_program": [] }));
        write_json(&store.compiled_class_path(name), &json!({}));
    }
}

fn write_json(path: &Path, value: &Value) {
    std::fs::write(path, value.to_string()).expect("Failed to write artifact");
}
