//! Persisted summary of a deployment run.

use std::{collections::BTreeMap, path::Path};

use anyhow::{Context, Result};
use comfy_table::Table;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use starknet::core::types::Felt;

use crate::protocol::{DeploymentLog, ProtocolConfig, ProtocolDeployment};

/// Default location of the manifest.
pub const DEFAULT_MANIFEST_PATH: &str = "deployments.json";

/// Addresses of one branch, by contract name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchManifest {
    pub label: String,
    pub contracts: BTreeMap<String, Felt>,
}

/// Everything a follow-up command needs to reach a deployed protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentManifest {
    pub network: String,
    pub deployer: Felt,
    /// SHA-256 of the protocol configuration.
    pub config_hash: String,
    /// RFC 3339 timestamp.
    pub deployed_at: String,
    pub tool_version: String,
    pub stablecoin: Felt,
    pub collateral_registry: Felt,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint_helpers: Option<Felt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_trove_getter: Option<Felt>,
    pub branches: Vec<BranchManifest>,
}

/// Deterministic hash of a protocol configuration.
pub fn config_hash(config: &ProtocolConfig) -> Result<String> {
    let json = serde_json::to_string(config).context("Failed to serialize protocol config")?;

    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

impl DeploymentManifest {
    pub fn new<C>(
        network: &str,
        deployer: Felt,
        config: &ProtocolConfig,
        deployment: &ProtocolDeployment<C>,
    ) -> Result<Self> {
        let branches = deployment
            .branches
            .iter()
            .map(|branch| BranchManifest {
                label: branch.label.clone(),
                contracts: branch
                    .addresses()
                    .into_iter()
                    .map(|(name, address)| (name.to_string(), address))
                    .collect(),
            })
            .collect();

        let shared = &deployment.shared;
        Ok(Self {
            network: network.to_string(),
            deployer,
            config_hash: config_hash(config)?,
            deployed_at: chrono::Utc::now().to_rfc3339(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
            stablecoin: shared.bitusd.address(),
            collateral_registry: shared.collateral_registry.address(),
            hint_helpers: shared.hint_helpers.as_ref().map(|c| c.address()),
            multi_trove_getter: shared.multi_trove_getter.as_ref().map(|c| c.address()),
            branches,
        })
    }

    /// Address of `contract` in the branch labelled `label`.
    pub fn branch_contract(&self, label: &str, contract: &str) -> Option<Felt> {
        self.branches
            .iter()
            .find(|b| b.label == label)
            .and_then(|b| b.contracts.get(contract).copied())
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize manifest")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write manifest to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Deployment manifest saved");
        Ok(())
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read manifest from {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse manifest {}", path.display()))
    }

    pub fn summary_table(&self) -> Table {
        let mut table = Table::new();
        table.set_header(vec!["Branch", "Contract", "Address"]);
        table.add_row(vec![
            "-".to_string(),
            "BitUSD".to_string(),
            self.stablecoin.to_fixed_hex_string(),
        ]);
        table.add_row(vec![
            "-".to_string(),
            "CollateralRegistry".to_string(),
            self.collateral_registry.to_fixed_hex_string(),
        ]);
        for (name, address) in [
            ("HintHelpers", self.hint_helpers),
            ("MultiTroveGetter", self.multi_trove_getter),
        ] {
            if let Some(address) = address {
                table.add_row(vec![
                    "-".to_string(),
                    name.to_string(),
                    address.to_fixed_hex_string(),
                ]);
            }
        }
        for branch in &self.branches {
            for (name, address) in &branch.contracts {
                table.add_row(vec![
                    branch.label.clone(),
                    name.clone(),
                    address.to_fixed_hex_string(),
                ]);
            }
        }
        table
    }
}

/// Table of whatever a run deployed, for reporting after a failure.
pub fn log_table(log: &DeploymentLog) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["Phase", "Branch", "Contract", "Address"]);
    for entry in log.entries() {
        table.add_row(vec![
            entry.phase.to_string(),
            entry.branch.clone().unwrap_or_else(|| "-".to_string()),
            entry.contract.clone(),
            entry.address.to_fixed_hex_string(),
        ]);
    }
    table
}
