//! Layered configuration: built-in defaults, `Bitusd.toml`, then environment.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};
use starknet::core::types::Felt;
use url::Url;

use crate::{
    artifact::{ArtifactStore, DEFAULT_BUILD_DIR, DEFAULT_PROJECT_PREFIX},
    deployer::FinalityPolicy,
    error::{DeployError, Result},
    manifest::DEFAULT_MANIFEST_PATH,
    protocol::{BranchSpec, NftMetadata, ProtocolConfig, TokenMetadata},
    wiring::PlaceholderPolicy,
};

/// The default name of the configuration file.
pub const CONFIG_FILENAME: &str = "Bitusd.toml";

/// Prefix of the environment overrides.
pub const ENV_PREFIX: &str = "BITUSD_";

/// Unprefixed variables shared with other Starknet tooling.
const ACCOUNT_ENV: [&str; 4] = ["ACCOUNT_ADDRESS", "ACCOUNT_PRIVATE_KEY", "RPC_URL", "NETWORK"];

/// Target network.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Network {
    #[default]
    Devnet,
    Sepolia,
    Mainnet,
}

impl Network {
    /// Chain id the node must report, when fixed.
    pub fn expected_chain_id(&self) -> Option<Felt> {
        match self {
            Network::Devnet => None,
            Network::Sepolia => Some(Felt::from_bytes_be_slice(b"SN_SEPOLIA")),
            Network::Mainnet => Some(Felt::from_bytes_be_slice(b"SN_MAIN")),
        }
    }
}

/// Values as read from the layered sources, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    account_address: Option<String>,
    account_private_key: Option<String>,
    rpc_url: Option<String>,
    network: Option<String>,
    build_dir: Option<PathBuf>,
    artifact_prefix: Option<String>,
    poll_interval_ms: Option<u64>,
    finality_timeout_secs: Option<u64>,
    max_transient_retries: Option<usize>,
    placeholder: Option<String>,
    deploy_periphery: Option<bool>,
    gas_token: Option<String>,
    manifest_path: Option<PathBuf>,
    stablecoin: Option<TokenMetadata>,
    trove_nft: Option<NftMetadata>,
    branches: Option<Vec<BranchSpec>>,
}

/// Validated configuration of a run.
#[derive(Clone)]
pub struct Config {
    pub network: Network,
    pub rpc_url: Url,
    pub account_address: Felt,
    pub private_key: Felt,
    pub artifacts: ArtifactStore,
    pub finality: FinalityPolicy,
    pub protocol: ProtocolConfig,
    pub manifest_path: PathBuf,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("network", &self.network)
            .field("rpc_url", &self.rpc_url.as_str())
            .field("account_address", &self.account_address.to_fixed_hex_string())
            .field("private_key", &"<redacted>")
            .field("artifacts", &self.artifacts)
            .field("finality", &self.finality)
            .field("protocol", &self.protocol)
            .field("manifest_path", &self.manifest_path)
            .finish()
    }
}

impl Config {
    /// Load `.env`, then layer the configuration file (if any) and the environment.
    ///
    /// `path` may point to a file or to a directory containing [`CONFIG_FILENAME`];
    /// without it, `./Bitusd.toml` is used when present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!(path = %path.display(), "Loaded .env"),
            Err(e) if e.not_found() => {}
            Err(e) => return Err(DeployError::Configuration(format!("invalid .env file: {e}"))),
        }

        Self::from_figment(Self::figment(path)?)
    }

    /// The layered sources, later ones winning.
    pub fn figment(path: Option<&Path>) -> Result<Figment> {
        let file = match path {
            Some(path) if path.is_dir() => path.join(CONFIG_FILENAME),
            Some(path) => {
                if !path.exists() {
                    return Err(DeployError::Configuration(format!(
                        "configuration file not found: {}",
                        path.display()
                    )));
                }
                path.to_path_buf()
            }
            None => PathBuf::from(CONFIG_FILENAME),
        };

        Ok(Figment::new()
            .merge(Toml::file(file))
            .merge(Env::raw().only(&ACCOUNT_ENV))
            .merge(Env::prefixed(ENV_PREFIX)))
    }

    /// Extract and validate. Fails before any network interaction.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let raw: RawConfig = figment
            .extract()
            .map_err(|e| DeployError::Configuration(e.to_string()))?;

        let account_address = parse_felt("ACCOUNT_ADDRESS", required("ACCOUNT_ADDRESS", raw.account_address)?)?;
        let private_key = parse_felt(
            "ACCOUNT_PRIVATE_KEY",
            required("ACCOUNT_PRIVATE_KEY", raw.account_private_key)?,
        )?;
        let rpc_url = required("RPC_URL", raw.rpc_url)?;
        let rpc_url = Url::parse(&rpc_url)
            .map_err(|e| DeployError::Configuration(format!("RPC_URL `{rpc_url}` is not a URL: {e}")))?;

        let network = match raw.network.filter(|n| !n.trim().is_empty()) {
            Some(network) => network.parse::<Network>().map_err(|_| {
                DeployError::Configuration(format!(
                    "unknown NETWORK `{network}`, expected devnet, sepolia or mainnet"
                ))
            })?,
            None => Network::default(),
        };

        let placeholder = match raw.placeholder {
            Some(policy) => policy.parse::<PlaceholderPolicy>().map_err(|_| {
                DeployError::Configuration(format!(
                    "unknown placeholder policy `{policy}`, expected active-pool or zero"
                ))
            })?,
            None => PlaceholderPolicy::default(),
        };

        let defaults = ProtocolConfig::default();
        let gas_token = match raw.gas_token {
            Some(token) => parse_felt("gas_token", token)?,
            None => defaults.gas_token,
        };

        let branches = raw.branches.unwrap_or(defaults.branches);
        if branches.is_empty() {
            return Err(DeployError::Configuration(
                "at least one collateral branch is required".to_string(),
            ));
        }

        let finality_defaults = FinalityPolicy::default();
        let finality = FinalityPolicy {
            poll_interval: raw
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(finality_defaults.poll_interval),
            timeout: raw
                .finality_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(finality_defaults.timeout),
            max_transient_retries: raw
                .max_transient_retries
                .unwrap_or(finality_defaults.max_transient_retries),
        };

        let config = Self {
            network,
            rpc_url,
            account_address,
            private_key,
            artifacts: ArtifactStore::new(
                raw.build_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_BUILD_DIR)),
                raw.artifact_prefix
                    .unwrap_or_else(|| DEFAULT_PROJECT_PREFIX.to_string()),
            ),
            finality,
            protocol: ProtocolConfig {
                stablecoin: raw.stablecoin.unwrap_or(defaults.stablecoin),
                trove_nft: raw.trove_nft.unwrap_or(defaults.trove_nft),
                branches,
                gas_token,
                placeholder,
                deploy_periphery: raw.deploy_periphery.unwrap_or(defaults.deploy_periphery),
            },
            manifest_path: raw
                .manifest_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MANIFEST_PATH)),
        };

        tracing::debug!(?config, "Configuration loaded");
        Ok(config)
    }
}

fn required(name: &str, value: Option<String>) -> Result<String> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value.trim().to_string()),
        _ => Err(DeployError::Configuration(format!("{name} is required"))),
    }
}

fn parse_felt(name: &str, value: String) -> Result<Felt> {
    let parsed = if value.starts_with("0x") || value.starts_with("0X") {
        Felt::from_hex(&value)
    } else {
        Felt::from_dec_str(&value)
    };
    parsed.map_err(|_| DeployError::Configuration(format!("{name} is not a valid felt: `{value}`")))
}
