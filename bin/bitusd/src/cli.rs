use std::path::PathBuf;

use alloy_core::primitives::U256;
use clap::{Args, Parser, Subcommand};
use starknet::core::types::Felt;
use tracing::level_filters::LevelFilter;

/// Default time to wait for the node to answer before giving up.
const DEFAULT_PREFLIGHT_TIMEOUT_SECS: u64 = 30;

#[derive(Parser)]
#[command(name = "bitusd")]
#[command(
    author,
    version,
    about = "Deploy and wire the bitUSD protocol on Starknet"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, global = true, env = "BITUSD_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to a Bitusd.toml configuration file, or to a directory containing one.
    ///
    /// Environment variables (and `.env`) override values from the file.
    #[arg(long, global = true, alias = "conf", env = "BITUSD_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Declare, deploy and wire every contract of the protocol.
    Deploy(DeployArgs),

    /// Mint collateral and open a trove against a deployed branch.
    OpenTrove(OpenTroveArgs),

    /// Print shell completions to stdout.
    Completions {
        /// The target shell.
        shell: clap_complete::Shell,
    },
}

#[derive(Debug, Args)]
pub struct DeployArgs {
    /// Where to write the deployment manifest.
    #[arg(long, env = "BITUSD_MANIFEST_PATH")]
    pub manifest: Option<PathBuf>,

    /// Also deploy HintHelpers and MultiTroveGetter.
    #[arg(long)]
    pub periphery: bool,

    /// Seconds to wait for the node to become reachable.
    #[arg(long, default_value_t = DEFAULT_PREFLIGHT_TIMEOUT_SECS)]
    pub preflight_timeout: u64,
}

#[derive(Debug, Args)]
pub struct OpenTroveArgs {
    /// Address of the branch's borrower operations.
    ///
    /// Read from the manifest when omitted.
    #[arg(long, value_parser = parse_felt)]
    pub borrower_operations: Option<Felt>,

    /// Address of the branch's collateral token.
    ///
    /// Read from the manifest when omitted.
    #[arg(long, value_parser = parse_felt)]
    pub collateral: Option<Felt>,

    /// Branch label to look up in the manifest.
    #[arg(long, default_value = "tbtc")]
    pub branch: String,

    /// Artifact name of the collateral token.
    #[arg(long, default_value = "TBTC")]
    pub collateral_artifact: String,

    /// Manifest written by `deploy`.
    #[arg(long, env = "BITUSD_MANIFEST_PATH")]
    pub manifest: Option<PathBuf>,

    /// Collateral amount, scaled by 10^18.
    #[arg(long, value_parser = parse_u256)]
    pub coll_amount: Option<U256>,

    /// Debt amount, scaled by 10^18.
    #[arg(long, value_parser = parse_u256)]
    pub debt: Option<U256>,

    /// Annual interest rate, scaled by 10^18.
    #[arg(long, value_parser = parse_u256)]
    pub interest_rate: Option<U256>,

    /// Seconds to wait for the node to become reachable.
    #[arg(long, default_value_t = DEFAULT_PREFLIGHT_TIMEOUT_SECS)]
    pub preflight_timeout: u64,
}

fn parse_felt(value: &str) -> Result<Felt, String> {
    let parsed = if value.starts_with("0x") {
        Felt::from_hex(value)
    } else {
        Felt::from_dec_str(value)
    };
    parsed.map_err(|e| format!("invalid felt `{value}`: {e}"))
}

fn parse_u256(value: &str) -> Result<U256, String> {
    value
        .parse::<U256>()
        .map_err(|e| format!("invalid amount `{value}`: {e}"))
}
