//! bitusd is a CLI tool to deploy and wire the bitUSD protocol on Starknet.

mod cli;

use std::path::Path;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use starknet::core::types::Felt;

use bitusd_deploy::{
    Config, DeployContext, DeploymentManifest, OpenTroveParams, ProtocolContract,
    ProtocolDeployer, StarknetChain, manifest, open_trove, rpc,
};
use cli::{Cli, Command, DeployArgs, OpenTroveArgs};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    match cli.command {
        Command::Deploy(args) => deploy(cli.config.as_deref(), args).await,
        Command::OpenTrove(args) => open_trove_command(cli.config.as_deref(), args).await,
        Command::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "bitusd", &mut std::io::stdout());
            Ok(())
        }
    }
}

/// Build the deployer account once the node is reachable and on the configured network.
async fn connect(config: &Config, preflight_timeout: u64) -> Result<StarknetChain> {
    let chain = StarknetChain::connect(
        &config.rpc_url,
        config.account_address,
        config.private_key,
        preflight_timeout,
    )
    .await
    .context("RPC node is not reachable")?;

    let chain_id = chain.chain_id();
    let expected = config.network.expected_chain_id();
    if expected.is_some_and(|expected| expected != chain_id) {
        anyhow::bail!(
            "Node at {} reports chain {} but NETWORK is {}",
            config.rpc_url,
            rpc::chain_name(chain_id),
            config.network
        );
    }

    Ok(chain)
}

async fn deploy(config_path: Option<&Path>, args: DeployArgs) -> Result<()> {
    let mut config = Config::load(config_path).context("Failed to load configuration")?;
    if args.periphery {
        config.protocol.deploy_periphery = true;
    }
    let manifest_path = args.manifest.unwrap_or_else(|| config.manifest_path.clone());

    tracing::info!(
        network = %config.network,
        rpc_url = %config.rpc_url,
        build_dir = %config.artifacts.build_dir.display(),
        branches = config.protocol.branches.len(),
        "Starting deployment..."
    );

    let chain = connect(&config, args.preflight_timeout).await?;
    let ctx = DeployContext::new(chain, config.artifacts.clone(), config.finality);
    let mut deployer = ProtocolDeployer::new(ctx, config.protocol.clone());

    let deployment = match deployer.run().await {
        Ok(deployment) => deployment,
        Err(e) => {
            let log = deployer.log();
            tracing::error!(
                phase = ?log.failed_phase(),
                deployed = log.entries().len(),
                "Deployment stopped"
            );
            if !log.entries().is_empty() {
                eprintln!("{}", manifest::log_table(log));
            }
            return Err(e).context("Protocol deployment failed");
        }
    };

    let manifest = DeploymentManifest::new(
        &config.network.to_string(),
        config.account_address,
        &config.protocol,
        &deployment,
    )?;
    manifest.save_to_file(&manifest_path)?;

    println!("{}", manifest.summary_table());
    tracing::info!("✓ Deployment complete!");

    Ok(())
}

async fn open_trove_command(config_path: Option<&Path>, args: OpenTroveArgs) -> Result<()> {
    let config = Config::load(config_path).context("Failed to load configuration")?;

    let (borrower_operations, collateral) = resolve_branch(&config, &args)?;

    let chain = connect(&config, args.preflight_timeout).await?;
    let ctx = DeployContext::new(chain, config.artifacts.clone(), config.finality);

    let borrower_operations =
        ctx.connect(borrower_operations, ProtocolContract::BorrowerOperations.as_ref())?;
    let collateral = ctx.connect(collateral, &args.collateral_artifact)?;

    let defaults = OpenTroveParams::default();
    let params = OpenTroveParams {
        coll_amount: args.coll_amount.unwrap_or(defaults.coll_amount),
        bitusd_amount: args.debt.unwrap_or(defaults.bitusd_amount),
        annual_interest_rate: args.interest_rate.unwrap_or(defaults.annual_interest_rate),
        ..defaults
    };

    let tx_hash = open_trove(&borrower_operations, &collateral, &params)
        .await
        .context("Failed to open trove")?;

    println!("{}", tx_hash.to_fixed_hex_string());
    Ok(())
}

/// Addresses given on the command line, falling back to the manifest.
fn resolve_branch(config: &Config, args: &OpenTroveArgs) -> Result<(Felt, Felt)> {
    if let (Some(bo), Some(collateral)) = (args.borrower_operations, args.collateral) {
        return Ok((bo, collateral));
    }

    let path = args
        .manifest
        .clone()
        .unwrap_or_else(|| config.manifest_path.clone());
    let manifest = DeploymentManifest::load_from_file(&path)?;

    let lookup = |contract: &str| {
        manifest.branch_contract(&args.branch, contract).with_context(|| {
            format!(
                "{contract} of branch `{}` not found in {}",
                args.branch,
                path.display()
            )
        })
    };

    let borrower_operations = match args.borrower_operations {
        Some(address) => address,
        None => lookup(ProtocolContract::BorrowerOperations.as_ref())?,
    };
    let collateral = match args.collateral {
        Some(address) => address,
        None => lookup("collateral")?,
    };

    Ok((borrower_operations, collateral))
}
