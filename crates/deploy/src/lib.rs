//! bitusd-deploy - Deployment library for the bitUSD protocol on Starknet.
//!
//! This crate declares, deploys and wires every contract of the protocol:
//! the shared stablecoin and collateral registry, and one set of trove,
//! pool and registry contracts per collateral branch.

pub mod abi;
pub mod artifact;
pub mod chain;
pub mod config;
pub mod deployer;
pub mod encoder;
pub mod error;
pub mod manifest;
pub mod params;
pub mod protocol;
pub mod rpc;
pub mod trove;
pub mod wiring;

pub use abi::Abi;
pub use artifact::{ArtifactStore, ContractArtifact};
pub use chain::{ChainClient, Declaration, DeploySubmission, Invocation, StarknetChain, TxStatus};
pub use config::{CONFIG_FILENAME, Config, Network};
pub use deployer::{DeployContext, DeployedContract, FinalityPolicy};
pub use encoder::{ArgValue, Args, encode_constructor, encode_function};
pub use error::{ChainError, DeployError, Result};
pub use manifest::{DEFAULT_MANIFEST_PATH, DeploymentManifest};
pub use params::TroveManagerParams;
pub use protocol::{
    BranchContracts, BranchSpec, CollateralSource, DeploymentLog, DeploymentPhase,
    ProtocolConfig, ProtocolContract, ProtocolDeployer, ProtocolDeployment,
    deploy_collateral_registry,
};
pub use trove::{OpenTroveParams, open_trove};
pub use wiring::{PlaceholderPolicy, RegistryAddresses, RegistrySlot};
