//! Loading of compiled contract artifacts from the build output directory.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    abi::Abi,
    error::{DeployError, Result},
};

/// Default build output directory of the Cairo project.
pub const DEFAULT_BUILD_DIR: &str = "target/dev";
/// Default package prefix of the artifact file names.
pub const DEFAULT_PROJECT_PREFIX: &str = "bit_usd";

/// Suffix of the Sierra class file.
pub const CONTRACT_CLASS_SUFFIX: &str = "contract_class.json";
/// Suffix of the compiled (CASM) class file.
pub const COMPILED_CLASS_SUFFIX: &str = "compiled_contract_class.json";

/// The two documents produced by the compiler for one contract.
#[derive(Debug, Clone)]
pub struct ContractArtifact {
    /// Contract name, e.g. `TroveManager`.
    pub name: String,
    /// Sierra class definition (with the ABI).
    pub class: Value,
    /// Compiled execution form.
    pub compiled_class: Value,
    /// Interface description parsed out of `class`.
    pub abi: Arc<Abi>,
}

/// Location of the artifacts on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactStore {
    /// Build output directory.
    pub build_dir: PathBuf,
    /// Package prefix prepended to every contract name.
    pub prefix: String,
}

impl Default for ArtifactStore {
    fn default() -> Self {
        Self::new(DEFAULT_BUILD_DIR, DEFAULT_PROJECT_PREFIX)
    }
}

impl ArtifactStore {
    pub fn new(build_dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            build_dir: build_dir.into(),
            prefix: prefix.into(),
        }
    }

    /// `<build-dir>/<prefix>_<name>.contract_class.json`
    pub fn class_path(&self, name: &str) -> PathBuf {
        self.build_dir
            .join(format!("{}_{}.{}", self.prefix, name, CONTRACT_CLASS_SUFFIX))
    }

    /// `<build-dir>/<prefix>_<name>.compiled_contract_class.json`
    pub fn compiled_class_path(&self, name: &str) -> PathBuf {
        self.build_dir
            .join(format!("{}_{}.{}", self.prefix, name, COMPILED_CLASS_SUFFIX))
    }

    /// Load both documents of a contract.
    pub fn load(&self, name: &str) -> Result<ContractArtifact> {
        let class_path = self.class_path(name);
        let class = read_json(name, &class_path)?;
        let abi = parse_abi(name, &class_path, &class)?;
        let compiled_class = read_json(name, &self.compiled_class_path(name))?;

        tracing::debug!(
            contract = name,
            path = %class_path.display(),
            "Loaded contract artifact"
        );

        Ok(ContractArtifact {
            name: name.to_string(),
            class,
            compiled_class,
            abi: Arc::new(abi),
        })
    }

    /// Load only the interface description, which is all a connection needs.
    pub fn load_abi(&self, name: &str) -> Result<Abi> {
        let class_path = self.class_path(name);
        let class = read_json(name, &class_path)?;
        parse_abi(name, &class_path, &class)
    }
}

fn read_json(name: &str, path: &Path) -> Result<Value> {
    let not_found = |reason: String| DeployError::ArtifactNotFound {
        name: name.to_string(),
        path: path.to_path_buf(),
        reason,
    };

    let content = std::fs::read_to_string(path).map_err(|e| not_found(e.to_string()))?;
    serde_json::from_str(&content).map_err(|e| not_found(format!("invalid JSON: {e}")))
}

/// The compiler emits the ABI either inline or as a JSON-encoded string.
fn parse_abi(name: &str, path: &Path, class: &Value) -> Result<Abi> {
    let malformed = |reason: String| DeployError::ArtifactNotFound {
        name: name.to_string(),
        path: path.to_path_buf(),
        reason,
    };

    let abi = match class.get("abi") {
        Some(Value::String(raw)) => serde_json::from_str(raw),
        Some(value) => serde_json::from_value(value.clone()),
        None => return Err(malformed("class has no `abi` field".to_string())),
    };

    abi.map_err(|e| malformed(format!("invalid ABI: {e}")))
}
