//! Typed view over the Cairo ABI embedded in a Sierra contract class.
//!
//! Only the entries the encoder needs are modelled: constructor, functions,
//! interfaces and structs. Enums, events, impls and anything newer are kept
//! as [`AbiEntry::Other`].

use serde::{Deserialize, Serialize};

/// A named, typed parameter or struct member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiParam {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

/// The contract constructor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiConstructor {
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<AbiParam>,
}

/// An external or view function (also used for L1 handlers).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiFunction {
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<AbiParam>,
    #[serde(default)]
    pub outputs: Vec<AbiOutput>,
    #[serde(default)]
    pub state_mutability: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiOutput {
    #[serde(rename = "type")]
    pub ty: String,
}

/// A group of functions exposed through an `impl` block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiInterface {
    pub name: String,
    #[serde(default)]
    pub items: Vec<AbiEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiStruct {
    pub name: String,
    #[serde(default)]
    pub members: Vec<AbiParam>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AbiEntry {
    Constructor(AbiConstructor),
    Function(AbiFunction),
    L1Handler(AbiFunction),
    Interface(AbiInterface),
    Struct(AbiStruct),
    #[serde(other)]
    Other,
}

/// The full interface description of a contract.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Abi {
    entries: Vec<AbiEntry>,
}

impl Abi {
    pub fn new(entries: Vec<AbiEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[AbiEntry] {
        &self.entries
    }

    /// The declared constructor inputs. A contract without constructor takes none.
    pub fn constructor_inputs(&self) -> &[AbiParam] {
        self.entries
            .iter()
            .find_map(|entry| match entry {
                AbiEntry::Constructor(ctor) => Some(ctor.inputs.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    /// Find an external function by name, at top level or inside an interface.
    pub fn function(&self, name: &str) -> Option<&AbiFunction> {
        find_function(&self.entries, name)
    }

    pub fn struct_def(&self, name: &str) -> Option<&AbiStruct> {
        self.entries.iter().find_map(|entry| match entry {
            AbiEntry::Struct(s) if s.name == name => Some(s),
            _ => None,
        })
    }
}

fn find_function<'a>(entries: &'a [AbiEntry], name: &str) -> Option<&'a AbiFunction> {
    entries.iter().find_map(|entry| match entry {
        AbiEntry::Function(f) if f.name == name => Some(f),
        AbiEntry::Interface(interface) => find_function(&interface.items, name),
        _ => None,
    })
}
