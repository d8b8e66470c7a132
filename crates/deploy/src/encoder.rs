//! ABI-driven calldata encoding.
//!
//! Arguments are supplied by name and emitted in the order the contract
//! declares them, so a caller's map order can never shuffle positional slots.

use std::collections::BTreeMap;

use alloy_core::primitives::U256;
use derive_more::{Deref, DerefMut, From};
use starknet::core::{types::Felt, utils::cairo_short_string_to_felt};

use crate::{
    abi::{Abi, AbiParam},
    error::{DeployError, Result},
};

/// The Stark field prime, `2^251 + 17 * 2^192 + 1`.
const FIELD_PRIME: U256 = U256::from_limbs([1, 0, 0, 0x0800_0000_0000_0011]);

/// Bytes per full word of a Cairo `ByteArray`.
const BYTES_PER_WORD: usize = 31;

const FELT252: &str = "core::felt252";
const BOOL: &str = "core::bool";
const U256_TYPE: &str = "core::integer::u256";
const BYTE_ARRAY: &str = "core::byte_array::ByteArray";
const ADDRESS_TYPES: &[&str] = &[
    "core::starknet::contract_address::ContractAddress",
    "core::starknet::class_hash::ClassHash",
    "core::starknet::eth_address::EthAddress",
];
const SEQUENCE_PREFIXES: &[&str] = &["core::array::Array::<", "core::array::Span::<"];

/// A value supplied for one parameter.
#[derive(Debug, Clone, PartialEq, Eq, From)]
pub enum ArgValue {
    /// Raw field element: addresses, class hashes, felts.
    Felt(Felt),
    /// Unsigned integer of any declared width up to 256 bits.
    Uint(U256),
    Bool(bool),
    /// Encoded as `ByteArray` or as a short string depending on the declared type.
    Str(String),
    /// `Array<T>` or `Span<T>`.
    List(Vec<ArgValue>),
    /// A struct declared in the ABI, members by name.
    Struct(Args),
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        ArgValue::Str(value.to_string())
    }
}

impl From<u64> for ArgValue {
    fn from(value: u64) -> Self {
        ArgValue::Uint(U256::from(value))
    }
}

impl From<u128> for ArgValue {
    fn from(value: u128) -> Self {
        ArgValue::Uint(U256::from(value))
    }
}

impl ArgValue {
    fn shape(&self) -> &'static str {
        match self {
            ArgValue::Felt(_) => "felt",
            ArgValue::Uint(_) => "unsigned integer",
            ArgValue::Bool(_) => "bool",
            ArgValue::Str(_) => "string",
            ArgValue::List(_) => "list",
            ArgValue::Struct(_) => "struct",
        }
    }
}

/// Named arguments of a constructor or entrypoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deref, DerefMut)]
pub struct Args(BTreeMap<String, ArgValue>);

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }
}

impl<K: Into<String>, V: Into<ArgValue>> FromIterator<(K, V)> for Args {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Encode the constructor arguments of a contract.
pub fn encode_constructor(abi: &Abi, args: &Args) -> Result<Vec<Felt>> {
    encode_named(abi, "constructor", abi.constructor_inputs(), args)
}

/// Encode the arguments of an external function, by name.
pub fn encode_function(abi: &Abi, entrypoint: &str, args: &Args) -> Result<Vec<Felt>> {
    let inputs = function_inputs(abi, entrypoint)?;
    encode_named(abi, entrypoint, inputs, args)
}

/// Encode the arguments of an external function, in declared order.
///
/// Meant for short standard interfaces (ERC20 `mint`/`approve`) whose
/// parameter names vary between implementations.
pub fn encode_function_positional(
    abi: &Abi,
    entrypoint: &str,
    values: &[ArgValue],
) -> Result<Vec<Felt>> {
    let inputs = function_inputs(abi, entrypoint)?;
    if inputs.len() != values.len() {
        return Err(DeployError::Encoding(format!(
            "`{entrypoint}` declares {} parameters, got {}",
            inputs.len(),
            values.len()
        )));
    }

    let mut calldata = Vec::new();
    for (param, value) in inputs.iter().zip(values) {
        encode_param(abi, entrypoint, param, value, &mut calldata)?;
    }
    Ok(calldata)
}

fn function_inputs<'a>(abi: &'a Abi, entrypoint: &str) -> Result<&'a [AbiParam]> {
    abi.function(entrypoint)
        .map(|f| f.inputs.as_slice())
        .ok_or_else(|| DeployError::Encoding(format!("entrypoint `{entrypoint}` not found in ABI")))
}

fn encode_named(abi: &Abi, scope: &str, inputs: &[AbiParam], args: &Args) -> Result<Vec<Felt>> {
    if let Some(unknown) = args.keys().find(|name| !inputs.iter().any(|p| &p.name == *name)) {
        return Err(DeployError::Encoding(format!(
            "`{scope}` has no parameter named `{unknown}`"
        )));
    }

    let mut calldata = Vec::new();
    for param in inputs {
        let value = args.get(&param.name).ok_or_else(|| {
            DeployError::Encoding(format!(
                "`{scope}` is missing required parameter `{}`",
                param.name
            ))
        })?;
        encode_param(abi, scope, param, value, &mut calldata)?;
    }

    tracing::trace!(scope, felts = calldata.len(), "Encoded calldata");
    Ok(calldata)
}

fn encode_param(
    abi: &Abi,
    scope: &str,
    param: &AbiParam,
    value: &ArgValue,
    out: &mut Vec<Felt>,
) -> Result<()> {
    encode_value(abi, &param.ty, value, out).map_err(|reason| {
        DeployError::Encoding(format!("`{scope}` parameter `{}`: {reason}", param.name))
    })
}

fn encode_value(
    abi: &Abi,
    ty: &str,
    value: &ArgValue,
    out: &mut Vec<Felt>,
) -> std::result::Result<(), String> {
    let mismatch = || format!("expected `{ty}`, got {}", value.shape());

    if let Some(inner) = sequence_element(ty) {
        let ArgValue::List(items) = value else {
            return Err(mismatch());
        };
        out.push(Felt::from(items.len() as u64));
        for item in items {
            encode_value(abi, inner, item, out)?;
        }
        return Ok(());
    }

    match ty {
        FELT252 => match value {
            ArgValue::Felt(felt) => out.push(*felt),
            ArgValue::Uint(uint) => out.push(uint_to_felt(*uint)?),
            ArgValue::Str(s) => out.push(cairo_short_string_to_felt(s).map_err(|e| e.to_string())?),
            _ => return Err(mismatch()),
        },
        t if ADDRESS_TYPES.contains(&t) => match value {
            ArgValue::Felt(felt) => out.push(*felt),
            _ => return Err(mismatch()),
        },
        BOOL => match value {
            ArgValue::Bool(b) => out.push(if *b { Felt::ONE } else { Felt::ZERO }),
            _ => return Err(mismatch()),
        },
        U256_TYPE => match value {
            ArgValue::Uint(uint) => {
                let (low, high) = split_u256(*uint);
                out.push(Felt::from(low));
                out.push(Felt::from(high));
            }
            _ => return Err(mismatch()),
        },
        BYTE_ARRAY => match value {
            ArgValue::Str(s) => out.extend(encode_byte_array(s.as_bytes())),
            _ => return Err(mismatch()),
        },
        t => {
            if let Some(bits) = uint_bits(t) {
                let ArgValue::Uint(uint) = value else {
                    return Err(mismatch());
                };
                if uint.bit_len() > bits {
                    return Err(format!("{uint} does not fit in `{t}`"));
                }
                out.push(Felt::from(split_u256(*uint).0));
            } else if let Some(def) = abi.struct_def(t) {
                let ArgValue::Struct(members) = value else {
                    return Err(mismatch());
                };
                if let Some(unknown) = members
                    .keys()
                    .find(|name| !def.members.iter().any(|m| &m.name == *name))
                {
                    return Err(format!("struct `{t}` has no member `{unknown}`"));
                }
                for member in &def.members {
                    let member_value = members
                        .get(&member.name)
                        .ok_or_else(|| format!("struct `{t}` is missing member `{}`", member.name))?;
                    encode_value(abi, &member.ty, member_value, out)?;
                }
            } else {
                return Err(format!("unsupported type `{t}`"));
            }
        }
    }

    Ok(())
}

/// `Array::<T>` and `Span::<T>` element type.
fn sequence_element(ty: &str) -> Option<&str> {
    SEQUENCE_PREFIXES
        .iter()
        .find_map(|prefix| ty.strip_prefix(prefix))
        .and_then(|rest| rest.strip_suffix('>'))
}

fn uint_bits(ty: &str) -> Option<usize> {
    match ty {
        "core::integer::u8" => Some(8),
        "core::integer::u16" => Some(16),
        "core::integer::u32" | "core::integer::usize" => Some(32),
        "core::integer::u64" => Some(64),
        "core::integer::u128" => Some(128),
        _ => None,
    }
}

fn uint_to_felt(value: U256) -> std::result::Result<Felt, String> {
    if value >= FIELD_PRIME {
        return Err(format!("{value} is not a valid felt252"));
    }
    Ok(Felt::from_bytes_be(&value.to_be_bytes::<32>()))
}

/// Split into `(low, high)` 128-bit halves.
pub fn split_u256(value: U256) -> (u128, u128) {
    let limbs = value.as_limbs();
    let low = ((limbs[1] as u128) << 64) | limbs[0] as u128;
    let high = ((limbs[3] as u128) << 64) | limbs[2] as u128;
    (low, high)
}

/// Cairo `ByteArray` serialization: full word count, full 31-byte words,
/// pending word, pending word length.
pub fn encode_byte_array(bytes: &[u8]) -> Vec<Felt> {
    let chunks: Vec<&[u8]> = bytes.chunks(BYTES_PER_WORD).collect();
    let (full, pending): (&[&[u8]], &[u8]) = match chunks.split_last() {
        Some((last, rest)) if last.len() < BYTES_PER_WORD => (rest, *last),
        _ => (chunks.as_slice(), &[][..]),
    };

    let mut out = Vec::with_capacity(full.len() + 3);
    out.push(Felt::from(full.len() as u64));
    out.extend(full.iter().map(|word| Felt::from_bytes_be_slice(word)));
    out.push(Felt::from_bytes_be_slice(pending));
    out.push(Felt::from(pending.len() as u64));
    out
}
