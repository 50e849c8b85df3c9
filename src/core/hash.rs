//! Deterministic hashing of byte buffers and ledger objects.
//!
//! Object hashes are taken over a canonical form: the value is rendered with
//! serde into a JSON tree, computed fields are removed, absent and empty
//! collections are dropped, and object keys are emitted in lexicographic
//! order. Any change here changes every block and transaction identity.

use crate::error::{BlockchainError, Result};
use data_encoding::HEXLOWER;
use ring::digest::{Context, SHA256, SHA512};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Fields that are derived from the rest of the object and never hashed.
pub const COMPUTED_FIELDS: &[&str] = &["hash"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha512,
}

impl FromStr for HashAlgorithm {
    type Err = BlockchainError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(HashAlgorithm::Sha256),
            "sha512" | "sha-512" => Ok(HashAlgorithm::Sha512),
            _ => Err(BlockchainError::Config(format!(
                "Unknown hash algorithm: {s}. Valid options: sha256, sha512"
            ))),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashAlgorithm::Sha256 => write!(f, "sha256"),
            HashAlgorithm::Sha512 => write!(f, "sha512"),
        }
    }
}

/// Shared hashing service. Cheap to clone; built once from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HashProvider {
    algorithm: HashAlgorithm,
}

impl HashProvider {
    pub fn new(algorithm: HashAlgorithm) -> HashProvider {
        HashProvider { algorithm }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn compute_hash_bytes(&self, data: &[u8]) -> Vec<u8> {
        let mut context = match self.algorithm {
            HashAlgorithm::Sha256 => Context::new(&SHA256),
            HashAlgorithm::Sha512 => Context::new(&SHA512),
        };
        context.update(data);
        context.finish().as_ref().to_vec()
    }

    /// Hash of the canonical form of `value`.
    pub fn compute_hash<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        let canonical = canonical_bytes(value)?;
        Ok(self.compute_hash_bytes(&canonical))
    }

    /// Lowercase hex of [`HashProvider::compute_hash`].
    pub fn compute_hash_string<T: Serialize + ?Sized>(&self, value: &T) -> Result<String> {
        Ok(HEXLOWER.encode(&self.compute_hash(value)?))
    }

    pub fn double_hash(&self, data: &[u8]) -> Vec<u8> {
        self.compute_hash_bytes(&self.compute_hash_bytes(data))
    }

    /// Concatenates both buffers, then hashes twice.
    pub fn double_hash_pair(&self, left: &[u8], right: &[u8]) -> Vec<u8> {
        let mut joined = Vec::with_capacity(left.len() + right.len());
        joined.extend_from_slice(left);
        joined.extend_from_slice(right);
        self.double_hash(&joined)
    }
}

/// Canonical byte form of a serializable value.
pub fn canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let value = serde_json::to_value(value)?;
    let normalized = normalize(value).unwrap_or(Value::Null);
    Ok(serde_json::to_vec(&normalized)?)
}

/// Returns `None` when the value counts as absent.
pub fn normalize(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::Array(items) => {
            if items.is_empty() {
                return None;
            }
            // Positions are significant inside arrays, so absent items stay as null.
            Some(Value::Array(
                items
                    .into_iter()
                    .map(|item| normalize(item).unwrap_or(Value::Null))
                    .collect(),
            ))
        }
        Value::Object(fields) => {
            let mut entries: Vec<(String, Value)> = fields
                .into_iter()
                .filter(|(key, _)| !COMPUTED_FIELDS.contains(&key.as_str()))
                .filter_map(|(key, field)| normalize(field).map(|field| (key, field)))
                .collect();
            if entries.is_empty() {
                return None;
            }
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (key, field) in entries {
                sorted.insert(key, field);
            }
            Some(Value::Object(sorted))
        }
        other => Some(other),
    }
}
