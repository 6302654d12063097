//! Canonical JSON and the hashes that drive change detection.
//!
//! - [`config_hash`] is stamped on the pod template so that a config change
//!   rolls the workload.
//! - [`secret_hash`] summarizes the secrets a ModelConfig references; it
//!   feeds into the config hash so that rotating a key also rolls.
//! - [`canonical_json`] gives a key-sorted, empty-stripped form used when
//!   comparing objects semantically.

use dockhand_state::objects::Secret;
use dockhand_state::Resource;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::Result;

/// Drop nulls, empty strings, empty arrays and empty objects so that "unset"
/// and "set to empty" compare equal. Object keys come out sorted because
/// `serde_json::Map` is ordered.
fn prune_empty(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::Array(items) => {
            let items: Vec<Value> = items
                .iter()
                .map(|v| prune_empty(v).unwrap_or(Value::Null))
                .collect();
            if items.is_empty() {
                None
            } else {
                Some(Value::Array(items))
            }
        }
        Value::Object(map) => {
            let pruned: Map<String, Value> = map
                .iter()
                .filter_map(|(k, v)| prune_empty(v).map(|v| (k.clone(), v)))
                .collect();
            if pruned.is_empty() {
                None
            } else {
                Some(Value::Object(pruned))
            }
        }
        other => Some(other.clone()),
    }
}

/// Normalized form of `value`: empties removed, keys sorted.
pub fn canonical_value(value: &Value) -> Value {
    prune_empty(value).unwrap_or(Value::Null)
}

/// Compact canonical JSON string of `value`.
pub fn canonical_json(value: &Value) -> Result<String> {
    Ok(serde_json::to_string(&canonical_value(value))?)
}

/// Change-detection hash of a translated agent.
///
/// SHA-256 over the runtime config JSON, the card JSON and the raw secret
/// hash, truncated to the first 8 bytes read big-endian.
pub fn config_hash(config_json: &[u8], card_json: &[u8], secret_hash: &[u8]) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(config_json);
    hasher.update(card_json);
    hasher.update(secret_hash);
    let digest = hasher.finalize();
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(head)
}

/// Hex SHA-256 over a set of secrets, independent of input order.
///
/// Secrets are visited sorted by `namespace/name`; each contributes its
/// identity, then every key (sorted) followed by its value.
pub fn secret_hash(secrets: &[Secret]) -> String {
    let mut sorted: Vec<&Secret> = secrets.iter().collect();
    sorted.sort_by_key(|s| s.object_ref().key());

    let mut hasher = Sha256::new();
    for secret in sorted {
        hasher.update(secret.object_ref().key().as_bytes());
        for (key, value) in &secret.data {
            hasher.update(key.as_bytes());
            hasher.update(value.as_bytes());
        }
    }
    hex::encode(hasher.finalize())
}
