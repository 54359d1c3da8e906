/// Content hashing for config generations
///
/// The hash is SHA-256 over a canonical JSON rendering (sorted object keys, no
/// whitespace), so formatting and key order in the source YAML never change it.

use crate::{definitions::types::ConfigDocument, error::Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Render a JSON value canonically
pub fn to_canonical_json(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(_) => value.to_string(),
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(to_canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        Value::Object(map) => {
            let sorted: BTreeMap<&String, String> = map
                .iter()
                .map(|(k, v)| (k, to_canonical_json(v)))
                .collect();
            let items: Vec<String> = sorted
                .into_iter()
                .map(|(k, v)| format!("{}:{}", Value::String(k.clone()), v))
                .collect();
            format!("{{{}}}", items.join(","))
        }
    }
}

/// Lowercase hex SHA-256 of the document's canonical form
pub fn content_hash(document: &ConfigDocument) -> Result<String> {
    let value = serde_json::to_value(document)?;
    let digest = Sha256::digest(to_canonical_json(&value).as_bytes());
    Ok(format!("{:x}", digest))
}
