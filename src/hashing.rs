//! Hashing System - SHA-256 for IR fingerprints and artifact manifests
//!
//! Hashes are computed over canonical JSON (sorted keys, no whitespace) so
//! two runs over the same input always agree.

use sha2::{Sha256, Digest};
use serde::Serialize;
use serde_json::{Value, to_string};

/// Compute SHA-256 hash of bytes, return hex string
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    hex::encode(result)
}

/// Convert to canonical JSON (sorted keys, no whitespace)
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let v: Value = serde_json::to_value(value)?;
    let sorted = sort_value(&v);
    to_string(&sorted)
}

fn sort_value(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut sorted: Vec<_> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            let sorted_map: serde_json::Map<String, Value> = sorted
                .into_iter()
                .map(|(k, v)| (k.clone(), sort_value(v)))
                .collect();
            Value::Object(sorted_map)
        }
        Value::Array(arr) => {
            Value::Array(arr.iter().map(sort_value).collect())
        }
        _ => v.clone()
    }
}

/// SHA-256 over the canonical JSON of `value`. Used for IR fingerprints
/// and the batch manifest hash.
pub fn compute_hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let canonical = canonical_json(value)?;
    Ok(sha256_hex(canonical.as_bytes()))
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().map(|b| format!("{:02x}", b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_sorted() {
        let obj = json!({"z": 1, "a": 2, "m": {"y": true, "b": null}});
        let canonical = canonical_json(&obj).unwrap();
        assert_eq!(canonical, r#"{"a":2,"m":{"b":null,"y":true},"z":1}"#);
    }

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_hash_ignores_key_order() {
        let a = json!({"language": "fr", "entries": [{"key": "A", "label": "x"}]});
        let b = json!({"entries": [{"label": "x", "key": "A"}], "language": "fr"});
        assert_eq!(compute_hash(&a).unwrap(), compute_hash(&b).unwrap());
    }

    #[test]
    fn test_hash_sees_array_order() {
        let a = json!({"artifacts": ["fr/csv", "fr/plainlist"]});
        let b = json!({"artifacts": ["fr/plainlist", "fr/csv"]});
        assert_ne!(compute_hash(&a).unwrap(), compute_hash(&b).unwrap());
    }

    #[test]
    fn test_hash_is_canonical_sha256() {
        let value = json!({"b": [1, 2], "a": "x"});
        assert_eq!(
            compute_hash(&value).unwrap(),
            sha256_hex(br#"{"a":"x","b":[1,2]}"#)
        );
    }
}
