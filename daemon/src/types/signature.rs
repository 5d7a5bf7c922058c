//! Deterministic content-addressing.
//!
//! A signature is the lowercase hex SHA-256 of the canonical JSON
//! serialization of a value. Object keys are sorted at every depth and array
//! order is preserved, so parameter-key order never changes a signature while
//! stack order always does. Hex output is safe on case-insensitive
//! filesystems and never contains a path separator.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Length of a signature in characters.
pub const SIGNATURE_LEN: usize = 64;

/// A deterministic content-address of a request or module invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(String);

impl Signature {
    /// Returns the signature as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the signature, returning the inner string.
    pub fn into_string(self) -> String {
        self.0
    }

    /// The cache shard directory of this signature: its first character.
    pub fn shard(&self) -> &str {
        &self.0[..1]
    }

    /// Parses a signature from a string, checking its shape.
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() == SIGNATURE_LEN && s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()) {
            Some(Self(s.to_string()))
        } else {
            None
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Computes the signature of a JSON value.
pub fn signature(value: &Value) -> Signature {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(value).as_bytes());
    Signature(hex::encode(hasher.finalize()))
}

/// Serializes a value with object keys sorted at every depth.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn signature_deterministic() {
        let a = signature(&json!(["file", "/a.wav", [{ "module": "pad", "before": 0.5 }]]));
        let b = signature(&json!(["file", "/a.wav", [{ "module": "pad", "before": 0.5 }]]));
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), SIGNATURE_LEN);
    }

    #[test]
    fn key_order_does_not_matter() {
        let a: Value = serde_json::from_str(r#"{"module":"pad","before":0.5,"after":1}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"after":1,"before":0.5,"module":"pad"}"#).unwrap();
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(signature(&a), signature(&b));
    }

    #[test]
    fn array_order_matters() {
        let a = signature(&json!([{ "module": "pad" }, { "module": "ramp" }]));
        let b = signature(&json!([{ "module": "ramp" }, { "module": "pad" }]));
        assert_ne!(a, b);
    }

    #[test]
    fn signature_is_filesystem_safe() {
        let sig = signature(&json!({ "weird": "a/b\\c" }));
        assert!(sig.as_str().chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
        assert_eq!(sig.shard().len(), 1);
        assert!(Signature::parse(sig.as_str()).is_some());
        assert!(Signature::parse("ABC").is_none());
    }
}
