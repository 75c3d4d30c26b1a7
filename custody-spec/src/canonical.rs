//! Canonical JSON: the single byte-stable substrate for hashing and signing.
//!
//! UTF-8, keys sorted lexicographically at every nesting level, compact
//! separators, no trailing newline. `serde_json::Value`'s `BTreeMap`-backed
//! object representation already sorts keys, so canonicalization here is a
//! matter of re-serializing through `Value` (which normalizes map ordering)
//! with compact, non-pretty formatting.

use serde::Serialize;
use serde_json::Value;

use crate::error::PrimitiveError;

/// Serialize `value` to canonical JSON bytes.
///
/// Round-trips through [`serde_json::Value`] so that object keys are sorted
/// regardless of the field order the caller's struct happened to declare.
pub fn canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, PrimitiveError> {
    let v: Value = serde_json::to_value(value)?;
    canonical_value_bytes(&v)
}

/// Serialize an already-constructed [`Value`] to canonical JSON bytes.
pub fn canonical_value_bytes(value: &Value) -> Result<Vec<u8>, PrimitiveError> {
    // `serde_json`'s `Value::Object` is a `serde_json::Map`, which by default
    // (the `preserve_order` feature is not enabled in this workspace) is a
    // `BTreeMap` and therefore already key-sorted at every nesting level.
    Ok(serde_json::to_vec(value)?)
}

/// Serialize `value` to a canonical JSON `String`.
pub fn canonical_json_string<T: Serialize>(value: &T) -> Result<String, PrimitiveError> {
    let bytes = canonical_json_bytes(value)?;
    String::from_utf8(bytes).map_err(|e| PrimitiveError::InvalidInput(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_keys_and_strips_whitespace() {
        let v = json!({"b": 1, "a": {"d": 2, "c": 3}});
        let out = canonical_value_bytes(&v).unwrap();
        assert_eq!(out, br#"{"a":{"c":3,"d":2},"b":1}"#);
    }

    #[test]
    fn no_trailing_newline() {
        let v = json!({"x": "y"});
        let out = canonical_json_bytes(&v).unwrap();
        assert!(!out.ends_with(b"\n"));
    }

    #[test]
    fn stable_across_field_declaration_order() {
        #[derive(Serialize)]
        struct A {
            z: u8,
            a: u8,
        }
        let bytes = canonical_json_bytes(&A { z: 1, a: 2 }).unwrap();
        assert_eq!(bytes, br#"{"a":2,"z":1}"#);
    }
}
