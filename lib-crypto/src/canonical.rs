//! Canonical JSON encoding.
//!
//! Signatures cover canonical encodings: object keys sorted lexicographically,
//! minimal separators, no insignificant whitespace. Two JSON documents that
//! differ only in key order or formatting produce identical canonical bytes.

use serde::Serialize;
use serde_json::Value;

/// Encode a serializable value as canonical JSON.
pub fn canonical_json<T: Serialize>(value: &T) -> String {
    let value = serde_json::to_value(value).unwrap_or(Value::Null);
    let mut out = String::new();
    write_canonical(&value, &mut out);
    out
}

/// Canonical JSON as UTF-8 bytes, the form that signatures cover.
pub fn canonical_json_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    canonical_json(value).into_bytes()
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).unwrap_or_default());
                out.push(':');
                write_canonical(&map[*key], out);
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
        other => {
            out.push_str(&serde_json::to_string(other).unwrap_or_default());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_keys_are_sorted() {
        let a = json!({"b": 1, "a": 2, "c": {"z": 0, "y": 1}});
        assert_eq!(canonical_json(&a), r#"{"a":2,"b":1,"c":{"y":1,"z":0}}"#);
    }

    #[test]
    fn test_minimal_whitespace() {
        let v = json!({"x": [1, 2, 3], "s": "hi there"});
        assert_eq!(canonical_json(&v), r#"{"s":"hi there","x":[1,2,3]}"#);
    }

    #[test]
    fn test_stable_under_key_reordering() {
        let a: Value = serde_json::from_str(r#"{"one":1,"two":{"x":true,"y":null}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"two":{"y":null,"x":true},"one":1}"#).unwrap();
        assert_eq!(canonical_json(&a), canonical_json(&b));
    }

    proptest! {
        #[test]
        fn prop_roundtrip_preserves_value(keys in proptest::collection::vec("[a-z]{1,8}", 1..8)) {
            let mut map = serde_json::Map::new();
            for (i, k) in keys.iter().enumerate() {
                map.insert(k.clone(), json!(i));
            }
            let v = Value::Object(map);
            let encoded = canonical_json(&v);
            let decoded: Value = serde_json::from_str(&encoded).unwrap();
            prop_assert_eq!(decoded, v);
        }
    }
}
