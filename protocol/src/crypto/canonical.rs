//! # Canonical JSON
//!
//! The exact bytes a signature covers. Signer and verifier both go through
//! [`canonical_bytes`]; if they ever disagree by a single byte, every
//! signature in the network fails, so this module is small on purpose.
//!
//! Rules:
//!
//! - Object keys sorted by their UTF-8 bytes, recursively.
//! - No whitespace anywhere: `,` and `:` separators only.
//! - Strings escaped exactly as `serde_json` escapes them.
//! - Numbers written as `serde_json` writes them.
//! - Array order preserved.
//!
//! We don't rely on `serde_json::Map` iteration order. It's sorted today
//! because the `preserve_order` feature is off, but any crate in the graph
//! can turn that feature on and silently reorder every signature.

use serde::Serialize;
use serde_json::Value;

/// Serialize any value into its canonical byte form.
pub fn canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    canonical_value_bytes(&value)
}

/// Canonical bytes for an already-built JSON value.
pub fn canonical_value_bytes(value: &Value) -> Result<Vec<u8>, serde_json::Error> {
    let mut out = Vec::with_capacity(512);
    write_value(&mut out, value)?;
    Ok(out)
}

/// Like [`canonical_value_bytes`], but with one member removed from a nested
/// object first. `path` names the object chain, the last element is the key
/// to drop. Missing intermediate objects are not an error; there's simply
/// nothing to remove.
pub fn canonical_bytes_without(value: &Value, path: &[&str]) -> Result<Vec<u8>, serde_json::Error> {
    let mut value = value.clone();
    if let Some((last, parents)) = path.split_last() {
        let mut cursor = Some(&mut value);
        for key in parents {
            cursor = cursor.and_then(|v| v.get_mut(*key));
        }
        if let Some(Value::Object(map)) = cursor {
            map.remove(*last);
        }
    }
    canonical_value_bytes(&value)
}

fn write_value(out: &mut Vec<u8>, value: &Value) -> Result<(), serde_json::Error> {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
            out.push(b'{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                serde_json::to_writer(&mut *out, key)?;
                out.push(b':');
                write_value(out, val)?;
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(out, item)?;
            }
            out.push(b']');
        }
        // Scalars have exactly one compact form.
        scalar => serde_json::to_writer(&mut *out, scalar)?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_are_sorted_recursively() {
        let v = json!({"b": 1, "a": {"z": true, "m": [3, {"y": null, "x": "s"}]}});
        let bytes = canonical_value_bytes(&v).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"a":{"m":[3,{"x":"s","y":null}],"z":true},"b":1}"#
        );
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let a = json!({"carrier": "ACME", "bol_number": "BOL-1"});
        let mut map = serde_json::Map::new();
        map.insert("bol_number".into(), json!("BOL-1"));
        map.insert("carrier".into(), json!("ACME"));
        let b = Value::Object(map);
        assert_eq!(
            canonical_value_bytes(&a).unwrap(),
            canonical_value_bytes(&b).unwrap()
        );
    }

    #[test]
    fn strings_are_escaped() {
        let v = json!({"notes": "dock \"B\"\n"});
        let bytes = canonical_value_bytes(&v).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"notes":"dock \"B\"\n"}"#
        );
    }

    #[test]
    fn nested_member_is_removed() {
        let v = json!({"security": {"signature": "abcd", "signer_id": "SHIP-01"}, "x": 1});
        let bytes = canonical_bytes_without(&v, &["security", "signature"]).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"security":{"signer_id":"SHIP-01"},"x":1}"#
        );
        // Input untouched.
        assert_eq!(v["security"]["signature"], "abcd");
    }

    #[test]
    fn missing_path_is_a_no_op() {
        let v = json!({"x": 1});
        let bytes = canonical_bytes_without(&v, &["security", "signature"]).unwrap();
        assert_eq!(bytes, b"{\"x\":1}");
    }
}
