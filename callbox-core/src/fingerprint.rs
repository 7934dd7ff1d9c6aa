//! Canonical fingerprints of structured values.
//!
//! A fingerprint is the single answer to "are these two calls the same?".
//! Cache keys, in-flight identities and batch item identities are all built
//! from it.
//!
//! ## Format
//!
//! - `null` or an absent value renders as [`NULL_SENTINEL`]
//! - strings, numbers and booleans render as their JSON text
//! - arrays render as `[a,b,c]`, element order preserved
//! - objects render as `{"k1":v1,"k2":v2}` with keys sorted by byte order
//!
//! Key sorting is explicit: object key order never influences the result,
//! even though `serde_json` maps keep insertion order in this workspace.
//!
//! ```
//! use callbox_core::fingerprint;
//! use serde_json::json;
//!
//! let a = json!({"page": 1, "filter": {"b": true, "a": [1, 2]}});
//! let b = json!({"filter": {"a": [1, 2], "b": true}, "page": 1});
//! assert_eq!(fingerprint(&a), fingerprint(&b));
//! assert_eq!(fingerprint(&a), r#"{"filter":{"a":[1,2],"b":true},"page":1}"#);
//! ```

use std::fmt::Write;

use serde_json::Value;

/// Rendering of `null` and of absent values.
pub const NULL_SENTINEL: &str = "null";

/// Computes the canonical fingerprint of `value`.
pub fn fingerprint(value: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, value);
    out
}

/// Computes the fingerprint of an optional value, absent rendering as [`NULL_SENTINEL`].
pub fn fingerprint_opt(value: Option<&Value>) -> String {
    value.map_or_else(|| NULL_SENTINEL.to_owned(), fingerprint)
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => out.push_str(NULL_SENTINEL),
        Value::Bool(flag) => out.push_str(if *flag { "true" } else { "false" }),
        Value::Number(number) => {
            // Writing into a String cannot fail.
            let _ = write!(out, "{number}");
        }
        Value::String(text) => write_str(out, text),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_str(out, key);
                out.push(':');
                write_value(out, item);
            }
            out.push('}');
        }
    }
}

fn write_str(out: &mut String, text: &str) {
    let _ = write!(out, "{}", Value::from(text));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_primitives_render_as_json_text() {
        assert_eq!(fingerprint(&json!(null)), "null");
        assert_eq!(fingerprint(&json!(true)), "true");
        assert_eq!(fingerprint(&json!(42)), "42");
        assert_eq!(fingerprint(&json!(1.5)), "1.5");
        assert_eq!(fingerprint(&json!("a\"b")), r#""a\"b""#);
        assert_eq!(fingerprint_opt(None), NULL_SENTINEL);
    }

    #[test]
    fn test_key_order_is_irrelevant_at_every_depth() {
        let a = json!({"z": {"y": 1, "x": [{"q": 1, "p": 2}]}, "a": null});
        let b = json!({"a": null, "z": {"x": [{"p": 2, "q": 1}], "y": 1}});
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_array_order_is_significant() {
        assert_ne!(fingerprint(&json!([1, 2])), fingerprint(&json!([2, 1])));
    }

    #[test]
    fn test_structurally_different_values_differ() {
        let values = [
            json!({"id": 1}),
            json!({"id": "1"}),
            json!({"id": [1]}),
            json!({"ids": 1}),
            json!([{"id": 1}]),
            json!("{\"id\":1}"),
            json!({}),
            json!([]),
            json!(null),
        ];
        for (i, a) in values.iter().enumerate() {
            for b in values.iter().skip(i + 1) {
                assert_ne!(fingerprint(a), fingerprint(b), "{a} vs {b}");
            }
        }
    }
}
