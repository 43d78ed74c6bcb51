//! Canonical JSON form and SHA-256 hashing.
//!
//! Two documents that differ only in key order, insignificant whitespace
//! around string values, or numeric spelling (`10`, `10.0`, `1e1`) produce the
//! same canonical string and therefore the same hash. Request hashing for
//! idempotency and envelope content hashing both go through here.

use serde::Serialize;
use serde_json::{Number, Value};
use sha2::{Digest, Sha256};

/// Largest magnitude at which an integral `f64` is rendered as an integer.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Render a JSON value in canonical form.
///
/// - object keys are sorted; they are not trimmed, so distinct keys stay
///   distinct
/// - string values are trimmed
/// - integral floats render as integers, other floats use the shortest
///   round-trip representation
/// - no whitespace between tokens
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

/// SHA-256 (lowercase hex) of the canonical form of `value`.
pub fn canonical_hash(value: &Value) -> String {
    format!("{:x}", Sha256::digest(canonical_json(value).as_bytes()))
}

/// Serialize `input` to JSON and hash its canonical form.
pub fn hash_serializable<T: Serialize + ?Sized>(input: &T) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(input)?;
    Ok(canonical_hash(&value))
}

/// Normalized decimal spelling of a JSON number.
pub fn normalize_number(number: &Number) -> String {
    if let Some(i) = number.as_i64() {
        return i.to_string();
    }
    if let Some(u) = number.as_u64() {
        return u.to_string();
    }
    match number.as_f64() {
        Some(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < MAX_EXACT_INTEGER => {
            format!("{}", f as i64)
        }
        Some(f) => format!("{}", f),
        None => number.to_string(),
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&normalize_number(n)),
        Value::String(s) => write_string(s.trim(), out),
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
        Value::Object(map) => {
            let mut entries: Vec<(&str, &Value)> =
                map.iter().map(|(k, v)| (k.as_str(), v)).collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_canonical(item, out);
            }
            out.push('}');
        }
    }
}

fn write_string(s: &str, out: &mut String) {
    // Display on a JSON string value applies standard escaping.
    out.push_str(&Value::String(s.to_string()).to_string());
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_order_does_not_change_hash() {
        let a = json!({"user_id": "user-1", "format": "json", "nested": {"b": 1, "a": 2}});
        let b = json!({"nested": {"a": 2, "b": 1}, "format": "json", "user_id": "user-1"});

        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(canonical_hash(&a), canonical_hash(&b));
    }

    #[test]
    fn test_whitespace_in_values_is_trimmed() {
        let a = json!({"currency": " USD ", "method": "standard"});
        let b = json!({"currency": "USD", "method": "standard\n"});

        assert_eq!(canonical_hash(&a), canonical_hash(&b));
    }

    #[test]
    fn test_numeric_spelling_is_normalized() {
        let a: Value = serde_json::from_str(r#"{"amount": 10}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"amount": 10.0}"#).unwrap();
        let c: Value = serde_json::from_str(r#"{"amount": 1e1}"#).unwrap();

        assert_eq!(canonical_json(&a), r#"{"amount":10}"#);
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(canonical_json(&a), canonical_json(&c));
    }

    #[test]
    fn test_fractional_numbers_keep_their_value() {
        let a: Value = serde_json::from_str(r#"{"amount": 125.25}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"amount": 125.250}"#).unwrap();

        assert_eq!(canonical_json(&a), r#"{"amount":125.25}"#);
        assert_eq!(canonical_hash(&a), canonical_hash(&b));
    }

    #[test]
    fn test_different_payloads_hash_differently() {
        let a = json!({"user_id": "user-1", "format": "json"});
        let b = json!({"user_id": "user-1", "format": "csv"});

        assert_ne!(canonical_hash(&a), canonical_hash(&b));
    }

    #[test]
    fn test_keys_differing_by_whitespace_stay_distinct() {
        let both = json!({"a": 1, " a": 2});
        assert_eq!(canonical_json(&both), r#"{" a":2,"a":1}"#);

        let padded = json!({" a": 1});
        let plain = json!({"a": 1});
        assert_ne!(canonical_hash(&padded), canonical_hash(&plain));
    }

    #[test]
    fn test_strings_are_escaped() {
        let v = json!({"note": "say \"hi\""});
        assert_eq!(canonical_json(&v), r#"{"note":"say \"hi\""}"#);
    }

    #[test]
    fn test_hash_is_hex_sha256() {
        let hash = canonical_hash(&json!({"a": 1}));
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
