//! Cache fingerprints: stable hex digest over an op's short name and its
//! cache-affecting inputs.

use serde_json::Value;

/// Recursively sorts object keys so logically equal inputs hash identically.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: std::collections::BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, canonicalize(v))).collect();
            Value::Object(
                sorted
                    .into_iter()
                    .map(|(k, v)| (k.clone(), v))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Fingerprint of `(op short name, cache-affecting inputs)` as lowercase hex.
///
/// Inputs are canonicalized (sorted keys, recursive) before hashing so map
/// iteration order never changes the key.
pub fn fingerprint(short_name: &str, inputs: &serde_json::Map<String, Value>) -> String {
    let canonical = canonicalize(&Value::Object(inputs.clone()));
    let payload = format!(
        "{short_name}\n{}",
        serde_json::to_string(&canonical).unwrap_or_default()
    );
    blake3::hash(payload.as_bytes()).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(pairs: &[(&str, Value)]) -> serde_json::Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn identical_inputs_identical_fingerprint() {
        let a = fingerprint("echo", &map(&[("text", json!("hi")), ("n", json!(1))]));
        let b = fingerprint("echo", &map(&[("n", json!(1)), ("text", json!("hi"))]));
        assert_eq!(a, b);
    }

    #[test]
    fn short_name_is_part_of_the_key() {
        let inputs = map(&[("text", json!("hi"))]);
        assert_ne!(fingerprint("echo", &inputs), fingerprint("len", &inputs));
    }

    #[test]
    fn nested_objects_are_canonicalized() {
        let a = fingerprint("op", &map(&[("cfg", json!({"b": 2, "a": 1}))]));
        let b = fingerprint("op", &map(&[("cfg", json!({"a": 1, "b": 2}))]));
        assert_eq!(a, b);
    }

    #[test]
    fn value_changes_change_the_key() {
        let a = fingerprint("op", &map(&[("q", json!("x"))]));
        let b = fingerprint("op", &map(&[("q", json!("y"))]));
        assert_ne!(a, b);
    }

    #[test]
    fn fingerprint_is_hex() {
        let fp = fingerprint("op", &map(&[]));
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
