//! Key-value flattener
//!
//! Collapses a nested remote payload into a flat [`Record`]. Keys from every
//! nesting level land at the top level without a prefix; on collision the
//! key visited last wins (objects are visited in key order).

use errors::{SyncError, SyncResult};
use serde_json::{Map, Value as JsonValue};
use tracing::debug;

use crate::record::{FieldValue, Record};

/// Source field that the platform sends either as a scalar null or as a
/// one-field sub-record.
pub const ADDITIONAL_INFO_FIELD: &str = "additionalInfo";

/// Fixed key the [`ADDITIONAL_INFO_FIELD`] content is stored under
pub const DESCRIPTION_FIELD: &str = "description";

/// Flatten a nested mapping into a [`Record`]
///
/// Named exception: `additionalInfo` never contributes its own child keys.
/// Its content is written under `description`, whatever the child is called:
/// - `null` or `{}` -> `description = null`
/// - `{"anything": v}` -> `description = v`
/// - several children -> the `description` child if present, else the first
/// - a bare scalar -> that scalar
pub fn flatten(nested: &JsonValue) -> SyncResult<Record> {
    let map = nested.as_object().ok_or_else(|| {
        SyncError::InvalidInput(format!(
            "flatten expects a JSON object, got {}",
            json_kind(nested)
        ))
    })?;

    let mut record = Record::new();
    flatten_into(map, &mut record);
    Ok(record)
}

fn flatten_into(map: &Map<String, JsonValue>, out: &mut Record) {
    for (key, value) in map {
        if key == ADDITIONAL_INFO_FIELD {
            out.insert(DESCRIPTION_FIELD.to_string(), additional_info_value(value));
            continue;
        }

        match value {
            JsonValue::Object(child) => flatten_into(child, out),
            _ => {
                out.insert(key.clone(), scalar(value));
            },
        }
    }
}

fn additional_info_value(value: &JsonValue) -> FieldValue {
    match value {
        JsonValue::Object(child) => {
            if child.len() > 1 {
                debug!(
                    "{} has {} children, expected at most one",
                    ADDITIONAL_INFO_FIELD,
                    child.len()
                );
            }
            child
                .get(DESCRIPTION_FIELD)
                .or_else(|| child.values().next())
                .map(|v| match v {
                    // A nested sub-record here has no single scalar meaning
                    JsonValue::Object(_) => FieldValue::Text(v.to_string()),
                    _ => scalar(v),
                })
                .unwrap_or(FieldValue::Null)
        },
        other => scalar(other),
    }
}

/// Convert a non-object JSON value into a [`FieldValue`]
///
/// Arrays are kept as their compact JSON text.
fn scalar(value: &JsonValue) -> FieldValue {
    match value {
        JsonValue::Null => FieldValue::Null,
        JsonValue::Bool(b) => FieldValue::Bool(*b),
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => FieldValue::Int(i),
            None => n
                .as_f64()
                .map(FieldValue::Float)
                .unwrap_or_else(|| FieldValue::Text(n.to_string())),
        },
        JsonValue::String(s) => FieldValue::Text(s.clone()),
        JsonValue::Array(_) | JsonValue::Object(_) => FieldValue::Text(value.to_string()),
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_keys_surface_at_top_level() {
        let rec = flatten(&json!({
            "name": "Therm-1",
            "type": "thermometer",
            "location": {"room": "lab", "floor": {"level": 2}}
        }))
        .unwrap();

        assert_eq!(rec["name"], FieldValue::Text("Therm-1".into()));
        assert_eq!(rec["room"], FieldValue::Text("lab".into()));
        assert_eq!(rec["level"], FieldValue::Int(2));
        assert!(!rec.contains_key("location"));
        assert!(!rec.contains_key("floor"));
    }

    #[test]
    fn test_last_write_wins_in_key_order() {
        // "a" is visited before "b", so the nested value from "b" wins
        let rec = flatten(&json!({
            "a": {"x": 1},
            "b": {"x": 2}
        }))
        .unwrap();
        assert_eq!(rec["x"], FieldValue::Int(2));
    }

    #[test]
    fn test_additional_info_null() {
        let rec = flatten(&json!({"id": "d1", "additionalInfo": null})).unwrap();
        assert_eq!(rec["description"], FieldValue::Null);
        assert!(!rec.contains_key("additionalInfo"));
    }

    #[test]
    fn test_additional_info_uses_fixed_key_regardless_of_child_name() {
        let a = flatten(&json!({"additionalInfo": {"description": "roof unit"}})).unwrap();
        let b = flatten(&json!({"additionalInfo": {"notes": "roof unit"}})).unwrap();

        assert_eq!(a["description"], FieldValue::Text("roof unit".into()));
        assert_eq!(b["description"], FieldValue::Text("roof unit".into()));
        assert!(!b.contains_key("notes"));
    }

    #[test]
    fn test_additional_info_empty_object() {
        let rec = flatten(&json!({"additionalInfo": {}})).unwrap();
        assert_eq!(rec["description"], FieldValue::Null);
    }

    #[test]
    fn test_additional_info_prefers_description_child() {
        let rec = flatten(&json!({
            "additionalInfo": {"gateway": false, "description": "edge box"}
        }))
        .unwrap();
        assert_eq!(rec["description"], FieldValue::Text("edge box".into()));
        assert!(!rec.contains_key("gateway"));
    }

    #[test]
    fn test_flatten_is_deterministic() {
        let input = json!({
            "z": 1, "a": {"q": "x", "additionalInfo": {"k": "v"}}, "m": [1, 2]
        });
        let first = serde_json::to_string(&flatten(&input).unwrap()).unwrap();
        let second = serde_json::to_string(&flatten(&input).unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_scalars() {
        let rec = flatten(&json!({
            "f": 1.5, "b": true, "n": null, "arr": [1, "two"]
        }))
        .unwrap();
        assert_eq!(rec["f"], FieldValue::Float(1.5));
        assert_eq!(rec["b"], FieldValue::Bool(true));
        assert_eq!(rec["n"], FieldValue::Null);
        assert_eq!(rec["arr"], FieldValue::Text("[1,\"two\"]".into()));
    }

    #[test]
    fn test_non_object_input_is_rejected() {
        for input in [json!(null), json!([1]), json!("x"), json!(3)] {
            assert!(matches!(flatten(&input), Err(SyncError::InvalidInput(_))));
        }
    }
}
