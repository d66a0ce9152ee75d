//! # Value Utilities
//!
//! Helpers shared by the filter engine, the validator and the record
//! transforms:
//! - dot-path navigation into JSON records
//! - loose equality and ordering between JSON scalars
//! - string coercion of scalars

use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Resolve a dot-separated path inside a record.
///
/// Object keys and array indices are both accepted as segments:
/// - `"user.name"` - object property
/// - `"items.0"` - array element
/// - `"meta.#42"` - object key named `42` (a leading `#` is stripped, so
///   numeric keys are never mistaken for indices)
///
/// Missing keys, out-of-range indices and traversal through scalars all
/// yield `None`.
pub fn get_path<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(record);
    }

    path.split('.').try_fold(record, |current, segment| match current {
        Value::Object(map) => map.get(object_key(segment)),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Write `value` at a dot-separated path, creating intermediate objects.
///
/// Returns `false` when the path runs through a scalar and nothing was
/// written.
pub fn set_path(record: &mut Value, path: &str, value: Value) -> bool {
    let segments: Vec<&str> = path.split('.').collect();
    let (last, parents) = match segments.split_last() {
        Some(split) => split,
        None => return false,
    };

    let mut current = record;
    for segment in parents {
        if current.is_null() {
            *current = Value::Object(Map::new());
        }
        current = match current {
            Value::Object(map) => map
                .entry(object_key(segment).to_string())
                .or_insert_with(|| Value::Object(Map::new())),
            Value::Array(items) => match segment.parse::<usize>().ok() {
                Some(i) if i < items.len() => &mut items[i],
                _ => return false,
            },
            _ => return false,
        };
    }

    if current.is_null() {
        *current = Value::Object(Map::new());
    }
    match current {
        Value::Object(map) => {
            map.insert(object_key(last).to_string(), value);
            true
        }
        Value::Array(items) => match last.parse::<usize>().ok() {
            Some(i) if i < items.len() => {
                items[i] = value;
                true
            }
            _ => false,
        },
        _ => false,
    }
}

/// Remove the value at a dot-separated path, returning it.
pub fn remove_path(record: &mut Value, path: &str) -> Option<Value> {
    let (parent, last) = match path.rsplit_once('.') {
        Some((parent, last)) => (get_path_mut(record, parent)?, last),
        None => (record, path),
    };
    parent.as_object_mut()?.remove(object_key(last))
}

fn get_path_mut<'a>(record: &'a mut Value, path: &str) -> Option<&'a mut Value> {
    path.split('.').try_fold(record, |current, segment| match current {
        Value::Object(map) => map.get_mut(object_key(segment)),
        Value::Array(items) => segment
            .parse::<usize>()
            .ok()
            .and_then(move |i| items.get_mut(i)),
        _ => None,
    })
}

fn object_key(segment: &str) -> &str {
    segment.strip_prefix('#').unwrap_or(segment)
}

/// `true` for a missing value or an explicit JSON `null`.
pub fn is_nullish(value: Option<&Value>) -> bool {
    matches!(value, None | Some(Value::Null))
}

/// Equality that treats numerically equal numbers as equal (`1 == 1.0`).
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// Order two scalars of the same kind.
///
/// Numbers compare numerically, strings lexicographically and booleans
/// `false < true`. Any other pairing is incomparable.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// String form of a value: strings verbatim, everything else as JSON text.
pub fn to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Human-readable JSON type name.
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_path() {
        let order = json!({
            "customer": {"name": "Ada", "tier": null},
            "lines": [{"sku": "A-1", "qty": 2}, {"sku": "B-7", "qty": 1}],
            "tags": {"2024": "archived"}
        });

        assert_eq!(get_path(&order, "customer.name"), Some(&json!("Ada")));
        assert_eq!(get_path(&order, "customer.tier"), Some(&Value::Null));
        assert_eq!(get_path(&order, "lines.1.sku"), Some(&json!("B-7")));
        assert_eq!(get_path(&order, "tags.#2024"), Some(&json!("archived")));
        assert_eq!(get_path(&order, ""), Some(&order));

        assert_eq!(get_path(&order, "customer.email"), None);
        assert_eq!(get_path(&order, "customer.name.first"), None);
        assert_eq!(get_path(&order, "lines.5.sku"), None);
        assert_eq!(get_path(&order, "lines.first"), None);
    }

    #[test]
    fn test_set_path_creates_parents() {
        let mut record = json!({"id": 7});
        assert!(set_path(&mut record, "audit.source", json!("import")));
        assert!(set_path(&mut record, "id", json!(8)));
        assert_eq!(record, json!({"id": 8, "audit": {"source": "import"}}));

        let mut lines = json!({"lines": [{"qty": 1}]});
        assert!(set_path(&mut lines, "lines.0.qty", json!(3)));
        assert!(!set_path(&mut lines, "lines.4.qty", json!(3)));
        assert_eq!(lines, json!({"lines": [{"qty": 3}]}));

        let mut scalar = json!({"name": "Ada"});
        assert!(!set_path(&mut scalar, "name.first", json!("A")));
    }

    #[test]
    fn test_remove_path() {
        let mut record = json!({"a": {"b": 1, "c": 2}, "d": 3});
        assert_eq!(remove_path(&mut record, "a.b"), Some(json!(1)));
        assert_eq!(remove_path(&mut record, "d"), Some(json!(3)));
        assert_eq!(remove_path(&mut record, "a.zzz"), None);
        assert_eq!(record, json!({"a": {"c": 2}}));
    }

    #[test]
    fn test_loose_equality_and_ordering() {
        assert!(loose_eq(&json!(1), &json!(1.0)));
        assert!(!loose_eq(&json!(1), &json!("1")));
        assert_eq!(compare_values(&json!(2), &json!(10.5)), Some(Ordering::Less));
        assert_eq!(compare_values(&json!("b"), &json!("a")), Some(Ordering::Greater));
        assert_eq!(compare_values(&json!(false), &json!(true)), Some(Ordering::Less));
        assert_eq!(compare_values(&json!(1), &json!("1")), None);
        assert_eq!(compare_values(&json!([1]), &json!([1])), None);
    }

    #[test]
    fn test_text_and_type_names() {
        assert_eq!(to_text(&json!("plain")), "plain");
        assert_eq!(to_text(&json!(42)), "42");
        assert_eq!(to_text(&json!(true)), "true");
        assert_eq!(type_name(&json!({})), "object");
        assert!(is_nullish(None));
        assert!(is_nullish(Some(&Value::Null)));
        assert!(!is_nullish(Some(&json!(0))));
    }
}
