// src/document.rs
// Ordered document model with dot-path addressing.

use serde_json::{Map, Value};

use crate::error::{Result, VellumError};
use crate::oid::Oid;

/// A schema-less document. Field order is preserved (serde_json is built
/// with `preserve_order`). The `_id` OID is kept apart from user fields,
/// mirroring how it is reserved in the storage layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub oid: Option<Oid>,
    fields: Map<String, Value>,
}

impl Document {
    pub fn new() -> Self {
        Document {
            oid: None,
            fields: Map::new(),
        }
    }

    pub fn with_fields(fields: Map<String, Value>) -> Self {
        Document { oid: None, fields }
    }

    /// Build a document from a JSON object. A present `_id` must be a
    /// 24-hex-char string; field names must not contain `.` or `$`.
    pub fn from_value(value: Value) -> Result<Self> {
        let map = match value {
            Value::Object(map) => map,
            other => {
                return Err(VellumError::Validation(format!(
                    "Document must be a JSON object, got {}",
                    type_name(&other)
                )))
            }
        };

        let mut oid = None;
        let mut fields = Map::new();
        for (key, val) in map {
            if key == "_id" {
                let hex = val.as_str().ok_or_else(|| {
                    VellumError::Validation("_id must be a 24-hex-char string".into())
                })?;
                oid = Some(hex.parse()?);
            } else {
                fields.insert(key, val);
            }
        }

        let doc = Document { oid, fields };
        doc.validate()?;
        Ok(doc)
    }

    /// Serialize to a JSON object with `_id` first.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        if let Some(oid) = &self.oid {
            map.insert("_id".to_string(), Value::String(oid.to_hex()));
        }
        for (k, v) in &self.fields {
            map.insert(k.clone(), v.clone());
        }
        Value::Object(map)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.fields
    }

    /// Reject field names containing the reserved `.` / `$` characters,
    /// recursively through nested objects and arrays.
    pub fn validate(&self) -> Result<()> {
        for (key, val) in &self.fields {
            validate_key(key)?;
            validate_nested(val)?;
        }
        Ok(())
    }

    /// Resolve a dot path to its first value, descending into the first
    /// element when an array is crossed mid-path.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        if path == "_id" {
            return None; // _id is addressed through `oid`
        }
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.fields.get(first)?;
        for seg in segments {
            current = step(current, seg)?;
        }
        Some(current)
    }

    /// Resolve a dot path to every terminal value, applying the implicit
    /// any-element wildcard when an array is crossed mid-path.
    pub fn collect_path<'a>(&'a self, path: &str) -> Vec<&'a Value> {
        let segments: Vec<&str> = path.split('.').collect();
        let mut out = Vec::new();
        if let Some(first) = segments.first() {
            if let Some(root) = self.fields.get(*first) {
                collect(root, &segments[1..], &mut out);
            }
        }
        out
    }

    /// Set a value at a dot path, creating intermediate objects as needed.
    /// Numeric segments index into existing arrays.
    pub fn set_path(&mut self, path: &str, value: Value) -> Result<()> {
        let segments: Vec<&str> = path.split('.').collect();
        let (first, rest) = segments
            .split_first()
            .ok_or_else(|| VellumError::Validation("Empty field path".into()))?;
        if rest.is_empty() {
            self.fields.insert(first.to_string(), value);
            return Ok(());
        }
        let slot = self
            .fields
            .entry(first.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        set_in(slot, rest, value)
    }

    /// Remove the value at a dot path. Returns the removed value.
    pub fn remove_path(&mut self, path: &str) -> Option<Value> {
        let segments: Vec<&str> = path.split('.').collect();
        let (first, rest) = segments.split_first()?;
        if rest.is_empty() {
            return self.fields.remove(*first);
        }
        let mut current = self.fields.get_mut(*first)?;
        for seg in &rest[..rest.len() - 1] {
            current = step_mut(current, seg)?;
        }
        let last = rest[rest.len() - 1];
        match current {
            Value::Object(map) => map.remove(last),
            Value::Array(arr) => {
                let idx: usize = last.parse().ok()?;
                if idx < arr.len() {
                    Some(arr.remove(idx))
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.contains('.') || key.contains('$') {
        return Err(VellumError::Validation(format!(
            "Illegal field name '{}': '.' and '$' are reserved",
            key
        )));
    }
    Ok(())
}

fn validate_nested(value: &Value) -> Result<()> {
    match value {
        Value::Object(map) => {
            for (key, val) in map {
                validate_key(key)?;
                validate_nested(val)?;
            }
            Ok(())
        }
        Value::Array(arr) => {
            for val in arr {
                validate_nested(val)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

fn step<'a>(value: &'a Value, segment: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(arr) => {
            if let Ok(idx) = segment.parse::<usize>() {
                arr.get(idx)
            } else {
                arr.first().and_then(|v| step(v, segment))
            }
        }
        _ => None,
    }
}

fn step_mut<'a>(value: &'a mut Value, segment: &str) -> Option<&'a mut Value> {
    match value {
        Value::Object(map) => map.get_mut(segment),
        Value::Array(arr) => {
            let idx = segment.parse::<usize>().ok()?;
            arr.get_mut(idx)
        }
        _ => None,
    }
}

fn collect<'a>(value: &'a Value, rest: &[&str], out: &mut Vec<&'a Value>) {
    if rest.is_empty() {
        out.push(value);
        return;
    }
    match value {
        Value::Object(map) => {
            if let Some(next) = map.get(rest[0]) {
                collect(next, &rest[1..], out);
            }
        }
        Value::Array(arr) => {
            if let Ok(idx) = rest[0].parse::<usize>() {
                if let Some(next) = arr.get(idx) {
                    collect(next, &rest[1..], out);
                }
            } else {
                // Implicit any-element wildcard.
                for elem in arr {
                    collect(elem, rest, out);
                }
            }
        }
        _ => {}
    }
}

fn set_in(slot: &mut Value, segments: &[&str], value: Value) -> Result<()> {
    let (first, rest) = segments.split_first().expect("non-empty path");
    if rest.is_empty() {
        match slot {
            Value::Object(map) => {
                map.insert(first.to_string(), value);
                Ok(())
            }
            Value::Array(arr) => {
                let idx: usize = first.parse().map_err(|_| {
                    VellumError::Validation(format!("Expected array index, got '{}'", first))
                })?;
                if idx >= arr.len() {
                    return Err(VellumError::Validation(format!(
                        "Array index {} out of bounds",
                        idx
                    )));
                }
                arr[idx] = value;
                Ok(())
            }
            other => {
                *other = Value::Object(Map::new());
                set_in(other, segments, value)
            }
        }
    } else {
        match slot {
            Value::Object(map) => {
                let next = map
                    .entry(first.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                set_in(next, rest, value)
            }
            Value::Array(arr) => {
                let idx: usize = first.parse().map_err(|_| {
                    VellumError::Validation(format!("Expected array index, got '{}'", first))
                })?;
                let next = arr.get_mut(idx).ok_or_else(|| {
                    VellumError::Validation(format!("Array index {} out of bounds", idx))
                })?;
                set_in(next, rest, value)
            }
            other => {
                *other = Value::Object(Map::new());
                set_in(other, segments, value)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        Document::from_value(value).unwrap()
    }

    #[test]
    fn test_from_value_assigns_no_oid() {
        let d = doc(json!({"name": "Alice", "age": 30}));
        assert!(d.oid.is_none());
        assert_eq!(d.fields().len(), 2);
    }

    #[test]
    fn test_from_value_parses_oid() {
        let oid = Oid::new();
        let d = doc(json!({"_id": oid.to_hex(), "name": "Bob"}));
        assert_eq!(d.oid, Some(oid));
        assert!(d.fields().get("_id").is_none());
    }

    #[test]
    fn test_from_value_rejects_non_object() {
        assert!(Document::from_value(json!([1, 2, 3])).is_err());
        assert!(Document::from_value(json!("text")).is_err());
    }

    #[test]
    fn test_from_value_rejects_bad_oid() {
        let result = Document::from_value(json!({"_id": "nothex"}));
        assert!(matches!(result, Err(VellumError::Validation(_))));
    }

    #[test]
    fn test_illegal_field_names() {
        assert!(Document::from_value(json!({"a.b": 1})).is_err());
        assert!(Document::from_value(json!({"$set": 1})).is_err());
        assert!(Document::from_value(json!({"ok": {"bad.key": 1}})).is_err());
        assert!(Document::from_value(json!({"ok": [{"$x": 1}]})).is_err());
    }

    #[test]
    fn test_to_value_puts_id_first() {
        let oid = Oid::new();
        let d = doc(json!({"_id": oid.to_hex(), "name": "Eve"}));
        let v = d.to_value();
        let keys: Vec<&String> = v.as_object().unwrap().keys().collect();
        assert_eq!(keys[0], "_id");
    }

    #[test]
    fn test_get_path_nested() {
        let d = doc(json!({"user": {"profile": {"name": "Helen"}}}));
        assert_eq!(d.get_path("user.profile.name").unwrap(), &json!("Helen"));
        assert!(d.get_path("user.profile.missing").is_none());
    }

    #[test]
    fn test_collect_path_array_wildcard() {
        let d = doc(json!({"items": [{"sku": "a"}, {"sku": "b"}, {"sku": "b"}]}));
        let values = d.collect_path("items.sku");
        assert_eq!(values, vec![&json!("a"), &json!("b"), &json!("b")]);
    }

    #[test]
    fn test_collect_path_numeric_index() {
        let d = doc(json!({"items": [{"sku": "a"}, {"sku": "b"}]}));
        let values = d.collect_path("items.1.sku");
        assert_eq!(values, vec![&json!("b")]);
    }

    #[test]
    fn test_set_path_creates_intermediates() {
        let mut d = Document::new();
        d.set_path("a.b.c", json!(5)).unwrap();
        assert_eq!(d.get_path("a.b.c").unwrap(), &json!(5));
    }

    #[test]
    fn test_set_path_into_array() {
        let mut d = doc(json!({"arr": [{"x": 1}, {"x": 2}]}));
        d.set_path("arr.1.x", json!(99)).unwrap();
        assert_eq!(d.get_path("arr.1.x").unwrap(), &json!(99));
    }

    #[test]
    fn test_remove_path() {
        let mut d = doc(json!({"a": {"b": 1, "c": 2}}));
        assert_eq!(d.remove_path("a.b"), Some(json!(1)));
        assert!(d.get_path("a.b").is_none());
        assert_eq!(d.get_path("a.c").unwrap(), &json!(2));
    }

    #[test]
    fn test_value_roundtrip() {
        let oid = Oid::new();
        let original = doc(json!({
            "_id": oid.to_hex(),
            "name": "Grace",
            "tags": ["rust", "database"],
            "meta": {"version": 1}
        }));
        let restored = Document::from_value(original.to_value()).unwrap();
        assert_eq!(restored, original);
    }
}
