// src/update.rs
// Update expressions. Update operators live in the same object as the
// match clauses ({"name": "Covi", "$set": {"age": 8}}); `split_update`
// separates the two before parsing.

use std::collections::HashMap;

use serde_json::{Map, Number, Value};

use crate::document::Document;
use crate::error::{Result, VellumError};

/// Parsed update operators. Paths may contain the positional `$` segment,
/// resolved at apply time from the query's matched array positions.
#[derive(Debug, Clone, Default)]
pub struct UpdateSpec {
    set: Vec<(String, Value)>,
    unset: Vec<String>,
    inc: Vec<(String, Number)>,
    add_to_set: Vec<(String, Vec<Value>)>,
    pull: Vec<(String, Vec<Value>)>,
    upsert: Option<Value>,
    dropall: bool,
}

/// Split a combined query/update object into the pure match expression
/// and the parsed update operators.
pub fn split_update(value: &Value) -> Result<(Value, UpdateSpec)> {
    let obj = value
        .as_object()
        .ok_or_else(|| VellumError::Validation("Update expression must be an object".into()))?;

    let mut query = Map::new();
    let mut spec = UpdateSpec::default();
    for (key, val) in obj {
        match key.as_str() {
            "$set" => spec.set = path_value_pairs(val, "$set")?,
            "$unset" => {
                spec.unset = path_value_pairs(val, "$unset")?
                    .into_iter()
                    .map(|(path, _)| path)
                    .collect();
            }
            "$inc" => {
                for (path, v) in path_value_pairs(val, "$inc")? {
                    match v {
                        Value::Number(n) => spec.inc.push((path, n)),
                        _ => {
                            return Err(VellumError::Validation(
                                "$inc expects numeric increments".into(),
                            ))
                        }
                    }
                }
            }
            "$addToSet" => {
                for (path, v) in path_value_pairs(val, "$addToSet")? {
                    spec.add_to_set.push((path, vec![v]));
                }
            }
            "$addToSetAll" => {
                for (path, v) in path_value_pairs(val, "$addToSetAll")? {
                    spec.add_to_set.push((path, as_array(v, "$addToSetAll")?));
                }
            }
            "$pull" => {
                for (path, v) in path_value_pairs(val, "$pull")? {
                    spec.pull.push((path, vec![v]));
                }
            }
            "$pullAll" => {
                for (path, v) in path_value_pairs(val, "$pullAll")? {
                    spec.pull.push((path, as_array(v, "$pullAll")?));
                }
            }
            "$upsert" => {
                if !val.is_object() {
                    return Err(VellumError::Validation("$upsert expects a document".into()));
                }
                spec.upsert = Some(val.clone());
            }
            "$dropall" => {
                spec.dropall = val.as_bool().unwrap_or(false);
            }
            _ => {
                query.insert(key.clone(), val.clone());
            }
        }
    }

    if spec.dropall && (spec.upsert.is_some() || spec.has_field_ops()) {
        return Err(VellumError::Validation(
            "$dropall cannot be combined with other update operators".into(),
        ));
    }

    Ok((Value::Object(query), spec))
}

fn path_value_pairs(value: &Value, op: &str) -> Result<Vec<(String, Value)>> {
    let obj = value
        .as_object()
        .ok_or_else(|| VellumError::Validation(format!("{} expects an object", op)))?;
    Ok(obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

fn as_array(value: Value, op: &str) -> Result<Vec<Value>> {
    match value {
        Value::Array(arr) => Ok(arr),
        _ => Err(VellumError::Validation(format!("{} expects an array", op))),
    }
}

impl UpdateSpec {
    pub fn has_field_ops(&self) -> bool {
        !self.set.is_empty() || !self.unset.is_empty() || !self.inc.is_empty()
            || !self.add_to_set.is_empty() || !self.pull.is_empty()
    }

    pub fn is_dropall(&self) -> bool {
        self.dropall
    }

    pub fn upsert_template(&self) -> Option<&Value> {
        self.upsert.as_ref()
    }

    /// Apply every field operator to the document. Returns true when the
    /// document actually changed. `positions` carries the array indices
    /// the query matched, consumed by the positional `$` segment.
    pub fn apply(
        &self,
        doc: &mut Document,
        positions: &HashMap<String, usize>,
    ) -> Result<bool> {
        let mut changed = false;

        for (path, value) in &self.set {
            let path = resolve_positional(path, positions)?;
            if path == "_id" {
                return Err(VellumError::Validation("_id cannot be modified".into()));
            }
            if doc.get_path(&path) != Some(value) {
                doc.set_path(&path, value.clone())?;
                changed = true;
            }
        }

        // On a matched document $upsert degrades to $set of its fields.
        if let Some(Value::Object(template)) = &self.upsert {
            for (path, value) in template {
                if path == "_id" {
                    continue;
                }
                if doc.get_path(path) != Some(value) {
                    doc.set_path(path, value.clone())?;
                    changed = true;
                }
            }
        }

        for path in &self.unset {
            let path = resolve_positional(path, positions)?;
            if path == "_id" {
                return Err(VellumError::Validation("_id cannot be modified".into()));
            }
            if doc.remove_path(&path).is_some() {
                changed = true;
            }
        }

        for (path, delta) in &self.inc {
            let path = resolve_positional(path, positions)?;
            let next = match doc.get_path(&path) {
                Some(Value::Number(current)) => add_numbers(current, delta),
                Some(other) => {
                    return Err(VellumError::TypeMismatch(format!(
                        "$inc target '{}' is not a number (found {})",
                        path,
                        type_label(other)
                    )))
                }
                None => Value::Number(delta.clone()),
            };
            doc.set_path(&path, next)?;
            changed = true;
        }

        for (path, values) in &self.add_to_set {
            let path = resolve_positional(path, positions)?;
            match doc.get_path(&path).cloned() {
                Some(Value::Array(mut arr)) => {
                    let mut appended = false;
                    for value in values {
                        if !arr.iter().any(|e| crate::query::values_eq(e, value)) {
                            arr.push(value.clone());
                            appended = true;
                        }
                    }
                    if appended {
                        doc.set_path(&path, Value::Array(arr))?;
                        changed = true;
                    }
                }
                Some(other) => {
                    return Err(VellumError::TypeMismatch(format!(
                        "$addToSet target '{}' is not an array (found {})",
                        path,
                        type_label(&other)
                    )))
                }
                None => {
                    let mut arr = Vec::new();
                    for value in values {
                        if !arr.iter().any(|e| crate::query::values_eq(e, value)) {
                            arr.push(value.clone());
                        }
                    }
                    doc.set_path(&path, Value::Array(arr))?;
                    changed = true;
                }
            }
        }

        for (path, values) in &self.pull {
            let path = resolve_positional(path, positions)?;
            if let Some(Value::Array(arr)) = doc.get_path(&path).cloned() {
                let kept: Vec<Value> = arr
                    .into_iter()
                    .filter(|e| !values.iter().any(|v| crate::query::values_eq(e, v)))
                    .collect();
                if Some(&Value::Array(kept.clone())) != doc.get_path(&path) {
                    doc.set_path(&path, Value::Array(kept))?;
                    changed = true;
                }
            }
        }

        Ok(changed)
    }
}

/// Replace each `$` path segment with the array index recorded for the
/// path prefix before it.
fn resolve_positional(path: &str, positions: &HashMap<String, usize>) -> Result<String> {
    if !path.contains('$') {
        return Ok(path.to_string());
    }
    let mut resolved: Vec<String> = Vec::new();
    for seg in path.split('.') {
        if seg == "$" {
            let prefix = resolved.join(".");
            let idx = positions.get(&prefix).ok_or_else(|| {
                VellumError::Validation(format!(
                    "Positional '$' in '{}' has no matched array element for '{}'",
                    path, prefix
                ))
            })?;
            resolved.push(idx.to_string());
        } else if seg.contains('$') {
            return Err(VellumError::Validation(format!(
                "Illegal path segment '{}' in '{}'",
                seg, path
            )));
        } else {
            resolved.push(seg.to_string());
        }
    }
    Ok(resolved.join("."))
}

/// Integer + integer stays integer; anything else, including integer
/// overflow, goes through f64.
fn add_numbers(current: &Number, delta: &Number) -> Value {
    if let (Some(a), Some(b)) = (current.as_i64(), delta.as_i64()) {
        if let Some(sum) = a.checked_add(b) {
            return Value::Number(Number::from(sum));
        }
    }
    let sum = current.as_f64().unwrap_or(0.0) + delta.as_f64().unwrap_or(0.0);
    Number::from_f64(sum)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

fn type_label(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
