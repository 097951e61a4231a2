// src/hints.rs
// Query hints: result window, ordering, count-only mode and field
// projection.

use std::cmp::Ordering;

use serde_json::Value;

use crate::document::Document;
use crate::error::{Result, VellumError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    /// true: keep only the listed paths; false: drop the listed paths.
    pub include: bool,
    pub paths: Vec<String>,
    /// `_id` is kept by default and dropped only on an explicit `_id: 0`.
    pub keep_id: bool,
}

#[derive(Debug, Clone, Default)]
pub struct QueryHints {
    pub max: Option<usize>,
    pub skip: usize,
    pub order_by: Vec<(String, SortDir)>,
    pub only_count: bool,
    pub fields: Option<Projection>,
}

impl QueryHints {
    pub fn parse(value: &Value) -> Result<QueryHints> {
        let obj = value
            .as_object()
            .ok_or_else(|| VellumError::Validation("Hints must be an object".into()))?;

        let mut hints = QueryHints::default();
        for (key, val) in obj {
            match key.as_str() {
                "$max" => hints.max = Some(as_count(val, "$max")?),
                "$skip" => hints.skip = as_count(val, "$skip")?,
                "$onlycount" => hints.only_count = val.as_bool().unwrap_or(false),
                "$orderby" => hints.order_by = parse_orderby(val)?,
                "$fields" => hints.fields = Some(parse_fields(val)?),
                other => {
                    return Err(VellumError::Validation(format!(
                        "Unknown hint '{}'",
                        other
                    )));
                }
            }
        }
        Ok(hints)
    }

    /// Sort documents in place per `$orderby`. Ties keep insertion order
    /// (the sort is stable).
    pub fn apply_order(&self, docs: &mut [Document]) {
        if self.order_by.is_empty() {
            return;
        }
        docs.sort_by(|a, b| {
            for (path, dir) in &self.order_by {
                let ord = total_cmp(a.get_path(path), b.get_path(path));
                let ord = match dir {
                    SortDir::Asc => ord,
                    SortDir::Desc => ord.reverse(),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
    }

    /// Apply `$skip` and `$max` to an already-ordered result list.
    pub fn apply_window(&self, docs: Vec<Document>) -> Vec<Document> {
        let mut iter = docs.into_iter().skip(self.skip);
        match self.max {
            Some(max) => iter.by_ref().take(max).collect(),
            None => iter.collect(),
        }
    }

    /// Project one document per `$fields`. An include projection keeps
    /// the listed paths plus `_id` plus every `$orderby` path.
    pub fn project(&self, doc: &Document) -> Result<Document> {
        let Some(projection) = &self.fields else {
            return Ok(doc.clone());
        };

        let mut out = if projection.include {
            let mut slim = Document::new();
            let ordered = self.order_by.iter().map(|(path, _)| path);
            for path in projection.paths.iter().chain(ordered) {
                if let Some(value) = doc.get_path(path) {
                    slim.set_path(path, value.clone())?;
                }
            }
            slim
        } else {
            let mut full = doc.clone();
            for path in &projection.paths {
                full.remove_path(path);
            }
            full
        };

        out.oid = if projection.keep_id { doc.oid } else { None };
        Ok(out)
    }
}

fn as_count(value: &Value, hint: &str) -> Result<usize> {
    value
        .as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| VellumError::Validation(format!("{} expects a non-negative integer", hint)))
}

fn parse_orderby(value: &Value) -> Result<Vec<(String, SortDir)>> {
    let obj = value
        .as_object()
        .ok_or_else(|| VellumError::Validation("$orderby expects an object".into()))?;
    let mut order = Vec::new();
    for (path, dir) in obj {
        let dir = match dir.as_i64() {
            Some(1) => SortDir::Asc,
            Some(-1) => SortDir::Desc,
            _ => {
                return Err(VellumError::Validation(format!(
                    "$orderby direction for '{}' must be 1 or -1",
                    path
                )));
            }
        };
        order.push((path.clone(), dir));
    }
    Ok(order)
}

fn parse_fields(value: &Value) -> Result<Projection> {
    let obj = value
        .as_object()
        .ok_or_else(|| VellumError::Validation("$fields expects an object".into()))?;

    let mut include: Option<bool> = None;
    let mut paths = Vec::new();
    let mut keep_id = true;
    for (path, flag) in obj {
        let flag = match flag.as_i64() {
            Some(1) => true,
            Some(0) => false,
            _ => {
                return Err(VellumError::Validation(format!(
                    "$fields flag for '{}' must be 0 or 1",
                    path
                )));
            }
        };
        if path == "_id" {
            keep_id = flag;
            continue;
        }
        match include {
            None => include = Some(flag),
            Some(prev) if prev != flag => {
                return Err(VellumError::Validation(
                    "$fields cannot mix inclusion and exclusion".into(),
                ));
            }
            Some(_) => {}
        }
        paths.push(path.clone());
    }

    Ok(Projection {
        include: include.unwrap_or(true),
        paths,
        keep_id,
    })
}

/// Total order over optional values for sorting: absent values first,
/// then by type (null, bool, number, string, array, object), then by
/// value within comparable types.
fn total_cmp(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => {
            let (ra, rb) = (type_rank(a), type_rank(b));
            if ra != rb {
                return ra.cmp(&rb);
            }
            crate::query::value_cmp(a, b).unwrap_or(Ordering::Equal)
        }
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn docs(values: Vec<Value>) -> Vec<Document> {
        values
            .into_iter()
            .map(|v| Document::from_value(v).unwrap())
            .collect()
    }

    #[test]
    fn test_parse_defaults() {
        let hints = QueryHints::parse(&json!({})).unwrap();
        assert_eq!(hints.max, None);
        assert_eq!(hints.skip, 0);
        assert!(!hints.only_count);
        assert!(hints.order_by.is_empty());
        assert!(hints.fields.is_none());
    }

    #[test]
    fn test_parse_rejects_unknown_hint() {
        assert!(QueryHints::parse(&json!({"$limit": 5})).is_err());
        assert!(QueryHints::parse(&json!({"$max": -1})).is_err());
        assert!(QueryHints::parse(&json!({"$orderby": {"a": 2}})).is_err());
    }

    #[test]
    fn test_orderby_multi_key() {
        let hints = QueryHints::parse(&json!({"$orderby": {"city": 1, "age": -1}})).unwrap();
        let mut d = docs(vec![
            json!({"city": "B", "age": 10}),
            json!({"city": "A", "age": 10}),
            json!({"city": "A", "age": 40}),
        ]);
        hints.apply_order(&mut d);
        let ages: Vec<&Value> = d.iter().map(|doc| doc.get_path("age").unwrap()).collect();
        let cities: Vec<&Value> = d.iter().map(|doc| doc.get_path("city").unwrap()).collect();
        assert_eq!(cities, vec![&json!("A"), &json!("A"), &json!("B")]);
        assert_eq!(ages, vec![&json!(40), &json!(10), &json!(10)]);
    }

    #[test]
    fn test_orderby_missing_sorts_first() {
        let hints = QueryHints::parse(&json!({"$orderby": {"age": 1}})).unwrap();
        let mut d = docs(vec![json!({"age": 5}), json!({"name": "x"})]);
        hints.apply_order(&mut d);
        assert!(d[0].get_path("age").is_none());
    }

    #[test]
    fn test_window() {
        let hints = QueryHints::parse(&json!({"$skip": 1, "$max": 2})).unwrap();
        let d = docs((0..5).map(|i| json!({"n": i})).collect());
        let windowed = hints.apply_window(d);
        assert_eq!(windowed.len(), 2);
        assert_eq!(windowed[0].get_path("n").unwrap(), &json!(1));
        assert_eq!(windowed[1].get_path("n").unwrap(), &json!(2));
    }

    #[test]
    fn test_window_skip_past_end() {
        let hints = QueryHints::parse(&json!({"$skip": 10})).unwrap();
        let d = docs(vec![json!({"n": 1})]);
        assert!(hints.apply_window(d).is_empty());
    }

    #[test]
    fn test_projection_include() {
        let hints = QueryHints::parse(&json!({"$fields": {"name": 1, "age": 1}})).unwrap();
        let d = Document::from_value(json!({"name": "Anna", "age": 30, "city": "Omsk"})).unwrap();
        let slim = hints.project(&d).unwrap();
        assert_eq!(slim.get_path("name").unwrap(), &json!("Anna"));
        assert!(slim.get_path("city").is_none());
    }

    #[test]
    fn test_projection_include_keeps_orderby_paths() {
        let hints =
            QueryHints::parse(&json!({"$orderby": {"age": -1}, "$fields": {"name": 1}})).unwrap();
        let d = Document::from_value(json!({"name": "Anna", "age": 30, "city": "Omsk"})).unwrap();
        let slim = hints.project(&d).unwrap();
        assert_eq!(slim.get_path("name").unwrap(), &json!("Anna"));
        assert_eq!(slim.get_path("age").unwrap(), &json!(30));
        assert!(slim.get_path("city").is_none());
    }

    #[test]
    fn test_projection_exclude() {
        let hints = QueryHints::parse(&json!({"$fields": {"city": 0}})).unwrap();
        let d = Document::from_value(json!({"name": "Anna", "city": "Omsk"})).unwrap();
        let slim = hints.project(&d).unwrap();
        assert_eq!(slim.get_path("name").unwrap(), &json!("Anna"));
        assert!(slim.get_path("city").is_none());
    }

    #[test]
    fn test_projection_id_handling() {
        let oid = crate::oid::Oid::new();
        let d = Document::from_value(json!({"_id": oid.to_hex(), "a": 1, "b": 2})).unwrap();

        let keep = QueryHints::parse(&json!({"$fields": {"a": 1}})).unwrap();
        assert_eq!(keep.project(&d).unwrap().oid, Some(oid));

        let drop = QueryHints::parse(&json!({"$fields": {"a": 1, "_id": 0}})).unwrap();
        assert_eq!(drop.project(&d).unwrap().oid, None);
    }

    #[test]
    fn test_projection_rejects_mixed() {
        assert!(QueryHints::parse(&json!({"$fields": {"a": 1, "b": 0}})).is_err());
    }
}
