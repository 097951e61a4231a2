// src/query.rs
// Query language: parsing of match expressions and evaluation against
// documents. Evaluation also records which array element satisfied each
// clause so updates can address it through the positional `$` segment.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::Value;

use crate::document::Document;
use crate::error::{Result, VellumError};

/// A single field condition.
#[derive(Debug, Clone)]
pub enum FieldCond {
    /// Implicit equality. A scalar target matches a scalar value or any
    /// element of an array value; an array target matches the whole array.
    Eq(Value),
    /// Case-insensitive string equality.
    IcaseEq(String),
    /// Case-insensitive membership.
    IcaseIn(Vec<String>),
    /// String prefix.
    Begin(String),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    /// Closed interval. An inverted interval (lo > hi) matches nothing.
    Bt(f64, f64),
    In(Vec<Value>),
    Nin(Vec<Value>),
    /// All tokens present in a string-array or whitespace-split string.
    StrAnd(Vec<String>),
    /// Any token present.
    StrOr(Vec<String>),
    Exists(bool),
    /// Some array element (an object) matches the subquery.
    ElemMatch(Box<Query>),
    /// Negation of every inner condition taken together.
    Not(Vec<FieldCond>),
}

#[derive(Debug, Clone)]
pub struct Clause {
    pub path: String,
    pub cond: FieldCond,
}

/// A collection join requested through `$do`. The field at `path` holds an
/// OID (or array of OIDs) pointing into `collection`; matching documents
/// get the field replaced by the referenced document(s).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinSpec {
    pub path: String,
    pub collection: String,
}

/// Parsed query. Field clauses are an implicit conjunction; `$and` adds
/// further conjuncts and `$or` adds a disjunction that must also hold.
#[derive(Debug, Clone, Default)]
pub struct Query {
    clauses: Vec<Clause>,
    ands: Vec<Query>,
    ors: Vec<Query>,
    joins: Vec<JoinSpec>,
}

impl Query {
    /// Query that matches every document.
    pub fn match_all() -> Self {
        Query::default()
    }

    pub fn parse(value: &Value) -> Result<Query> {
        let obj = value
            .as_object()
            .ok_or_else(|| VellumError::Validation("Query must be an object".into()))?;

        let mut query = Query::default();
        for (key, val) in obj {
            match key.as_str() {
                "$and" => {
                    for sub in as_query_array(val, "$and")? {
                        query.ands.push(Query::parse(sub)?);
                    }
                }
                "$or" => {
                    for sub in as_query_array(val, "$or")? {
                        query.ors.push(Query::parse(sub)?);
                    }
                }
                "$do" => parse_do(val, &mut query.joins)?,
                k if k.starts_with('$') => {
                    return Err(VellumError::Validation(format!(
                        "Unknown top-level operator '{}'",
                        k
                    )));
                }
                path => {
                    for cond in parse_conds(val)? {
                        query.clauses.push(Clause {
                            path: path.to_string(),
                            cond,
                        });
                    }
                }
            }
        }
        Ok(query)
    }

    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn joins(&self) -> &[JoinSpec] {
        &self.joins
    }

    /// True when the query places no constraints at all.
    pub fn is_match_all(&self) -> bool {
        self.clauses.is_empty() && self.ands.is_empty() && self.ors.is_empty()
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.matches_with_positions(doc).is_some()
    }

    /// Evaluate and, on a match, return the array positions satisfying
    /// each clause, keyed by the path of the array they index into.
    pub fn matches_with_positions(&self, doc: &Document) -> Option<HashMap<String, usize>> {
        let mut positions = HashMap::new();
        if self.eval(doc, &mut positions) {
            Some(positions)
        } else {
            None
        }
    }

    fn eval(&self, doc: &Document, positions: &mut HashMap<String, usize>) -> bool {
        for clause in &self.clauses {
            if !match_clause(doc, clause, positions) {
                return false;
            }
        }
        for sub in &self.ands {
            if !sub.eval(doc, positions) {
                return false;
            }
        }
        if !self.ors.is_empty() && !self.ors.iter().any(|sub| sub.eval(doc, positions)) {
            return false;
        }
        true
    }
}

fn as_query_array<'a>(value: &'a Value, op: &str) -> Result<&'a Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| VellumError::Validation(format!("{} expects an array of queries", op)))
}

fn parse_do(value: &Value, joins: &mut Vec<JoinSpec>) -> Result<()> {
    let obj = value
        .as_object()
        .ok_or_else(|| VellumError::Validation("$do expects an object".into()))?;
    for (path, action) in obj {
        let action = action
            .as_object()
            .ok_or_else(|| VellumError::Validation("$do action must be an object".into()))?;
        match action.get("$join").and_then(|v| v.as_str()) {
            Some(coll) => joins.push(JoinSpec {
                path: path.clone(),
                collection: coll.to_string(),
            }),
            None => {
                return Err(VellumError::Validation(format!(
                    "$do on '{}' must contain a $join collection name",
                    path
                )));
            }
        }
    }
    Ok(())
}

/// Parse the right-hand side of a field clause into one or more conditions.
fn parse_conds(value: &Value) -> Result<Vec<FieldCond>> {
    let obj = match value.as_object() {
        Some(obj) if obj.keys().any(|k| k.starts_with('$')) => obj,
        _ => return Ok(vec![FieldCond::Eq(value.clone())]),
    };

    let mut conds = Vec::new();
    for (op, arg) in obj {
        let cond = match op.as_str() {
            "$not" => FieldCond::Not(parse_conds(arg)?),
            "$icase" => parse_icase(arg)?,
            "$begin" => FieldCond::Begin(as_string(arg, "$begin")?),
            "$gt" => FieldCond::Gt(as_comparable(arg, "$gt")?),
            "$gte" => FieldCond::Gte(as_comparable(arg, "$gte")?),
            "$lt" => FieldCond::Lt(as_comparable(arg, "$lt")?),
            "$lte" => FieldCond::Lte(as_comparable(arg, "$lte")?),
            "$bt" => {
                let bounds = arg.as_array().ok_or_else(|| {
                    VellumError::Validation("$bt expects a two-element number array".into())
                })?;
                if bounds.len() != 2 {
                    return Err(VellumError::Validation(
                        "$bt expects a two-element number array".into(),
                    ));
                }
                FieldCond::Bt(as_num(&bounds[0], "$bt")?, as_num(&bounds[1], "$bt")?)
            }
            "$in" => FieldCond::In(as_value_array(arg, "$in")?),
            "$nin" => FieldCond::Nin(as_value_array(arg, "$nin")?),
            "$strand" => FieldCond::StrAnd(as_string_array(arg, "$strand")?),
            "$stror" => FieldCond::StrOr(as_string_array(arg, "$stror")?),
            "$exists" => FieldCond::Exists(arg.as_bool().ok_or_else(|| {
                VellumError::Validation("$exists expects a boolean".into())
            })?),
            "$elemMatch" => FieldCond::ElemMatch(Box::new(Query::parse(arg)?)),
            other => {
                return Err(VellumError::Validation(format!(
                    "Unknown query operator '{}'",
                    other
                )));
            }
        };
        conds.push(cond);
    }
    Ok(conds)
}

fn parse_icase(arg: &Value) -> Result<FieldCond> {
    match arg {
        Value::String(s) => Ok(FieldCond::IcaseEq(s.to_lowercase())),
        Value::Object(obj) => match obj.get("$in") {
            Some(inner) => {
                let items = as_string_array(inner, "$icase $in")?;
                Ok(FieldCond::IcaseIn(
                    items.into_iter().map(|s| s.to_lowercase()).collect(),
                ))
            }
            None => Err(VellumError::Validation(
                "$icase expects a string or {\"$in\": [...]}".into(),
            )),
        },
        _ => Err(VellumError::Validation(
            "$icase expects a string or {\"$in\": [...]}".into(),
        )),
    }
}

fn as_string(value: &Value, op: &str) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| VellumError::Validation(format!("{} expects a string", op)))
}

fn as_num(value: &Value, op: &str) -> Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| VellumError::Validation(format!("{} expects a number", op)))
}

fn as_comparable(value: &Value, op: &str) -> Result<Value> {
    match value {
        Value::Number(_) | Value::String(_) => Ok(value.clone()),
        _ => Err(VellumError::Validation(format!(
            "{} expects a number or string",
            op
        ))),
    }
}

fn as_value_array(value: &Value, op: &str) -> Result<Vec<Value>> {
    value
        .as_array()
        .cloned()
        .ok_or_else(|| VellumError::Validation(format!("{} expects an array", op)))
}

fn as_string_array(value: &Value, op: &str) -> Result<Vec<String>> {
    let arr = value
        .as_array()
        .ok_or_else(|| VellumError::Validation(format!("{} expects a string array", op)))?;
    arr.iter()
        .map(|v| as_string(v, op))
        .collect::<Result<Vec<_>>>()
}

/// Numbers compare numerically regardless of integer/float representation;
/// strings compare lexicographically; other type pairs are unordered.
pub fn value_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Scalar equality with numeric coercion (1 == 1.0).
pub fn values_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_eq(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).map(|w| values_eq(v, w)).unwrap_or(false))
        }
        _ => a == b,
    }
}

/// Evaluate one clause against a document, walking intermediate arrays
/// element-wise and recording the index of the first matching element.
fn match_clause(doc: &Document, clause: &Clause, positions: &mut HashMap<String, usize>) -> bool {
    let segments: Vec<&str> = clause.path.split('.').collect();
    if let FieldCond::Exists(expected) = &clause.cond {
        let present = !doc.collect_path(&clause.path).is_empty();
        return present == *expected;
    }

    let root = doc.to_value();
    walk_match(&root, &segments, "", &clause.cond, positions)
}

fn walk_match(
    value: &Value,
    segments: &[&str],
    prefix: &str,
    cond: &FieldCond,
    positions: &mut HashMap<String, usize>,
) -> bool {
    match segments.split_first() {
        None => terminal_match(value, prefix, cond, positions),
        Some((seg, rest)) => match value {
            Value::Object(map) => match map.get(*seg) {
                Some(next) => {
                    let path = join_path(prefix, seg);
                    walk_match(next, rest, &path, cond, positions)
                }
                None => missing_match(cond),
            },
            Value::Array(arr) => {
                // A numeric segment addresses one element; otherwise every
                // element is tried and the first hit is recorded.
                if let Ok(idx) = seg.parse::<usize>() {
                    match arr.get(idx) {
                        Some(elem) => {
                            let path = join_path(prefix, seg);
                            walk_match(elem, rest, &path, cond, positions)
                        }
                        None => missing_match(cond),
                    }
                } else {
                    for (i, elem) in arr.iter().enumerate() {
                        if walk_match(elem, segments, prefix, cond, positions) {
                            positions.entry(prefix.to_string()).or_insert(i);
                            return true;
                        }
                    }
                    missing_match(cond)
                }
            }
            _ => missing_match(cond),
        },
    }
}

fn join_path(prefix: &str, seg: &str) -> String {
    if prefix.is_empty() {
        seg.to_string()
    } else {
        format!("{}.{}", prefix, seg)
    }
}

/// Whether a condition is satisfied by an absent value.
fn missing_match(cond: &FieldCond) -> bool {
    match cond {
        FieldCond::Not(inner) => !inner.iter().all(|c| {
            // Absent field: the positive condition fails, so Not holds,
            // unless the inner condition itself matches absence.
            missing_match_positive(c)
        }),
        FieldCond::Nin(_) => true,
        _ => false,
    }
}

fn missing_match_positive(cond: &FieldCond) -> bool {
    matches!(cond, FieldCond::Nin(_))
}

fn terminal_match(
    value: &Value,
    prefix: &str,
    cond: &FieldCond,
    positions: &mut HashMap<String, usize>,
) -> bool {
    match cond {
        FieldCond::Not(inner) => !inner
            .iter()
            .all(|c| terminal_match(value, prefix, c, positions)),
        FieldCond::Eq(target) => match (value, target) {
            (Value::Array(_), Value::Array(_)) => values_eq(value, target),
            (Value::Array(arr), _) => {
                record_first(arr, positions, prefix, |elem| values_eq(elem, target))
            }
            _ => values_eq(value, target),
        },
        FieldCond::IcaseEq(target) => any_scalar(value, positions, prefix, |v| {
            v.as_str()
                .map(|s| s.to_lowercase() == *target)
                .unwrap_or(false)
        }),
        FieldCond::IcaseIn(targets) => any_scalar(value, positions, prefix, |v| {
            v.as_str()
                .map(|s| targets.contains(&s.to_lowercase()))
                .unwrap_or(false)
        }),
        FieldCond::Begin(prefix_str) => any_scalar(value, positions, prefix, |v| {
            v.as_str().map(|s| s.starts_with(prefix_str)).unwrap_or(false)
        }),
        FieldCond::Gt(t) => any_scalar(value, positions, prefix, |v| {
            value_cmp(v, t) == Some(Ordering::Greater)
        }),
        FieldCond::Gte(t) => any_scalar(value, positions, prefix, |v| {
            matches!(value_cmp(v, t), Some(Ordering::Greater | Ordering::Equal))
        }),
        FieldCond::Lt(t) => any_scalar(value, positions, prefix, |v| {
            value_cmp(v, t) == Some(Ordering::Less)
        }),
        FieldCond::Lte(t) => any_scalar(value, positions, prefix, |v| {
            matches!(value_cmp(v, t), Some(Ordering::Less | Ordering::Equal))
        }),
        FieldCond::Bt(lo, hi) => any_scalar(value, positions, prefix, |v| {
            v.as_f64().map(|n| n >= *lo && n <= *hi).unwrap_or(false)
        }),
        FieldCond::In(targets) => match value {
            Value::Array(arr) => record_first(arr, positions, prefix, |elem| {
                targets.iter().any(|t| values_eq(elem, t))
            }),
            _ => targets.iter().any(|t| values_eq(value, t)),
        },
        FieldCond::Nin(targets) => match value {
            Value::Array(arr) => !arr
                .iter()
                .any(|elem| targets.iter().any(|t| values_eq(elem, t))),
            _ => !targets.iter().any(|t| values_eq(value, t)),
        },
        FieldCond::StrAnd(tokens) => {
            let have = string_tokens(value);
            tokens.iter().all(|t| have.iter().any(|h| h == t))
        }
        FieldCond::StrOr(tokens) => {
            let have = string_tokens(value);
            tokens.iter().any(|t| have.iter().any(|h| h == t))
        }
        FieldCond::Exists(expected) => *expected,
        FieldCond::ElemMatch(sub) => match value {
            Value::Array(arr) => {
                for (i, elem) in arr.iter().enumerate() {
                    if let Value::Object(map) = elem {
                        if sub.matches(&Document::with_fields(map.clone())) {
                            positions.entry(prefix.to_string()).or_insert(i);
                            return true;
                        }
                    }
                }
                false
            }
            _ => false,
        },
    }
}

/// Apply a scalar predicate to the value, or to each element when the
/// value is an array, recording the first matching element index.
fn any_scalar<F: Fn(&Value) -> bool>(
    value: &Value,
    positions: &mut HashMap<String, usize>,
    prefix: &str,
    pred: F,
) -> bool {
    match value {
        Value::Array(arr) => record_first(arr, positions, prefix, pred),
        _ => pred(value),
    }
}

fn record_first<F: Fn(&Value) -> bool>(
    arr: &[Value],
    positions: &mut HashMap<String, usize>,
    prefix: &str,
    pred: F,
) -> bool {
    for (i, elem) in arr.iter().enumerate() {
        if pred(elem) {
            positions.entry(prefix.to_string()).or_insert(i);
            return true;
        }
    }
    false
}

/// Token set for $strand/$stror: array of strings, or a whitespace-split
/// string.
fn string_tokens(value: &Value) -> Vec<String> {
    match value {
        Value::Array(arr) => arr
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Value::String(s) => s.split_whitespace().map(str::to_string).collect(),
        _ => Vec::new(),
    }
}
