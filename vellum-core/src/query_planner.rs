// src/query_planner.rs
// Chooses at most one index access per query. Index access only narrows
// the candidate set; every candidate is re-checked against the full
// query, so a plan must merely be a superset of the true matches.

use log::debug;
use serde_json::Value;

use crate::btree::Bound;
use crate::index::{key_for_kind, IndexKey, IndexKind, IndexManager};
use crate::oid::Oid;
use crate::query::{FieldCond, Query};

/// How the chosen index is read.
#[derive(Debug, Clone)]
pub enum IndexAccess {
    Eq(IndexKey),
    Range {
        lower: Option<(IndexKey, bool)>,
        upper: Option<(IndexKey, bool)>,
    },
    Member(Vec<IndexKey>),
    Prefix(String),
}

impl IndexAccess {
    /// Selection priority; lower wins.
    fn priority(&self) -> u8 {
        match self {
            IndexAccess::Eq(_) => 0,
            IndexAccess::Range { .. } => 1,
            IndexAccess::Member(_) => 2,
            IndexAccess::Prefix(_) => 3,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Plan {
    FullScan,
    IndexScan {
        path: String,
        kind: IndexKind,
        access: IndexAccess,
    },
}

impl Plan {
    pub fn is_index_scan(&self) -> bool {
        matches!(self, Plan::IndexScan { .. })
    }

    /// One-line description for logging and `meta()`.
    pub fn describe(&self) -> String {
        match self {
            Plan::FullScan => "full scan".to_string(),
            Plan::IndexScan { path, kind, access } => {
                let mode = match access {
                    IndexAccess::Eq(_) => "equality",
                    IndexAccess::Range { .. } => "range",
                    IndexAccess::Member(_) => "membership",
                    IndexAccess::Prefix(_) => "prefix",
                };
                format!("{} scan of {} index on '{}'", mode, kind.as_str(), path)
            }
        }
    }

    /// Candidate OIDs for an index plan. Full scans have no candidate set.
    pub fn candidates(&self, indexes: &IndexManager) -> Option<Vec<Oid>> {
        let (path, kind, access) = match self {
            Plan::FullScan => return None,
            Plan::IndexScan { path, kind, access } => (path, kind, access),
        };
        let index = indexes.get(path, *kind)?;
        let tree = index.tree();
        let oids = match access {
            IndexAccess::Eq(key) => tree.get(key),
            IndexAccess::Range { lower, upper } => {
                let lo = match lower {
                    Some((key, true)) => Bound::Included(key),
                    Some((key, false)) => Bound::Excluded(key),
                    None => Bound::Unbounded,
                };
                let hi = match upper {
                    Some((key, true)) => Bound::Included(key),
                    Some((key, false)) => Bound::Excluded(key),
                    None => Bound::Unbounded,
                };
                tree.range(lo, hi)
            }
            IndexAccess::Member(keys) => {
                let mut out = Vec::new();
                for key in keys {
                    out.extend(tree.get(key));
                }
                out.sort();
                out.dedup();
                out
            }
            IndexAccess::Prefix(prefix) => tree.prefix(prefix),
        };
        Some(oids)
    }
}

/// Pick the best single-index plan for a query, or fall back to a full
/// scan. Only the top-level conjunction is considered; `$or` branches and
/// negations never drive index selection.
pub fn plan(query: &Query, indexes: &IndexManager) -> Plan {
    if indexes.is_empty() {
        return Plan::FullScan;
    }

    let mut best: Option<Plan> = None;
    let mut best_priority = u8::MAX;

    for clause in query.clauses() {
        for kind in indexes.kinds_for(&clause.path) {
            let Some(access) = access_for(&clause.cond, kind) else {
                continue;
            };
            let access = match &access {
                // Range clauses on the same path merge into one access
                IndexAccess::Range { .. } if kind == IndexKind::Number => {
                    merged_number_range(query, &clause.path).unwrap_or(access)
                }
                _ => access,
            };
            let priority = access.priority();
            if priority < best_priority {
                best_priority = priority;
                best = Some(Plan::IndexScan {
                    path: clause.path.clone(),
                    kind,
                    access,
                });
            }
        }
    }

    let plan = best.unwrap_or(Plan::FullScan);
    debug!("query plan: {}", plan.describe());
    plan
}

/// Translate one condition into an access pattern for one index kind.
fn access_for(cond: &FieldCond, kind: IndexKind) -> Option<IndexAccess> {
    match cond {
        FieldCond::Eq(value) => match value {
            // Whole-array equality cannot use a per-element index
            Value::Array(_) | Value::Object(_) => None,
            scalar => key_for_kind(scalar, kind).map(IndexAccess::Eq),
        },
        FieldCond::IcaseEq(lowered) => match kind {
            IndexKind::IString => Some(IndexAccess::Eq(IndexKey::String(lowered.clone()))),
            _ => None,
        },
        FieldCond::IcaseIn(lowered) => match kind {
            IndexKind::IString => Some(IndexAccess::Member(
                lowered
                    .iter()
                    .map(|s| IndexKey::String(s.clone()))
                    .collect(),
            )),
            _ => None,
        },
        FieldCond::In(values) => {
            // Every list element must be representable in the index, or
            // matches outside the index key space would be missed.
            let keys: Option<Vec<IndexKey>> = values
                .iter()
                .map(|v| match v {
                    Value::Array(_) | Value::Object(_) => None,
                    scalar => key_for_kind(scalar, kind),
                })
                .collect();
            keys.map(IndexAccess::Member)
        }
        FieldCond::Gt(v) => bound_access(v, kind, false, true),
        FieldCond::Gte(v) => bound_access(v, kind, true, true),
        FieldCond::Lt(v) => bound_access(v, kind, false, false),
        FieldCond::Lte(v) => bound_access(v, kind, true, false),
        FieldCond::Bt(lo, hi) => match kind {
            IndexKind::Number => Some(IndexAccess::Range {
                lower: Some((IndexKey::num(*lo), true)),
                upper: Some((IndexKey::num(*hi), true)),
            }),
            _ => None,
        },
        FieldCond::Begin(prefix) => match kind {
            IndexKind::String => Some(IndexAccess::Prefix(prefix.clone())),
            _ => None,
        },
        FieldCond::StrOr(tokens) | FieldCond::StrAnd(tokens) => match kind {
            // The array index posts elements and scalar-string tokens,
            // so a union of token postings is a superset for both
            // operators
            IndexKind::Array => Some(IndexAccess::Member(
                tokens
                    .iter()
                    .map(|t| IndexKey::String(t.clone()))
                    .collect(),
            )),
            _ => None,
        },
        // Negations and existence checks select documents the index does
        // not cover; $elemMatch conditions stay unindexed too.
        FieldCond::Not(_)
        | FieldCond::Nin(_)
        | FieldCond::Exists(_)
        | FieldCond::ElemMatch(_) => None,
    }
}

fn bound_access(value: &Value, kind: IndexKind, inclusive: bool, is_lower: bool) -> Option<IndexAccess> {
    let key = match (value, kind) {
        (Value::Number(_), IndexKind::Number) => key_for_kind(value, kind)?,
        (Value::String(_), IndexKind::String) => key_for_kind(value, kind)?,
        _ => return None,
    };
    Some(if is_lower {
        IndexAccess::Range {
            lower: Some((key, inclusive)),
            upper: None,
        }
    } else {
        IndexAccess::Range {
            lower: None,
            upper: Some((key, inclusive)),
        }
    })
}

/// Intersect every numeric range condition on a path into one access.
fn merged_number_range(query: &Query, path: &str) -> Option<IndexAccess> {
    let mut lower: Option<(f64, bool)> = None;
    let mut upper: Option<(f64, bool)> = None;
    let mut saw_range = false;

    for clause in query.clauses().iter().filter(|c| c.path == path) {
        let (lo, hi) = match &clause.cond {
            FieldCond::Gt(Value::Number(n)) => (Some((n.as_f64()?, false)), None),
            FieldCond::Gte(Value::Number(n)) => (Some((n.as_f64()?, true)), None),
            FieldCond::Lt(Value::Number(n)) => (None, Some((n.as_f64()?, false))),
            FieldCond::Lte(Value::Number(n)) => (None, Some((n.as_f64()?, true))),
            FieldCond::Bt(a, b) => (Some((*a, true)), Some((*b, true))),
            _ => continue,
        };
        saw_range = true;
        if let Some((bound, incl)) = lo {
            lower = Some(match lower {
                Some((cur, cur_incl)) if cur > bound || (cur == bound && !cur_incl) => {
                    (cur, cur_incl)
                }
                _ => (bound, incl),
            });
        }
        if let Some((bound, incl)) = hi {
            upper = Some(match upper {
                Some((cur, cur_incl)) if cur < bound || (cur == bound && !cur_incl) => {
                    (cur, cur_incl)
                }
                _ => (bound, incl),
            });
        }
    }

    if !saw_range {
        return None;
    }
    Some(IndexAccess::Range {
        lower: lower.map(|(n, incl)| (IndexKey::num(n), incl)),
        upper: upper.map(|(n, incl)| (IndexKey::num(n), incl)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use serde_json::json;

    fn indexed(pairs: &[(&str, IndexKind)]) -> IndexManager {
        let mut mgr = IndexManager::new();
        for (path, kind) in pairs {
            mgr.ensure_index(path, *kind);
        }
        mgr
    }

    fn q(value: serde_json::Value) -> Query {
        Query::parse(&value).unwrap()
    }

    #[test]
    fn test_no_indexes_full_scan() {
        let mgr = IndexManager::new();
        assert!(!plan(&q(json!({"a": 1})), &mgr).is_index_scan());
    }

    #[test]
    fn test_equality_beats_range() {
        let mgr = indexed(&[("name", IndexKind::String), ("age", IndexKind::Number)]);
        let p = plan(&q(json!({"age": {"$gt": 18}, "name": "Anna"})), &mgr);
        match p {
            Plan::IndexScan { path, access, .. } => {
                assert_eq!(path, "name");
                assert!(matches!(access, IndexAccess::Eq(_)));
            }
            Plan::FullScan => panic!("expected index scan"),
        }
    }

    #[test]
    fn test_range_beats_membership() {
        let mgr = indexed(&[("age", IndexKind::Number), ("color", IndexKind::String)]);
        let p = plan(
            &q(json!({"age": {"$lt": 30}, "color": {"$in": ["red", "blue"]}})),
            &mgr,
        );
        match p {
            Plan::IndexScan { path, access, .. } => {
                assert_eq!(path, "age");
                assert!(matches!(access, IndexAccess::Range { .. }));
            }
            Plan::FullScan => panic!("expected index scan"),
        }
    }

    #[test]
    fn test_ranges_merge_on_one_path() {
        let mgr = indexed(&[("age", IndexKind::Number)]);
        let p = plan(&q(json!({"age": {"$gte": 10, "$lt": 20}})), &mgr);
        match p {
            Plan::IndexScan {
                access: IndexAccess::Range { lower, upper },
                ..
            } => {
                assert_eq!(lower, Some((IndexKey::num(10.0), true)));
                assert_eq!(upper, Some((IndexKey::num(20.0), false)));
            }
            other => panic!("expected merged range, got {:?}", other),
        }
    }

    #[test]
    fn test_negations_not_indexed() {
        let mgr = indexed(&[("age", IndexKind::Number)]);
        assert!(!plan(&q(json!({"age": {"$not": {"$gt": 5}}})), &mgr).is_index_scan());
        assert!(!plan(&q(json!({"age": {"$nin": [1, 2]}})), &mgr).is_index_scan());
    }

    #[test]
    fn test_icase_uses_istring_only() {
        let string_only = indexed(&[("name", IndexKind::String)]);
        assert!(!plan(&q(json!({"name": {"$icase": "ANNA"}})), &string_only).is_index_scan());

        let istring = indexed(&[("name", IndexKind::IString)]);
        let p = plan(&q(json!({"name": {"$icase": "ANNA"}})), &istring);
        match p {
            Plan::IndexScan { kind, access, .. } => {
                assert_eq!(kind, IndexKind::IString);
                assert_eq!(access_key(&access), IndexKey::String("anna".into()));
            }
            Plan::FullScan => panic!("expected index scan"),
        }
    }

    fn access_key(access: &IndexAccess) -> IndexKey {
        match access {
            IndexAccess::Eq(k) => k.clone(),
            other => panic!("expected equality access, got {:?}", other),
        }
    }

    #[test]
    fn test_mixed_in_list_not_indexed_on_string() {
        let mgr = indexed(&[("v", IndexKind::String)]);
        assert!(!plan(&q(json!({"v": {"$in": ["a", 3]}})), &mgr).is_index_scan());
    }

    #[test]
    fn test_candidates_from_equality() {
        let mut mgr = indexed(&[("name", IndexKind::String)]);
        let d1 = Document::from_value(json!({"name": "Anna"})).unwrap();
        let d2 = Document::from_value(json!({"name": "Bob"})).unwrap();
        let (o1, o2) = (crate::oid::Oid::new(), crate::oid::Oid::new());
        mgr.on_insert(o1, &d1);
        mgr.on_insert(o2, &d2);

        let p = plan(&q(json!({"name": "Anna"})), &mgr);
        assert_eq!(p.candidates(&mgr), Some(vec![o1]));
    }

    #[test]
    fn test_candidates_from_range() {
        let mut mgr = indexed(&[("age", IndexKind::Number)]);
        let mut oids = Vec::new();
        for age in [15, 18, 21, 40] {
            let d = Document::from_value(json!({"age": age})).unwrap();
            let oid = crate::oid::Oid::new();
            mgr.on_insert(oid, &d);
            oids.push(oid);
        }
        let p = plan(&q(json!({"age": {"$gte": 18}})), &mgr);
        assert_eq!(p.candidates(&mgr), Some(oids[1..].to_vec()));
    }

    #[test]
    fn test_prefix_plan() {
        let mgr = indexed(&[("name", IndexKind::String)]);
        let p = plan(&q(json!({"name": {"$begin": "An"}})), &mgr);
        match p {
            Plan::IndexScan {
                access: IndexAccess::Prefix(prefix),
                ..
            } => assert_eq!(prefix, "An"),
            other => panic!("expected prefix plan, got {:?}", other),
        }
    }
}
