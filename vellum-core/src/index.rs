// src/index.rs
// Secondary index kinds and the per-collection index manager.

use std::collections::{BTreeSet, HashMap};

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::btree::BPlusTree;
use crate::document::Document;
use crate::error::{Result, VellumError};
use crate::oid::Oid;

/// Key stored in an index. All numbers are normalized to f64 so that a
/// single number index covers integers and floats with one ordering.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IndexKey {
    Null,
    Bool(bool),
    Num(OrderedFloat),
    String(String),
}

/// OrderedFloat wrapper for f64 to enable Ord.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OrderedFloat(pub f64);

impl PartialEq for OrderedFloat {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for OrderedFloat {}

impl PartialOrd for OrderedFloat {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedFloat {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match (self.0.is_nan(), other.0.is_nan()) {
            (true, true) => std::cmp::Ordering::Equal,
            (true, false) => std::cmp::Ordering::Greater,
            (false, true) => std::cmp::Ordering::Less,
            (false, false) => self.0.partial_cmp(&other.0).unwrap_or(std::cmp::Ordering::Equal),
        }
    }
}

impl std::hash::Hash for OrderedFloat {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

impl IndexKey {
    pub fn num(n: f64) -> Self {
        IndexKey::Num(OrderedFloat(n))
    }
}

/// Index kinds. One index is keyed by exactly one field path; the same
/// path may carry several kinds at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexKind {
    /// Exact string match.
    String,
    /// Case-insensitive string match; keys are lowercased.
    IString,
    /// Numeric ordering.
    Number,
    /// One posting per array element.
    Array,
}

impl IndexKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexKind::String => "string",
            IndexKind::IString => "istring",
            IndexKind::Number => "number",
            IndexKind::Array => "array",
        }
    }
}

/// Structural description of one index, exposed through database metadata
/// and persisted in the collection header so indexes are rebuilt on open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub path: String,
    pub kind: IndexKind,
}

/// Convert a scalar value into an index key. Arrays and objects produce
/// no key for scalar kinds.
fn scalar_key(value: &Value, icase: bool) -> Option<IndexKey> {
    match value {
        Value::Null => Some(IndexKey::Null),
        Value::Bool(b) => Some(IndexKey::Bool(*b)),
        Value::Number(n) => n.as_f64().map(IndexKey::num),
        Value::String(s) => Some(IndexKey::String(if icase {
            s.to_lowercase()
        } else {
            s.clone()
        })),
        _ => None,
    }
}

/// Convert one query-side scalar into the key space of an index kind.
/// Returns None when the value cannot appear in that index at all.
pub fn key_for_kind(value: &Value, kind: IndexKind) -> Option<IndexKey> {
    match kind {
        IndexKind::Number => match value {
            Value::Number(n) => n.as_f64().map(IndexKey::num),
            _ => None,
        },
        IndexKind::String => match value {
            Value::String(s) => Some(IndexKey::String(s.clone())),
            _ => None,
        },
        IndexKind::IString => match value {
            Value::String(s) => Some(IndexKey::String(s.to_lowercase())),
            _ => None,
        },
        IndexKind::Array => scalar_key(value, false),
    }
}

/// Equality matches either the value itself or any element of an array
/// value, so every kind posts one key per element of a terminal array.
fn leaves(value: &Value) -> &[Value] {
    match value {
        Value::Array(arr) => arr.as_slice(),
        other => std::slice::from_ref(other),
    }
}

/// Derive the set of index keys a document contributes at `path` for the
/// given kind. Sets deduplicate repeated array elements so that removing
/// one occurrence keeps the posting while an equal element remains.
pub fn extract_keys(doc: &Document, path: &str, kind: IndexKind) -> BTreeSet<IndexKey> {
    let mut keys = BTreeSet::new();
    for value in doc.collect_path(path) {
        match kind {
            IndexKind::Array => {
                for leaf in leaves(value) {
                    if let Some(key) = scalar_key(leaf, false) {
                        keys.insert(key);
                    }
                }
                // A scalar string also posts its whitespace tokens so
                // $strand/$stror candidate sets stay supersets.
                if let Value::String(s) = value {
                    for token in s.split_whitespace() {
                        keys.insert(IndexKey::String(token.to_string()));
                    }
                }
            }
            IndexKind::Number => {
                for leaf in leaves(value) {
                    if let Value::Number(n) = leaf {
                        if let Some(f) = n.as_f64() {
                            keys.insert(IndexKey::num(f));
                        }
                    }
                }
            }
            IndexKind::String => {
                for leaf in leaves(value) {
                    if let Value::String(_) = leaf {
                        if let Some(key) = scalar_key(leaf, false) {
                            keys.insert(key);
                        }
                    }
                }
            }
            IndexKind::IString => {
                for leaf in leaves(value) {
                    if let Value::String(_) = leaf {
                        if let Some(key) = scalar_key(leaf, true) {
                            keys.insert(key);
                        }
                    }
                }
            }
        }
    }
    keys
}

/// One secondary index: an ordered postings tree over one path.
pub struct SecondaryIndex {
    pub descriptor: IndexDescriptor,
    tree: BPlusTree,
}

impl SecondaryIndex {
    fn new(path: String, kind: IndexKind) -> Self {
        SecondaryIndex {
            descriptor: IndexDescriptor { path, kind },
            tree: BPlusTree::new(),
        }
    }

    pub fn tree(&self) -> &BPlusTree {
        &self.tree
    }

    /// Snapshot of the full index contents, used by rebuild-idempotence
    /// checks and by `meta()`.
    pub fn dump(&self) -> Vec<(IndexKey, Vec<Oid>)> {
        self.tree.dump()
    }
}

/// Manages all secondary indexes of one collection and keeps them
/// consistent with storage mutations.
pub struct IndexManager {
    indexes: HashMap<(String, IndexKind), SecondaryIndex>,
}

impl IndexManager {
    pub fn new() -> Self {
        IndexManager {
            indexes: HashMap::new(),
        }
    }

    /// Create an index if it does not exist. Returns true when a new index
    /// was created (the caller then backfills it from a collection scan).
    pub fn ensure_index(&mut self, path: &str, kind: IndexKind) -> bool {
        let key = (path.to_string(), kind);
        if self.indexes.contains_key(&key) {
            return false;
        }
        self.indexes
            .insert(key, SecondaryIndex::new(path.to_string(), kind));
        true
    }

    /// Drop one kind at a path, or every kind when `kind` is None.
    pub fn drop_index(&mut self, path: &str, kind: Option<IndexKind>) -> Result<()> {
        match kind {
            Some(kind) => {
                if self.indexes.remove(&(path.to_string(), kind)).is_none() {
                    return Err(VellumError::Index(format!(
                        "No {} index on path '{}'",
                        kind.as_str(),
                        path
                    )));
                }
            }
            None => {
                let before = self.indexes.len();
                self.indexes.retain(|(p, _), _| p != path);
                if self.indexes.len() == before {
                    return Err(VellumError::Index(format!("No index on path '{}'", path)));
                }
            }
        }
        Ok(())
    }

    /// Re-derive an index from a full scan of the collection's documents.
    pub fn rebuild_index<'a, I>(&mut self, path: &str, kind: IndexKind, docs: I) -> Result<()>
    where
        I: IntoIterator<Item = (Oid, &'a Document)>,
    {
        let index = self
            .indexes
            .get_mut(&(path.to_string(), kind))
            .ok_or_else(|| {
                VellumError::Index(format!("No {} index on path '{}'", kind.as_str(), path))
            })?;

        index.tree = BPlusTree::new();
        let mut postings = 0u64;
        for (oid, doc) in docs {
            for key in extract_keys(doc, path, kind) {
                index.tree.insert(key, oid);
                postings += 1;
            }
        }
        debug!(
            "rebuilt {} index on '{}': {} postings",
            kind.as_str(),
            path,
            postings
        );
        Ok(())
    }

    /// Structural compaction of every kind at a path; query results are
    /// unchanged.
    pub fn optimize_index(&mut self, path: &str) -> Result<()> {
        let mut found = false;
        for ((p, _), index) in self.indexes.iter_mut() {
            if p == path {
                index.tree.optimize();
                found = true;
            }
        }
        if !found {
            return Err(VellumError::Index(format!("No index on path '{}'", path)));
        }
        Ok(())
    }

    pub fn get(&self, path: &str, kind: IndexKind) -> Option<&SecondaryIndex> {
        self.indexes.get(&(path.to_string(), kind))
    }

    /// Kinds available at a path, used by the planner.
    pub fn kinds_for(&self, path: &str) -> Vec<IndexKind> {
        let mut kinds: Vec<IndexKind> = self
            .indexes
            .keys()
            .filter(|(p, _)| p == path)
            .map(|(_, k)| *k)
            .collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }

    pub fn descriptors(&self) -> Vec<IndexDescriptor> {
        let mut out: Vec<IndexDescriptor> = self
            .indexes
            .values()
            .map(|i| i.descriptor.clone())
            .collect();
        out.sort_by(|a, b| (&a.path, a.kind.as_str()).cmp(&(&b.path, b.kind.as_str())));
        out
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    // ----- mutation hooks -----

    pub fn on_insert(&mut self, oid: Oid, doc: &Document) {
        for index in self.indexes.values_mut() {
            let (path, kind) = (index.descriptor.path.clone(), index.descriptor.kind);
            for key in extract_keys(doc, &path, kind) {
                index.tree.insert(key, oid);
            }
        }
    }

    pub fn on_update(&mut self, oid: Oid, old: &Document, new: &Document) {
        for index in self.indexes.values_mut() {
            let (path, kind) = (index.descriptor.path.clone(), index.descriptor.kind);
            let old_keys = extract_keys(old, &path, kind);
            let new_keys = extract_keys(new, &path, kind);
            for key in old_keys.difference(&new_keys) {
                index.tree.remove(key, &oid);
            }
            for key in new_keys.difference(&old_keys) {
                index.tree.insert(key.clone(), oid);
            }
        }
    }

    pub fn on_delete(&mut self, oid: Oid, old: &Document) {
        for index in self.indexes.values_mut() {
            let (path, kind) = (index.descriptor.path.clone(), index.descriptor.kind);
            for key in extract_keys(old, &path, kind) {
                index.tree.remove(&key, &oid);
            }
        }
    }
}

impl Default for IndexManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        Document::from_value(value).unwrap()
    }

    #[test]
    fn test_index_key_ordering() {
        assert!(IndexKey::Null < IndexKey::Bool(false));
        assert!(IndexKey::Bool(true) < IndexKey::num(0.0));
        assert!(IndexKey::num(5.0) < IndexKey::num(10.5));
        assert!(IndexKey::num(10.5) < IndexKey::String("a".into()));
        assert!(IndexKey::String("a".into()) < IndexKey::String("b".into()));
    }

    #[test]
    fn test_extract_string_keys() {
        let d = doc(json!({"name": "Anna", "age": 30}));
        let keys = extract_keys(&d, "name", IndexKind::String);
        assert_eq!(keys.len(), 1);
        assert!(keys.contains(&IndexKey::String("Anna".into())));

        // Number kind produces nothing for a string path
        assert!(extract_keys(&d, "name", IndexKind::Number).is_empty());
    }

    #[test]
    fn test_extract_istring_lowercases() {
        let d = doc(json!({"name": "AnNa"}));
        let keys = extract_keys(&d, "name", IndexKind::IString);
        assert!(keys.contains(&IndexKey::String("anna".into())));
    }

    #[test]
    fn test_extract_array_keys_dedup() {
        let d = doc(json!({"tags": ["red", "blue", "red"]}));
        let keys = extract_keys(&d, "tags", IndexKind::Array);
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn test_scalar_kinds_post_array_elements() {
        // Equality matches any array element, so scalar kinds are
        // multikey over terminal arrays
        let d = doc(json!({"tag": ["red", "blue"], "n": [1, 2]}));
        let keys = extract_keys(&d, "tag", IndexKind::String);
        assert!(keys.contains(&IndexKey::String("red".into())));
        assert!(keys.contains(&IndexKey::String("blue".into())));

        let keys = extract_keys(&d, "tag", IndexKind::IString);
        assert!(keys.contains(&IndexKey::String("red".into())));

        let keys = extract_keys(&d, "n", IndexKind::Number);
        assert!(keys.contains(&IndexKey::num(1.0)));
        assert!(keys.contains(&IndexKey::num(2.0)));
    }

    #[test]
    fn test_array_kind_posts_string_tokens() {
        let d = doc(json!({"text": "fast embedded database"}));
        let keys = extract_keys(&d, "text", IndexKind::Array);
        // The whole string for equality, each token for $strand/$stror
        assert!(keys.contains(&IndexKey::String("fast embedded database".into())));
        assert!(keys.contains(&IndexKey::String("fast".into())));
        assert!(keys.contains(&IndexKey::String("database".into())));
    }

    #[test]
    fn test_update_hook_repeated_element() {
        let mut mgr = IndexManager::new();
        mgr.ensure_index("tags", IndexKind::Array);
        let oid = Oid::new();

        let old = doc(json!({"tags": ["red", "red"]}));
        mgr.on_insert(oid, &old);

        // Removing one of two equal elements keeps the posting
        let new = doc(json!({"tags": ["red"]}));
        mgr.on_update(oid, &old, &new);
        let index = mgr.get("tags", IndexKind::Array).unwrap();
        assert_eq!(
            index.tree().get(&IndexKey::String("red".into())),
            vec![oid]
        );

        // Removing the last occurrence removes the posting
        let emptied = doc(json!({"tags": []}));
        mgr.on_update(oid, &new, &emptied);
        let index = mgr.get("tags", IndexKind::Array).unwrap();
        assert!(index.tree().get(&IndexKey::String("red".into())).is_empty());
    }

    #[test]
    fn test_ensure_drop_index() {
        let mut mgr = IndexManager::new();
        assert!(mgr.ensure_index("name", IndexKind::String));
        assert!(!mgr.ensure_index("name", IndexKind::String));
        assert!(mgr.ensure_index("name", IndexKind::IString));
        assert_eq!(mgr.kinds_for("name").len(), 2);

        mgr.drop_index("name", Some(IndexKind::String)).unwrap();
        assert_eq!(mgr.kinds_for("name").len(), 1);

        mgr.drop_index("name", None).unwrap();
        assert!(mgr.is_empty());
        assert!(mgr.drop_index("name", None).is_err());
    }

    #[test]
    fn test_rebuild_is_idempotent() {
        let mut mgr = IndexManager::new();
        mgr.ensure_index("age", IndexKind::Number);

        let docs: Vec<(Oid, Document)> = (0..50)
            .map(|i| (Oid::new(), doc(json!({"age": i % 7}))))
            .collect();

        mgr.rebuild_index("age", IndexKind::Number, docs.iter().map(|(o, d)| (*o, d)))
            .unwrap();
        let first = mgr.get("age", IndexKind::Number).unwrap().dump();

        mgr.rebuild_index("age", IndexKind::Number, docs.iter().map(|(o, d)| (*o, d)))
            .unwrap();
        let second = mgr.get("age", IndexKind::Number).unwrap().dump();

        assert_eq!(first, second);
    }
}
