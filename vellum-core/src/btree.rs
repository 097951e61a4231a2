// src/btree.rs
// Ordered postings tree backing secondary indexes. Each distinct key maps
// to a sorted list of document identifiers. Splits propagate up on
// insert; deletes are lazy (no rebalance) and optimize() compacts.

use crate::index::IndexKey;
use crate::oid::Oid;

const ORDER: usize = 32;

#[derive(Debug, Clone)]
enum Node {
    Internal {
        keys: Vec<IndexKey>,
        children: Vec<Node>,
    },
    Leaf {
        entries: Vec<(IndexKey, Vec<Oid>)>,
    },
}

struct Split {
    sep: IndexKey,
    right: Node,
}

/// Inclusive/exclusive bound on one side of a range scan.
#[derive(Debug, Clone, Copy)]
pub enum Bound<'a> {
    Included(&'a IndexKey),
    Excluded(&'a IndexKey),
    Unbounded,
}

impl<'a> Bound<'a> {
    fn admits_lower(&self, key: &IndexKey) -> bool {
        match self {
            Bound::Included(b) => key >= b,
            Bound::Excluded(b) => key > b,
            Bound::Unbounded => true,
        }
    }

    fn admits_upper(&self, key: &IndexKey) -> bool {
        match self {
            Bound::Included(b) => key <= b,
            Bound::Excluded(b) => key < b,
            Bound::Unbounded => true,
        }
    }
}

pub struct BPlusTree {
    root: Node,
    distinct: usize,
}

impl BPlusTree {
    pub fn new() -> Self {
        BPlusTree {
            root: Node::Leaf {
                entries: Vec::new(),
            },
            distinct: 0,
        }
    }

    /// Number of distinct keys with at least one posting.
    pub fn len(&self) -> usize {
        self.distinct
    }

    pub fn is_empty(&self) -> bool {
        self.distinct == 0
    }

    pub fn insert(&mut self, key: IndexKey, oid: Oid) {
        let (created, split) = insert_rec(&mut self.root, key, oid);
        if created {
            self.distinct += 1;
        }
        if let Some(split) = split {
            let old_root = std::mem::replace(
                &mut self.root,
                Node::Leaf {
                    entries: Vec::new(),
                },
            );
            self.root = Node::Internal {
                keys: vec![split.sep],
                children: vec![old_root, split.right],
            };
        }
    }

    /// Remove one posting. Returns true when the posting was present.
    pub fn remove(&mut self, key: &IndexKey, oid: &Oid) -> bool {
        let (removed, emptied) = remove_rec(&mut self.root, key, oid);
        if emptied {
            self.distinct -= 1;
        }
        removed
    }

    pub fn get(&self, key: &IndexKey) -> Vec<Oid> {
        let mut node = &self.root;
        loop {
            match node {
                Node::Internal { keys, children } => {
                    let idx = match keys.binary_search(key) {
                        Ok(pos) => pos + 1,
                        Err(pos) => pos,
                    };
                    node = &children[idx];
                }
                Node::Leaf { entries } => {
                    return match entries.binary_search_by(|(k, _)| k.cmp(key)) {
                        Ok(pos) => entries[pos].1.clone(),
                        Err(_) => Vec::new(),
                    };
                }
            }
        }
    }

    /// Postings for every key within the bounds, in key order.
    pub fn range(&self, lower: Bound<'_>, upper: Bound<'_>) -> Vec<Oid> {
        let mut out = Vec::new();
        range_rec(&self.root, lower, upper, &mut out);
        out
    }

    /// Postings for every string key starting with `prefix`, in key order.
    pub fn prefix(&self, prefix: &str) -> Vec<Oid> {
        let lower = IndexKey::String(prefix.to_string());
        let mut out = Vec::new();
        prefix_rec(&self.root, &lower, prefix, &mut out);
        out
    }

    /// Full in-order snapshot of non-empty entries.
    pub fn dump(&self) -> Vec<(IndexKey, Vec<Oid>)> {
        let mut out = Vec::new();
        dump_rec(&self.root, &mut out);
        out
    }

    /// Rebuild the tree from its own contents, discarding emptied entries
    /// left behind by lazy deletes.
    pub fn optimize(&mut self) {
        let entries = self.dump();
        let mut fresh = BPlusTree::new();
        for (key, oids) in entries {
            for oid in oids {
                fresh.insert(key.clone(), oid);
            }
        }
        *self = fresh;
    }
}

impl Default for BPlusTree {
    fn default() -> Self {
        Self::new()
    }
}

fn insert_rec(node: &mut Node, key: IndexKey, oid: Oid) -> (bool, Option<Split>) {
    match node {
        Node::Leaf { entries } => {
            let created = match entries.binary_search_by(|(k, _)| k.cmp(&key)) {
                Ok(pos) => {
                    let postings = &mut entries[pos].1;
                    if let Err(insert_at) = postings.binary_search(&oid) {
                        postings.insert(insert_at, oid);
                    }
                    false
                }
                Err(pos) => {
                    entries.insert(pos, (key, vec![oid]));
                    true
                }
            };

            if entries.len() > ORDER {
                let mid = entries.len() / 2;
                let right_entries = entries.split_off(mid);
                let sep = right_entries[0].0.clone();
                return (
                    created,
                    Some(Split {
                        sep,
                        right: Node::Leaf {
                            entries: right_entries,
                        },
                    }),
                );
            }
            (created, None)
        }
        Node::Internal { keys, children } => {
            let idx = match keys.binary_search(&key) {
                Ok(pos) => pos + 1,
                Err(pos) => pos,
            };
            let (created, child_split) = insert_rec(&mut children[idx], key, oid);

            if let Some(split) = child_split {
                keys.insert(idx, split.sep);
                children.insert(idx + 1, split.right);

                if keys.len() > ORDER {
                    let mid = keys.len() / 2;
                    let sep = keys[mid].clone();
                    let right_keys = keys.split_off(mid + 1);
                    keys.pop();
                    let right_children = children.split_off(mid + 1);
                    return (
                        created,
                        Some(Split {
                            sep,
                            right: Node::Internal {
                                keys: right_keys,
                                children: right_children,
                            },
                        }),
                    );
                }
            }
            (created, None)
        }
    }
}

fn remove_rec(node: &mut Node, key: &IndexKey, oid: &Oid) -> (bool, bool) {
    match node {
        Node::Leaf { entries } => match entries.binary_search_by(|(k, _)| k.cmp(key)) {
            Ok(pos) => {
                let postings = &mut entries[pos].1;
                match postings.binary_search(oid) {
                    Ok(oid_pos) => {
                        postings.remove(oid_pos);
                        let emptied = postings.is_empty();
                        if emptied {
                            entries.remove(pos);
                        }
                        (true, emptied)
                    }
                    Err(_) => (false, false),
                }
            }
            Err(_) => (false, false),
        },
        Node::Internal { keys, children } => {
            let idx = match keys.binary_search(key) {
                Ok(pos) => pos + 1,
                Err(pos) => pos,
            };
            remove_rec(&mut children[idx], key, oid)
        }
    }
}

fn range_rec(node: &Node, lower: Bound<'_>, upper: Bound<'_>, out: &mut Vec<Oid>) {
    match node {
        Node::Leaf { entries } => {
            for (key, oids) in entries {
                if !upper.admits_upper(key) {
                    return;
                }
                if lower.admits_lower(key) {
                    out.extend_from_slice(oids);
                }
            }
        }
        Node::Internal { keys, children } => {
            // Child i holds keys < keys[i]; skip children entirely outside
            // the bounds.
            for (i, child) in children.iter().enumerate() {
                if i > 0 && !upper.admits_upper(&keys[i - 1]) {
                    return;
                }
                if i < keys.len() && !lower.admits_lower(&keys[i]) {
                    // Everything in this child is <= keys[i]; it may still
                    // straddle the lower bound, so only skip when the
                    // separator itself is below the bound.
                    match lower {
                        Bound::Included(b) | Bound::Excluded(b) => {
                            if &keys[i] < b {
                                continue;
                            }
                        }
                        Bound::Unbounded => {}
                    }
                }
                range_rec(child, lower, upper, out);
            }
        }
    }
}

fn prefix_rec(node: &Node, lower: &IndexKey, prefix: &str, out: &mut Vec<Oid>) {
    match node {
        Node::Leaf { entries } => {
            for (key, oids) in entries {
                match key {
                    IndexKey::String(s) => {
                        if s.starts_with(prefix) {
                            out.extend_from_slice(oids);
                        } else if key > lower {
                            // Past the prefix region
                            return;
                        }
                    }
                    _ => {
                        if key > lower {
                            return;
                        }
                    }
                }
            }
        }
        Node::Internal { keys, children } => {
            for (i, child) in children.iter().enumerate() {
                if i < keys.len() && &keys[i] < lower {
                    continue;
                }
                prefix_rec(child, lower, prefix, out);
                if i < keys.len() {
                    if let IndexKey::String(s) = &keys[i] {
                        if !s.starts_with(prefix) && keys[i] > *lower {
                            return;
                        }
                    }
                }
            }
        }
    }
}

fn dump_rec(node: &Node, out: &mut Vec<(IndexKey, Vec<Oid>)>) {
    match node {
        Node::Leaf { entries } => {
            for (key, oids) in entries {
                if !oids.is_empty() {
                    out.push((key.clone(), oids.clone()));
                }
            }
        }
        Node::Internal { children, .. } => {
            for child in children {
                dump_rec(child, out);
            }
        }
    }
}
