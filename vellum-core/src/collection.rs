// src/collection.rs
// A collection: one data file, one write-ahead log, an in-memory catalog
// of live documents and the secondary indexes over them. Every mutation
// is WAL-logged before it reaches the data file; between
// begin_transaction and commit, writes stay in the transaction overlay.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::cursor::Cursor;
use crate::document::Document;
use crate::error::{Result, VellumError};
use crate::hints::QueryHints;
use crate::index::{IndexDescriptor, IndexKind, IndexManager};
use crate::oid::Oid;
use crate::query::{FieldCond, JoinSpec, Query};
use crate::query_planner;
use crate::storage::io::Record;
use crate::storage::metadata::CollectionOptions;
use crate::storage::{compaction, CollectionFile};
use crate::transaction::TxBuffer;
use crate::update::split_update;
use crate::wal::{Wal, WalRecord};

/// Resolves `$join` references against other collections.
pub trait JoinSource {
    fn fetch(&self, collection: &str, oid: &Oid) -> Option<Document>;
}

/// Cooperative cancellation handle for long-running queries. Clone it,
/// hand one copy to the query and keep the other to call `cancel()`.
/// The query checks the flag once per candidate record.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        CancelToken(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionStats {
    pub name: String,
    pub documents: usize,
    pub data_bytes: u64,
    pub indexes: Vec<IndexDescriptor>,
    pub tx_active: bool,
}

#[derive(Clone)]
pub struct Collection {
    inner: Arc<RwLock<Inner>>,
}

struct Inner {
    name: String,
    file: CollectionFile,
    wal: Option<Wal>,
    docs: HashMap<Oid, Document>,
    /// Insertion order of live documents; queries without `$orderby`
    /// return results in this order.
    order: Vec<Oid>,
    indexes: IndexManager,
    tx: Option<TxBuffer>,
    next_txid: u64,
    read_only: bool,
}

impl Collection {
    /// Open a collection inside `dir`, creating its files unless
    /// `read_only`. Committed WAL entries from a previous crash are
    /// replayed into the data file first.
    pub fn open(dir: &Path, name: &str, read_only: bool) -> Result<Collection> {
        Collection::open_with(dir, name, read_only, CollectionOptions::default())
    }

    /// Like `open`, with creation options. The options only take effect
    /// when the collection is created here; an existing collection keeps
    /// the options it was created with.
    pub fn open_with(
        dir: &Path,
        name: &str,
        read_only: bool,
        options: CollectionOptions,
    ) -> Result<Collection> {
        let data_path = dir.join(format!("{}.vcol", name));
        let wal_path = dir.join(format!("{}.wal", name));

        let (mut file, records) = if data_path.exists() {
            CollectionFile::open(&data_path)?
        } else {
            if read_only {
                return Err(VellumError::CollectionNotFound(name.to_string()));
            }
            (CollectionFile::create(&data_path, name, options)?, Vec::new())
        };

        let mut docs = HashMap::new();
        let mut order = Vec::new();
        for record in records {
            match record {
                Record::Doc { oid, body } => {
                    upsert_mem(&mut docs, &mut order, oid, decode_doc(oid, &body)?);
                }
                Record::Tombstone { oid } => remove_mem(&mut docs, &mut order, &oid),
            }
        }

        let recovered = Wal::recover(&wal_path)?;
        let mut max_txid = 0u64;
        for (txid, ops) in &recovered {
            max_txid = max_txid.max(*txid);
            for op in ops {
                match op {
                    WalRecord::Insert { oid, body } | WalRecord::Update { oid, body } => {
                        if !read_only {
                            file.append(&Record::Doc {
                                oid: *oid,
                                body: body.clone(),
                            })?;
                        }
                        upsert_mem(&mut docs, &mut order, *oid, decode_doc(*oid, body)?);
                    }
                    WalRecord::Delete { oid } => {
                        if !read_only {
                            file.append(&Record::Tombstone { oid: *oid })?;
                        }
                        remove_mem(&mut docs, &mut order, oid);
                    }
                    WalRecord::Begin | WalRecord::Commit | WalRecord::Abort => {}
                }
            }
        }
        if !recovered.is_empty() {
            info!(
                "collection '{}': replayed {} committed transaction(s) from wal",
                name,
                recovered.len()
            );
        }

        let wal = if read_only {
            None
        } else {
            if !recovered.is_empty() {
                file.sync()?;
            }
            let mut wal = Wal::open(&wal_path)?;
            wal.clear()?;
            Some(wal)
        };

        let mut indexes = IndexManager::new();
        for desc in file.meta().indexes.clone() {
            indexes.ensure_index(&desc.path, desc.kind);
            indexes.rebuild_index(&desc.path, desc.kind, docs.iter().map(|(o, d)| (*o, d)))?;
        }

        debug!(
            "collection '{}': {} live document(s), {} index(es)",
            name,
            docs.len(),
            file.meta().indexes.len()
        );

        Ok(Collection {
            inner: Arc::new(RwLock::new(Inner {
                name: name.to_string(),
                file,
                wal,
                docs,
                order,
                indexes,
                tx: None,
                next_txid: max_txid + 1,
                read_only,
            })),
        })
    }

    pub fn name(&self) -> String {
        self.inner.read().name.clone()
    }

    /// The options the collection was created with.
    pub fn options(&self) -> CollectionOptions {
        self.inner.read().file.meta().options
    }

    /// Store a document. Without `_id` a fresh OID is assigned; with an
    /// `_id` that already exists the stored document is replaced.
    pub fn save(&self, value: &Value) -> Result<Oid> {
        let mut inner = self.inner.write();
        inner.ensure_writable()?;
        let mut doc = Document::from_value(value.clone())?;
        let oid = match doc.oid {
            Some(oid) => oid,
            None => {
                let oid = Oid::new();
                doc.oid = Some(oid);
                oid
            }
        };
        inner.stage_or_commit(vec![(oid, Some(doc))])?;
        Ok(oid)
    }

    /// Store a batch of documents as one WAL group. With `merge`, a
    /// document carrying an existing `_id` overlays its top-level fields
    /// onto the stored document instead of replacing it.
    pub fn save_all(&self, values: &[Value], merge: bool) -> Result<Vec<Oid>> {
        let mut inner = self.inner.write();
        inner.ensure_writable()?;

        let mut ops = Vec::with_capacity(values.len());
        let mut oids = Vec::with_capacity(values.len());
        for value in values {
            let mut doc = Document::from_value(value.clone())?;
            let oid = match doc.oid {
                Some(oid) => oid,
                None => {
                    let oid = Oid::new();
                    doc.oid = Some(oid);
                    oid
                }
            };
            if merge {
                if let Some(existing) = inner.visible(&oid) {
                    let mut merged = existing.clone();
                    for (field, value) in doc.fields() {
                        merged.set_path(field, value.clone())?;
                    }
                    doc = merged;
                }
            }
            ops.push((oid, Some(doc)));
            oids.push(oid);
        }
        inner.stage_or_commit(ops)?;
        Ok(oids)
    }

    /// Delete one document by OID. Returns false when no such document
    /// exists.
    pub fn delete(&self, oid: &Oid) -> Result<bool> {
        let mut inner = self.inner.write();
        inner.ensure_writable()?;
        if inner.visible(oid).is_none() {
            return Ok(false);
        }
        inner.stage_or_commit(vec![(*oid, None)])?;
        Ok(true)
    }

    /// Fetch one document by OID.
    pub fn load(&self, oid: &Oid) -> Option<Document> {
        self.inner.read().visible(oid).cloned()
    }

    pub fn find(&self, query: &Value, hints: &Value) -> Result<Cursor> {
        self.run_query(query, hints, None, None)
    }

    /// Like `find`, with a source for resolving `$join` references.
    pub fn find_with_source(
        &self,
        query: &Value,
        hints: &Value,
        source: &dyn JoinSource,
    ) -> Result<Cursor> {
        self.run_query(query, hints, Some(source), None)
    }

    /// Like `find`, but abandons the scan with `InvalidState` once the
    /// token is cancelled.
    pub fn find_cancellable(
        &self,
        query: &Value,
        hints: &Value,
        cancel: &CancelToken,
    ) -> Result<Cursor> {
        self.run_query(query, hints, None, Some(cancel))
    }

    pub fn find_one(&self, query: &Value) -> Result<Option<Document>> {
        let mut cursor = self.find(query, &Value::Object(Default::default()))?;
        cursor.next_doc()
    }

    pub fn count(&self, query: &Value) -> Result<usize> {
        let q = Query::parse(query)?;
        Ok(self.inner.read().matched_oids(&q, None)?.len())
    }

    /// Execute an update expression (match clauses plus update operators
    /// in one object). Returns the number of documents affected.
    pub fn update(&self, expr: &Value) -> Result<usize> {
        let mut inner = self.inner.write();
        inner.ensure_writable()?;

        let (query_value, spec) = split_update(expr)?;
        if !spec.has_field_ops() && spec.upsert_template().is_none() && !spec.is_dropall() {
            return Err(VellumError::Validation(
                "Update expression carries no update operators".into(),
            ));
        }
        let q = Query::parse(&query_value)?;
        let matched = inner.matched_oids(&q, None)?;

        if spec.is_dropall() {
            let ops: Vec<_> = matched.into_iter().map(|oid| (oid, None)).collect();
            let n = ops.len();
            inner.stage_or_commit(ops)?;
            return Ok(n);
        }

        if matched.is_empty() {
            if let Some(template) = spec.upsert_template() {
                let mut doc = Document::from_value(upsert_seed(&q, template)?)?;
                doc.validate()?;
                let oid = match doc.oid {
                    Some(oid) => oid,
                    None => {
                        let oid = Oid::new();
                        doc.oid = Some(oid);
                        oid
                    }
                };
                inner.stage_or_commit(vec![(oid, Some(doc))])?;
                return Ok(1);
            }
            return Ok(0);
        }

        let mut ops = Vec::new();
        for oid in matched {
            let Some(current) = inner.visible(&oid).cloned() else {
                continue;
            };
            let Some(positions) = q.matches_with_positions(&current) else {
                continue;
            };
            let mut updated = current;
            if spec.apply(&mut updated, &positions)? {
                updated.validate()?;
                ops.push((oid, Some(updated)));
            }
        }
        let n = ops.len();
        inner.stage_or_commit(ops)?;
        Ok(n)
    }

    /// Delete every document matching the query. Returns the number
    /// removed.
    pub fn remove(&self, query: &Value) -> Result<usize> {
        let mut inner = self.inner.write();
        inner.ensure_writable()?;
        let q = Query::parse(query)?;
        let ops: Vec<_> = inner
            .matched_oids(&q, None)?
            .into_iter()
            .map(|oid| (oid, None))
            .collect();
        let n = ops.len();
        inner.stage_or_commit(ops)?;
        Ok(n)
    }

    /// Create an index and backfill it from the stored documents.
    /// Returns false when the index already existed.
    pub fn ensure_index(&self, path: &str, kind: IndexKind) -> Result<bool> {
        let mut inner = self.inner.write();
        inner.ensure_writable()?;
        inner.forbid_tx("index changes")?;
        if !inner.indexes.ensure_index(path, kind) {
            return Ok(false);
        }
        let Inner { indexes, docs, .. } = &mut *inner;
        indexes.rebuild_index(path, kind, docs.iter().map(|(o, d)| (*o, d)))?;
        inner.persist_index_meta()?;
        info!(
            "collection '{}': created {} index on '{}'",
            inner.name,
            kind.as_str(),
            path
        );
        Ok(true)
    }

    /// Drop one index kind at a path, or every kind when `kind` is None.
    pub fn drop_index(&self, path: &str, kind: Option<IndexKind>) -> Result<()> {
        let mut inner = self.inner.write();
        inner.ensure_writable()?;
        inner.forbid_tx("index changes")?;
        inner.indexes.drop_index(path, kind)?;
        inner.persist_index_meta()
    }

    /// Re-derive an existing index from a full scan of the stored
    /// documents.
    pub fn rebuild_index(&self, path: &str, kind: IndexKind) -> Result<()> {
        let mut inner = self.inner.write();
        inner.ensure_writable()?;
        inner.forbid_tx("index changes")?;
        let Inner { indexes, docs, .. } = &mut *inner;
        indexes.rebuild_index(path, kind, docs.iter().map(|(o, d)| (*o, d)))
    }

    pub fn optimize_index(&self, path: &str) -> Result<()> {
        let mut inner = self.inner.write();
        inner.ensure_writable()?;
        inner.indexes.optimize_index(path)
    }

    pub fn index_descriptors(&self) -> Vec<IndexDescriptor> {
        self.inner.read().indexes.descriptors()
    }

    pub fn begin_transaction(&self) -> Result<()> {
        let mut inner = self.inner.write();
        inner.ensure_writable()?;
        if inner.tx.is_some() {
            return Err(VellumError::InvalidState(
                "Transaction already active".into(),
            ));
        }
        let txid = inner.next_txid;
        inner.next_txid += 1;
        inner.wal_mut()?.append(txid, &WalRecord::Begin)?;
        inner.tx = Some(TxBuffer::new(txid));
        debug!("collection '{}': transaction {} begun", inner.name, txid);
        Ok(())
    }

    /// Make the transaction's writes durable and visible.
    pub fn commit_transaction(&self) -> Result<()> {
        let mut inner = self.inner.write();
        let tx = inner
            .tx
            .take()
            .ok_or_else(|| VellumError::InvalidState("No active transaction".into()))?;
        let txid = tx.txid();
        {
            let wal = inner.wal_mut()?;
            wal.append(txid, &WalRecord::Commit)?;
            wal.sync()?;
        }
        let staged: Vec<(Oid, Option<Document>)> =
            tx.staged().map(|(oid, doc)| (oid, doc.cloned())).collect();
        let count = staged.len();
        for (oid, doc) in staged {
            inner.apply_op(oid, doc)?;
        }
        inner.file.sync()?;
        inner.wal_mut()?.clear()?;
        info!(
            "collection '{}': transaction {} committed ({} write(s))",
            inner.name, txid, count
        );
        Ok(())
    }

    /// Discard the transaction's staged writes.
    pub fn abort_transaction(&self) -> Result<()> {
        let mut inner = self.inner.write();
        let tx = inner
            .tx
            .take()
            .ok_or_else(|| VellumError::InvalidState("No active transaction".into()))?;
        let txid = tx.txid();
        let wal = inner.wal_mut()?;
        wal.append(txid, &WalRecord::Abort)?;
        wal.clear()?;
        debug!("collection '{}': transaction {} aborted", inner.name, txid);
        Ok(())
    }

    pub fn tx_active(&self) -> bool {
        self.inner.read().tx.is_some()
    }

    /// Rewrite the data file keeping only the live version of each
    /// document.
    pub fn prune(&self) -> Result<()> {
        let mut inner = self.inner.write();
        inner.ensure_writable()?;
        inner.forbid_tx("compaction")?;

        let mut live = Vec::with_capacity(inner.order.len());
        for oid in &inner.order {
            if let Some(doc) = inner.docs.get(oid) {
                live.push((*oid, body_of(doc)?));
            }
        }
        let meta = inner.file.meta().clone();
        let path = inner.file.path().to_path_buf();
        inner.file = compaction::compact(&path, &meta, &live)?;
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        let mut inner = self.inner.write();
        inner.file.sync()?;
        if let Some(wal) = inner.wal.as_mut() {
            wal.sync()?;
        }
        Ok(())
    }

    pub fn stats(&self) -> CollectionStats {
        let inner = self.inner.read();
        CollectionStats {
            name: inner.name.clone(),
            documents: inner.docs.len(),
            data_bytes: inner.file.data_len(),
            indexes: inner.indexes.descriptors(),
            tx_active: inner.tx.is_some(),
        }
    }

    /// Every visible document in insertion order, `_id` included.
    pub fn export_docs(&self) -> Result<Vec<Document>> {
        let inner = self.inner.read();
        let q = Query::match_all();
        Ok(inner
            .matched_oids(&q, None)?
            .iter()
            .filter_map(|oid| inner.visible(oid).cloned())
            .collect())
    }

    /// Paths of the data file and WAL, for teardown on drop.
    pub fn file_paths(&self) -> (PathBuf, PathBuf) {
        let inner = self.inner.read();
        let data = inner.file.path().to_path_buf();
        let wal = data.with_extension("wal");
        (data, wal)
    }

    fn run_query(
        &self,
        query: &Value,
        hints: &Value,
        source: Option<&dyn JoinSource>,
        cancel: Option<&CancelToken>,
    ) -> Result<Cursor> {
        let q = Query::parse(query)?;
        let hints = QueryHints::parse(hints)?;
        if !q.joins().is_empty() && source.is_none() {
            return Err(VellumError::Validation(
                "$join requires database-level query execution".into(),
            ));
        }

        let inner = self.inner.read();
        let matched = inner.matched_oids(&q, cancel)?;
        let mut docs: Vec<Document> = matched
            .iter()
            .filter_map(|oid| inner.visible(oid).cloned())
            .collect();
        drop(inner);

        hints.apply_order(&mut docs);
        let docs = hints.apply_window(docs);
        if hints.only_count {
            return Ok(Cursor::count_only(docs.len()));
        }

        let mut out = Vec::with_capacity(docs.len());
        for doc in docs {
            let doc = resolve_joins(doc, q.joins(), source)?;
            out.push(hints.project(&doc)?);
        }
        Ok(Cursor::from_docs(out))
    }
}

impl Inner {
    fn ensure_writable(&self) -> Result<()> {
        if self.read_only {
            return Err(VellumError::InvalidState(format!(
                "Collection '{}' is open read-only",
                self.name
            )));
        }
        Ok(())
    }

    fn forbid_tx(&self, what: &str) -> Result<()> {
        if self.tx.is_some() {
            return Err(VellumError::InvalidState(format!(
                "{} are not allowed inside a transaction",
                what
            )));
        }
        Ok(())
    }

    fn wal_mut(&mut self) -> Result<&mut Wal> {
        self.wal.as_mut().ok_or_else(|| {
            VellumError::InvalidState(format!("Collection '{}' is open read-only", self.name))
        })
    }

    /// Route a batch of writes either into the open transaction or
    /// through an autocommitted WAL group.
    fn stage_or_commit(&mut self, ops: Vec<(Oid, Option<Document>)>) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let open_txid = self.tx.as_ref().map(TxBuffer::txid);
        match open_txid {
            Some(txid) => {
                for (oid, doc) in &ops {
                    let record = match doc {
                        Some(doc) => WalRecord::Update {
                            oid: *oid,
                            body: body_of(doc)?,
                        },
                        None => WalRecord::Delete { oid: *oid },
                    };
                    self.wal_mut()?.append(txid, &record)?;
                }
                let tx = self
                    .tx
                    .as_mut()
                    .ok_or_else(|| VellumError::InvalidState("No active transaction".into()))?;
                for (oid, doc) in ops {
                    match doc {
                        Some(doc) => tx.stage_write(oid, doc),
                        None => tx.stage_delete(oid),
                    }
                }
                Ok(())
            }
            None => self.commit_ops(ops),
        }
    }

    /// One WAL-framed group: log, sync, apply to file and memory, clear.
    fn commit_ops(&mut self, ops: Vec<(Oid, Option<Document>)>) -> Result<()> {
        let txid = self.next_txid;
        self.next_txid += 1;

        let mut records = Vec::with_capacity(ops.len());
        for (oid, doc) in &ops {
            records.push(match doc {
                Some(doc) => WalRecord::Insert {
                    oid: *oid,
                    body: body_of(doc)?,
                },
                None => WalRecord::Delete { oid: *oid },
            });
        }

        {
            let wal = self.wal_mut()?;
            wal.append(txid, &WalRecord::Begin)?;
            for record in &records {
                wal.append(txid, record)?;
            }
            wal.append(txid, &WalRecord::Commit)?;
            wal.sync()?;
        }

        for (oid, doc) in ops {
            self.apply_op(oid, doc)?;
        }
        self.file.sync()?;
        self.wal_mut()?.clear()?;
        Ok(())
    }

    /// Apply one committed write to the data file, the catalog and the
    /// indexes.
    fn apply_op(&mut self, oid: Oid, doc: Option<Document>) -> Result<()> {
        match doc {
            Some(doc) => {
                self.file.append(&Record::Doc {
                    oid,
                    body: body_of(&doc)?,
                })?;
                match self.docs.insert(oid, doc.clone()) {
                    Some(old) => self.indexes.on_update(oid, &old, &doc),
                    None => {
                        self.order.push(oid);
                        self.indexes.on_insert(oid, &doc);
                    }
                }
            }
            None => {
                self.file.append(&Record::Tombstone { oid })?;
                if let Some(old) = self.docs.remove(&oid) {
                    self.order.retain(|o| o != &oid);
                    self.indexes.on_delete(oid, &old);
                }
            }
        }
        Ok(())
    }

    /// OIDs of visible documents matching the query, in insertion order,
    /// with staged transaction writes appended in touch order. The cancel
    /// token, when given, is polled once per candidate record.
    fn matched_oids(&self, q: &Query, cancel: Option<&CancelToken>) -> Result<Vec<Oid>> {
        let plan = query_planner::plan(q, &self.indexes);
        let candidates: Option<HashSet<Oid>> = plan
            .candidates(&self.indexes)
            .map(|oids| oids.into_iter().collect());

        let mut out = Vec::new();
        for oid in &self.order {
            if let Some(token) = cancel {
                if token.is_cancelled() {
                    return Err(VellumError::InvalidState("Query cancelled".into()));
                }
            }
            if let Some(tx) = &self.tx {
                if tx.is_touched(oid) {
                    continue;
                }
            }
            if let Some(set) = &candidates {
                if !set.contains(oid) {
                    continue;
                }
            }
            if let Some(doc) = self.docs.get(oid) {
                if q.matches(doc) {
                    out.push(*oid);
                }
            }
        }
        if let Some(tx) = &self.tx {
            for (oid, staged) in tx.staged() {
                if let Some(doc) = staged {
                    if q.matches(doc) {
                        out.push(oid);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Overlay-aware lookup.
    fn visible(&self, oid: &Oid) -> Option<&Document> {
        if let Some(tx) = &self.tx {
            if let Some(slot) = tx.lookup(oid) {
                return slot;
            }
        }
        self.docs.get(oid)
    }

    fn persist_index_meta(&mut self) -> Result<()> {
        let mut meta = self.file.meta().clone();
        meta.indexes = self.indexes.descriptors();
        self.file.set_meta(meta)
    }
}

/// Document a `$upsert` inserts when nothing matched: the query's
/// literal equality fields merged with the template, template fields
/// winning.
fn upsert_seed(q: &Query, template: &Value) -> Result<Value> {
    let mut base = Document::new();
    for clause in q.clauses() {
        if clause.path == "_id" {
            continue;
        }
        if let FieldCond::Eq(value) = &clause.cond {
            base.set_path(&clause.path, value.clone())?;
        }
    }
    let mut merged = match base.to_value() {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    if let Value::Object(fields) = template {
        for (field, value) in fields {
            merged.insert(field.clone(), value.clone());
        }
    }
    Ok(Value::Object(merged))
}

fn body_of(doc: &Document) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&doc.to_value())?)
}

fn decode_doc(oid: Oid, body: &[u8]) -> Result<Document> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| VellumError::Corruption(format!("Unreadable document body: {}", e)))?;
    let mut doc = Document::from_value(value)?;
    doc.oid = Some(oid);
    Ok(doc)
}

fn upsert_mem(docs: &mut HashMap<Oid, Document>, order: &mut Vec<Oid>, oid: Oid, doc: Document) {
    if docs.insert(oid, doc).is_none() {
        order.push(oid);
    }
}

fn remove_mem(docs: &mut HashMap<Oid, Document>, order: &mut Vec<Oid>, oid: &Oid) {
    if docs.remove(oid).is_some() {
        order.retain(|o| o != oid);
    }
}

fn resolve_joins(
    mut doc: Document,
    joins: &[JoinSpec],
    source: Option<&dyn JoinSource>,
) -> Result<Document> {
    let Some(source) = source else {
        return Ok(doc);
    };
    for join in joins {
        let Some(value) = doc.get_path(&join.path).cloned() else {
            continue;
        };
        if let Some(resolved) = join_value(&value, join, source) {
            doc.set_path(&join.path, resolved)?;
        }
    }
    Ok(doc)
}

/// Resolve one `$join` reference value. Unresolvable references are left
/// untouched.
fn join_value(value: &Value, join: &JoinSpec, source: &dyn JoinSource) -> Option<Value> {
    match value {
        Value::String(hex) => hex
            .parse::<Oid>()
            .ok()
            .and_then(|oid| source.fetch(&join.collection, &oid))
            .map(|doc| doc.to_value()),
        Value::Array(items) => Some(Value::Array(
            items
                .iter()
                .map(|item| join_value(item, join, source).unwrap_or_else(|| item.clone()))
                .collect(),
        )),
        _ => None,
    }
}
