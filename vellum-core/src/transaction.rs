// src/transaction.rs
// Collection-scoped transaction buffer. Between begin and commit every
// write lands in the overlay (and the WAL); storage, the in-memory
// catalog and the indexes only change at commit. Reads on the same
// collection merge the overlay, giving read-your-writes semantics.

use std::collections::HashMap;

use crate::document::Document;
use crate::oid::Oid;

#[derive(Debug)]
pub struct TxBuffer {
    txid: u64,
    /// Latest staged version per OID; None marks a staged delete.
    overlay: HashMap<Oid, Option<Document>>,
    /// OIDs first touched by this transaction, in operation order, so
    /// committed inserts keep their insertion order.
    touched: Vec<Oid>,
}

impl TxBuffer {
    pub fn new(txid: u64) -> Self {
        TxBuffer {
            txid,
            overlay: HashMap::new(),
            touched: Vec::new(),
        }
    }

    pub fn txid(&self) -> u64 {
        self.txid
    }

    pub fn stage_write(&mut self, oid: Oid, doc: Document) {
        if !self.overlay.contains_key(&oid) {
            self.touched.push(oid);
        }
        self.overlay.insert(oid, Some(doc));
    }

    pub fn stage_delete(&mut self, oid: Oid) {
        if !self.overlay.contains_key(&oid) {
            self.touched.push(oid);
        }
        self.overlay.insert(oid, None);
    }

    /// Staged state for one OID: `None` means the transaction has not
    /// touched it, `Some(None)` a staged delete.
    pub fn lookup(&self, oid: &Oid) -> Option<Option<&Document>> {
        self.overlay.get(oid).map(|slot| slot.as_ref())
    }

    pub fn is_touched(&self, oid: &Oid) -> bool {
        self.overlay.contains_key(oid)
    }

    /// Staged operations in first-touch order.
    pub fn staged(&self) -> impl Iterator<Item = (Oid, Option<&Document>)> {
        self.touched
            .iter()
            .filter_map(|oid| self.overlay.get(oid).map(|slot| (*oid, slot.as_ref())))
    }

    pub fn is_empty(&self) -> bool {
        self.overlay.is_empty()
    }
}
