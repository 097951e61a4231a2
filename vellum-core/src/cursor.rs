// src/cursor.rs
// Materialized query cursor.

use crate::document::Document;
use crate::error::{Result, VellumError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    Open,
    Exhausted,
    Closed,
}

#[derive(Debug)]
enum CursorData {
    Docs(Vec<Document>),
    /// `$onlycount` queries carry no documents.
    Count(usize),
}

#[derive(Debug)]
pub struct Cursor {
    data: CursorData,
    pos: usize,
    state: CursorState,
}

impl Cursor {
    pub fn from_docs(docs: Vec<Document>) -> Self {
        let state = if docs.is_empty() {
            CursorState::Exhausted
        } else {
            CursorState::Open
        };
        Cursor {
            data: CursorData::Docs(docs),
            pos: 0,
            state,
        }
    }

    pub fn count_only(count: usize) -> Self {
        Cursor {
            data: CursorData::Count(count),
            pos: 0,
            state: CursorState::Exhausted,
        }
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    /// Number of results the query produced. Valid in every state;
    /// zero once `close` has released the result set.
    pub fn count(&self) -> usize {
        match &self.data {
            CursorData::Docs(docs) => docs.len(),
            CursorData::Count(n) => *n,
        }
    }

    pub fn has_next(&self) -> bool {
        match (&self.data, self.state) {
            (CursorData::Docs(docs), CursorState::Open) => self.pos < docs.len(),
            _ => false,
        }
    }

    /// Fetch the next document. Returns None when exhausted; a closed
    /// cursor cannot be advanced.
    pub fn next_doc(&mut self) -> Result<Option<Document>> {
        if self.state == CursorState::Closed {
            return Err(VellumError::InvalidState("Cursor is closed".into()));
        }
        match &self.data {
            CursorData::Count(_) => Ok(None),
            CursorData::Docs(docs) => {
                if self.pos < docs.len() {
                    let doc = docs[self.pos].clone();
                    self.pos += 1;
                    if self.pos == docs.len() {
                        self.state = CursorState::Exhausted;
                    }
                    Ok(Some(doc))
                } else {
                    self.state = CursorState::Exhausted;
                    Ok(None)
                }
            }
        }
    }

    /// Zero-based position of the next document to fetch.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Reposition the cursor inside the result set. Out-of-range
    /// positions (and any position on a count-only cursor) are rejected.
    pub fn set_pos(&mut self, pos: usize) -> Result<()> {
        if self.state == CursorState::Closed {
            return Err(VellumError::InvalidState("Cursor is closed".into()));
        }
        let len = match &self.data {
            CursorData::Docs(docs) => docs.len(),
            CursorData::Count(_) => {
                return Err(VellumError::Validation(
                    "A count-only cursor has no positions".into(),
                ))
            }
        };
        if pos >= len {
            return Err(VellumError::Validation(format!(
                "Cursor position {} out of range (0..{})",
                pos, len
            )));
        }
        self.pos = pos;
        self.state = CursorState::Open;
        Ok(())
    }

    /// Rewind to the first result.
    pub fn reset(&mut self) -> Result<()> {
        if self.state == CursorState::Closed {
            return Err(VellumError::InvalidState("Cursor is closed".into()));
        }
        self.pos = 0;
        if let CursorData::Docs(docs) = &self.data {
            if !docs.is_empty() {
                self.state = CursorState::Open;
            }
        }
        Ok(())
    }

    /// Release the result set.
    pub fn close(&mut self) {
        self.state = CursorState::Closed;
        self.data = CursorData::Docs(Vec::new());
        self.pos = 0;
    }

    /// Remaining documents, consuming the cursor.
    pub fn collect_remaining(mut self) -> Result<Vec<Document>> {
        let mut out = Vec::new();
        while let Some(doc) = self.next_doc()? {
            out.push(doc);
        }
        Ok(out)
    }
}
