// src/storage/io.rs
// Record framing for collection data files. Records are appended after
// the reserved header as: 4B LE payload length | payload. The payload is
// a kind byte, the 12-byte OID, and (for documents) the JSON body.

use std::io::Write;

use log::warn;

use crate::error::{Result, VellumError};
use crate::oid::Oid;

const KIND_DOC: u8 = 1;
const KIND_TOMBSTONE: u8 = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Doc { oid: Oid, body: Vec<u8> },
    Tombstone { oid: Oid },
}

impl Record {
    pub fn oid(&self) -> Oid {
        match self {
            Record::Doc { oid, .. } | Record::Tombstone { oid } => *oid,
        }
    }

    /// On-disk size of the framed record.
    pub fn encoded_len(&self) -> u64 {
        match self {
            Record::Doc { body, .. } => 4 + 13 + body.len() as u64,
            Record::Tombstone { .. } => 4 + 13,
        }
    }

    fn payload(&self) -> Vec<u8> {
        match self {
            Record::Doc { oid, body } => {
                let mut out = Vec::with_capacity(13 + body.len());
                out.push(KIND_DOC);
                out.extend_from_slice(oid.as_bytes());
                out.extend_from_slice(body);
                out
            }
            Record::Tombstone { oid } => {
                let mut out = Vec::with_capacity(13);
                out.push(KIND_TOMBSTONE);
                out.extend_from_slice(oid.as_bytes());
                out
            }
        }
    }

    fn decode(payload: &[u8]) -> Result<Record> {
        let kind = *payload.first().ok_or_else(empty_record)?;
        let oid_bytes: [u8; 12] = payload
            .get(1..13)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(empty_record)?;
        let oid = Oid::from_bytes(oid_bytes);
        match kind {
            KIND_DOC => Ok(Record::Doc {
                oid,
                body: payload[13..].to_vec(),
            }),
            KIND_TOMBSTONE => Ok(Record::Tombstone { oid }),
            other => Err(VellumError::Corruption(format!(
                "Unknown record kind {}",
                other
            ))),
        }
    }
}

fn empty_record() -> VellumError {
    VellumError::Corruption("Truncated record payload".into())
}

pub fn append_record<W: Write>(writer: &mut W, record: &Record) -> Result<u64> {
    let payload = record.payload();
    writer.write_all(&(payload.len() as u32).to_le_bytes())?;
    writer.write_all(&payload)?;
    Ok(4 + payload.len() as u64)
}

/// Decode every record in `data` (the file contents after the header).
/// A short frame at the end is a torn write from a crash and is dropped;
/// corruption before the tail is an error.
pub fn scan_records(data: &[u8], origin: &str) -> Result<Vec<Record>> {
    let mut records = Vec::new();
    let mut pos = 0usize;
    while pos < data.len() {
        if pos + 4 > data.len() {
            warn!("{}: torn record length at offset {}, dropping tail", origin, pos);
            break;
        }
        let len = u32::from_le_bytes(
            data[pos..pos + 4]
                .try_into()
                .map_err(|_| empty_record())?,
        ) as usize;
        let payload_end = pos + 4 + len;
        if payload_end > data.len() {
            warn!("{}: torn record body at offset {}, dropping tail", origin, pos);
            break;
        }
        records.push(Record::decode(&data[pos + 4..payload_end])?);
        pos = payload_end;
    }
    Ok(records)
}
