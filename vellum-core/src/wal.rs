// src/wal.rs
// Per-collection write-ahead log. Each frame is:
//   8B txid LE | 1B record type | 4B payload len LE | payload | 4B crc32
// The crc covers the payload only. Recovery keeps committed transactions
// and treats a torn or corrupt tail as the end of the log.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::warn;

use crate::error::{Result, VellumError};
use crate::oid::Oid;

const TYPE_BEGIN: u8 = 1;
const TYPE_INSERT: u8 = 2;
const TYPE_UPDATE: u8 = 3;
const TYPE_DELETE: u8 = 4;
const TYPE_COMMIT: u8 = 5;
const TYPE_ABORT: u8 = 6;

#[derive(Debug, Clone, PartialEq)]
pub enum WalRecord {
    Begin,
    /// `body` is the serialized document.
    Insert { oid: Oid, body: Vec<u8> },
    Update { oid: Oid, body: Vec<u8> },
    Delete { oid: Oid },
    Commit,
    Abort,
}

impl WalRecord {
    fn type_byte(&self) -> u8 {
        match self {
            WalRecord::Begin => TYPE_BEGIN,
            WalRecord::Insert { .. } => TYPE_INSERT,
            WalRecord::Update { .. } => TYPE_UPDATE,
            WalRecord::Delete { .. } => TYPE_DELETE,
            WalRecord::Commit => TYPE_COMMIT,
            WalRecord::Abort => TYPE_ABORT,
        }
    }

    fn payload(&self) -> Vec<u8> {
        match self {
            WalRecord::Begin | WalRecord::Commit | WalRecord::Abort => Vec::new(),
            WalRecord::Delete { oid } => oid.as_bytes().to_vec(),
            WalRecord::Insert { oid, body } | WalRecord::Update { oid, body } => {
                let mut out = Vec::with_capacity(12 + body.len());
                out.extend_from_slice(oid.as_bytes());
                out.extend_from_slice(body);
                out
            }
        }
    }

    fn decode(type_byte: u8, payload: Vec<u8>) -> Result<WalRecord> {
        let take_oid = |payload: &[u8]| -> Result<Oid> {
            let bytes: [u8; 12] = payload
                .get(..12)
                .and_then(|s| s.try_into().ok())
                .ok_or(VellumError::WalCorruption)?;
            Ok(Oid::from_bytes(bytes))
        };
        match type_byte {
            TYPE_BEGIN => Ok(WalRecord::Begin),
            TYPE_COMMIT => Ok(WalRecord::Commit),
            TYPE_ABORT => Ok(WalRecord::Abort),
            TYPE_DELETE => Ok(WalRecord::Delete {
                oid: take_oid(&payload)?,
            }),
            TYPE_INSERT => Ok(WalRecord::Insert {
                oid: take_oid(&payload)?,
                body: payload[12..].to_vec(),
            }),
            TYPE_UPDATE => Ok(WalRecord::Update {
                oid: take_oid(&payload)?,
                body: payload[12..].to_vec(),
            }),
            _ => Err(VellumError::WalCorruption),
        }
    }
}

pub struct Wal {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl Wal {
    pub fn open(path: &Path) -> Result<Wal> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        Ok(Wal {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    pub fn append(&mut self, txid: u64, record: &WalRecord) -> Result<()> {
        let payload = record.payload();
        let crc = crc32fast::hash(&payload);

        self.writer.write_all(&txid.to_le_bytes())?;
        self.writer.write_all(&[record.type_byte()])?;
        self.writer.write_all(&(payload.len() as u32).to_le_bytes())?;
        self.writer.write_all(&payload)?;
        self.writer.write_all(&crc.to_le_bytes())?;
        Ok(())
    }

    /// Flush buffered frames and fsync. Called at commit.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Truncate after the logged operations have reached the data file.
    pub fn clear(&mut self) -> Result<()> {
        self.writer.flush()?;
        let file = self.writer.get_ref();
        file.set_len(0)?;
        file.sync_all()?;
        self.writer.get_mut().seek(SeekFrom::Start(0))?;
        Ok(())
    }

    /// Replay the log, returning the operations of committed transactions
    /// in commit order. Uncommitted groups and anything after the first
    /// corrupt frame are dropped.
    pub fn recover(path: &Path) -> Result<Vec<(u64, Vec<WalRecord>)>> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut data = Vec::new();
        File::open(path)?.read_to_end(&mut data)?;

        let mut open_txs: Vec<(u64, Vec<WalRecord>)> = Vec::new();
        let mut committed: Vec<(u64, Vec<WalRecord>)> = Vec::new();
        let mut pos = 0usize;

        while pos < data.len() {
            let Some(frame) = read_frame(&data, &mut pos) else {
                warn!(
                    "wal {}: corrupt or torn frame at offset {}, dropping tail",
                    path.display(),
                    pos
                );
                break;
            };
            let (txid, record) = frame;
            match record {
                WalRecord::Begin => open_txs.push((txid, Vec::new())),
                WalRecord::Commit => {
                    if let Some(idx) = open_txs.iter().position(|(id, _)| *id == txid) {
                        committed.push(open_txs.remove(idx));
                    }
                }
                WalRecord::Abort => {
                    open_txs.retain(|(id, _)| *id != txid);
                }
                op => {
                    if let Some((_, ops)) = open_txs.iter_mut().find(|(id, _)| *id == txid) {
                        ops.push(op);
                    }
                }
            }
        }

        Ok(committed)
    }
}

fn read_frame(data: &[u8], pos: &mut usize) -> Option<(u64, WalRecord)> {
    let header_end = pos.checked_add(13)?;
    if header_end > data.len() {
        return None;
    }
    let txid = u64::from_le_bytes(data[*pos..*pos + 8].try_into().ok()?);
    let type_byte = data[*pos + 8];
    let len = u32::from_le_bytes(data[*pos + 9..*pos + 13].try_into().ok()?) as usize;

    let payload_end = header_end.checked_add(len)?;
    let frame_end = payload_end.checked_add(4)?;
    if frame_end > data.len() {
        return None;
    }
    let payload = data[header_end..payload_end].to_vec();
    let crc = u32::from_le_bytes(data[payload_end..frame_end].try_into().ok()?);
    if crc32fast::hash(&payload) != crc {
        return None;
    }

    let record = WalRecord::decode(type_byte, payload).ok()?;
    *pos = frame_end;
    Some((txid, record))
}

impl std::fmt::Debug for Wal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wal").field("path", &self.path).finish()
    }
}
