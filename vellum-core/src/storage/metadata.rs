// src/storage/metadata.rs
// Collection file header. The first HEADER_SIZE bytes of a data file are
// reserved: magic, a length word and the bincode-encoded metadata, zero
// padded. Rewriting metadata never moves record data.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{Result, VellumError};
use crate::index::IndexDescriptor;

pub const MAGIC: &[u8; 8] = b"VELLUM01";
pub const HEADER_SIZE: u64 = 4096;

/// Creation-time tuning options. They apply only when the collection is
/// first created and are frozen in the header thereafter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CollectionOptions {
    pub expected_records: Option<u64>,
    pub large_file: bool,
    pub cached_records: Option<u64>,
    pub compressed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionMeta {
    pub name: String,
    pub created_at: u64,
    pub options: CollectionOptions,
    /// Indexes are rebuilt from a record scan on open; only their
    /// descriptors persist.
    pub indexes: Vec<IndexDescriptor>,
}

impl CollectionMeta {
    pub fn new(name: &str, options: CollectionOptions) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        CollectionMeta {
            name: name.to_string(),
            created_at,
            options,
            indexes: Vec::new(),
        }
    }
}

pub fn write_header(file: &mut File, meta: &CollectionMeta) -> Result<()> {
    let encoded =
        bincode::serialize(meta).map_err(|e| VellumError::Serialization(e.to_string()))?;
    if (encoded.len() as u64) + 12 > HEADER_SIZE {
        return Err(VellumError::Validation(format!(
            "Collection metadata for '{}' exceeds the reserved header",
            meta.name
        )));
    }

    file.seek(SeekFrom::Start(0))?;
    file.write_all(MAGIC)?;
    file.write_all(&(encoded.len() as u32).to_le_bytes())?;
    file.write_all(&encoded)?;
    Ok(())
}

pub fn read_header(file: &mut File) -> Result<CollectionMeta> {
    file.seek(SeekFrom::Start(0))?;
    let mut magic = [0u8; 8];
    file.read_exact(&mut magic)
        .map_err(|_| VellumError::Corruption("File too short for header".into()))?;
    if &magic != MAGIC {
        return Err(VellumError::Corruption(
            "Bad magic: not a collection data file".into(),
        ));
    }

    let mut len_bytes = [0u8; 4];
    file.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as u64;
    if len + 12 > HEADER_SIZE {
        return Err(VellumError::Corruption("Header length out of range".into()));
    }

    let mut encoded = vec![0u8; len as usize];
    file.read_exact(&mut encoded)?;
    bincode::deserialize(&encoded).map_err(|e| VellumError::Corruption(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexKind;
    use tempfile::TempDir;

    #[test]
    fn test_header_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("c.vcol");
        let mut meta = CollectionMeta::new("parrots", CollectionOptions::default());
        meta.indexes.push(IndexDescriptor {
            path: "name".into(),
            kind: IndexKind::String,
        });

        let mut file = File::options()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();
        file.set_len(HEADER_SIZE).unwrap();
        write_header(&mut file, &meta).unwrap();

        let read = read_header(&mut file).unwrap();
        assert_eq!(read, meta);
    }

    #[test]
    fn test_bad_magic_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("junk.vcol");
        std::fs::write(&path, b"NOTVELLUMJUNKJUNK").unwrap();
        let mut file = File::open(&path).unwrap();
        assert!(matches!(
            read_header(&mut file),
            Err(VellumError::Corruption(_))
        ));
    }
}
