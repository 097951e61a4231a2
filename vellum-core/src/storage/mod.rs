// src/storage/mod.rs
// One append-only data file per collection. The reserved header carries
// collection metadata; records follow and are replayed on open with the
// latest version of each OID winning and tombstones deleting.

pub mod compaction;
pub mod io;
pub mod metadata;

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::info;

use crate::error::{Result, VellumError};

use io::Record;
use metadata::{CollectionMeta, CollectionOptions, HEADER_SIZE};

pub struct CollectionFile {
    path: PathBuf,
    file: File,
    meta: CollectionMeta,
    end: u64,
}

impl CollectionFile {
    /// Create a fresh data file. Fails if the file already exists. The
    /// options land in the header and stay frozen for the collection's
    /// lifetime.
    pub fn create(path: &Path, name: &str, options: CollectionOptions) -> Result<CollectionFile> {
        let mut file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => {
                    VellumError::CollectionExists(name.to_string())
                }
                _ => VellumError::Io(e),
            })?;
        file.set_len(HEADER_SIZE)?;
        let meta = CollectionMeta::new(name, options);
        metadata::write_header(&mut file, &meta)?;
        file.sync_all()?;

        Ok(CollectionFile {
            path: path.to_path_buf(),
            file,
            meta,
            end: HEADER_SIZE,
        })
    }

    /// Open an existing data file and replay its records. A torn tail
    /// left by a crash is truncated away.
    pub fn open(path: &Path) -> Result<(CollectionFile, Vec<Record>)> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let meta = metadata::read_header(&mut file)?;

        file.seek(SeekFrom::Start(HEADER_SIZE))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        let records = io::scan_records(&data, &path.display().to_string())?;

        let end = HEADER_SIZE + records.iter().map(Record::encoded_len).sum::<u64>();
        if end < HEADER_SIZE + data.len() as u64 {
            info!(
                "{}: truncating {} torn byte(s)",
                path.display(),
                HEADER_SIZE + data.len() as u64 - end
            );
            file.set_len(end)?;
            file.sync_all()?;
        }

        Ok((
            CollectionFile {
                path: path.to_path_buf(),
                file,
                meta,
                end,
            },
            records,
        ))
    }

    pub fn append(&mut self, record: &Record) -> Result<()> {
        self.file.seek(SeekFrom::Start(self.end))?;
        let written = io::append_record(&mut self.file, record)?;
        self.end += written;
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    pub fn meta(&self) -> &CollectionMeta {
        &self.meta
    }

    /// Persist updated metadata into the reserved header.
    pub fn set_meta(&mut self, meta: CollectionMeta) -> Result<()> {
        metadata::write_header(&mut self.file, &meta)?;
        self.file.sync_all()?;
        self.meta = meta;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes of record data, header excluded.
    pub fn data_len(&self) -> u64 {
        self.end - HEADER_SIZE
    }
}

impl std::fmt::Debug for CollectionFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionFile")
            .field("path", &self.path)
            .field("name", &self.meta.name)
            .field("end", &self.end)
            .finish()
    }
}
