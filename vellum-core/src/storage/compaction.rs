// src/storage/compaction.rs
// Rewrites a collection data file with only the live version of each
// document. The new file is built beside the old one and swapped in with
// an atomic rename.

use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom};
use std::path::Path;

use log::info;

use crate::error::Result;
use crate::oid::Oid;

use super::io::{self, Record};
use super::metadata::{self, CollectionMeta, HEADER_SIZE};
use super::CollectionFile;

/// Replace the file at `path` with one containing exactly `live`, in the
/// given order. Returns the reopened file.
pub fn compact(
    path: &Path,
    meta: &CollectionMeta,
    live: &[(Oid, Vec<u8>)],
) -> Result<CollectionFile> {
    let tmp_path = path.with_extension("vcol.compact");

    {
        let mut tmp = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        tmp.set_len(HEADER_SIZE)?;
        metadata::write_header(&mut tmp, meta)?;

        tmp.seek(SeekFrom::Start(HEADER_SIZE))?;
        for (oid, body) in live {
            io::append_record(
                &mut tmp,
                &Record::Doc {
                    oid: *oid,
                    body: body.clone(),
                },
            )?;
        }
        tmp.sync_all()?;
    }

    std::fs::rename(&tmp_path, path)?;
    info!(
        "compacted {}: {} live document(s)",
        path.display(),
        live.len()
    );

    let (file, _) = CollectionFile::open(path)?;
    Ok(file)
}
