// src/database.rs
// A database is a directory of collections. Collections are discovered
// from their data files on open and created lazily on first use when the
// database is writable.

use std::fs;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use log::info;
use serde_json::{json, Value};

use crate::collection::{Collection, CollectionStats, JoinSource};
use crate::cursor::Cursor;
use crate::document::Document;
use crate::error::{Result, VellumError};
use crate::oid::Oid;
use crate::storage::metadata::CollectionOptions;

/// How to open a database directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenMode {
    pub write: bool,
    /// Create the directory when missing. Implies `write`.
    pub create: bool,
    /// Discard all existing collections on open. Implies `create`.
    pub truncate: bool,
}

impl OpenMode {
    pub fn reader() -> Self {
        OpenMode {
            write: false,
            create: false,
            truncate: false,
        }
    }

    pub fn writer() -> Self {
        OpenMode {
            write: true,
            create: false,
            truncate: false,
        }
    }

    pub fn writer_create() -> Self {
        OpenMode {
            write: true,
            create: true,
            truncate: false,
        }
    }

    pub fn with_truncate(mut self) -> Self {
        self.truncate = true;
        self.create = true;
        self.write = true;
        self
    }
}

pub struct Database {
    dir: PathBuf,
    mode: OpenMode,
    collections: DashMap<String, Collection>,
}

impl Database {
    pub fn open(dir: &Path, mode: OpenMode) -> Result<Database> {
        if !dir.exists() {
            if mode.create {
                fs::create_dir_all(dir)?;
            } else {
                return Err(VellumError::InvalidState(format!(
                    "Database directory '{}' does not exist",
                    dir.display()
                )));
            }
        }

        if mode.truncate {
            for entry in fs::read_dir(dir)? {
                let path = entry?.path();
                match path.extension().and_then(|e| e.to_str()) {
                    Some("vcol") | Some("wal") => fs::remove_file(&path)?,
                    _ => {}
                }
            }
            info!("database '{}' truncated", dir.display());
        }

        let db = Database {
            dir: dir.to_path_buf(),
            mode,
            collections: DashMap::new(),
        };

        for entry in fs::read_dir(&db.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("vcol") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let coll = Collection::open(&db.dir, name, !mode.write)?;
            db.collections.insert(name.to_string(), coll);
        }
        info!(
            "database '{}' opened with {} collection(s)",
            dir.display(),
            db.collections.len()
        );

        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn is_writable(&self) -> bool {
        self.mode.write
    }

    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Fetch a collection, creating it when the database is writable.
    pub fn collection(&self, name: &str) -> Result<Collection> {
        self.ensure_collection(name, CollectionOptions::default())
    }

    /// Fetch a collection, creating it with `options` when the database
    /// is writable. An existing collection keeps its creation options;
    /// the ones passed here are ignored for it.
    pub fn ensure_collection(&self, name: &str, options: CollectionOptions) -> Result<Collection> {
        validate_collection_name(name)?;
        if let Some(coll) = self.collections.get(name) {
            return Ok(coll.clone());
        }
        if !self.mode.write {
            return Err(VellumError::CollectionNotFound(name.to_string()));
        }
        let coll = Collection::open_with(&self.dir, name, false, options)?;
        self.collections.insert(name.to_string(), coll.clone());
        Ok(coll)
    }

    /// Fetch an existing collection without creating it.
    pub fn get_collection(&self, name: &str) -> Result<Collection> {
        self.collections
            .get(name)
            .map(|c| c.clone())
            .ok_or_else(|| VellumError::CollectionNotFound(name.to_string()))
    }

    /// Create a collection, failing if it already exists.
    pub fn create_collection(&self, name: &str) -> Result<Collection> {
        validate_collection_name(name)?;
        if self.collections.contains_key(name) {
            return Err(VellumError::CollectionExists(name.to_string()));
        }
        self.collection(name)
    }

    /// Remove a collection from the database. With `prune` its files are
    /// unlinked too; without it they stay on disk and the collection is
    /// rediscovered on the next open.
    pub fn drop_collection(&self, name: &str, prune: bool) -> Result<()> {
        if !self.mode.write {
            return Err(VellumError::InvalidState(
                "Database is open read-only".into(),
            ));
        }
        let (_, coll) = self
            .collections
            .remove(name)
            .ok_or_else(|| VellumError::CollectionNotFound(name.to_string()))?;
        let (data, wal) = coll.file_paths();
        if !prune {
            coll.sync()?;
            drop(coll);
            info!("collection '{}' detached", name);
            return Ok(());
        }
        drop(coll);
        if data.exists() {
            fs::remove_file(&data)?;
        }
        if wal.exists() {
            fs::remove_file(&wal)?;
        }
        info!("collection '{}' dropped", name);
        Ok(())
    }

    /// Query a collection with `$join` support across this database.
    pub fn find(&self, collection: &str, query: &Value, hints: &Value) -> Result<Cursor> {
        self.get_collection(collection)?
            .find_with_source(query, hints, self)
    }

    /// Flush every collection's files.
    pub fn sync(&self) -> Result<()> {
        for entry in self.collections.iter() {
            entry.value().sync()?;
        }
        Ok(())
    }

    /// Flush everything and release the database. Dropping the handle
    /// closes it too; this variant surfaces flush errors.
    pub fn close(self) -> Result<()> {
        self.sync()
    }

    /// Structural description of the database: path plus per-collection
    /// stats and index descriptors.
    pub fn meta(&self) -> Result<Value> {
        let mut stats: Vec<CollectionStats> = self
            .collections
            .iter()
            .map(|e| e.value().stats())
            .collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(json!({
            "path": self.dir.display().to_string(),
            "collections": serde_json::to_value(stats)?,
        }))
    }

    /// Write each selected collection to `<dir>/<name>.json` as a JSON
    /// array of documents. Returns the exported collection names.
    pub fn export(&self, dir: &Path, names: Option<&[String]>) -> Result<Vec<String>> {
        fs::create_dir_all(dir)?;
        let selected = self.select(names)?;
        for name in &selected {
            let coll = self.get_collection(name)?;
            let docs: Vec<Value> = coll.export_docs()?.iter().map(Document::to_value).collect();
            let path = dir.join(format!("{}.json", name));
            fs::write(&path, serde_json::to_vec_pretty(&Value::Array(docs))?)?;
            info!("exported collection '{}' to {}", name, path.display());
        }
        Ok(selected)
    }

    /// Load `<dir>/<name>.json` files into this database. With `replace`,
    /// existing target collections are emptied first. Returns the number
    /// of imported documents per collection.
    pub fn import(
        &self,
        dir: &Path,
        names: Option<&[String]>,
        replace: bool,
    ) -> Result<Vec<(String, usize)>> {
        if !self.mode.write {
            return Err(VellumError::InvalidState(
                "Database is open read-only".into(),
            ));
        }

        let selected: Vec<String> = match names {
            Some(names) => names.to_vec(),
            None => {
                let mut found = Vec::new();
                for entry in fs::read_dir(dir)? {
                    let path = entry?.path();
                    if path.extension().and_then(|e| e.to_str()) == Some("json") {
                        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                            found.push(stem.to_string());
                        }
                    }
                }
                found.sort();
                found
            }
        };

        let mut imported = Vec::new();
        for name in selected {
            let path = dir.join(format!("{}.json", name));
            let data = fs::read(&path)?;
            let parsed: Value = serde_json::from_slice(&data)?;
            let docs = parsed.as_array().ok_or_else(|| {
                VellumError::Validation(format!(
                    "Import file '{}' must contain a JSON array",
                    path.display()
                ))
            })?;

            let coll = self.collection(&name)?;
            if replace {
                coll.remove(&json!({}))?;
            }
            for doc in docs {
                coll.save(doc)?;
            }
            info!("imported {} document(s) into '{}'", docs.len(), name);
            imported.push((name, docs.len()));
        }
        Ok(imported)
    }

    fn select(&self, names: Option<&[String]>) -> Result<Vec<String>> {
        match names {
            None => Ok(self.collection_names()),
            Some(names) => {
                for name in names {
                    if !self.collections.contains_key(name) {
                        return Err(VellumError::CollectionNotFound(name.clone()));
                    }
                }
                Ok(names.to_vec())
            }
        }
    }
}

impl JoinSource for Database {
    fn fetch(&self, collection: &str, oid: &Oid) -> Option<Document> {
        self.collections.get(collection).and_then(|c| c.load(oid))
    }
}

fn validate_collection_name(name: &str) -> Result<()> {
    let ok = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !ok {
        return Err(VellumError::Validation(format!(
            "Invalid collection name '{}'",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> Database {
        Database::open(dir.path(), OpenMode::writer_create()).unwrap()
    }

    #[test]
    fn test_collections_rediscovered_on_open() {
        let dir = TempDir::new().unwrap();
        {
            let db = open(&dir);
            db.collection("pets").unwrap().save(&json!({"a": 1})).unwrap();
            db.collection("people").unwrap().save(&json!({"b": 2})).unwrap();
        }
        let db = open(&dir);
        assert_eq!(db.collection_names(), vec!["people", "pets"]);
        assert_eq!(
            db.get_collection("pets").unwrap().count(&json!({})).unwrap(),
            1
        );
    }

    #[test]
    fn test_reader_mode_rejects_creation() {
        let dir = TempDir::new().unwrap();
        {
            let db = open(&dir);
            db.collection("pets").unwrap();
        }
        let db = Database::open(dir.path(), OpenMode::reader()).unwrap();
        assert!(db.collection("new_one").is_err());
        assert!(db.get_collection("pets").is_ok());
        assert!(db.drop_collection("pets", true).is_err());
    }

    #[test]
    fn test_reader_mode_missing_dir() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert!(Database::open(&missing, OpenMode::reader()).is_err());
        assert!(Database::open(&missing, OpenMode::writer_create()).is_ok());
    }

    #[test]
    fn test_truncate_wipes_collections() {
        let dir = TempDir::new().unwrap();
        {
            let db = open(&dir);
            db.collection("pets").unwrap().save(&json!({"a": 1})).unwrap();
        }
        let db = Database::open(dir.path(), OpenMode::writer_create().with_truncate()).unwrap();
        assert!(db.collection_names().is_empty());
    }

    #[test]
    fn test_create_and_drop_collection() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        db.create_collection("pets").unwrap();
        assert!(matches!(
            db.create_collection("pets"),
            Err(VellumError::CollectionExists(_))
        ));
        assert!(db.create_collection("bad name").is_err());

        db.drop_collection("pets", true).unwrap();
        assert!(db.get_collection("pets").is_err());
        assert!(!dir.path().join("pets.vcol").exists());
    }

    #[test]
    fn test_drop_without_prune_keeps_files() {
        let dir = TempDir::new().unwrap();
        {
            let db = open(&dir);
            db.collection("pets").unwrap().save(&json!({"a": 1})).unwrap();
            db.drop_collection("pets", false).unwrap();
            assert!(db.get_collection("pets").is_err());
            assert!(dir.path().join("pets.vcol").exists());
        }
        // The detached collection comes back on the next open
        let db = open(&dir);
        assert_eq!(
            db.get_collection("pets").unwrap().count(&json!({})).unwrap(),
            1
        );
    }

    #[test]
    fn test_creation_options_are_frozen() {
        let dir = TempDir::new().unwrap();
        let opts = CollectionOptions {
            expected_records: Some(10_000),
            large_file: true,
            cached_records: None,
            compressed: false,
        };
        {
            let db = open(&dir);
            let coll = db.ensure_collection("pets", opts).unwrap();
            assert_eq!(coll.options(), opts);
            // A second ensure with different options changes nothing
            let again = db
                .ensure_collection("pets", CollectionOptions::default())
                .unwrap();
            assert_eq!(again.options(), opts);
        }
        let db = open(&dir);
        assert_eq!(db.get_collection("pets").unwrap().options(), opts);
    }

    #[test]
    fn test_close_flushes() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        db.collection("pets").unwrap().save(&json!({"a": 1})).unwrap();
        db.close().unwrap();

        let db = open(&dir);
        assert_eq!(
            db.get_collection("pets").unwrap().count(&json!({})).unwrap(),
            1
        );
    }

    #[test]
    fn test_join_across_collections() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        let addr_oid = db
            .collection("addresses")
            .unwrap()
            .save(&json!({"city": "Novosibirsk", "street": "Pirogova"}))
            .unwrap();
        db.collection("people")
            .unwrap()
            .save(&json!({"name": "Anton", "address": addr_oid.to_hex()}))
            .unwrap();

        let mut cursor = db
            .find(
                "people",
                &json!({"$do": {"address": {"$join": "addresses"}}}),
                &json!({}),
            )
            .unwrap();
        let doc = cursor.next_doc().unwrap().unwrap();
        assert_eq!(
            doc.get_path("address.city").unwrap(),
            &json!("Novosibirsk")
        );
    }

    #[test]
    fn test_join_array_of_references() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        let tags = db.collection("tags").unwrap();
        let t1 = tags.save(&json!({"label": "red"})).unwrap();
        let t2 = tags.save(&json!({"label": "blue"})).unwrap();
        db.collection("posts")
            .unwrap()
            .save(&json!({"title": "hi", "tags": [t1.to_hex(), t2.to_hex(), "dangling"]}))
            .unwrap();

        let mut cursor = db
            .find(
                "posts",
                &json!({"$do": {"tags": {"$join": "tags"}}}),
                &json!({}),
            )
            .unwrap();
        let doc = cursor.next_doc().unwrap().unwrap();
        let tags = doc.get_path("tags").unwrap().as_array().unwrap();
        assert_eq!(tags[0]["label"], json!("red"));
        assert_eq!(tags[1]["label"], json!("blue"));
        // Unresolvable references stay as they were
        assert_eq!(tags[2], json!("dangling"));
    }

    #[test]
    fn test_export_import_roundtrip() {
        let src_dir = TempDir::new().unwrap();
        let dump_dir = TempDir::new().unwrap();
        let dst_dir = TempDir::new().unwrap();

        let db = open(&src_dir);
        let pets = db.collection("pets").unwrap();
        pets.save(&json!({"name": "Covi", "age": 7})).unwrap();
        pets.save(&json!({"name": "Rex", "age": 3})).unwrap();
        let exported = db.export(dump_dir.path(), None).unwrap();
        assert_eq!(exported, vec!["pets"]);

        let db2 = Database::open(dst_dir.path(), OpenMode::writer_create()).unwrap();
        let imported = db2.import(dump_dir.path(), None, false).unwrap();
        assert_eq!(imported, vec![("pets".to_string(), 2)]);
        assert_eq!(
            db2.get_collection("pets").unwrap().count(&json!({})).unwrap(),
            2
        );
        // OIDs survive the roundtrip
        let original = pets.find_one(&json!({"name": "Covi"})).unwrap().unwrap();
        let copied = db2
            .get_collection("pets")
            .unwrap()
            .find_one(&json!({"name": "Covi"}))
            .unwrap()
            .unwrap();
        assert_eq!(original.oid, copied.oid);
    }

    #[test]
    fn test_import_replace() {
        let dir = TempDir::new().unwrap();
        let dump = TempDir::new().unwrap();
        let db = open(&dir);
        let coll = db.collection("pets").unwrap();
        coll.save(&json!({"name": "old"})).unwrap();
        db.export(dump.path(), None).unwrap();

        coll.save(&json!({"name": "extra"})).unwrap();
        db.import(dump.path(), None, true).unwrap();
        assert_eq!(coll.count(&json!({})).unwrap(), 1);
        assert!(coll.find_one(&json!({"name": "old"})).unwrap().is_some());
    }

    #[test]
    fn test_meta() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        db.collection("pets").unwrap().save(&json!({"a": 1})).unwrap();
        let meta = db.meta().unwrap();
        assert_eq!(meta["collections"][0]["name"], json!("pets"));
        assert_eq!(meta["collections"][0]["documents"], json!(1));
    }
}
