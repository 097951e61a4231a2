//! Vellum is an embedded, file-based, schema-less document database.
//! Documents are ordered JSON objects addressed by 12-byte OIDs and
//! grouped into collections; each collection owns an append-only data
//! file, a write-ahead log, and in-memory secondary indexes rebuilt on
//! open. Queries use a MongoDB-flavored match language with hints for
//! ordering, windows and projections, and each collection supports a
//! single buffered transaction.
//!
//! ```no_run
//! use serde_json::json;
//! use vellum_core::{Database, OpenMode};
//!
//! # fn main() -> vellum_core::Result<()> {
//! let db = Database::open("./data".as_ref(), OpenMode::writer_create())?;
//! let parrots = db.collection("parrots")?;
//! parrots.save(&json!({"name": "Covi", "age": 7}))?;
//! let mut cursor = parrots.find(&json!({"age": {"$gte": 7}}), &json!({}))?;
//! while let Some(doc) = cursor.next_doc()? {
//!     println!("{}", doc.to_value());
//! }
//! # Ok(())
//! # }
//! ```

pub mod btree;
pub mod collection;
pub mod command;
pub mod cursor;
pub mod database;
pub mod document;
pub mod error;
pub mod hints;
pub mod index;
pub mod oid;
pub mod query;
pub mod query_planner;
pub mod storage;
pub mod transaction;
pub mod update;
pub mod wal;

pub use collection::{CancelToken, Collection, CollectionStats, JoinSource};
pub use command::{execute as execute_command, Command, CommandResponse};
pub use cursor::{Cursor, CursorState};
pub use database::{Database, OpenMode};
pub use document::Document;
pub use error::{Result, VellumError};
pub use index::{IndexDescriptor, IndexKind};
pub use oid::Oid;
pub use storage::metadata::CollectionOptions;
