// src/command.rs
// Database command surface. Commands arrive as JSON objects keyed by the
// command name and report through a response carrying an execution log
// and an error code.

use std::path::PathBuf;

use serde::Serialize;
use serde_json::Value;

use crate::database::Database;
use crate::error::{Result, VellumError};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Dump collections to a directory of JSON files.
    Export {
        path: PathBuf,
        collections: Option<Vec<String>>,
    },
    /// Load a directory of JSON files into the database. `replace`
    /// empties each target collection first.
    Import {
        path: PathBuf,
        collections: Option<Vec<String>>,
        replace: bool,
    },
    /// Structural metadata of the whole database.
    DbMeta,
}

impl Command {
    pub fn parse(value: &Value) -> Result<Command> {
        let obj = value
            .as_object()
            .ok_or_else(|| VellumError::Validation("Command must be an object".into()))?;

        if let Some(spec) = obj.get("export") {
            let (path, collections) = parse_transfer(spec, "export")?;
            return Ok(Command::Export { path, collections });
        }
        if let Some(spec) = obj.get("import") {
            let (path, collections) = parse_transfer(spec, "import")?;
            let replace = match spec.get("mode").and_then(|m| m.as_str()) {
                None | Some("merge") => false,
                Some("replace") => true,
                Some(other) => {
                    return Err(VellumError::Validation(format!(
                        "Unknown import mode '{}'",
                        other
                    )));
                }
            };
            return Ok(Command::Import {
                path,
                collections,
                replace,
            });
        }
        if obj.contains_key("dbmeta") {
            return Ok(Command::DbMeta);
        }

        Err(VellumError::Validation(
            "Command must be one of: export, import, dbmeta".into(),
        ))
    }
}

fn parse_transfer(spec: &Value, cmd: &str) -> Result<(PathBuf, Option<Vec<String>>)> {
    let obj = spec
        .as_object()
        .ok_or_else(|| VellumError::Validation(format!("{} expects an object", cmd)))?;
    let path = obj
        .get("path")
        .and_then(|p| p.as_str())
        .ok_or_else(|| VellumError::Validation(format!("{} requires a 'path' string", cmd)))?;

    let collections = match obj.get("cnames") {
        None | Some(Value::Null) => None,
        Some(Value::Array(items)) => {
            let mut names = Vec::with_capacity(items.len());
            for item in items {
                match item.as_str() {
                    Some(name) => names.push(name.to_string()),
                    None => {
                        return Err(VellumError::Validation(format!(
                            "{} 'cnames' must be strings",
                            cmd
                        )));
                    }
                }
            }
            Some(names)
        }
        Some(_) => {
            return Err(VellumError::Validation(format!(
                "{} 'cnames' must be an array",
                cmd
            )));
        }
    };
    Ok((PathBuf::from(path), collections))
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandResponse {
    pub log: Vec<String>,
    pub error: Option<String>,
    pub error_code: i32,
    pub result: Option<Value>,
}

impl CommandResponse {
    fn ok(log: Vec<String>, result: Option<Value>) -> Self {
        CommandResponse {
            log,
            error: None,
            error_code: 0,
            result,
        }
    }

    fn fail(log: Vec<String>, err: &VellumError) -> Self {
        CommandResponse {
            log,
            error: Some(err.to_string()),
            error_code: err.code(),
            result: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Run a command against a database. Failures are reported in the
/// response, never as an Err.
pub fn execute(db: &Database, command: Command) -> CommandResponse {
    let mut log = Vec::new();
    match run(db, command, &mut log) {
        Ok(result) => CommandResponse::ok(log, result),
        Err(err) => CommandResponse::fail(log, &err),
    }
}

fn run(db: &Database, command: Command, log: &mut Vec<String>) -> Result<Option<Value>> {
    match command {
        Command::Export { path, collections } => {
            let exported = db.export(&path, collections.as_deref())?;
            for name in &exported {
                log.push(format!("exported collection '{}'", name));
            }
            log.push(format!(
                "export of {} collection(s) into '{}' finished",
                exported.len(),
                path.display()
            ));
            Ok(None)
        }
        Command::Import {
            path,
            collections,
            replace,
        } => {
            let imported = db.import(&path, collections.as_deref(), replace)?;
            for (name, count) in &imported {
                log.push(format!(
                    "imported {} document(s) into collection '{}'",
                    count, name
                ));
            }
            log.push(format!(
                "import of {} collection(s) from '{}' finished",
                imported.len(),
                path.display()
            ));
            Ok(None)
        }
        Command::DbMeta => {
            log.push("collected database metadata".to_string());
            Ok(Some(db.meta()?))
        }
    }
}
