// src/error.rs
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VellumError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Collection '{0}' not found")]
    CollectionNotFound(String),

    #[error("Collection '{0}' already exists")]
    CollectionExists(String),

    #[error("Document not found")]
    DocumentNotFound,

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Index corruption: {0}")]
    IndexCorrupt(String),

    #[error("Database corruption: {0}")]
    Corruption(String),

    #[error("WAL corruption detected")]
    WalCorruption,
}

impl VellumError {
    /// Numeric code reported through the command surface.
    pub fn code(&self) -> i32 {
        match self {
            VellumError::Io(_) => 1,
            VellumError::Serialization(_) | VellumError::Deserialization(_) => 2,
            VellumError::Validation(_) => 3,
            VellumError::CollectionNotFound(_) => 4,
            VellumError::CollectionExists(_) => 5,
            VellumError::DocumentNotFound => 6,
            VellumError::TypeMismatch(_) => 7,
            VellumError::InvalidState(_) => 8,
            VellumError::Index(_) => 9,
            VellumError::IndexCorrupt(_) => 10,
            VellumError::Corruption(_) => 11,
            VellumError::WalCorruption => 12,
        }
    }
}

pub type Result<T> = std::result::Result<T, VellumError>;
