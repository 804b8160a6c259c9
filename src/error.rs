//! Error types for the versioning engine.

use crate::types::Hash;
use rusqlite::ErrorCode;
use thiserror::Error;

/// Main error type for repository operations.
#[derive(Debug, Error)]
pub enum VcError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(rusqlite::Error),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("Branch {branch} moved: expected head {expected}, found {actual}")]
    Conflict {
        branch: String,
        expected: Hash,
        actual: Hash,
    },

    #[error("Branch already exists: {0}")]
    DuplicateName(String),

    #[error("Table is not tracked: {0}")]
    UntrackedTable(String),

    #[error("Constraint violation: {0}")]
    StoreConstraintViolation(String),

    #[error("Unsupported table {table}: {reason}")]
    UnsupportedTable { table: String, reason: String },

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid hash: {0}")]
    InvalidHash(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Repository not initialized")]
    NotInitialized,

    #[error("Repository already initialized")]
    AlreadyInitialized,
}

impl VcError {
    pub(crate) fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        VcError::NotFound {
            kind,
            name: name.into(),
        }
    }
}

impl From<rusqlite::Error> for VcError {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(ErrorCode::ConstraintViolation) => VcError::StoreConstraintViolation(e.to_string()),
            _ => VcError::Sqlite(e),
        }
    }
}

impl From<serde_json::Error> for VcError {
    fn from(e: serde_json::Error) -> Self {
        VcError::Serialization(e.to_string())
    }
}

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, VcError>;
