//! SQLite persistence for labs, patients, the allergen ledger, recipes and books.

pub mod repository;
pub mod sqlite;

pub use repository::*;
pub use sqlite::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{entity_type} not found: {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Unknown {field} value: {value}")]
    InvalidEnum { field: String, value: String },

    /// A JSON column could not be encoded or decoded.
    #[error("Bad JSON in {column}: {reason}")]
    InvalidJson { column: String, reason: String },

    #[error("Schema migration v{version} failed: {reason}")]
    MigrationFailed { version: i64, reason: String },

    /// Stored identifier is not a UUID.
    #[error("Invalid stored id {0}")]
    InvalidId(String),
}
