//! Error type for the curation layer.
//!
//! Catalog failures are normally absorbed at the call site and degrade to
//! empty results; they only surface here when an operation has no sensible
//! empty answer.

use thiserror::Error;

use crate::catalog::CatalogError;
use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum CurationError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Missing {entity}: {id}")]
    MissingContext { entity: &'static str, id: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<rusqlite::Error> for CurationError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database(DatabaseError::from(e))
    }
}

impl CurationError {
    pub(crate) fn missing(entity: &'static str, id: impl ToString) -> Self {
        Self::MissingContext {
            entity,
            id: id.to_string(),
        }
    }
}
