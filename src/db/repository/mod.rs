//! Repository layer: entity-scoped database operations.
//!
//! JSON columns are decoded here into typed values; nothing above this layer
//! sees raw column text.

mod allergen;
mod book;
mod patient;
mod recipe;

use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use super::DatabaseError;

// Re-export all public items from sub-modules
pub use allergen::*;
pub use book::*;
pub use patient::*;
pub use recipe::*;

pub(crate) fn parse_uuid(raw: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(raw).map_err(|e| DatabaseError::InvalidId(format!("{raw}: {e}")))
}

pub(crate) fn to_json<T: Serialize>(value: &T, column: &str) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::InvalidJson {
        column: column.into(),
        reason: e.to_string(),
    })
}

pub(crate) fn from_json<T: DeserializeOwned>(raw: &str, column: &str) -> Result<T, DatabaseError> {
    serde_json::from_str(raw).map_err(|e| DatabaseError::InvalidJson {
        column: column.into(),
        reason: e.to_string(),
    })
}
