//! External recipe catalog: client trait, wire normalization, transports.
//!
//! Everything above this module works with `CatalogRecipe`, a single canonical
//! shape. The catalog's loosely-typed payloads (aliased ids, array-or-object
//! containers, nested category/diet/allergen blocks) are resolved once in
//! `normalize`.

pub mod http;
pub mod mock;
pub mod normalize;
pub mod retry;
pub mod types;

pub use http::HttpCatalogClient;
pub use mock::MockCatalog;
pub use normalize::tag_slug;
pub use retry::RetryingCatalog;
pub use types::*;

use std::collections::HashMap;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Catalog is not reachable at {0}")]
    Connection(String),

    #[error("Catalog request timed out after {0}s")]
    Timeout(u64),

    #[error("Catalog returned error (status {status}): {body}")]
    Status { status: u16, body: String },

    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("Malformed catalog payload: {0}")]
    Malformed(String),

    #[error("Catalog item has no usable identifier")]
    MissingIdentifier,
}

impl CatalogError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Timeout(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::HttpClient(_) | Self::Malformed(_) | Self::MissingIdentifier => false,
        }
    }
}

/// Consumed catalog API.
pub trait CatalogClient: Send + Sync {
    /// One page of search results plus the catalog-reported total.
    fn search(&self, request: &SearchRequest) -> Result<SearchPage, CatalogError>;

    /// Full details for many recipes in one call.
    ///
    /// The map is keyed by every identifier alias of each returned recipe, so
    /// callers can look up with whichever id they requested.
    fn batch_details(
        &self,
        ids: &[String],
        exclude_query: Option<&str>,
    ) -> Result<HashMap<String, CatalogRecipe>, CatalogError>;

    /// Full details for one recipe; `None` when the catalog does not know it.
    fn single_detail(
        &self,
        id: &str,
        exclude_query: Option<&str>,
    ) -> Result<Option<CatalogRecipe>, CatalogError>;
}
