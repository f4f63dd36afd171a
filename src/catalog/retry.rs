use std::collections::HashMap;
use std::time::Duration;

use super::types::{CatalogRecipe, SearchPage, SearchRequest};
use super::{CatalogClient, CatalogError};
use crate::config::CurationConfig;

/// Wraps a catalog client with retry-and-backoff on transient failures.
///
/// Non-transient errors (4xx, malformed payloads) return immediately. Delay
/// doubles per attempt starting at `base_backoff`.
pub struct RetryingCatalog<C> {
    inner: C,
    max_retries: u32,
    base_backoff: Duration,
}

impl<C: CatalogClient> RetryingCatalog<C> {
    pub fn new(inner: C, max_retries: u32, base_backoff: Duration) -> Self {
        Self {
            inner,
            max_retries,
            base_backoff,
        }
    }

    pub fn from_config(inner: C, config: &CurationConfig) -> Self {
        Self::new(
            inner,
            config.catalog_retries,
            Duration::from_millis(config.retry_backoff_ms),
        )
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    fn with_retry<T>(
        &self,
        operation: &str,
        mut call: impl FnMut() -> Result<T, CatalogError>,
    ) -> Result<T, CatalogError> {
        let mut attempt = 0;
        loop {
            match call() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let delay = self.base_backoff.saturating_mul(1 << attempt.min(16));
                    attempt += 1;
                    tracing::warn!(
                        operation,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Catalog call failed, retrying"
                    );
                    if !delay.is_zero() {
                        std::thread::sleep(delay);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl<C: CatalogClient> CatalogClient for RetryingCatalog<C> {
    fn search(&self, request: &SearchRequest) -> Result<SearchPage, CatalogError> {
        self.with_retry("search", || self.inner.search(request))
    }

    fn batch_details(
        &self,
        ids: &[String],
        exclude_query: Option<&str>,
    ) -> Result<HashMap<String, CatalogRecipe>, CatalogError> {
        self.with_retry("batch_details", || self.inner.batch_details(ids, exclude_query))
    }

    fn single_detail(
        &self,
        id: &str,
        exclude_query: Option<&str>,
    ) -> Result<Option<CatalogRecipe>, CatalogError> {
        self.with_retry("single_detail", || self.inner.single_detail(id, exclude_query))
    }
}
