//! Shared wiring for the curation components.
//!
//! `CurationEngine` owns the catalog client and the per-book lock table so
//! every orchestrator and paginator built from it shares them.

use std::sync::Arc;

use crate::catalog::{CatalogClient, CatalogError, HttpCatalogClient, RetryingCatalog};
use crate::config::CurationConfig;
use crate::curation::{
    AvailabilityPaginator, BookFinalizer, BookLocks, CourseSampler, QuotaAllocator,
    RecipeAssignmentOrchestrator,
};

pub struct CurationEngine {
    config: CurationConfig,
    catalog: Arc<dyn CatalogClient>,
    book_locks: Arc<BookLocks>,
}

impl CurationEngine {
    /// Engine talking to the HTTP catalog named in `config`, with retries.
    pub fn from_config(config: CurationConfig) -> Result<Self, CatalogError> {
        let http = HttpCatalogClient::from_config(&config)?;
        let catalog = RetryingCatalog::from_config(http, &config);
        tracing::info!(
            catalog_url = %config.catalog_url,
            language = %config.catalog_language,
            retries = config.catalog_retries,
            "Curation engine ready"
        );
        Ok(Self::with_catalog(config, Arc::new(catalog)))
    }

    pub fn with_catalog(config: CurationConfig, catalog: Arc<dyn CatalogClient>) -> Self {
        Self {
            config,
            catalog,
            book_locks: Arc::new(BookLocks::new()),
        }
    }

    pub fn config(&self) -> &CurationConfig {
        &self.config
    }

    pub fn catalog(&self) -> Arc<dyn CatalogClient> {
        Arc::clone(&self.catalog)
    }

    pub fn allocator(&self) -> QuotaAllocator {
        QuotaAllocator::new(Arc::clone(&self.book_locks))
    }

    pub fn sampler(&self) -> CourseSampler {
        CourseSampler::new(self.catalog(), self.config.catalog_language.clone())
    }

    pub fn orchestrator(&self, finalizer: Box<dyn BookFinalizer>) -> RecipeAssignmentOrchestrator {
        RecipeAssignmentOrchestrator::new(self.catalog(), self.sampler(), self.allocator(), finalizer)
    }

    pub fn paginator(&self) -> AvailabilityPaginator {
        AvailabilityPaginator::new(self.catalog(), self.config.catalog_language.clone())
    }

    /// Page size for browsing when the caller has no preference.
    pub fn page_size(&self) -> u32 {
        self.config.page_size
    }
}
