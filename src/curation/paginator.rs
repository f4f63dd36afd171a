//! "Available recipes" stream for interactive browsing.
//!
//! The caller owns a `BrowseSession` and passes it back on every call. Three
//! collections are excluded from the stream: the patient's book, their
//! favorites, and whatever this session already delivered. Book and favorites
//! are re-read on every call since other actions can change them between
//! pages. Browsing never touches the cached recipe totals.

use std::collections::HashSet;
use std::sync::Arc;

use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use super::error::CurationError;
use super::query::SearchQueryBuilder;
use super::store::store_catalog_recipe;
use crate::catalog::{CatalogClient, CatalogRecipe, SearchFilters, SearchRequest};
use crate::db::repository::{
    find_draft_book, find_recipe_by_alias, get_book, get_book_entries, get_patient, get_recipe,
    get_recipe_aliases,
};
use crate::db::DatabaseError;
use crate::models::Recipe;

/// Filter set of a browsing session. Any change starts a new stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct BrowseFilters {
    pub search: SearchFilters,
    /// Free-text terms in user grammar (`/` = OR, `-` = NOT).
    pub terms: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BrowseSession {
    patient_id: Uuid,
    book_id: Option<Uuid>,
    filters: Option<BrowseFilters>,
    delivered: Vec<String>,
    delivered_aliases: HashSet<String>,
    total: Option<u64>,
    exhausted: bool,
}

impl BrowseSession {
    /// Session over the patient's current draft book, if any.
    pub fn new(patient_id: Uuid) -> Self {
        Self {
            patient_id,
            book_id: None,
            filters: None,
            delivered: Vec::new(),
            delivered_aliases: HashSet::new(),
            total: None,
            exhausted: false,
        }
    }

    /// Session pinned to a specific book.
    pub fn for_book(patient_id: Uuid, book_id: Uuid) -> Self {
        Self {
            book_id: Some(book_id),
            ..Self::new(patient_id)
        }
    }

    pub fn patient_id(&self) -> Uuid {
        self.patient_id
    }

    /// Catalog ids delivered since the last filter change, in order.
    pub fn delivered(&self) -> &[String] {
        &self.delivered
    }

    pub fn total(&self) -> Option<u64> {
        self.total
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    fn reset(&mut self, filters: &BrowseFilters) {
        self.filters = Some(filters.clone());
        self.delivered.clear();
        self.delivered_aliases.clear();
        self.total = None;
        self.exhausted = false;
    }

    fn record(&mut self, item: &CatalogRecipe, stored: &Recipe) {
        self.delivered.push(item.external_id.clone());
        self.delivered_aliases.extend(item.aliases.iter().cloned());
        self.delivered_aliases.extend(stored.identifiers());
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AvailablePage {
    pub items: Vec<Recipe>,
    pub exhausted: bool,
    /// Catalog-reported total for the current filters, once known.
    pub total: Option<u64>,
}

pub struct AvailabilityPaginator {
    catalog: Arc<dyn CatalogClient>,
    language: String,
}

impl AvailabilityPaginator {
    pub fn new(catalog: Arc<dyn CatalogClient>, language: impl Into<String>) -> Self {
        Self {
            catalog,
            language: language.into(),
        }
    }

    pub fn next_page(
        &self,
        conn: &Connection,
        session: &mut BrowseSession,
        filters: &BrowseFilters,
        page_size: u32,
    ) -> Result<AvailablePage, CurationError> {
        if session.filters.as_ref() != Some(filters) {
            if session.filters.is_some() {
                tracing::debug!(patient_id = %session.patient_id, "Browse filters changed, restarting stream");
            }
            session.reset(filters);
        }

        let patient = get_patient(conn, &session.patient_id)?
            .ok_or_else(|| CurationError::missing("patient", session.patient_id))?;
        let book = match session.book_id {
            Some(book_id) => Some(get_book(conn, &book_id)?.ok_or_else(|| CurationError::missing("book", book_id))?),
            None => find_draft_book(conn, &patient.id)?,
        };

        if session.exhausted {
            return Ok(AvailablePage {
                items: Vec::new(),
                exhausted: true,
                total: session.total,
            });
        }

        let book_entries = match &book {
            Some(book) => get_book_entries(conn, &book.id)?,
            None => Vec::new(),
        };
        let favorites = &patient.settings.favorites;

        let mut exclusions: HashSet<String> = session.delivered_aliases.clone();
        for entry in &book_entries {
            exclusions.insert(entry.recipe_id.to_string());
            exclusions.insert(entry.external_id.clone());
            exclusions.extend(get_recipe_aliases(conn, &entry.recipe_id)?);
        }
        for favorite in favorites {
            exclusions.insert(favorite.clone());
            if let Some(recipe) = resolve_favorite(conn, favorite)? {
                exclusions.extend(recipe.identifiers());
                exclusions.extend(get_recipe_aliases(conn, &recipe.id)?);
            }
        }

        let offset = (book_entries.len() + favorites.len() + session.delivered.len()) as u64;
        let exclude_query = SearchQueryBuilder::new(conn).build_with_terms(&patient.id, filters.terms.as_deref())?;

        let request = SearchRequest {
            language: self.language.clone(),
            filters: filters.search.clone(),
            exclude_query: exclude_query.clone(),
            limit: page_size,
            offset,
        };
        let page = match self.catalog.search(&request) {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(
                    patient_id = %patient.id,
                    offset,
                    error = %e,
                    "Catalog search failed, returning empty page"
                );
                return Ok(AvailablePage {
                    items: Vec::new(),
                    exhausted: false,
                    total: session.total,
                });
            }
        };
        session.total = Some(page.total);
        let catalog_returned = page.recipes.len();

        let mut items: Vec<CatalogRecipe> = Vec::new();
        for item in page.recipes {
            if item.is_any_of(&exclusions) {
                continue;
            }
            exclusions.extend(item.aliases.iter().cloned());
            items.push(item);
        }

        self.backfill(&mut items, &exclude_query);

        let mut delivered = Vec::with_capacity(items.len());
        for item in &items {
            let stored = store_catalog_recipe(conn, item)?;
            session.record(item, &stored);
            delivered.push(stored);
        }

        session.exhausted = catalog_returned == 0 || session.delivered.len() as u64 >= page.total;
        tracing::debug!(
            patient_id = %patient.id,
            offset,
            returned = catalog_returned,
            delivered = delivered.len(),
            total = page.total,
            exhausted = session.exhausted,
            "Served available page"
        );

        Ok(AvailablePage {
            items: delivered,
            exhausted: session.exhausted,
            total: session.total,
        })
    }

    /// Fill missing allergen/diet blocks with one batch detail call.
    fn backfill(&self, items: &mut [CatalogRecipe], exclude_query: &str) {
        let missing: Vec<String> = items
            .iter()
            .filter(|item| !item.has_details())
            .map(|item| item.external_id.clone())
            .collect();
        if missing.is_empty() {
            return;
        }

        let exclude = (!exclude_query.is_empty()).then_some(exclude_query);
        match self.catalog.batch_details(&missing, exclude) {
            Ok(mut details) => {
                for item in items.iter_mut().filter(|item| !item.has_details()) {
                    if let Some(detail) = details.remove(&item.external_id) {
                        item.merge_details(detail);
                    }
                }
            }
            Err(e) => {
                tracing::warn!(missing = missing.len(), error = %e, "Detail backfill failed, serving summaries");
            }
        }
    }
}

/// A favorite may hold a local recipe id or any catalog id.
fn resolve_favorite(conn: &Connection, favorite: &str) -> Result<Option<Recipe>, DatabaseError> {
    if let Ok(local_id) = Uuid::parse_str(favorite) {
        if let Some(recipe) = get_recipe(conn, &local_id)? {
            return Ok(Some(recipe));
        }
    }
    find_recipe_by_alias(conn, favorite)
}
