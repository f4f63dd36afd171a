//! Randomized per-course sampling from the catalog.

use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rusqlite::Connection;
use uuid::Uuid;

use super::query::SearchQueryBuilder;
use crate::catalog::{CatalogClient, SearchFilters, SearchRequest};
use crate::models::Course;

/// Ids drawn for one course, plus the population the catalog reported.
///
/// `total` is `None` when the catalog could not be reached; callers must not
/// overwrite a cached total in that case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleOutcome {
    pub ids: Vec<String>,
    pub total: Option<u64>,
}

pub struct CourseSampler {
    catalog: Arc<dyn CatalogClient>,
    language: String,
    rng: Mutex<StdRng>,
}

impl CourseSampler {
    pub fn new(catalog: Arc<dyn CatalogClient>, language: impl Into<String>) -> Self {
        Self {
            catalog,
            language: language.into(),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic sampler for tests and reproducible runs.
    pub fn with_seed(catalog: Arc<dyn CatalogClient>, language: impl Into<String>, seed: u64) -> Self {
        Self {
            catalog,
            language: language.into(),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Random offset in `0..=known_total - limit`, or 0 without a known total.
    pub fn pick_offset(&self, limit: u32, known_total: u64) -> u64 {
        if known_total == 0 {
            return 0;
        }
        let upper = known_total.saturating_sub(u64::from(limit));
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        rng.gen_range(0..=upper)
    }

    /// Sample one course for a patient, building the exclusion query from the
    /// allergen ledger. Never fails: any error yields an empty outcome.
    pub fn sample(
        &self,
        conn: &Connection,
        patient_id: &Uuid,
        course: Course,
        limit: u32,
        known_total: u64,
    ) -> SampleOutcome {
        match SearchQueryBuilder::new(conn).build(patient_id) {
            Ok(exclude_query) => self.sample_with_query(course, &exclude_query, limit, known_total),
            Err(e) => {
                tracing::warn!(
                    patient_id = %patient_id,
                    course = course.as_str(),
                    error = %e,
                    "Could not build exclusion query, no recipes this course"
                );
                SampleOutcome::default()
            }
        }
    }

    /// Sample with a pre-built exclusion query.
    pub fn sample_with_query(
        &self,
        course: Course,
        exclude_query: &str,
        limit: u32,
        known_total: u64,
    ) -> SampleOutcome {
        if limit == 0 {
            return SampleOutcome::default();
        }

        let offset = self.pick_offset(limit, known_total);
        let request = SearchRequest {
            language: self.language.clone(),
            filters: SearchFilters {
                course: Some(course),
                ..Default::default()
            },
            exclude_query: exclude_query.to_string(),
            limit,
            offset,
        };

        match self.catalog.search(&request) {
            Ok(page) => {
                let ids: Vec<String> = page
                    .recipes
                    .into_iter()
                    .map(|r| r.external_id)
                    .take(limit as usize)
                    .collect();
                tracing::debug!(
                    course = course.as_str(),
                    offset,
                    returned = ids.len(),
                    total = page.total,
                    "Sampled course"
                );
                SampleOutcome {
                    ids,
                    total: Some(page.total),
                }
            }
            Err(e) => {
                tracing::warn!(
                    course = course.as_str(),
                    offset,
                    error = %e,
                    "Catalog search failed, no recipes this course"
                );
                SampleOutcome::default()
            }
        }
    }
}
