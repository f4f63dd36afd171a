//! In-memory catalog for tests and offline runs.
//!
//! Holds raw JSON payloads so every response goes through the same
//! normalization as the HTTP client. Supports failure injection and records
//! the requests it served.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use serde_json::Value;

use super::normalize::{normalize_recipe, tag_slug};
use super::types::{CatalogRecipe, SearchPage, SearchRequest};
use super::{CatalogClient, CatalogError};

#[derive(Default)]
struct MockState {
    fail_remaining: u32,
    fail_status: Option<u16>,
    unavailable: bool,
    batch_timeout: bool,
    searches: Vec<SearchRequest>,
    batch_requests: Vec<Vec<String>>,
    detail_calls: u32,
}

/// Catalog backed by a list of raw recipe payloads.
pub struct MockCatalog {
    recipes: Mutex<Vec<Value>>,
    summaries_only: bool,
    state: Mutex<MockState>,
}

impl MockCatalog {
    pub fn new(recipes: Vec<Value>) -> Self {
        Self {
            recipes: Mutex::new(recipes),
            summaries_only: false,
            state: Mutex::new(MockState::default()),
        }
    }

    /// Strip allergen and diet blocks from search results, as the real
    /// catalog does for its summary listing.
    pub fn with_summaries_only(mut self) -> Self {
        self.summaries_only = true;
        self
    }

    pub fn push(&self, recipe: Value) {
        self.recipes.lock().unwrap_or_else(|e| e.into_inner()).push(recipe);
    }

    /// Fail the next `n` calls with a connection error.
    pub fn fail_next(&self, n: u32) {
        let mut state = self.lock_state();
        state.fail_remaining = n;
        state.fail_status = None;
    }

    /// Fail the next `n` calls with the given HTTP status.
    pub fn fail_next_with(&self, n: u32, status: u16) {
        let mut state = self.lock_state();
        state.fail_remaining = n;
        state.fail_status = Some(status);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock_state().unavailable = unavailable;
    }

    /// Make batch detail calls time out while search keeps working.
    pub fn set_batch_timeout(&self, timeout: bool) {
        self.lock_state().batch_timeout = timeout;
    }

    pub fn search_calls(&self) -> usize {
        self.lock_state().searches.len()
    }

    pub fn searches(&self) -> Vec<SearchRequest> {
        self.lock_state().searches.clone()
    }

    pub fn batch_calls(&self) -> usize {
        self.lock_state().batch_requests.len()
    }

    pub fn batch_requests(&self) -> Vec<Vec<String>> {
        self.lock_state().batch_requests.clone()
    }

    pub fn detail_calls(&self) -> u32 {
        self.lock_state().detail_calls
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn injected_failure(&self) -> Option<CatalogError> {
        let mut state = self.lock_state();
        if state.unavailable {
            return Some(CatalogError::Connection("mock://catalog".into()));
        }
        if state.fail_remaining == 0 {
            return None;
        }
        state.fail_remaining -= 1;
        Some(match state.fail_status {
            Some(status) => CatalogError::Status {
                status,
                body: "injected".into(),
            },
            None => CatalogError::Connection("mock://catalog".into()),
        })
    }

    fn all_recipes(&self) -> Vec<(Value, CatalogRecipe)> {
        self.recipes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter_map(|raw| normalize_recipe(raw).ok().map(|r| (raw.clone(), r)))
            .collect()
    }
}

/// Exclusions understood by the mock: `--allergen_pro_<slug>` drops recipes
/// carrying that allergen, any other `--<term>` drops recipes whose title or
/// ingredients mention it. Positive terms and `||` are not evaluated.
fn excluded_by(recipe: &CatalogRecipe, exclude_query: &str) -> bool {
    let allergen_slugs: HashSet<String> = recipe
        .allergens
        .iter()
        .flatten()
        .map(|a| tag_slug(a))
        .collect();
    let text = tag_slug(&format!(
        "{} {}",
        recipe.title,
        recipe
            .ingredients
            .iter()
            .map(|i| i.name.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    ));

    exclude_query.split_whitespace().any(|token| {
        let Some(term) = token.strip_prefix("--") else {
            return false;
        };
        match term.strip_prefix("allergen_pro_") {
            Some(slug) => allergen_slugs.contains(slug),
            None => !term.is_empty() && text.contains(&tag_slug(term)),
        }
    })
}

fn matches_filters(recipe: &CatalogRecipe, request: &SearchRequest) -> bool {
    let f = &request.filters;
    if let Some(course) = f.course {
        if recipe.course() != course {
            return false;
        }
    }
    if let Some(diet) = f.diet {
        if !recipe.diets.iter().flatten().any(|d| *d == diet) {
            return false;
        }
    }
    if let Some(category) = &f.category {
        let wanted = tag_slug(category);
        if !recipe.categories.iter().any(|c| tag_slug(c) == wanted) {
            return false;
        }
    }
    if let Some(allergen) = &f.allergen {
        // The catalog's allergen filter means "free from".
        let slug = tag_slug(allergen);
        if recipe.allergens.iter().flatten().any(|a| tag_slug(a) == slug) {
            return false;
        }
    }
    true
}

fn strip_details(raw: &Value) -> Value {
    let mut summary = raw.clone();
    if let Some(obj) = summary.as_object_mut() {
        obj.remove("allergens");
        obj.remove("diets");
        obj.remove("diet");
    }
    summary
}

impl CatalogClient for MockCatalog {
    fn search(&self, request: &SearchRequest) -> Result<SearchPage, CatalogError> {
        self.lock_state().searches.push(request.clone());
        if let Some(e) = self.injected_failure() {
            return Err(e);
        }

        let hits: Vec<(Value, CatalogRecipe)> = self
            .all_recipes()
            .into_iter()
            .filter(|(_, r)| matches_filters(r, request) && !excluded_by(r, &request.exclude_query))
            .collect();

        let total = hits.len() as u64;
        let recipes = hits
            .into_iter()
            .skip(request.offset as usize)
            .take(request.limit as usize)
            .filter_map(|(raw, recipe)| {
                if self.summaries_only {
                    normalize_recipe(&strip_details(&raw)).ok()
                } else {
                    Some(recipe)
                }
            })
            .collect();

        Ok(SearchPage { recipes, total })
    }

    fn batch_details(
        &self,
        ids: &[String],
        exclude_query: Option<&str>,
    ) -> Result<HashMap<String, CatalogRecipe>, CatalogError> {
        {
            let mut state = self.lock_state();
            state.batch_requests.push(ids.to_vec());
            if state.batch_timeout {
                return Err(CatalogError::Timeout(30));
            }
        }
        if let Some(e) = self.injected_failure() {
            return Err(e);
        }

        let wanted: HashSet<String> = ids.iter().cloned().collect();
        let mut out = HashMap::new();
        for (_, recipe) in self.all_recipes() {
            if !recipe.is_any_of(&wanted) {
                continue;
            }
            if exclude_query.is_some_and(|q| excluded_by(&recipe, q)) {
                continue;
            }
            for alias in &recipe.aliases {
                out.insert(alias.clone(), recipe.clone());
            }
        }
        Ok(out)
    }

    fn single_detail(
        &self,
        id: &str,
        exclude_query: Option<&str>,
    ) -> Result<Option<CatalogRecipe>, CatalogError> {
        self.lock_state().detail_calls += 1;
        if let Some(e) = self.injected_failure() {
            return Err(e);
        }

        Ok(self
            .all_recipes()
            .into_iter()
            .map(|(_, r)| r)
            .find(|r| r.aliases.iter().any(|a| a == id))
            .filter(|r| !exclude_query.is_some_and(|q| excluded_by(r, q))))
    }
}
