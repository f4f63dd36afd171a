use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use super::normalize::{normalize_detail_map, normalize_recipe, normalize_search_page};
use super::types::{CatalogRecipe, SearchPage, SearchRequest};
use super::{CatalogClient, CatalogError};
use crate::config::CurationConfig;

/// Blocking HTTP client for the external recipe catalog.
pub struct HttpCatalogClient {
    base_url: String,
    client: reqwest::blocking::Client,
    timeout_secs: u64,
}

impl HttpCatalogClient {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, CatalogError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("safeplate/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CatalogError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            timeout_secs,
        })
    }

    pub fn from_config(config: &CurationConfig) -> Result<Self, CatalogError> {
        Self::new(&config.catalog_url, config.catalog_timeout_secs)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn map_send_error(&self, e: reqwest::Error) -> CatalogError {
        if e.is_connect() {
            CatalogError::Connection(self.base_url.clone())
        } else if e.is_timeout() {
            CatalogError::Timeout(self.timeout_secs)
        } else {
            CatalogError::HttpClient(e.to_string())
        }
    }

    fn read_json(&self, response: reqwest::blocking::Response) -> Result<Value, CatalogError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(CatalogError::Status {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<Value>()
            .map_err(|e| CatalogError::Malformed(e.to_string()))
    }
}

/// Request body for POST /recipes/search
#[derive(Serialize)]
struct SearchBody<'a> {
    language: &'a str,
    #[serde(flatten)]
    filters: &'a super::types::SearchFilters,
    #[serde(skip_serializing_if = "is_blank")]
    exclude: &'a str,
    limit: u32,
    offset: u64,
}

fn is_blank(s: &&str) -> bool {
    s.trim().is_empty()
}

/// Request body for POST /recipes/batch
#[derive(Serialize)]
struct BatchBody<'a> {
    ids: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    exclude: Option<&'a str>,
}

impl CatalogClient for HttpCatalogClient {
    fn search(&self, request: &SearchRequest) -> Result<SearchPage, CatalogError> {
        let url = format!("{}/recipes/search", self.base_url);
        let body = SearchBody {
            language: &request.language,
            filters: &request.filters,
            exclude: &request.exclude_query,
            limit: request.limit,
            offset: request.offset,
        };

        tracing::debug!(
            offset = request.offset,
            limit = request.limit,
            course = ?request.filters.course,
            "Catalog search"
        );

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| self.map_send_error(e))?;

        normalize_search_page(&self.read_json(response)?)
    }

    fn batch_details(
        &self,
        ids: &[String],
        exclude_query: Option<&str>,
    ) -> Result<HashMap<String, CatalogRecipe>, CatalogError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let url = format!("{}/recipes/batch", self.base_url);
        let body = BatchBody {
            ids,
            exclude: exclude_query.filter(|q| !q.is_empty()),
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|e| self.map_send_error(e))?;

        Ok(normalize_detail_map(&self.read_json(response)?))
    }

    fn single_detail(
        &self,
        id: &str,
        exclude_query: Option<&str>,
    ) -> Result<Option<CatalogRecipe>, CatalogError> {
        let url = format!("{}/recipes/{}", self.base_url, id);
        let mut request = self.client.get(&url);
        if let Some(exclude) = exclude_query.filter(|q| !q.is_empty()) {
            request = request.query(&[("exclude", exclude)]);
        }

        let response = request.send().map_err(|e| self.map_send_error(e))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let payload = self.read_json(response)?;
        // Detail responses are either the recipe itself or wrapped in {"recipe": ...}.
        let recipe = payload.get("recipe").unwrap_or(&payload);
        normalize_recipe(recipe).map(Some)
    }
}
