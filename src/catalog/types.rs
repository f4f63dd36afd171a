use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Course, Diet, Ingredient, Recipe, RecipeMedia};

/// Search filters understood by the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchFilters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub course: Option<Course>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diet: Option<Diet>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allergen: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    /// Maximum total preparation time in minutes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_time: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchRequest {
    pub language: String,
    pub filters: SearchFilters,
    /// Exclusion query in catalog grammar; empty means no exclusions.
    pub exclude_query: String,
    pub limit: u32,
    pub offset: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchPage {
    pub recipes: Vec<CatalogRecipe>,
    /// Catalog-reported total hit count for the query (not the page).
    pub total: u64,
}

/// Canonical catalog recipe after normalization.
///
/// `allergens`/`diets` are `None` when the payload omitted them (search
/// summaries often do); `Some(vec![])` means the catalog reported none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogRecipe {
    pub external_id: String,
    /// Every identifier the catalog used for this recipe, canonical id first.
    pub aliases: Vec<String>,
    pub title: String,
    pub categories: Vec<String>,
    pub allergens: Option<Vec<String>>,
    pub diets: Option<Vec<Diet>>,
    pub media: Vec<RecipeMedia>,
    pub ingredients: Vec<Ingredient>,
    pub steps: Vec<String>,
}

impl CatalogRecipe {
    pub fn course(&self) -> Course {
        Course::from_categories(&self.categories)
    }

    /// True when the nested detail blocks needed for display are present.
    pub fn has_details(&self) -> bool {
        self.allergens.is_some() && self.diets.is_some()
    }

    /// Whether any alias of this recipe is in `ids`.
    pub fn is_any_of(&self, ids: &HashSet<String>) -> bool {
        self.aliases.iter().any(|alias| ids.contains(alias))
    }

    /// Fill fields missing here from a detail payload of the same recipe.
    pub fn merge_details(&mut self, detail: CatalogRecipe) {
        if self.allergens.is_none() {
            self.allergens = detail.allergens;
        }
        if self.diets.is_none() {
            self.diets = detail.diets;
        }
        if self.title.is_empty() {
            self.title = detail.title;
        }
        if self.categories.is_empty() {
            self.categories = detail.categories;
        }
        if self.media.is_empty() {
            self.media = detail.media;
        }
        if self.ingredients.is_empty() {
            self.ingredients = detail.ingredients;
        }
        if self.steps.is_empty() {
            self.steps = detail.steps;
        }
        for alias in detail.aliases {
            if !self.aliases.contains(&alias) {
                self.aliases.push(alias);
            }
        }
    }

    /// Local recipe value; the id is a fresh candidate, replaced on upsert if
    /// the recipe is already stored.
    pub fn to_recipe(&self) -> Recipe {
        Recipe {
            id: Uuid::new_v4(),
            external_id: self.external_id.clone(),
            title: self.title.clone(),
            course: self.course(),
            categories: self.categories.clone(),
            allergen_tags: self.allergens.clone().unwrap_or_default(),
            diet_tags: self.diets.clone().unwrap_or_default(),
            media: self.media.clone(),
            ingredients: self.ingredients.clone(),
            steps: self.steps.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(id: &str) -> CatalogRecipe {
        CatalogRecipe {
            external_id: id.into(),
            aliases: vec![id.into()],
            title: "Leek soup".into(),
            categories: vec!["starter".into()],
            allergens: None,
            diets: None,
            media: vec![],
            ingredients: vec![],
            steps: vec![],
        }
    }

    #[test]
    fn merge_fills_only_missing_fields() {
        let mut item = summary("77");
        let mut detail = summary("77");
        detail.aliases.push("leek-soup".into());
        detail.title = "Other title".into();
        detail.allergens = Some(vec!["Celery".into()]);
        detail.diets = Some(vec![Diet::Vegan]);
        detail.steps = vec!["Simmer.".into()];

        item.merge_details(detail);
        assert_eq!(item.title, "Leek soup");
        assert!(item.has_details());
        assert_eq!(item.steps, vec!["Simmer."]);
        assert_eq!(item.aliases, vec!["77", "leek-soup"]);
    }

    #[test]
    fn alias_membership() {
        let mut item = summary("77");
        item.aliases.push("leek-soup".into());
        let ids: HashSet<String> = ["leek-soup".to_string()].into();
        assert!(item.is_any_of(&ids));
        assert!(!summary("78").is_any_of(&ids));
    }

    #[test]
    fn to_recipe_derives_course() {
        let recipe = summary("77").to_recipe();
        assert_eq!(recipe.course, Course::Starter);
        assert!(recipe.allergen_tags.is_empty());
    }
}
