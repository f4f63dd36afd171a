use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{Course, Diet};

/// Canonical recipe as stored locally.
///
/// `id` is the local identity; `external_id` is the catalog identity and the
/// upsert key. Nested catalog structures are decoded into typed fields once,
/// at the repository boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub id: Uuid,
    pub external_id: String,
    pub title: String,
    pub course: Course,
    pub categories: Vec<String>,
    pub allergen_tags: Vec<String>,
    pub diet_tags: Vec<Diet>,
    pub media: Vec<RecipeMedia>,
    pub ingredients: Vec<Ingredient>,
    pub steps: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipeMedia {
    pub url: String,
    #[serde(default)]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ingredient {
    pub name: String,
    #[serde(default)]
    pub quantity: Option<String>,
}

impl Recipe {
    /// All identifiers this recipe may be referred to by (local and catalog).
    pub fn identifiers(&self) -> [String; 2] {
        [self.id.to_string(), self.external_id.clone()]
    }
}
