//! Removal of book recipes that conflict with the patient's current allergens.

use std::collections::HashSet;

use rusqlite::Connection;
use uuid::Uuid;

use crate::catalog::tag_slug;
use crate::db::repository::{get_active_allergens, get_book_recipes, remove_book_recipe};
use crate::db::DatabaseError;
use crate::models::{Allergen, Recipe};

/// Slugs an allergen can appear under in recipe tags.
pub fn allergen_slugs(allergens: &[Allergen]) -> HashSet<String> {
    allergens
        .iter()
        .flat_map(|a| [tag_slug(&a.name), tag_slug(&a.code)])
        .filter(|s| !s.is_empty())
        .collect()
}

pub fn is_unsafe(recipe: &Recipe, slugs: &HashSet<String>) -> bool {
    recipe
        .allergen_tags
        .iter()
        .any(|tag| slugs.contains(&tag_slug(tag)))
}

/// Drop recipes that became unsafe since they were admitted. Returns the
/// removed recipes.
pub fn purge_unsafe_recipes(
    conn: &Connection,
    book_id: &Uuid,
    patient_id: &Uuid,
) -> Result<Vec<Recipe>, DatabaseError> {
    let slugs = allergen_slugs(&get_active_allergens(conn, patient_id)?);
    if slugs.is_empty() {
        return Ok(Vec::new());
    }

    let mut removed = Vec::new();
    for recipe in get_book_recipes(conn, book_id)? {
        if is_unsafe(&recipe, &slugs) && remove_book_recipe(conn, book_id, &recipe.id)? {
            tracing::info!(
                book_id = %book_id,
                recipe = %recipe.external_id,
                "Removed recipe conflicting with active allergens"
            );
            removed.push(recipe);
        }
    }
    Ok(removed)
}
