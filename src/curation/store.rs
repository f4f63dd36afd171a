//! Persisting catalog recipes seen during runs and browsing.

use rusqlite::Connection;

use crate::catalog::CatalogRecipe;
use crate::db::repository::{find_recipe_by_alias, record_recipe_aliases, upsert_recipe, upsert_recipe_summary};
use crate::db::DatabaseError;
use crate::models::Recipe;

/// Store a catalog recipe and every identifier it arrived under.
///
/// A recipe already stored under any of the aliases is updated in place, even
/// when the catalog now leads with a different id. Summaries without allergen
/// or diet blocks never overwrite stored tags.
pub fn store_catalog_recipe(conn: &Connection, item: &CatalogRecipe) -> Result<Recipe, DatabaseError> {
    let mut recipe = item.to_recipe();
    for alias in &item.aliases {
        if let Some(existing) = find_recipe_by_alias(conn, alias)? {
            recipe.external_id = existing.external_id;
            break;
        }
    }

    let stored = if item.has_details() {
        upsert_recipe(conn, &recipe)?
    } else {
        upsert_recipe_summary(conn, &recipe)?
    };
    record_recipe_aliases(conn, &stored.id, &item.aliases)?;
    Ok(stored)
}
