use std::str::FromStr;

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{from_json, parse_uuid, to_json};
use crate::db::DatabaseError;
use crate::models::*;

const RECIPE_COLUMNS: &str =
    "id, external_id, title, course, categories, allergens, diets, media, ingredients, steps";

/// Insert or refresh a recipe keyed by its catalog id.
///
/// Returns the stored recipe: on conflict the existing local id is kept and
/// `recipe.id` is ignored.
pub fn upsert_recipe(conn: &Connection, recipe: &Recipe) -> Result<Recipe, DatabaseError> {
    let stored_id: String = conn.query_row(
        "INSERT INTO recipes (id, external_id, title, course, categories, allergens, diets,
                              media, ingredients, steps, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(external_id) DO UPDATE SET
             title = excluded.title,
             course = excluded.course,
             categories = excluded.categories,
             allergens = excluded.allergens,
             diets = excluded.diets,
             media = excluded.media,
             ingredients = excluded.ingredients,
             steps = excluded.steps,
             updated_at = excluded.updated_at
         RETURNING id",
        params![
            recipe.id.to_string(),
            recipe.external_id,
            recipe.title,
            recipe.course.as_str(),
            to_json(&recipe.categories, "recipes.categories")?,
            to_json(&recipe.allergen_tags, "recipes.allergens")?,
            to_json(&recipe.diet_tags, "recipes.diets")?,
            to_json(&recipe.media, "recipes.media")?,
            to_json(&recipe.ingredients, "recipes.ingredients")?,
            to_json(&recipe.steps, "recipes.steps")?,
            chrono::Local::now().naive_local(),
        ],
        |row| row.get(0),
    )?;

    Ok(Recipe {
        id: parse_uuid(&stored_id)?,
        ..recipe.clone()
    })
}

/// Store a search summary that lacks allergen and diet blocks.
///
/// A new recipe is inserted with empty tags. An existing one keeps its stored
/// tags, and any other field the summary left empty keeps its stored value.
pub fn upsert_recipe_summary(conn: &Connection, recipe: &Recipe) -> Result<Recipe, DatabaseError> {
    let sql = format!(
        "INSERT INTO recipes (id, external_id, title, course, categories, allergens, diets,
                              media, ingredients, steps, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, '[]', '[]', ?6, ?7, ?8, ?9)
         ON CONFLICT(external_id) DO UPDATE SET
             title = CASE WHEN excluded.title = '' THEN recipes.title ELSE excluded.title END,
             course = CASE WHEN excluded.categories = '[]' THEN recipes.course ELSE excluded.course END,
             categories = CASE WHEN excluded.categories = '[]' THEN recipes.categories ELSE excluded.categories END,
             media = CASE WHEN excluded.media = '[]' THEN recipes.media ELSE excluded.media END,
             ingredients = CASE WHEN excluded.ingredients = '[]' THEN recipes.ingredients ELSE excluded.ingredients END,
             steps = CASE WHEN excluded.steps = '[]' THEN recipes.steps ELSE excluded.steps END,
             updated_at = excluded.updated_at
         RETURNING {RECIPE_COLUMNS}"
    );
    let row = conn.query_row(
        &sql,
        params![
            recipe.id.to_string(),
            recipe.external_id,
            recipe.title,
            recipe.course.as_str(),
            to_json(&recipe.categories, "recipes.categories")?,
            to_json(&recipe.media, "recipes.media")?,
            to_json(&recipe.ingredients, "recipes.ingredients")?,
            to_json(&recipe.steps, "recipes.steps")?,
            chrono::Local::now().naive_local(),
        ],
        recipe_row_from_rusqlite,
    )?;
    recipe_from_row(row)
}

/// Remember catalog identifiers a stored recipe was seen under.
pub fn record_recipe_aliases(conn: &Connection, recipe_id: &Uuid, aliases: &[String]) -> Result<(), DatabaseError> {
    let mut stmt = conn.prepare(
        "INSERT INTO recipe_aliases (alias, recipe_id) VALUES (?1, ?2)
         ON CONFLICT(alias) DO UPDATE SET recipe_id = excluded.recipe_id",
    )?;
    for alias in aliases.iter().filter(|a| !a.is_empty()) {
        stmt.execute(params![alias, recipe_id.to_string()])?;
    }
    Ok(())
}

pub fn get_recipe_aliases(conn: &Connection, recipe_id: &Uuid) -> Result<Vec<String>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT alias FROM recipe_aliases WHERE recipe_id = ?1 ORDER BY alias")?;
    let rows = stmt.query_map(params![recipe_id.to_string()], |row| row.get(0))?;
    Ok(rows.collect::<Result<Vec<String>, _>>()?)
}

/// Look a recipe up by its catalog id or any recorded alias.
pub fn find_recipe_by_alias(conn: &Connection, alias: &str) -> Result<Option<Recipe>, DatabaseError> {
    if let Some(recipe) = get_recipe_by_external_id(conn, alias)? {
        return Ok(Some(recipe));
    }
    let sql = format!(
        "SELECT r.{} FROM recipes r
         JOIN recipe_aliases a ON a.recipe_id = r.id
         WHERE a.alias = ?1",
        RECIPE_COLUMNS.replace(", ", ", r.")
    );
    let row = conn
        .query_row(&sql, params![alias], recipe_row_from_rusqlite)
        .optional()?;
    row.map(recipe_from_row).transpose()
}

pub fn get_recipe(conn: &Connection, id: &Uuid) -> Result<Option<Recipe>, DatabaseError> {
    let sql = format!("SELECT {RECIPE_COLUMNS} FROM recipes WHERE id = ?1");
    let row = conn
        .query_row(&sql, params![id.to_string()], recipe_row_from_rusqlite)
        .optional()?;
    row.map(recipe_from_row).transpose()
}

pub fn get_recipe_by_external_id(conn: &Connection, external_id: &str) -> Result<Option<Recipe>, DatabaseError> {
    let sql = format!("SELECT {RECIPE_COLUMNS} FROM recipes WHERE external_id = ?1");
    let row = conn
        .query_row(&sql, params![external_id], recipe_row_from_rusqlite)
        .optional()?;
    row.map(recipe_from_row).transpose()
}

/// All recipes in a book, in insertion order.
pub fn get_book_recipes(conn: &Connection, book_id: &Uuid) -> Result<Vec<Recipe>, DatabaseError> {
    let sql = format!(
        "SELECT r.{} FROM recipes r
         JOIN book_recipes br ON br.recipe_id = r.id
         WHERE br.book_id = ?1
         ORDER BY br.added_at, r.external_id",
        RECIPE_COLUMNS.replace(", ", ", r.")
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![book_id.to_string()], recipe_row_from_rusqlite)?;

    let mut recipes = Vec::new();
    for row in rows {
        recipes.push(recipe_from_row(row?)?);
    }
    Ok(recipes)
}

// Internal row type for Recipe mapping
struct RecipeRow {
    id: String,
    external_id: String,
    title: String,
    course: String,
    categories: String,
    allergens: String,
    diets: String,
    media: String,
    ingredients: String,
    steps: String,
}

fn recipe_row_from_rusqlite(row: &rusqlite::Row<'_>) -> Result<RecipeRow, rusqlite::Error> {
    Ok(RecipeRow {
        id: row.get(0)?,
        external_id: row.get(1)?,
        title: row.get(2)?,
        course: row.get(3)?,
        categories: row.get(4)?,
        allergens: row.get(5)?,
        diets: row.get(6)?,
        media: row.get(7)?,
        ingredients: row.get(8)?,
        steps: row.get(9)?,
    })
}

fn recipe_from_row(row: RecipeRow) -> Result<Recipe, DatabaseError> {
    Ok(Recipe {
        id: parse_uuid(&row.id)?,
        external_id: row.external_id,
        title: row.title,
        course: Course::from_str(&row.course)?,
        categories: from_json(&row.categories, "recipes.categories")?,
        allergen_tags: from_json(&row.allergens, "recipes.allergens")?,
        diet_tags: from_json(&row.diets, "recipes.diets")?,
        media: from_json(&row.media, "recipes.media")?,
        ingredients: from_json(&row.ingredients, "recipes.ingredients")?,
        steps: from_json(&row.steps, "recipes.steps")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;

    fn sample_recipe(external_id: &str, title: &str) -> Recipe {
        Recipe {
            id: Uuid::new_v4(),
            external_id: external_id.into(),
            title: title.into(),
            course: Course::Dessert,
            categories: vec!["dessert".into()],
            allergen_tags: vec!["Milk".into()],
            diet_tags: vec![Diet::Vegetarian],
            media: vec![RecipeMedia {
                url: "https://img.example.org/panna-cotta.jpg".into(),
                kind: Some("image".into()),
            }],
            ingredients: vec![Ingredient {
                name: "cream".into(),
                quantity: Some("400 ml".into()),
            }],
            steps: vec!["Warm the cream.".into(), "Chill overnight.".into()],
        }
    }

    #[test]
    fn upsert_inserts_then_updates_in_place() {
        let conn = open_memory_database().unwrap();
        let first = upsert_recipe(&conn, &sample_recipe("cat-9", "Panna cotta")).unwrap();

        let mut refreshed = sample_recipe("cat-9", "Vanilla panna cotta");
        refreshed.diet_tags = vec![Diet::Vegetarian, Diet::GlutenFree];
        let second = upsert_recipe(&conn, &refreshed).unwrap();

        assert_eq!(first.id, second.id);
        let stored = get_recipe_by_external_id(&conn, "cat-9").unwrap().unwrap();
        assert_eq!(stored.title, "Vanilla panna cotta");
        assert_eq!(stored.diet_tags, vec![Diet::Vegetarian, Diet::GlutenFree]);
        assert_eq!(stored.id, first.id);

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM recipes", [], |r| r.get(0)).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn nested_columns_decode_to_typed_values() {
        let conn = open_memory_database().unwrap();
        let stored = upsert_recipe(&conn, &sample_recipe("cat-1", "Panna cotta")).unwrap();
        let loaded = get_recipe(&conn, &stored.id).unwrap().unwrap();
        assert_eq!(loaded, stored);
    }

    #[test]
    fn summary_upsert_keeps_stored_tags() {
        let conn = open_memory_database().unwrap();
        let full = upsert_recipe(&conn, &sample_recipe("cat-3", "Panna cotta")).unwrap();

        let summary = Recipe {
            allergen_tags: vec![],
            diet_tags: vec![],
            categories: vec![],
            media: vec![],
            steps: vec![],
            title: "Panna cotta (summary)".into(),
            ..sample_recipe("cat-3", "")
        };
        let stored = upsert_recipe_summary(&conn, &summary).unwrap();

        assert_eq!(stored.id, full.id);
        assert_eq!(stored.title, "Panna cotta (summary)");
        assert_eq!(stored.allergen_tags, vec!["Milk"]);
        assert_eq!(stored.diet_tags, vec![Diet::Vegetarian]);
        assert_eq!(stored.course, Course::Dessert);
        assert_eq!(stored.steps.len(), 2);
        assert_eq!(get_recipe(&conn, &full.id).unwrap().unwrap(), stored);
    }

    #[test]
    fn summary_upsert_inserts_unknown_recipe_without_tags() {
        let conn = open_memory_database().unwrap();
        let stored = upsert_recipe_summary(&conn, &sample_recipe("cat-4", "Flan")).unwrap();
        assert!(stored.allergen_tags.is_empty());
        assert!(stored.diet_tags.is_empty());
        assert_eq!(stored.title, "Flan");
    }

    #[test]
    fn aliases_resolve_to_the_stored_recipe() {
        let conn = open_memory_database().unwrap();
        let stored = upsert_recipe(&conn, &sample_recipe("42", "Panna cotta")).unwrap();
        record_recipe_aliases(&conn, &stored.id, &["42".into(), "panna-cotta".into(), String::new()]).unwrap();
        record_recipe_aliases(&conn, &stored.id, &["panna-cotta".into()]).unwrap();

        assert_eq!(get_recipe_aliases(&conn, &stored.id).unwrap(), vec!["42", "panna-cotta"]);
        assert_eq!(find_recipe_by_alias(&conn, "panna-cotta").unwrap().unwrap().id, stored.id);
        assert_eq!(find_recipe_by_alias(&conn, "42").unwrap().unwrap().id, stored.id);
        assert!(find_recipe_by_alias(&conn, "43").unwrap().is_none());
    }

    #[test]
    fn corrupt_json_column_is_reported() {
        let conn = open_memory_database().unwrap();
        let stored = upsert_recipe(&conn, &sample_recipe("cat-2", "Panna cotta")).unwrap();
        conn.execute(
            "UPDATE recipes SET diets = 'not json' WHERE id = ?1",
            params![stored.id.to_string()],
        )
        .unwrap();
        let result = get_recipe(&conn, &stored.id);
        assert!(matches!(result, Err(DatabaseError::InvalidJson { .. })));
    }
}
