//! Wire-to-canonical adapter for catalog payloads.
//!
//! The catalog is inconsistent across endpoints: ids appear as `id`,
//! `recipe_id` or `external_id` (string or number), containers are arrays or
//! id-keyed objects, and nested blocks are strings, objects or arrays of
//! either. Each helper here accepts every observed variant.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use super::types::{CatalogRecipe, SearchPage};
use super::CatalogError;
use crate::models::{Diet, Ingredient, RecipeMedia};

/// Identifier fields in canonical priority order.
const ID_FIELDS: [&str; 3] = ["id", "recipe_id", "external_id"];

static NON_ALNUM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\p{Alphabetic}\p{N}]+").expect("static regex"));

/// Catalog tag form of a free-text name: lowercase, runs of anything that is
/// not a letter or digit folded to one `_`, no leading/trailing `_`.
pub fn tag_slug(name: &str) -> String {
    let lowered = name.trim().to_lowercase();
    NON_ALNUM.replace_all(&lowered, "_").trim_matches('_').to_string()
}

/// Normalize one recipe object.
pub fn normalize_recipe(value: &Value) -> Result<CatalogRecipe, CatalogError> {
    let obj = value
        .as_object()
        .ok_or_else(|| CatalogError::Malformed(format!("recipe is not an object: {}", kind_of(value))))?;

    let aliases = identifier_aliases(obj);
    let external_id = aliases.first().cloned().ok_or(CatalogError::MissingIdentifier)?;

    Ok(CatalogRecipe {
        external_id,
        aliases,
        title: first_text(obj, &["title", "name"]).unwrap_or_default(),
        categories: names_of(first_present(obj, &["categories", "category"])),
        allergens: optional_names(first_present(obj, &["allergens"])),
        diets: optional_names(first_present(obj, &["diets", "diet"])).map(|names| {
            names
                .iter()
                .filter_map(|name| {
                    let diet = Diet::parse_loose(name);
                    if diet.is_none() {
                        tracing::debug!(diet = %name, "Dropping unknown diet tag");
                    }
                    diet
                })
                .collect()
        }),
        media: media_of(first_present(obj, &["media", "images"])),
        ingredients: ingredients_of(first_present(obj, &["ingredients"])),
        steps: steps_of(first_present(obj, &["steps", "instructions"])),
    })
}

/// Normalize a list-or-map container of recipes. Items without an
/// identifier are skipped and logged.
pub fn normalize_recipe_list(value: &Value) -> Vec<CatalogRecipe> {
    let items: Vec<&Value> = match value {
        Value::Array(items) => items.iter().collect(),
        Value::Object(map) => map.values().collect(),
        Value::Null => Vec::new(),
        other => {
            tracing::warn!(kind = kind_of(other), "Unexpected recipe container in catalog payload");
            Vec::new()
        }
    };

    items
        .into_iter()
        .filter_map(|item| match normalize_recipe(item) {
            Ok(recipe) => Some(recipe),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unresolvable catalog item");
                None
            }
        })
        .collect()
}

/// Normalize a search response: `{recipes|results|hits: [...], total: {value} | n}`.
pub fn normalize_search_page(value: &Value) -> Result<SearchPage, CatalogError> {
    let obj = value
        .as_object()
        .ok_or_else(|| CatalogError::Malformed(format!("search response is {}", kind_of(value))))?;

    let recipes = normalize_recipe_list(first_present(obj, &["recipes", "results", "hits"]).unwrap_or(&Value::Null));

    let total = match obj.get("total") {
        Some(Value::Object(t)) => t.get("value").and_then(as_count),
        Some(other) => as_count(other),
        None => None,
    }
    .unwrap_or(recipes.len() as u64);

    Ok(SearchPage { recipes, total })
}

/// Normalize a batch detail response into a map keyed by every alias.
///
/// Accepts `{recipes: [...]}`, a bare array, or an id-keyed object whose
/// keys count as additional aliases.
pub fn normalize_detail_map(value: &Value) -> HashMap<String, CatalogRecipe> {
    let mut out = HashMap::new();

    let keyed: Vec<(Option<&String>, &Value)> = match value {
        Value::Object(map) if map.contains_key("recipes") => {
            let inner = &map["recipes"];
            match inner {
                Value::Array(items) => items.iter().map(|v| (None, v)).collect(),
                Value::Object(m) => m.iter().map(|(k, v)| (Some(k), v)).collect(),
                _ => Vec::new(),
            }
        }
        Value::Object(map) => map.iter().map(|(k, v)| (Some(k), v)).collect(),
        Value::Array(items) => items.iter().map(|v| (None, v)).collect(),
        _ => Vec::new(),
    };

    for (key, item) in keyed {
        let mut recipe = match normalize_recipe(item) {
            Ok(recipe) => recipe,
            Err(CatalogError::MissingIdentifier) if key.is_some() => {
                // Id-keyed maps sometimes omit the id inside the value.
                let mut patched = item.clone();
                if let (Some(obj), Some(k)) = (patched.as_object_mut(), key) {
                    obj.insert("id".into(), Value::String(k.clone()));
                }
                match normalize_recipe(&patched) {
                    Ok(recipe) => recipe,
                    Err(e) => {
                        tracing::warn!(error = %e, "Skipping unresolvable detail item");
                        continue;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Skipping unresolvable detail item");
                continue;
            }
        };
        if let Some(k) = key {
            if !recipe.aliases.contains(k) {
                recipe.aliases.push(k.clone());
            }
        }
        for alias in recipe.aliases.clone() {
            out.insert(alias, recipe.clone());
        }
    }

    out
}

// ── Field helpers ────────────────────────────────────────

fn identifier_aliases(obj: &serde_json::Map<String, Value>) -> Vec<String> {
    let mut aliases: Vec<String> = Vec::new();
    for field in ID_FIELDS {
        let id = match obj.get(field) {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };
        if let Some(id) = id {
            if !aliases.contains(&id) {
                aliases.push(id);
            }
        }
    }
    aliases
}

fn first_present<'a>(obj: &'a serde_json::Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
}

fn first_text(obj: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<String> {
    first_present(obj, keys).and_then(text_of)
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(o) => ["name", "slug", "title", "label", "text", "description"]
            .iter()
            .filter_map(|k| o.get(*k))
            .find_map(text_of),
        _ => None,
    }
}

/// Names from a string, an object with a name, or an array of either.
fn names_of(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(text_of).collect(),
        Some(other) => text_of(other).into_iter().collect(),
        None => Vec::new(),
    }
}

/// Like `names_of`, but distinguishes "absent" (`None`) from "empty".
fn optional_names(value: Option<&Value>) -> Option<Vec<String>> {
    value.map(|v| names_of(Some(v)))
}

fn media_of(value: Option<&Value>) -> Vec<RecipeMedia> {
    let one = |v: &Value| -> Option<RecipeMedia> {
        match v {
            Value::String(url) if !url.trim().is_empty() => Some(RecipeMedia {
                url: url.trim().to_string(),
                kind: None,
            }),
            Value::Object(o) => {
                let url = ["url", "src", "href"]
                    .iter()
                    .filter_map(|k| o.get(*k))
                    .find_map(|u| u.as_str())
                    .filter(|u| !u.trim().is_empty())?;
                let kind = ["type", "kind"]
                    .iter()
                    .filter_map(|k| o.get(*k))
                    .find_map(|t| t.as_str())
                    .map(str::to_string);
                Some(RecipeMedia {
                    url: url.trim().to_string(),
                    kind,
                })
            }
            _ => None,
        }
    };

    match value {
        Some(Value::Array(items)) => items.iter().filter_map(one).collect(),
        Some(other) => one(other).into_iter().collect(),
        None => Vec::new(),
    }
}

fn ingredients_of(value: Option<&Value>) -> Vec<Ingredient> {
    let one = |v: &Value| -> Option<Ingredient> {
        match v {
            Value::Object(o) => {
                let name = ["name", "ingredient", "title"]
                    .iter()
                    .filter_map(|k| o.get(*k))
                    .find_map(text_of)?;
                let quantity = ["quantity", "amount"]
                    .iter()
                    .filter_map(|k| o.get(*k))
                    .find_map(text_of);
                Some(Ingredient { name, quantity })
            }
            other => text_of(other).map(|name| Ingredient { name, quantity: None }),
        }
    };

    match value {
        Some(Value::Array(items)) => items.iter().filter_map(one).collect(),
        Some(other) => one(other).into_iter().collect(),
        None => Vec::new(),
    }
}

fn steps_of(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(text)) => text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect(),
        other => names_of(other),
    }
}

fn as_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
