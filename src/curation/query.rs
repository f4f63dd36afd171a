//! Exclusion-query rendering for catalog searches.
//!
//! Catalog grammar: whitespace = AND, `||` = OR, `--` prefix = NOT.
//! Allergens become `--allergen_pro_<slug>` tokens. Users type a simpler
//! grammar (`/` for OR, `-` for NOT) that is translated token by token.

use rusqlite::Connection;
use uuid::Uuid;

use crate::catalog::tag_slug;
use crate::db::repository::get_active_allergens;
use crate::db::DatabaseError;

const ALLERGEN_PREFIX: &str = "allergen_pro_";

/// Catalog token excluding one allergen, or `None` if the name has no usable characters.
pub fn allergen_token(name: &str) -> Option<String> {
    let slug = tag_slug(name);
    (!slug.is_empty()).then(|| format!("--{ALLERGEN_PREFIX}{slug}"))
}

/// Translate user search terms into catalog grammar.
///
/// `a b` → `a b`, `a/b` → `a || b`, `-a` → `--a`, `-a/b` → `--a --b`.
/// Tokens that do not parse (`-` alone, empty alternatives such as `a//b`)
/// are passed through as typed.
pub fn translate_terms(terms: &str) -> String {
    terms
        .split_whitespace()
        .map(translate_token)
        .collect::<Vec<_>>()
        .join(" ")
}

fn translate_token(token: &str) -> String {
    let (negated, body) = match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token),
    };
    if body.is_empty() || body.starts_with('-') {
        return token.to_string();
    }

    let alternatives: Vec<&str> = body.split('/').collect();
    if alternatives.iter().any(|alt| alt.is_empty()) {
        return token.to_string();
    }

    match (negated, alternatives.len()) {
        (false, 1) => body.to_string(),
        (true, 1) => format!("--{body}"),
        (false, _) => alternatives.join(" || "),
        // NOT (a OR b) == NOT a AND NOT b
        (true, _) => alternatives
            .iter()
            .map(|alt| format!("--{alt}"))
            .collect::<Vec<_>>()
            .join(" "),
    }
}

/// Renders a patient's allergen set, plus optional user terms, into an
/// exclusion query.
pub struct SearchQueryBuilder<'a> {
    conn: &'a Connection,
}

impl<'a> SearchQueryBuilder<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Allergen exclusions only; `""` when the patient has no active allergens.
    pub fn build(&self, patient_id: &Uuid) -> Result<String, DatabaseError> {
        let mut tokens: Vec<String> = get_active_allergens(self.conn, patient_id)?
            .iter()
            .filter_map(|a| allergen_token(&a.name).or_else(|| allergen_token(&a.code)))
            .collect();
        tokens.sort();
        tokens.dedup();
        Ok(tokens.join(" "))
    }

    pub fn build_with_terms(&self, patient_id: &Uuid, terms: Option<&str>) -> Result<String, DatabaseError> {
        let allergens = self.build(patient_id)?;
        let user = terms.map(translate_terms).unwrap_or_default();
        Ok(match (allergens.is_empty(), user.is_empty()) {
            (_, true) => allergens,
            (true, false) => user,
            (false, false) => format!("{allergens} {user}"),
        })
    }
}
