use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use serde_json::Value;
use uuid::Uuid;

use super::{from_json, parse_uuid, to_json};
use crate::db::DatabaseError;
use crate::models::*;

pub fn insert_lab(conn: &Connection, lab: &Lab) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO labs (id, name, settings) VALUES (?1, ?2, ?3)",
        params![lab.id.to_string(), lab.name, to_json(&lab.settings, "labs.settings")?],
    )?;
    Ok(())
}

pub fn get_lab(conn: &Connection, id: &Uuid) -> Result<Option<Lab>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT name, settings FROM labs WHERE id = ?1",
            params![id.to_string()],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )
        .optional()?;

    row.map(|(name, settings)| {
        Ok(Lab {
            id: *id,
            name,
            settings: from_json(&settings, "labs.settings")?,
        })
    })
    .transpose()
}

pub fn insert_patient(conn: &Connection, patient: &Patient) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO patients (id, lab_id, display_name, settings) VALUES (?1, ?2, ?3, ?4)",
        params![
            patient.id.to_string(),
            patient.lab_id.map(|id| id.to_string()),
            patient.display_name,
            to_json(&patient.settings, "patients.settings")?,
        ],
    )?;
    Ok(())
}

pub fn get_patient(conn: &Connection, id: &Uuid) -> Result<Option<Patient>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT lab_id, display_name, settings FROM patients WHERE id = ?1",
            params![id.to_string()],
            |row| {
                Ok((
                    row.get::<_, Option<String>>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?;

    row.map(|(lab_id, display_name, settings)| {
        Ok(Patient {
            id: *id,
            lab_id: lab_id.as_deref().map(parse_uuid).transpose()?,
            display_name,
            settings: from_json(&settings, "patients.settings")?,
        })
    })
    .transpose()
}

/// Settings of the lab a patient belongs to, if any.
pub fn get_lab_settings_for_patient(
    conn: &Connection,
    patient: &Patient,
) -> Result<Option<LabSettings>, DatabaseError> {
    match patient.lab_id {
        Some(lab_id) => Ok(get_lab(conn, &lab_id)?.map(|lab| lab.settings)),
        None => Ok(None),
    }
}

// The settings blob is shared with the admin UI, so writes go through
// serde_json::Value to keep keys this crate does not model.
fn modify_patient_settings<F>(conn: &Connection, patient_id: &Uuid, edit: F) -> Result<(), DatabaseError>
where
    F: FnOnce(&mut serde_json::Map<String, Value>),
{
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

    let raw: Option<String> = tx
        .query_row(
            "SELECT settings FROM patients WHERE id = ?1",
            params![patient_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    let raw = raw.ok_or_else(|| DatabaseError::NotFound {
        entity_type: "Patient".into(),
        id: patient_id.to_string(),
    })?;

    let mut blob: Value = from_json(&raw, "patients.settings")?;
    if !blob.is_object() {
        blob = Value::Object(Default::default());
    }
    if let Some(map) = blob.as_object_mut() {
        edit(map);
    }

    tx.execute(
        "UPDATE patients SET settings = ?2 WHERE id = ?1",
        params![patient_id.to_string(), to_json(&blob, "patients.settings")?],
    )?;
    tx.commit()?;
    Ok(())
}

/// Record the catalog population for one course.
///
/// Only the assignment run calls this; interactive browsing must leave the
/// cached totals alone so sampling offsets stay stable between runs.
pub fn set_recipe_total(
    conn: &Connection,
    patient_id: &Uuid,
    course: Course,
    total: u64,
) -> Result<(), DatabaseError> {
    modify_patient_settings(conn, patient_id, |map| {
        let mut totals = match map.remove("recipe_totals") {
            Some(Value::Object(totals)) => totals,
            _ => serde_json::Map::new(),
        };
        totals.insert(course.as_str().to_string(), Value::from(total));
        map.insert("recipe_totals".to_string(), Value::Object(totals));
    })
}

/// Add a recipe id to the patient's favorites. Returns false if already present.
pub fn add_favorite(conn: &Connection, patient_id: &Uuid, recipe_id: &str) -> Result<bool, DatabaseError> {
    let mut added = false;
    modify_patient_settings(conn, patient_id, |map| {
        let mut items = match map.remove("favorites") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };
        if !items.iter().any(|v| favorite_matches(v, recipe_id)) {
            items.push(Value::from(recipe_id));
            added = true;
        }
        map.insert("favorites".to_string(), Value::Array(items));
    })?;
    Ok(added)
}

/// Remove a recipe id from the patient's favorites. Returns false if it was absent.
pub fn remove_favorite(conn: &Connection, patient_id: &Uuid, recipe_id: &str) -> Result<bool, DatabaseError> {
    let mut removed = false;
    modify_patient_settings(conn, patient_id, |map| {
        if let Some(Value::Array(items)) = map.get_mut("favorites") {
            let before = items.len();
            items.retain(|v| !favorite_matches(v, recipe_id));
            removed = items.len() != before;
        }
    })?;
    Ok(removed)
}

// Favorites written by older clients may hold numeric catalog ids.
fn favorite_matches(value: &Value, recipe_id: &str) -> bool {
    match value {
        Value::String(s) => s == recipe_id,
        Value::Number(n) => n.to_string() == recipe_id,
        _ => false,
    }
}
