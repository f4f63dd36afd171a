use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::parse_uuid;
use crate::db::DatabaseError;
use crate::models::*;

/// Get or create an allergen by code.
///
/// Concurrent first sightings of the same code converge on one row: the insert
/// is a no-op on conflict and the subsequent select returns the winner.
pub fn upsert_allergen(conn: &Connection, code: &str, name: &str) -> Result<Allergen, DatabaseError> {
    conn.execute(
        "INSERT INTO allergens (id, code, name) VALUES (?1, ?2, ?3)
         ON CONFLICT(code) DO NOTHING",
        params![Uuid::new_v4().to_string(), code, name],
    )?;

    get_allergen_by_code(conn, code)?.ok_or_else(|| DatabaseError::NotFound {
        entity_type: "Allergen".into(),
        id: code.into(),
    })
}

pub fn get_allergen_by_code(conn: &Connection, code: &str) -> Result<Option<Allergen>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, code, name FROM allergens WHERE code = ?1",
            params![code],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            },
        )
        .optional()?;

    row.map(|(id, code, name)| {
        Ok(Allergen {
            id: parse_uuid(&id)?,
            code,
            name,
        })
    })
    .transpose()
}

pub fn get_allergen_link(
    conn: &Connection,
    patient_id: &Uuid,
    allergen_id: &Uuid,
) -> Result<Option<PatientAllergenLink>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT active, last_decision_at, updated_at FROM patient_allergens
             WHERE patient_id = ?1 AND allergen_id = ?2",
            params![patient_id.to_string(), allergen_id.to_string()],
            |row| {
                Ok((
                    row.get::<_, i32>(0)?,
                    row.get::<_, NaiveDate>(1)?,
                    row.get::<_, NaiveDateTime>(2)?,
                ))
            },
        )
        .optional()?;

    Ok(row.map(|(active, last_decision_at, updated_at)| PatientAllergenLink {
        patient_id: *patient_id,
        allergen_id: *allergen_id,
        active: active != 0,
        last_decision_at,
        updated_at,
    }))
}

/// Insert or overwrite the decision row for a (patient, allergen) pair.
pub fn write_allergen_link(conn: &Connection, link: &PatientAllergenLink) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO patient_allergens (patient_id, allergen_id, active, last_decision_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(patient_id, allergen_id) DO UPDATE SET
             active = excluded.active,
             last_decision_at = excluded.last_decision_at,
             updated_at = excluded.updated_at",
        params![
            link.patient_id.to_string(),
            link.allergen_id.to_string(),
            link.active as i32,
            link.last_decision_at,
            link.updated_at,
        ],
    )?;
    Ok(())
}

/// Allergens currently linked to a patient, ordered by name.
pub fn get_active_allergens(conn: &Connection, patient_id: &Uuid) -> Result<Vec<Allergen>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT a.id, a.code, a.name FROM allergens a
         JOIN patient_allergens pa ON pa.allergen_id = a.id
         WHERE pa.patient_id = ?1 AND pa.active = 1
         ORDER BY a.name, a.code",
    )?;

    let rows = stmt.query_map(params![patient_id.to_string()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut allergens = Vec::new();
    for row in rows {
        let (id, code, name) = row?;
        allergens.push(Allergen {
            id: parse_uuid(&id)?,
            code,
            name,
        });
    }
    Ok(allergens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::insert_patient;
    use crate::db::sqlite::open_memory_database;

    fn make_patient(conn: &Connection) -> Uuid {
        let patient = Patient {
            id: Uuid::new_v4(),
            lab_id: None,
            display_name: "Test Patient".into(),
            settings: PatientSettings::default(),
        };
        insert_patient(conn, &patient).unwrap();
        patient.id
    }

    #[test]
    fn upsert_allergen_is_idempotent() {
        let conn = open_memory_database().unwrap();
        let first = upsert_allergen(&conn, "f13", "Peanut").unwrap();
        let second = upsert_allergen(&conn, "f13", "Arachis").unwrap();
        assert_eq!(first.id, second.id);
        // Allergens are immutable once created.
        assert_eq!(second.name, "Peanut");
    }

    #[test]
    fn link_round_trip_and_overwrite() {
        let conn = open_memory_database().unwrap();
        let patient_id = make_patient(&conn);
        let allergen = upsert_allergen(&conn, "f1", "Egg white").unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let written = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap().and_hms_opt(9, 30, 0).unwrap();

        let mut link = PatientAllergenLink {
            patient_id,
            allergen_id: allergen.id,
            active: true,
            last_decision_at: date,
            updated_at: written,
        };
        write_allergen_link(&conn, &link).unwrap();
        assert_eq!(get_allergen_link(&conn, &patient_id, &allergen.id).unwrap(), Some(link.clone()));

        link.active = false;
        write_allergen_link(&conn, &link).unwrap();
        let stored = get_allergen_link(&conn, &patient_id, &allergen.id).unwrap().unwrap();
        assert!(!stored.active);
        assert!(get_active_allergens(&conn, &patient_id).unwrap().is_empty());
    }

    #[test]
    fn active_allergens_sorted_by_name() {
        let conn = open_memory_database().unwrap();
        let patient_id = make_patient(&conn);
        let now = chrono::Local::now().naive_local();
        for (code, name) in [("f2", "Milk"), ("f1", "Egg white")] {
            let allergen = upsert_allergen(&conn, code, name).unwrap();
            write_allergen_link(&conn, &PatientAllergenLink {
                patient_id,
                allergen_id: allergen.id,
                active: true,
                last_decision_at: now.date(),
                updated_at: now,
            })
            .unwrap();
        }
        let names: Vec<String> = get_active_allergens(&conn, &patient_id)
            .unwrap()
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, vec!["Egg white", "Milk"]);
    }
}
