use std::str::FromStr;

use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::parse_uuid;
use crate::db::DatabaseError;
use crate::models::*;

pub fn insert_book(conn: &Connection, book: &Book) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO books (id, patient_id, status, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            book.id.to_string(),
            book.patient_id.to_string(),
            book.status.as_str(),
            book.created_at,
        ],
    )?;
    Ok(())
}

pub fn get_book(conn: &Connection, id: &Uuid) -> Result<Option<Book>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT patient_id, status, created_at FROM books WHERE id = ?1",
            params![id.to_string()],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, NaiveDateTime>(2)?,
                ))
            },
        )
        .optional()?;

    row.map(|(patient_id, status, created_at)| {
        Ok(Book {
            id: *id,
            patient_id: parse_uuid(&patient_id)?,
            status: BookStatus::from_str(&status)?,
            created_at,
        })
    })
    .transpose()
}

/// Most recent draft book of a patient.
pub fn find_draft_book(conn: &Connection, patient_id: &Uuid) -> Result<Option<Book>, DatabaseError> {
    let id: Option<String> = conn
        .query_row(
            "SELECT id FROM books WHERE patient_id = ?1 AND status = 'draft'
             ORDER BY created_at DESC LIMIT 1",
            params![patient_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;

    match id {
        Some(id) => get_book(conn, &parse_uuid(&id)?),
        None => Ok(None),
    }
}

/// Reuse the patient's draft book, or open a new one.
pub fn get_or_create_draft_book(conn: &Connection, patient_id: &Uuid) -> Result<Book, DatabaseError> {
    if let Some(book) = find_draft_book(conn, patient_id)? {
        return Ok(book);
    }

    let book = Book {
        id: Uuid::new_v4(),
        patient_id: *patient_id,
        status: BookStatus::Draft,
        created_at: chrono::Local::now().naive_local(),
    };
    insert_book(conn, &book)?;
    tracing::info!(book_id = %book.id, patient_id = %patient_id, "Opened new draft book");
    Ok(book)
}

pub fn set_book_status(conn: &Connection, book_id: &Uuid, status: BookStatus) -> Result<(), DatabaseError> {
    let updated = conn.execute(
        "UPDATE books SET status = ?2 WHERE id = ?1",
        params![book_id.to_string(), status.as_str()],
    )?;
    if updated == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "Book".into(),
            id: book_id.to_string(),
        });
    }
    Ok(())
}

/// Add a recipe to a book. Returns false if it was already a member.
pub fn insert_book_recipe(
    conn: &Connection,
    book_id: &Uuid,
    recipe_id: &Uuid,
    course: Course,
) -> Result<bool, DatabaseError> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO book_recipes (book_id, recipe_id, course, added_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            book_id.to_string(),
            recipe_id.to_string(),
            course.as_str(),
            chrono::Local::now().naive_local(),
        ],
    )?;
    Ok(inserted > 0)
}

/// Remove a recipe from a book. Returns false if it was not a member.
pub fn remove_book_recipe(conn: &Connection, book_id: &Uuid, recipe_id: &Uuid) -> Result<bool, DatabaseError> {
    let removed = conn.execute(
        "DELETE FROM book_recipes WHERE book_id = ?1 AND recipe_id = ?2",
        params![book_id.to_string(), recipe_id.to_string()],
    )?;
    Ok(removed > 0)
}

pub fn book_contains_recipe(conn: &Connection, book_id: &Uuid, recipe_id: &Uuid) -> Result<bool, DatabaseError> {
    let found: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM book_recipes WHERE book_id = ?1 AND recipe_id = ?2)",
        params![book_id.to_string(), recipe_id.to_string()],
        |row| row.get(0),
    )?;
    Ok(found != 0)
}

pub fn count_book_course(conn: &Connection, book_id: &Uuid, course: Course) -> Result<u32, DatabaseError> {
    let count: u32 = conn.query_row(
        "SELECT COUNT(*) FROM book_recipes WHERE book_id = ?1 AND course = ?2",
        params![book_id.to_string(), course.as_str()],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Membership rows with both identifiers of each recipe.
pub fn get_book_entries(conn: &Connection, book_id: &Uuid) -> Result<Vec<BookEntry>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT br.recipe_id, r.external_id, br.course, br.added_at
         FROM book_recipes br
         JOIN recipes r ON r.id = br.recipe_id
         WHERE br.book_id = ?1
         ORDER BY br.added_at, r.external_id",
    )?;

    let rows = stmt.query_map(params![book_id.to_string()], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, NaiveDateTime>(3)?,
        ))
    })?;

    let mut entries = Vec::new();
    for row in rows {
        let (recipe_id, external_id, course, added_at) = row?;
        entries.push(BookEntry {
            recipe_id: parse_uuid(&recipe_id)?,
            external_id,
            course: Course::from_str(&course)?,
            added_at,
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::{insert_patient, upsert_recipe};
    use crate::db::sqlite::open_memory_database;

    fn setup() -> (Connection, Uuid) {
        let conn = open_memory_database().unwrap();
        let patient = Patient {
            id: Uuid::new_v4(),
            lab_id: None,
            display_name: "Grace".into(),
            settings: PatientSettings::default(),
        };
        insert_patient(&conn, &patient).unwrap();
        (conn, patient.id)
    }

    fn stored_recipe(conn: &Connection, external_id: &str, course: Course) -> Recipe {
        upsert_recipe(conn, &Recipe {
            id: Uuid::new_v4(),
            external_id: external_id.into(),
            title: format!("Recipe {external_id}"),
            course,
            categories: vec![course.as_str().into()],
            allergen_tags: vec![],
            diet_tags: vec![],
            media: vec![],
            ingredients: vec![],
            steps: vec![],
        })
        .unwrap()
    }

    #[test]
    fn draft_book_is_reused() {
        let (conn, patient_id) = setup();
        let first = get_or_create_draft_book(&conn, &patient_id).unwrap();
        let second = get_or_create_draft_book(&conn, &patient_id).unwrap();
        assert_eq!(first.id, second.id);

        set_book_status(&conn, &first.id, BookStatus::Delivered).unwrap();
        let third = get_or_create_draft_book(&conn, &patient_id).unwrap();
        assert_ne!(third.id, first.id);
        assert_eq!(get_book(&conn, &first.id).unwrap().unwrap().status, BookStatus::Delivered);
    }

    #[test]
    fn membership_never_duplicates() {
        let (conn, patient_id) = setup();
        let book = get_or_create_draft_book(&conn, &patient_id).unwrap();
        let recipe = stored_recipe(&conn, "cat-1", Course::Starter);

        assert!(insert_book_recipe(&conn, &book.id, &recipe.id, Course::Starter).unwrap());
        assert!(!insert_book_recipe(&conn, &book.id, &recipe.id, Course::Starter).unwrap());
        assert_eq!(count_book_course(&conn, &book.id, Course::Starter).unwrap(), 1);
        assert!(book_contains_recipe(&conn, &book.id, &recipe.id).unwrap());

        let entries = get_book_entries(&conn, &book.id).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].external_id, "cat-1");

        assert!(remove_book_recipe(&conn, &book.id, &recipe.id).unwrap());
        assert!(!remove_book_recipe(&conn, &book.id, &recipe.id).unwrap());
        assert_eq!(count_book_course(&conn, &book.id, Course::Starter).unwrap(), 0);
    }

    #[test]
    fn status_update_on_missing_book_fails() {
        let (conn, _) = setup();
        let result = set_book_status(&conn, &Uuid::new_v4(), BookStatus::Ready);
        assert!(matches!(result, Err(DatabaseError::NotFound { .. })));
    }
}
