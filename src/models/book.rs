use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::enums::{BookStatus, Course};

/// A patient's recipe book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub status: BookStatus,
    pub created_at: NaiveDateTime,
}

/// Membership row: one recipe in one book, bucketed by course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookEntry {
    pub recipe_id: Uuid,
    pub external_id: String,
    pub course: Course,
    pub added_at: NaiveDateTime,
}
