//! Per-course admission of recipes into a book.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::repository::{book_contains_recipe, count_book_course, insert_book_recipe};
use crate::db::DatabaseError;
use crate::models::{Course, CourseQuota, Recipe};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Admission {
    Admitted,
    AlreadyPresent,
    QuotaExceeded,
}

/// One mutex per book, shared by every allocator that may admit into it.
#[derive(Default)]
pub struct BookLocks {
    locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl BookLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, book_id: &Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(*book_id).or_default().clone()
    }

    /// Give back a handle from `lock_for`; the entry goes once nobody holds it.
    fn release(&self, book_id: &Uuid, handle: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        drop(handle);
        if locks.get(book_id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(book_id);
        }
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).is_empty()
    }
}

pub struct QuotaAllocator {
    locks: Arc<BookLocks>,
}

impl Default for QuotaAllocator {
    fn default() -> Self {
        Self::new(Arc::new(BookLocks::new()))
    }
}

impl QuotaAllocator {
    pub fn new(locks: Arc<BookLocks>) -> Self {
        Self { locks }
    }

    /// Course bucket of a recipe (starter > main_course > dessert, default main_course).
    pub fn course_of(recipe: &Recipe) -> Course {
        if recipe.categories.is_empty() {
            recipe.course
        } else {
            Course::from_categories(&recipe.categories)
        }
    }

    /// Whether `admit` would add the recipe now.
    pub fn can_admit(
        &self,
        conn: &Connection,
        book_id: &Uuid,
        quota: &CourseQuota,
        recipe: &Recipe,
    ) -> Result<bool, DatabaseError> {
        if book_contains_recipe(conn, book_id, &recipe.id)? {
            return Ok(false);
        }
        let course = Self::course_of(recipe);
        Ok(count_book_course(conn, book_id, course)? < quota.get(course))
    }

    /// Admit a stored recipe into a book, respecting the course quota.
    ///
    /// Check and insert run under the book's lock and inside one transaction.
    pub fn admit(
        &self,
        conn: &Connection,
        book_id: &Uuid,
        quota: &CourseQuota,
        recipe: &Recipe,
    ) -> Result<Admission, DatabaseError> {
        let book_lock = self.locks.lock_for(book_id);
        let result = {
            let _guard = book_lock.lock().unwrap_or_else(|e| e.into_inner());
            Self::admit_locked(conn, book_id, quota, recipe)
        };
        self.locks.release(book_id, book_lock);
        result
    }

    fn admit_locked(
        conn: &Connection,
        book_id: &Uuid,
        quota: &CourseQuota,
        recipe: &Recipe,
    ) -> Result<Admission, DatabaseError> {
        let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
        if book_contains_recipe(&tx, book_id, &recipe.id)? {
            return Ok(Admission::AlreadyPresent);
        }

        let course = Self::course_of(recipe);
        let limit = quota.get(course);
        let current = count_book_course(&tx, book_id, course)?;
        if current >= limit {
            tracing::debug!(
                book_id = %book_id,
                recipe = %recipe.external_id,
                course = course.as_str(),
                current,
                limit,
                "Course quota reached"
            );
            return Ok(Admission::QuotaExceeded);
        }

        insert_book_recipe(&tx, book_id, &recipe.id, course)?;
        tx.commit()?;
        Ok(Admission::Admitted)
    }
}
