//! Assignment runs: fill each patient's draft book from the catalog.
//!
//! Per patient: purge recipes that became unsafe, sample every course,
//! resolve the union of sampled ids with a single batch detail call, then
//! admit through the quota allocator. Catalog trouble degrades to "nothing
//! this round" for that patient; the run carries on with the next one.

use std::collections::HashSet;
use std::sync::Arc;

use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use super::error::CurationError;
use super::query::SearchQueryBuilder;
use super::quota::{Admission, QuotaAllocator};
use super::safety::{allergen_slugs, is_unsafe, purge_unsafe_recipes};
use super::sampler::CourseSampler;
use super::store::store_catalog_recipe;
use crate::catalog::CatalogClient;
use crate::db::repository::{
    get_active_allergens, get_lab_settings_for_patient, get_or_create_draft_book, get_patient,
    set_recipe_total,
};
use crate::models::{Book, Course, CourseQuota, Recipe};

/// Downstream step run after a book gained recipes (rendering, delivery).
pub trait BookFinalizer: Send + Sync {
    fn book_updated(&self, book: &Book, admitted: &[Recipe]);
}

/// Finalizer that only logs.
pub struct LoggingFinalizer;

impl BookFinalizer for LoggingFinalizer {
    fn book_updated(&self, book: &Book, admitted: &[Recipe]) {
        tracing::info!(book_id = %book.id, admitted = admitted.len(), "Book updated");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    /// At least one recipe was admitted.
    Assigned,
    /// Candidates were resolved but none could be admitted.
    NothingAdmitted,
    /// Sampling returned no ids for any course.
    NoCandidates,
    /// The batch detail call failed.
    DetailsUnavailable,
    /// The patient does not exist.
    MissingPatient,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatientAssignment {
    pub patient_id: Uuid,
    pub book_id: Option<Uuid>,
    pub status: AssignmentStatus,
    pub sampled: usize,
    pub purged: usize,
    pub admitted: usize,
    pub already_present: usize,
    pub quota_exceeded: usize,
    pub unresolved: usize,
    pub rejected_unsafe: usize,
}

impl PatientAssignment {
    fn new(patient_id: Uuid, status: AssignmentStatus) -> Self {
        Self {
            patient_id,
            book_id: None,
            status,
            sampled: 0,
            purged: 0,
            admitted: 0,
            already_present: 0,
            quota_exceeded: 0,
            unresolved: 0,
            rejected_unsafe: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AssignmentReport {
    pub patients: Vec<PatientAssignment>,
}

impl AssignmentReport {
    pub fn total_admitted(&self) -> usize {
        self.patients.iter().map(|p| p.admitted).sum()
    }

    pub fn get(&self, patient_id: &Uuid) -> Option<&PatientAssignment> {
        self.patients.iter().find(|p| p.patient_id == *patient_id)
    }
}

pub struct RecipeAssignmentOrchestrator {
    catalog: Arc<dyn CatalogClient>,
    sampler: CourseSampler,
    allocator: QuotaAllocator,
    finalizer: Box<dyn BookFinalizer>,
}

impl RecipeAssignmentOrchestrator {
    pub fn new(
        catalog: Arc<dyn CatalogClient>,
        sampler: CourseSampler,
        allocator: QuotaAllocator,
        finalizer: Box<dyn BookFinalizer>,
    ) -> Self {
        Self {
            catalog,
            sampler,
            allocator,
            finalizer,
        }
    }

    /// Run assignment for each patient in order.
    ///
    /// Unknown patients are recorded and skipped. Database failures abort the
    /// run; completed patients keep their changes.
    pub fn run(&self, conn: &Connection, patient_ids: &[Uuid]) -> Result<AssignmentReport, CurationError> {
        let mut report = AssignmentReport::default();
        for patient_id in patient_ids {
            let outcome = match self.assign_patient(conn, patient_id) {
                Ok(outcome) => outcome,
                Err(CurationError::MissingContext { entity, id }) => {
                    tracing::warn!(entity, id = %id, "Skipping patient, missing context");
                    PatientAssignment::new(*patient_id, AssignmentStatus::MissingPatient)
                }
                Err(e) => return Err(e),
            };
            report.patients.push(outcome);
        }

        tracing::info!(
            patients = report.patients.len(),
            admitted = report.total_admitted(),
            "Assignment run complete"
        );
        Ok(report)
    }

    pub fn assign_patient(&self, conn: &Connection, patient_id: &Uuid) -> Result<PatientAssignment, CurationError> {
        let patient = get_patient(conn, patient_id)?.ok_or_else(|| CurationError::missing("patient", patient_id))?;
        let lab_settings = get_lab_settings_for_patient(conn, &patient)?;
        let quota = CourseQuota::resolve(&patient.settings, lab_settings.as_ref());
        let book = get_or_create_draft_book(conn, patient_id)?;

        let mut outcome = PatientAssignment::new(*patient_id, AssignmentStatus::NoCandidates);
        outcome.book_id = Some(book.id);
        outcome.purged = purge_unsafe_recipes(conn, &book.id, patient_id)?.len();

        let exclude_query = SearchQueryBuilder::new(conn).build(patient_id)?;

        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        for course in Course::ALL {
            let known_total = patient
                .settings
                .recipe_totals
                .get(course)
                .map(u64::from)
                .unwrap_or(0);
            let sample = self
                .sampler
                .sample_with_query(course, &exclude_query, quota.get(course), known_total);

            if let Some(total) = sample.total {
                set_recipe_total(conn, patient_id, course, total)?;
            }
            for id in sample.ids {
                if seen.insert(id.clone()) {
                    ids.push(id);
                }
            }
        }
        outcome.sampled = ids.len();

        if ids.is_empty() {
            tracing::warn!(patient_id = %patient_id, "No recipes sampled for any course, skipping patient");
            return Ok(outcome);
        }

        let exclude = (!exclude_query.is_empty()).then_some(exclude_query.as_str());
        let details = match self.catalog.batch_details(&ids, exclude) {
            Ok(details) => details,
            Err(e) => {
                tracing::warn!(
                    patient_id = %patient_id,
                    requested = ids.len(),
                    error = %e,
                    "Batch detail lookup failed, no recipes this round"
                );
                outcome.status = AssignmentStatus::DetailsUnavailable;
                return Ok(outcome);
            }
        };

        let unsafe_slugs = allergen_slugs(&get_active_allergens(conn, patient_id)?);
        let mut resolved = HashSet::new();
        let mut admitted = Vec::new();
        for id in &ids {
            let Some(detail) = details.get(id) else {
                tracing::warn!(patient_id = %patient_id, recipe = %id, "Recipe id did not resolve, skipping");
                outcome.unresolved += 1;
                continue;
            };
            // Two sampled aliases may name the same recipe.
            if !resolved.insert(detail.external_id.clone()) {
                continue;
            }

            let recipe = store_catalog_recipe(conn, detail)?;
            if is_unsafe(&recipe, &unsafe_slugs) {
                outcome.rejected_unsafe += 1;
                continue;
            }

            match self.allocator.admit(conn, &book.id, &quota, &recipe)? {
                Admission::Admitted => {
                    outcome.admitted += 1;
                    admitted.push(recipe);
                }
                Admission::AlreadyPresent => outcome.already_present += 1,
                Admission::QuotaExceeded => outcome.quota_exceeded += 1,
            }
        }

        if admitted.is_empty() {
            outcome.status = AssignmentStatus::NothingAdmitted;
        } else {
            outcome.status = AssignmentStatus::Assigned;
            self.finalizer.book_updated(&book, &admitted);
        }

        tracing::info!(
            patient_id = %patient_id,
            book_id = %book.id,
            sampled = outcome.sampled,
            admitted = outcome.admitted,
            quota_exceeded = outcome.quota_exceeded,
            unresolved = outcome.unresolved,
            "Patient assignment finished"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MockCatalog;
    use crate::curation::ledger::AllergenLedger;
    use crate::db::repository::{count_book_course, get_book_entries, insert_lab, insert_patient};
    use crate::db::sqlite::open_memory_database;
    use crate::models::{CourseCounts, Lab, LabSettings, Patient, PatientSettings};
    use chrono::NaiveDate;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingFinalizer {
        calls: Arc<Mutex<Vec<(Uuid, usize)>>>,
    }

    impl BookFinalizer for RecordingFinalizer {
        fn book_updated(&self, book: &Book, admitted: &[Recipe]) {
            self.calls.lock().unwrap().push((book.id, admitted.len()));
        }
    }

    fn catalog() -> Arc<MockCatalog> {
        let mut recipes = Vec::new();
        for i in 0..4 {
            let main_allergens = if i == 0 { json!(["Peanut"]) } else { json!([]) };
            recipes.push(json!({"id": format!("s{i}"), "title": format!("Starter {i}"), "category": "starter",
                                "allergens": [], "diets": []}));
            recipes.push(json!({"id": format!("m{i}"), "title": format!("Main {i}"), "category": "main_course",
                                "allergens": main_allergens, "diets": []}));
            recipes.push(json!({"id": format!("d{i}"), "title": format!("Dessert {i}"), "category": "dessert",
                                "allergens": [], "diets": ["vegetarian"]}));
        }
        Arc::new(MockCatalog::new(recipes).with_summaries_only())
    }

    fn patient(conn: &Connection, per_course: u32) -> Uuid {
        let lab = Lab {
            id: Uuid::new_v4(),
            name: "Lab".into(),
            settings: LabSettings {
                recipes_per_course: CourseCounts {
                    starter: Some(per_course),
                    main_course: Some(per_course),
                    dessert: Some(per_course),
                },
                ..Default::default()
            },
        };
        insert_lab(conn, &lab).unwrap();
        let patient = Patient {
            id: Uuid::new_v4(),
            lab_id: Some(lab.id),
            display_name: "Assigned".into(),
            settings: PatientSettings::default(),
        };
        insert_patient(conn, &patient).unwrap();
        patient.id
    }

    fn orchestrator(
        catalog: Arc<MockCatalog>,
    ) -> (RecipeAssignmentOrchestrator, Arc<Mutex<Vec<(Uuid, usize)>>>) {
        let finalizer = RecordingFinalizer::default();
        let calls = Arc::clone(&finalizer.calls);
        let orchestrator = RecipeAssignmentOrchestrator::new(
            catalog.clone(),
            CourseSampler::with_seed(catalog, "en", 3),
            QuotaAllocator::default(),
            Box::new(finalizer),
        );
        (orchestrator, calls)
    }

    #[test]
    fn fills_book_per_course_with_one_batch_call() {
        let conn = open_memory_database().unwrap();
        let pid = patient(&conn, 2);
        let catalog = catalog();
        let (orchestrator, calls) = orchestrator(catalog.clone());

        let report = orchestrator.run(&conn, &[pid]).unwrap();
        let outcome = report.get(&pid).unwrap();
        assert_eq!(outcome.status, AssignmentStatus::Assigned);
        assert_eq!(outcome.admitted, 6);
        assert_eq!(catalog.search_calls(), 3);
        assert_eq!(catalog.batch_calls(), 1);
        assert_eq!(catalog.batch_requests()[0].len(), 6);

        let book_id = outcome.book_id.unwrap();
        for course in Course::ALL {
            assert_eq!(count_book_course(&conn, &book_id, course).unwrap(), 2);
        }
        assert_eq!(calls.lock().unwrap().as_slice(), &[(book_id, 6)]);

        // Stored recipes carry the backfilled details.
        let dessert = crate::db::repository::get_recipe_by_external_id(&conn, "d0").unwrap().unwrap();
        assert_eq!(dessert.diet_tags, vec![crate::models::Diet::Vegetarian]);
    }

    #[test]
    fn totals_written_by_run() {
        let conn = open_memory_database().unwrap();
        let pid = patient(&conn, 1);
        let (orchestrator, _) = orchestrator(catalog());
        orchestrator.run(&conn, &[pid]).unwrap();

        let totals = get_patient(&conn, &pid).unwrap().unwrap().settings.recipe_totals;
        assert_eq!(totals.get(Course::Starter), Some(4));
        assert_eq!(totals.get(Course::MainCourse), Some(4));
        assert_eq!(totals.get(Course::Dessert), Some(4));
    }

    #[test]
    fn second_run_respects_quota_and_reuses_book() {
        let conn = open_memory_database().unwrap();
        let pid = patient(&conn, 2);
        let (orchestrator, calls) = orchestrator(catalog());

        let first = orchestrator.run(&conn, &[pid]).unwrap();
        let second = orchestrator.run(&conn, &[pid]).unwrap();
        let book_id = first.patients[0].book_id;
        assert_eq!(second.patients[0].book_id, book_id);
        assert_eq!(second.patients[0].admitted, 0);
        assert_eq!(second.patients[0].status, AssignmentStatus::NothingAdmitted);
        assert_eq!(get_book_entries(&conn, &book_id.unwrap()).unwrap().len(), 6);
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn allergens_excluded_and_purged() {
        let conn = open_memory_database().unwrap();
        let pid = patient(&conn, 4);
        let (orchestrator, _) = orchestrator(catalog());

        let first = orchestrator.run(&conn, &[pid]).unwrap();
        assert_eq!(first.patients[0].admitted, 12);

        AllergenLedger::new(&conn)
            .apply_measurement(
                &crate::models::LabMeasurement {
                    sample_id: "S-1".into(),
                    patient_id: pid,
                    allergen_code: "f13".into(),
                    allergen_name: Some("Peanut".into()),
                    calibrated_value: 35.0,
                    test_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
                },
                10.0,
            )
            .unwrap();

        let second = orchestrator.run(&conn, &[pid]).unwrap();
        assert_eq!(second.patients[0].purged, 1);
        let book_id = second.patients[0].book_id.unwrap();
        let entries = get_book_entries(&conn, &book_id).unwrap();
        assert!(entries.iter().all(|e| e.external_id != "m0"));
    }

    #[test]
    fn missing_patient_does_not_stop_run() {
        let conn = open_memory_database().unwrap();
        let pid = patient(&conn, 1);
        let ghost = Uuid::new_v4();
        let (orchestrator, _) = orchestrator(catalog());

        let report = orchestrator.run(&conn, &[ghost, pid]).unwrap();
        assert_eq!(report.get(&ghost).unwrap().status, AssignmentStatus::MissingPatient);
        assert_eq!(report.get(&pid).unwrap().status, AssignmentStatus::Assigned);
    }

    #[test]
    fn unreachable_catalog_skips_patient() {
        let conn = open_memory_database().unwrap();
        let pid = patient(&conn, 2);
        let catalog = catalog();
        catalog.set_unavailable(true);
        let (orchestrator, calls) = orchestrator(catalog.clone());

        let report = orchestrator.run(&conn, &[pid]).unwrap();
        assert_eq!(report.patients[0].status, AssignmentStatus::NoCandidates);
        assert_eq!(catalog.batch_calls(), 0);
        assert!(calls.lock().unwrap().is_empty());
        // A failed search must not clobber cached totals.
        let totals = get_patient(&conn, &pid).unwrap().unwrap().settings.recipe_totals;
        assert_eq!(totals.get(Course::Starter), None);
    }

    #[test]
    fn batch_failure_yields_nothing_this_round() {
        let conn = open_memory_database().unwrap();
        let pid = patient(&conn, 1);
        let failing = Arc::new(FailingBatch(catalog()));
        let orchestrator = RecipeAssignmentOrchestrator::new(
            failing.clone(),
            CourseSampler::with_seed(failing, "en", 3),
            QuotaAllocator::default(),
            Box::new(LoggingFinalizer),
        );
        let outcome = orchestrator.assign_patient(&conn, &pid).unwrap();
        assert_eq!(outcome.status, AssignmentStatus::DetailsUnavailable);
        assert_eq!(outcome.admitted, 0);
    }

    struct FailingBatch(Arc<MockCatalog>);

    impl CatalogClient for FailingBatch {
        fn search(
            &self,
            request: &crate::catalog::SearchRequest,
        ) -> Result<crate::catalog::SearchPage, crate::catalog::CatalogError> {
            self.0.search(request)
        }

        fn batch_details(
            &self,
            _ids: &[String],
            _exclude_query: Option<&str>,
        ) -> Result<std::collections::HashMap<String, crate::catalog::CatalogRecipe>, crate::catalog::CatalogError>
        {
            Err(crate::catalog::CatalogError::Timeout(30))
        }

        fn single_detail(
            &self,
            id: &str,
            exclude_query: Option<&str>,
        ) -> Result<Option<crate::catalog::CatalogRecipe>, crate::catalog::CatalogError> {
            self.0.single_detail(id, exclude_query)
        }
    }
}
