//! Curation engine: allergen ledger, query building, sampling, quota
//! allocation, assignment runs and available-recipe browsing.

pub mod error;
pub mod import;
pub mod ledger;
pub mod orchestrator;
pub mod paginator;
pub mod query;
pub mod quota;
pub mod safety;
pub mod sampler;
pub mod store;

pub use error::CurationError;
pub use import::{import_measurements, ImportReport, SkippedRow};
pub use ledger::{AllergenLedger, Decision};
pub use orchestrator::{
    AssignmentReport, AssignmentStatus, BookFinalizer, LoggingFinalizer, PatientAssignment,
    RecipeAssignmentOrchestrator,
};
pub use paginator::{AvailabilityPaginator, AvailablePage, BrowseFilters, BrowseSession};
pub use query::{translate_terms, SearchQueryBuilder};
pub use quota::{Admission, BookLocks, QuotaAllocator};
pub use safety::purge_unsafe_recipes;
pub use sampler::{CourseSampler, SampleOutcome};
pub use store::store_catalog_recipe;
