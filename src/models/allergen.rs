use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An allergen known to the system. Created on first sighting of its code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allergen {
    pub id: Uuid,
    pub code: String,
    pub name: String,
}

/// Latest ledger decision for a (patient, allergen) pair.
///
/// `active = false` rows are tombstones: the allergen is not linked, but the
/// freshness marker of the negative decision is kept so an older positive
/// result cannot re-link it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientAllergenLink {
    pub patient_id: Uuid,
    pub allergen_id: Uuid,
    pub active: bool,
    /// Test date of the measurement that produced this decision.
    pub last_decision_at: NaiveDate,
    /// Wall-clock time the decision was written.
    pub updated_at: NaiveDateTime,
}

/// One calibrated allergen measurement from a lab import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabMeasurement {
    pub sample_id: String,
    pub patient_id: Uuid,
    pub allergen_code: String,
    #[serde(default)]
    pub allergen_name: Option<String>,
    pub calibrated_value: f64,
    pub test_date: NaiveDate,
}
