//! Batch import of lab measurements into the allergen ledger.

use std::collections::{BTreeSet, HashMap};

use rusqlite::Connection;
use serde::Serialize;
use uuid::Uuid;

use super::error::CurationError;
use super::ledger::{AllergenLedger, Decision};
use crate::db::repository::{get_lab, get_patient};
use crate::models::{resolve_threshold, LabMeasurement, Patient};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedRow {
    pub sample_id: String,
    pub reason: String,
}

/// Outcome of one import call.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportReport {
    pub rows_total: usize,
    pub linked: usize,
    pub unlinked: usize,
    /// Rows superseded by an equally recent or newer decision.
    pub stale: usize,
    pub skipped: Vec<SkippedRow>,
    /// Patients whose allergen set may have changed, sorted.
    pub patients_changed: Vec<Uuid>,
}

/// Apply a lab's measurements to the ledger using the lab's threshold.
pub fn import_measurements(
    conn: &Connection,
    lab_id: &Uuid,
    rows: &[LabMeasurement],
) -> Result<ImportReport, CurationError> {
    let lab = get_lab(conn, lab_id)?.ok_or_else(|| CurationError::missing("lab", lab_id))?;
    let threshold = resolve_threshold(Some(&lab.settings));
    let ledger = AllergenLedger::new(conn);

    let mut report = ImportReport {
        rows_total: rows.len(),
        ..Default::default()
    };
    let mut patients: HashMap<Uuid, Option<Patient>> = HashMap::new();
    let mut changed = BTreeSet::new();

    for row in rows {
        let skip = |reason: &str| SkippedRow {
            sample_id: row.sample_id.clone(),
            reason: reason.to_string(),
        };

        if row.allergen_code.trim().is_empty() {
            report.skipped.push(skip("empty allergen code"));
            continue;
        }
        if !row.calibrated_value.is_finite() {
            report.skipped.push(skip("value is not a number"));
            continue;
        }

        let patient = match patients.get(&row.patient_id) {
            Some(cached) => cached.clone(),
            None => {
                let loaded = get_patient(conn, &row.patient_id)?;
                patients.insert(row.patient_id, loaded.clone());
                loaded
            }
        };
        let Some(patient) = patient else {
            report.skipped.push(skip("unknown patient"));
            continue;
        };
        if patient.lab_id != Some(lab.id) {
            report.skipped.push(skip("patient belongs to another lab"));
            continue;
        }

        match ledger.apply_measurement(row, threshold)? {
            Decision::Linked => {
                report.linked += 1;
                changed.insert(patient.id);
            }
            Decision::Unlinked => {
                report.unlinked += 1;
                changed.insert(patient.id);
            }
            Decision::Skipped => report.stale += 1,
        }
    }

    report.patients_changed = changed.into_iter().collect();
    if !report.skipped.is_empty() {
        tracing::warn!(lab_id = %lab.id, skipped = report.skipped.len(), "Some lab rows were not imported");
    }
    tracing::info!(
        lab_id = %lab.id,
        rows = report.rows_total,
        linked = report.linked,
        unlinked = report.unlinked,
        stale = report.stale,
        threshold,
        "Lab import complete"
    );
    Ok(report)
}
