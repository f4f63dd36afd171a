//! Allergen ledger: derives a patient's active allergen set from lab results.
//!
//! Each (patient, allergen) pair keeps one decision row whose freshness marker
//! is the test date of the measurement that produced it. A measurement only
//! changes the row when it is strictly newer than that marker, so results
//! arriving out of order never overwrite a decision taken from a later test.
//! Unlinking keeps the row as an inactive tombstone for the same reason.

use chrono::NaiveDate;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::CurationError;
use crate::db::repository::{get_active_allergens, get_allergen_link, upsert_allergen, write_allergen_link};
use crate::models::{Allergen, LabMeasurement, PatientAllergenLink};

/// Outcome of applying one measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Linked,
    Unlinked,
    /// An equally recent or newer decision already stands.
    Skipped,
}

/// Pure decision rule. `positive` is `value >= threshold`.
pub fn decide(existing: Option<&PatientAllergenLink>, positive: bool, test_date: NaiveDate) -> Decision {
    let superseded = existing.is_some_and(|link| link.last_decision_at >= test_date);
    match (positive, superseded) {
        (_, true) => Decision::Skipped,
        (true, false) => Decision::Linked,
        (false, false) => Decision::Unlinked,
    }
}

pub struct AllergenLedger<'a> {
    conn: &'a Connection,
}

impl<'a> AllergenLedger<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Apply one measurement; the allergen is named after its code.
    pub fn apply(
        &self,
        patient_id: &Uuid,
        allergen_code: &str,
        calibrated_value: f64,
        threshold: f64,
        test_date: NaiveDate,
    ) -> Result<Decision, CurationError> {
        self.apply_named(patient_id, allergen_code, None, calibrated_value, threshold, test_date)
    }

    pub fn apply_measurement(
        &self,
        measurement: &LabMeasurement,
        threshold: f64,
    ) -> Result<Decision, CurationError> {
        self.apply_named(
            &measurement.patient_id,
            &measurement.allergen_code,
            measurement.allergen_name.as_deref(),
            measurement.calibrated_value,
            threshold,
            measurement.test_date,
        )
    }

    fn apply_named(
        &self,
        patient_id: &Uuid,
        allergen_code: &str,
        allergen_name: Option<&str>,
        calibrated_value: f64,
        threshold: f64,
        test_date: NaiveDate,
    ) -> Result<Decision, CurationError> {
        let code = allergen_code.trim();
        if code.is_empty() {
            return Err(CurationError::InvalidInput("empty allergen code".into()));
        }
        if !calibrated_value.is_finite() {
            return Err(CurationError::InvalidInput(format!(
                "non-finite value for allergen {code}"
            )));
        }

        let name = allergen_name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(code);

        // Compare-and-write for this pair happens in one write transaction.
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let allergen = upsert_allergen(&tx, code, name)?;
        let existing = get_allergen_link(&tx, patient_id, &allergen.id)?;

        let decision = decide(existing.as_ref(), calibrated_value >= threshold, test_date);
        match decision {
            Decision::Skipped => {
                tracing::debug!(
                    patient_id = %patient_id,
                    allergen = code,
                    %test_date,
                    current = ?existing.as_ref().map(|l| l.last_decision_at),
                    "Stale measurement ignored"
                );
            }
            Decision::Linked | Decision::Unlinked => {
                write_allergen_link(
                    &tx,
                    &PatientAllergenLink {
                        patient_id: *patient_id,
                        allergen_id: allergen.id,
                        active: decision == Decision::Linked,
                        last_decision_at: test_date,
                        updated_at: chrono::Local::now().naive_local(),
                    },
                )?;
                tracing::debug!(
                    patient_id = %patient_id,
                    allergen = code,
                    %test_date,
                    ?decision,
                    "Allergen decision recorded"
                );
            }
        }

        tx.commit()?;
        Ok(decision)
    }

    pub fn active_allergens(&self, patient_id: &Uuid) -> Result<Vec<Allergen>, CurationError> {
        Ok(get_active_allergens(self.conn, patient_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::insert_patient;
    use crate::db::sqlite::open_memory_database;
    use crate::models::{Patient, PatientSettings};

    const THRESHOLD: f64 = 10.0;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn setup() -> (Connection, Uuid) {
        let conn = open_memory_database().unwrap();
        let patient = Patient {
            id: Uuid::new_v4(),
            lab_id: None,
            display_name: "Ledger Patient".into(),
            settings: PatientSettings::default(),
        };
        insert_patient(&conn, &patient).unwrap();
        (conn, patient.id)
    }

    fn active_codes(ledger: &AllergenLedger, patient_id: &Uuid) -> Vec<String> {
        ledger
            .active_allergens(patient_id)
            .unwrap()
            .into_iter()
            .map(|a| a.code)
            .collect()
    }

    #[test]
    fn older_negative_does_not_clear_newer_link() {
        let (conn, pid) = setup();
        let ledger = AllergenLedger::new(&conn);

        let m1 = ledger.apply(&pid, "f13", 15.0, THRESHOLD, date(2024, 1, 1)).unwrap();
        assert_eq!(m1, Decision::Linked);
        assert_eq!(active_codes(&ledger, &pid), vec!["f13"]);

        let m2 = ledger.apply(&pid, "f13", 5.0, THRESHOLD, date(2023, 12, 1)).unwrap();
        assert_eq!(m2, Decision::Skipped);
        assert_eq!(active_codes(&ledger, &pid), vec!["f13"]);

        let m3 = ledger.apply(&pid, "f13", 5.0, THRESHOLD, date(2024, 2, 1)).unwrap();
        assert_eq!(m3, Decision::Unlinked);
        assert!(active_codes(&ledger, &pid).is_empty());
    }

    #[test]
    fn tombstone_blocks_older_positive() {
        let (conn, pid) = setup();
        let ledger = AllergenLedger::new(&conn);

        ledger.apply(&pid, "f1", 2.0, THRESHOLD, date(2024, 3, 1)).unwrap();
        let late = ledger.apply(&pid, "f1", 40.0, THRESHOLD, date(2024, 1, 1)).unwrap();
        assert_eq!(late, Decision::Skipped);
        assert!(active_codes(&ledger, &pid).is_empty());
    }

    #[test]
    fn negative_without_history_is_unlinked() {
        let (conn, pid) = setup();
        let ledger = AllergenLedger::new(&conn);
        let d = ledger.apply(&pid, "f2", 0.1, THRESHOLD, date(2024, 1, 1)).unwrap();
        assert_eq!(d, Decision::Unlinked);
        assert!(active_codes(&ledger, &pid).is_empty());
    }

    #[test]
    fn same_date_is_skipped_both_ways() {
        let (conn, pid) = setup();
        let ledger = AllergenLedger::new(&conn);
        ledger.apply(&pid, "f3", 12.0, THRESHOLD, date(2024, 5, 5)).unwrap();
        assert_eq!(
            ledger.apply(&pid, "f3", 12.0, THRESHOLD, date(2024, 5, 5)).unwrap(),
            Decision::Skipped
        );
        assert_eq!(
            ledger.apply(&pid, "f3", 1.0, THRESHOLD, date(2024, 5, 5)).unwrap(),
            Decision::Skipped
        );
        assert_eq!(active_codes(&ledger, &pid), vec!["f3"]);
    }

    #[test]
    fn value_at_threshold_links() {
        let (conn, pid) = setup();
        let ledger = AllergenLedger::new(&conn);
        let d = ledger.apply(&pid, "f4", 10.0, THRESHOLD, date(2024, 1, 1)).unwrap();
        assert_eq!(d, Decision::Linked);
    }

    #[test]
    fn final_state_follows_latest_test_date() {
        let (conn, pid) = setup();
        let ledger = AllergenLedger::new(&conn);
        // Shuffled arrival; the 2024-04-01 positive is the newest.
        let arrivals = [
            (3.0, date(2024, 2, 1)),
            (30.0, date(2024, 4, 1)),
            (1.0, date(2024, 3, 1)),
            (2.0, date(2023, 6, 1)),
        ];
        for (value, d) in arrivals {
            ledger.apply(&pid, "t215", value, THRESHOLD, d).unwrap();
        }
        assert_eq!(active_codes(&ledger, &pid), vec!["t215"]);
    }

    #[test]
    fn concurrent_writers_on_separate_connections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        let conn = crate::db::sqlite::open_database(&path).unwrap();
        let patient = Patient {
            id: Uuid::new_v4(),
            lab_id: None,
            display_name: "Race".into(),
            settings: PatientSettings::default(),
        };
        insert_patient(&conn, &patient).unwrap();
        let pid = patient.id;
        let start = date(2024, 1, 1);

        // One writer sends positives on even days, the other negatives on odd
        // days plus the latest result.
        let handles: Vec<_> = [(0u64, 40.0), (1u64, 1.0)]
            .into_iter()
            .map(|(parity, value)| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let conn = crate::db::sqlite::open_database(&path).unwrap();
                    let ledger = AllergenLedger::new(&conn);
                    let mut days: Vec<u64> = (0..40).filter(|d| d % 2 == parity).collect();
                    if parity == 1 {
                        days.push(41);
                    }
                    for day in days {
                        let test_date = start + chrono::Days::new(day);
                        ledger.apply(&pid, "f13", value, THRESHOLD, test_date).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let ledger = AllergenLedger::new(&conn);
        assert!(active_codes(&ledger, &pid).is_empty());
        let allergen = crate::db::repository::get_allergen_by_code(&conn, "f13").unwrap().unwrap();
        let link = get_allergen_link(&conn, &pid, &allergen.id).unwrap().unwrap();
        assert_eq!(link.last_decision_at, start + chrono::Days::new(41));
        assert!(!link.active);
    }

    #[test]
    fn measurement_name_is_kept() {
        let (conn, pid) = setup();
        let ledger = AllergenLedger::new(&conn);
        let m = LabMeasurement {
            sample_id: "S-1".into(),
            patient_id: pid,
            allergen_code: "f13".into(),
            allergen_name: Some("Peanut".into()),
            calibrated_value: 22.5,
            test_date: date(2024, 1, 1),
        };
        ledger.apply_measurement(&m, THRESHOLD).unwrap();
        let active = ledger.active_allergens(&pid).unwrap();
        assert_eq!(active[0].name, "Peanut");
    }

    #[test]
    fn rejects_unusable_input() {
        let (conn, pid) = setup();
        let ledger = AllergenLedger::new(&conn);
        assert!(matches!(
            ledger.apply(&pid, "  ", 20.0, THRESHOLD, date(2024, 1, 1)),
            Err(CurationError::InvalidInput(_))
        ));
        assert!(matches!(
            ledger.apply(&pid, "f1", f64::NAN, THRESHOLD, date(2024, 1, 1)),
            Err(CurationError::InvalidInput(_))
        ));
    }

    #[test]
    fn decide_rule() {
        let link = PatientAllergenLink {
            patient_id: Uuid::nil(),
            allergen_id: Uuid::nil(),
            active: true,
            last_decision_at: date(2024, 1, 1),
            updated_at: date(2024, 1, 1).and_hms_opt(0, 0, 0).unwrap(),
        };
        assert_eq!(decide(None, true, date(2024, 1, 1)), Decision::Linked);
        assert_eq!(decide(Some(&link), true, date(2024, 1, 2)), Decision::Linked);
        assert_eq!(decide(Some(&link), false, date(2023, 1, 1)), Decision::Skipped);
    }
}
