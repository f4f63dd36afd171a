//! Patient and lab settings blobs, plus the resolution rules that read them.
//!
//! Both blobs are stored as JSON text and decoded here once. Unknown keys are
//! preserved-by-ignoring: we only read what the curation engine needs.

use serde::{Deserialize, Serialize};

use super::enums::Course;
use crate::config::{DEFAULT_ALLERGEN_THRESHOLD, DEFAULT_RECIPES_PER_COURSE};

/// Sparse per-course integers (`{"starter": 2, "dessert": 4}`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseCounts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starter: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_course: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dessert: Option<u32>,
}

impl CourseCounts {
    pub fn get(&self, course: Course) -> Option<u32> {
        match course {
            Course::Starter => self.starter,
            Course::MainCourse => self.main_course,
            Course::Dessert => self.dessert,
        }
    }

    pub fn set(&mut self, course: Course, value: u32) {
        let slot = match course {
            Course::Starter => &mut self.starter,
            Course::MainCourse => &mut self.main_course,
            Course::Dessert => &mut self.dessert,
        };
        *slot = Some(value);
    }
}

/// Cached catalog population per course. Written only by the assignment run.
pub type RecipeTotals = CourseCounts;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatientSettings {
    #[serde(default, deserialize_with = "string_ids")]
    pub favorites: Vec<String>,
    #[serde(default)]
    pub recipes_per_course: CourseCounts,
    #[serde(default)]
    pub recipe_totals: RecipeTotals,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allergen_threshold: Option<f64>,
    #[serde(default)]
    pub recipes_per_course: CourseCounts,
}

// Older clients stored numeric catalog ids; anything else is dropped.
fn string_ids<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<Vec<serde_json::Value>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|v| match v {
            serde_json::Value::String(s) if !s.is_empty() => Some(s),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
        .collect())
}

/// Fully resolved quota for one patient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseQuota {
    pub starter: u32,
    pub main_course: u32,
    pub dessert: u32,
}

impl Default for CourseQuota {
    fn default() -> Self {
        Self::uniform(DEFAULT_RECIPES_PER_COURSE)
    }
}

impl CourseQuota {
    pub fn uniform(n: u32) -> Self {
        Self {
            starter: n,
            main_course: n,
            dessert: n,
        }
    }

    pub fn get(&self, course: Course) -> u32 {
        match course {
            Course::Starter => self.starter,
            Course::MainCourse => self.main_course,
            Course::Dessert => self.dessert,
        }
    }

    /// Resolve per course: patient setting → lab setting → default.
    pub fn resolve(patient: &PatientSettings, lab: Option<&LabSettings>) -> Self {
        let pick = |course: Course| {
            patient
                .recipes_per_course
                .get(course)
                .or_else(|| lab.and_then(|l| l.recipes_per_course.get(course)))
                .unwrap_or(DEFAULT_RECIPES_PER_COURSE)
        };
        Self {
            starter: pick(Course::Starter),
            main_course: pick(Course::MainCourse),
            dessert: pick(Course::Dessert),
        }
    }
}

/// Allergen threshold for a lab: lab setting → default.
///
/// Non-finite or negative settings are ignored.
pub fn resolve_threshold(lab: Option<&LabSettings>) -> f64 {
    lab.and_then(|l| l.allergen_threshold)
        .filter(|t| t.is_finite() && *t >= 0.0)
        .unwrap_or(DEFAULT_ALLERGEN_THRESHOLD)
}
