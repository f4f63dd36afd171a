use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::settings::{LabSettings, PatientSettings};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lab {
    pub id: Uuid,
    pub name: String,
    pub settings: LabSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub id: Uuid,
    pub lab_id: Option<Uuid>,
    pub display_name: String,
    pub settings: PatientSettings,
}
