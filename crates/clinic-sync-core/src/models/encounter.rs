//! Visit records and the orders written during a visit.

use serde::{Deserialize, Serialize};

use super::record::{lenient_bool, lenient_string};
use super::{Collection, Entity, RecordMeta};

/// A clinical visit. Soft reference to its patient.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Visit {
    #[serde(flatten)]
    pub meta: RecordMeta,
    #[serde(default, deserialize_with = "lenient_string")]
    pub patient_id: String,
    #[serde(default)]
    pub visit_date: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub diagnosis: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub follow_up_date: Option<String>,
}

impl Visit {
    pub fn new(patient_id: impl Into<String>) -> Self {
        Self {
            meta: RecordMeta::new(),
            patient_id: patient_id.into(),
            visit_date: None,
            reason: None,
            diagnosis: None,
            notes: None,
            follow_up_date: None,
        }
    }
}

/// A prescription issued during a visit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Prescription {
    #[serde(flatten)]
    pub meta: RecordMeta,
    #[serde(default, deserialize_with = "lenient_string")]
    pub visit_id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub drug_name: String,
    #[serde(default)]
    pub dosage: Option<String>,
    #[serde(default)]
    pub frequency: Option<String>,
    #[serde(default)]
    pub duration: Option<String>,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub sent_to_pharmacy: bool,
}

impl Prescription {
    pub fn new(visit_id: impl Into<String>, drug_name: impl Into<String>) -> Self {
        Self {
            meta: RecordMeta::new(),
            visit_id: visit_id.into(),
            drug_name: drug_name.into(),
            dosage: None,
            frequency: None,
            duration: None,
            instructions: None,
            sent_to_pharmacy: false,
        }
    }
}

/// A lab test ordered during a visit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LabOrder {
    #[serde(flatten)]
    pub meta: RecordMeta,
    #[serde(default, deserialize_with = "lenient_string")]
    pub visit_id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub test_name: String,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub result_notes: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub sent_to_lab: bool,
}

impl LabOrder {
    pub fn new(visit_id: impl Into<String>, test_name: impl Into<String>) -> Self {
        Self {
            meta: RecordMeta::new(),
            visit_id: visit_id.into(),
            test_name: test_name.into(),
            instructions: None,
            result_notes: None,
            sent_to_lab: false,
        }
    }
}

impl Entity for Visit {
    const COLLECTION: Collection = Collection::Visits;

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }
}

impl Entity for Prescription {
    const COLLECTION: Collection = Collection::Prescriptions;

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }
}

impl Entity for LabOrder {
    const COLLECTION: Collection = Collection::LabOrders;

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }
}
