//! Syncable collections and their column layouts.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A record collection mirrored locally and synced with the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Patients,
    Visits,
    Prescriptions,
    LabOrders,
    Drugs,
    LabTestTypes,
}

/// How a domain column is stored locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    /// JSON boolean remotely, 0/1 integer locally.
    Bool,
}

/// A domain column: local column name plus its remote JSON key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub json: &'static str,
    pub kind: ColumnKind,
}

const fn text(name: &'static str, json: &'static str) -> Column {
    Column {
        name,
        json,
        kind: ColumnKind::Text,
    }
}

const fn flag(name: &'static str, json: &'static str) -> Column {
    Column {
        name,
        json,
        kind: ColumnKind::Bool,
    }
}

const PATIENT_COLUMNS: &[Column] = &[
    text("name", "name"),
    text("date_of_birth", "dateOfBirth"),
    text("gender", "gender"),
    text("phone", "phone"),
    text("email", "email"),
    text("address", "address"),
    text("medical_history", "medicalHistory"),
];

const VISIT_COLUMNS: &[Column] = &[
    text("patient_id", "patientId"),
    text("visit_date", "visitDate"),
    text("reason", "reason"),
    text("diagnosis", "diagnosis"),
    text("notes", "notes"),
    text("follow_up_date", "followUpDate"),
];

const PRESCRIPTION_COLUMNS: &[Column] = &[
    text("visit_id", "visitId"),
    text("drug_name", "drugName"),
    text("dosage", "dosage"),
    text("frequency", "frequency"),
    text("duration", "duration"),
    text("instructions", "instructions"),
    flag("sent_to_pharmacy", "sentToPharmacy"),
];

const LAB_ORDER_COLUMNS: &[Column] = &[
    text("visit_id", "visitId"),
    text("test_name", "testName"),
    text("instructions", "instructions"),
    text("result_notes", "resultNotes"),
    flag("sent_to_lab", "sentToLab"),
];

const DRUG_COLUMNS: &[Column] = &[
    text("name", "name"),
    text("generic_name", "genericName"),
    text("form", "form"),
    text("strength", "strength"),
    flag("is_favorite", "isFavorite"),
];

const LAB_TEST_TYPE_COLUMNS: &[Column] = &[
    text("name", "name"),
    text("category", "category"),
    text("description", "description"),
];

impl Collection {
    /// Every collection, in reconciliation order (parents before children).
    pub const ALL: [Collection; 6] = [
        Collection::Patients,
        Collection::Visits,
        Collection::Prescriptions,
        Collection::LabOrders,
        Collection::Drugs,
        Collection::LabTestTypes,
    ];

    /// Local table name. Also the watermark key in `sync_tracking`.
    pub fn table(&self) -> &'static str {
        match self {
            Collection::Patients => "patients",
            Collection::Visits => "visits",
            Collection::Prescriptions => "prescriptions",
            Collection::LabOrders => "lab_orders",
            Collection::Drugs => "drugs",
            Collection::LabTestTypes => "lab_test_types",
        }
    }

    /// Remote resource path segment.
    pub fn endpoint(&self) -> &'static str {
        match self {
            Collection::Patients => "patients",
            Collection::Visits => "visits",
            Collection::Prescriptions => "prescriptions",
            Collection::LabOrders => "lab-orders",
            Collection::Drugs => "drugs",
            Collection::LabTestTypes => "lab-test-types",
        }
    }

    /// Path of a single record on the remote API. `id` must pass
    /// [`is_path_safe_id`].
    pub fn item_endpoint(&self, id: &str) -> String {
        format!("{}/{}", self.endpoint(), id)
    }

    /// Domain columns (bookkeeping columns excluded).
    pub fn columns(&self) -> &'static [Column] {
        match self {
            Collection::Patients => PATIENT_COLUMNS,
            Collection::Visits => VISIT_COLUMNS,
            Collection::Prescriptions => PRESCRIPTION_COLUMNS,
            Collection::LabOrders => LAB_ORDER_COLUMNS,
            Collection::Drugs => DRUG_COLUMNS,
            Collection::LabTestTypes => LAB_TEST_TYPE_COLUMNS,
        }
    }
}

/// Ids are spliced into URL paths unescaped, so only ASCII letters, digits,
/// `-` and `_` are accepted.
pub fn is_path_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

impl FromStr for Collection {
    type Err = String;

    /// Accepts the table name, the endpoint, or the type name in any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();

        match key.as_str() {
            "patients" | "patient" => Ok(Collection::Patients),
            "visits" | "visit" => Ok(Collection::Visits),
            "prescriptions" | "prescription" => Ok(Collection::Prescriptions),
            "laborders" | "laborder" => Ok(Collection::LabOrders),
            "drugs" | "drug" => Ok(Collection::Drugs),
            "labtesttypes" | "labtesttype" => Ok(Collection::LabTestTypes),
            _ => Err(format!("Unknown collection: {}", s)),
        }
    }
}
