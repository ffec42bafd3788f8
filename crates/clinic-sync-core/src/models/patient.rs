//! Patient records.

use serde::{Deserialize, Serialize};

use super::record::lenient_string;
use super::{Collection, Entity, RecordMeta};

/// A patient of the owning doctor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    #[serde(flatten)]
    pub meta: RecordMeta,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    /// ISO-8601 date
    #[serde(default)]
    pub date_of_birth: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    /// Free-text history notes
    #[serde(default)]
    pub medical_history: Option<String>,
}

impl Patient {
    /// Create a new patient with required fields.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            meta: RecordMeta::new(),
            name: name.into(),
            date_of_birth: None,
            gender: None,
            phone: None,
            email: None,
            address: None,
            medical_history: None,
        }
    }
}

impl Entity for Patient {
    const COLLECTION: Collection = Collection::Patients;

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }
}
