//! Per-doctor reference catalogs: formulary drugs and lab test types.

use serde::{Deserialize, Serialize};

use super::record::{lenient_bool, lenient_string};
use super::{Collection, Entity, RecordMeta};

/// A drug in the doctor's formulary.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Drug {
    #[serde(flatten)]
    pub meta: RecordMeta,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default)]
    pub generic_name: Option<String>,
    /// Dosage form (e.g., "tablet", "syrup")
    #[serde(default)]
    pub form: Option<String>,
    #[serde(default)]
    pub strength: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_favorite: bool,
}

impl Drug {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            meta: RecordMeta::new(),
            name: name.into(),
            generic_name: None,
            form: None,
            strength: None,
            is_favorite: false,
        }
    }
}

/// A lab test the doctor can order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LabTestType {
    #[serde(flatten)]
    pub meta: RecordMeta,
    #[serde(default, deserialize_with = "lenient_string")]
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl LabTestType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            meta: RecordMeta::new(),
            name: name.into(),
            category: None,
            description: None,
        }
    }
}

impl Entity for Drug {
    const COLLECTION: Collection = Collection::Drugs;

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }
}

impl Entity for LabTestType {
    const COLLECTION: Collection = Collection::LabTestTypes;

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }
}
