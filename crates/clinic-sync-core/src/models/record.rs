//! Collection-agnostic syncable records.
//!
//! A [`SyncRecord`] is the JSON shape exchanged with the server: bookkeeping
//! fields plus the collection's domain fields. It converts to and from local
//! rows using the column layout of its [`Collection`].

use chrono::Utc;
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::collection::{Collection, ColumnKind};
use super::timestamp::format_timestamp;
use crate::db::{DbError, DbResult, Row, SqlValue};

/// A record of any collection, as exchanged with the remote API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub owner_id: String,
    #[serde(default)]
    pub last_modified: String,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_deleted: bool,
    /// Domain fields keyed by their JSON name.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl SyncRecord {
    pub fn from_json(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }

    pub fn to_json(&self) -> serde_json::Result<Value> {
        serde_json::to_value(self)
    }

    pub fn from_entity<E: Entity>(entity: &E) -> serde_json::Result<Self> {
        serde_json::from_value(serde_json::to_value(entity)?)
    }

    pub fn into_entity<E: Entity>(self) -> serde_json::Result<E> {
        serde_json::from_value(self.to_json()?)
    }

    /// Local row for `collection`. Unknown fields are dropped; missing text
    /// fields become NULL and missing flags become 0.
    pub fn to_row(&self, collection: Collection) -> DbResult<Row> {
        let mut row = Row::new();
        row.insert("id".into(), SqlValue::Text(self.id.clone()));
        row.insert("owner_id".into(), SqlValue::Text(self.owner_id.clone()));
        row.insert(
            "last_modified".into(),
            SqlValue::Text(self.last_modified.clone()),
        );
        row.insert("is_deleted".into(), SqlValue::Integer(self.is_deleted as i64));

        for column in collection.columns() {
            let value = self.fields.get(column.json).unwrap_or(&Value::Null);
            let sql = match column.kind {
                ColumnKind::Text => match value {
                    Value::Null => SqlValue::Null,
                    Value::String(s) => SqlValue::Text(s.clone()),
                    Value::Number(_) | Value::Bool(_) => SqlValue::Text(value.to_string()),
                    _ => return Err(type_mismatch(collection, column.json, value)),
                },
                ColumnKind::Bool => match json_as_bool(value) {
                    Some(b) => SqlValue::Integer(b as i64),
                    None => return Err(type_mismatch(collection, column.json, value)),
                },
            };
            row.insert(column.name.into(), sql);
        }

        Ok(row)
    }

    /// Rebuild a record from a local row of `collection`.
    pub fn from_row(collection: Collection, row: &Row) -> DbResult<Self> {
        let mut fields = Map::new();
        for column in collection.columns() {
            let value = match (row.get(column.name), column.kind) {
                (None, ColumnKind::Bool) => Value::Bool(false),
                (None, ColumnKind::Text) => Value::Null,
                (Some(SqlValue::Integer(i)), ColumnKind::Bool) => Value::Bool(*i != 0),
                (Some(value), _) => sql_to_json(value),
            };
            fields.insert(column.json.to_string(), value);
        }

        Ok(Self {
            id: text_column(row, "id")?,
            owner_id: text_column(row, "owner_id")?,
            last_modified: text_column(row, "last_modified")?,
            is_deleted: matches!(row.get("is_deleted"), Some(SqlValue::Integer(i)) if *i != 0),
            fields,
        })
    }
}

/// Bookkeeping fields shared by every typed entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordMeta {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub owner_id: String,
    #[serde(default)]
    pub last_modified: String,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_deleted: bool,
}

impl RecordMeta {
    /// Fresh metadata: new UUID, no owner yet (filled on create).
    pub fn new() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: String::new(),
            last_modified: format_timestamp(Utc::now()),
            is_deleted: false,
        }
    }
}

impl Default for RecordMeta {
    fn default() -> Self {
        Self::new()
    }
}

/// A typed record bound to one collection.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync {
    const COLLECTION: Collection;

    fn meta(&self) -> &RecordMeta;
}

/// Accepts JSON booleans, 0/1 numbers, "true"/"false" strings and null.
/// Required text read back as `""` when the column is NULL.
pub(crate) fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

pub(crate) fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    json_as_bool(&value)
        .ok_or_else(|| de::Error::custom(format!("expected boolean, got {}", value)))
}

fn json_as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Null => Some(false),
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn sql_to_json(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => Value::from(*i),
        SqlValue::Real(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        SqlValue::Text(s) => Value::String(s.clone()),
        SqlValue::Blob(_) => Value::Null,
    }
}

fn text_column(row: &Row, name: &str) -> DbResult<String> {
    match row.get(name) {
        Some(SqlValue::Text(s)) => Ok(s.clone()),
        _ => Err(DbError::Constraint(format!("row has no text column {}", name))),
    }
}

fn type_mismatch(collection: Collection, field: &str, value: &Value) -> DbError {
    DbError::Constraint(format!(
        "{}.{} cannot hold {}",
        collection, field, value
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn prescription_json() -> Value {
        json!({
            "id": "rx-1",
            "ownerId": "doc-1",
            "lastModified": "2024-01-15T10:00:00.000Z",
            "isDeleted": false,
            "visitId": "v-1",
            "drugName": "Amoxicillin",
            "dosage": "500mg",
            "sentToPharmacy": true,
            "_serverRevision": 7
        })
    }

    #[test]
    fn test_from_json_keeps_domain_fields() {
        let record = SyncRecord::from_json(prescription_json()).unwrap();
        assert_eq!(record.id, "rx-1");
        assert_eq!(record.owner_id, "doc-1");
        assert!(!record.is_deleted);
        assert_eq!(record.fields["drugName"], "Amoxicillin");
        assert!(!record.fields.contains_key("ownerId"));
    }

    #[test]
    fn test_to_row_converts_flags_and_drops_unknown() {
        let record = SyncRecord::from_json(prescription_json()).unwrap();
        let row = record.to_row(Collection::Prescriptions).unwrap();

        assert_eq!(row["sent_to_pharmacy"], SqlValue::Integer(1));
        assert_eq!(row["drug_name"], SqlValue::Text("Amoxicillin".into()));
        assert_eq!(row["frequency"], SqlValue::Null);
        assert_eq!(row["is_deleted"], SqlValue::Integer(0));
        assert!(!row.contains_key("_serverRevision"));
        assert!(!row.contains_key("synced_at"));
    }

    #[test]
    fn test_from_row_restores_booleans() {
        let record = SyncRecord::from_json(prescription_json()).unwrap();
        let row = record.to_row(Collection::Prescriptions).unwrap();
        let back = SyncRecord::from_row(Collection::Prescriptions, &row).unwrap();

        assert_eq!(back.fields["sentToPharmacy"], Value::Bool(true));
        assert_eq!(back.fields["frequency"], Value::Null);
        assert_eq!(back.last_modified, "2024-01-15T10:00:00.000Z");
    }

    #[test]
    fn test_numeric_booleans_accepted() {
        let record = SyncRecord::from_json(json!({
            "id": "d-1",
            "ownerId": "doc-1",
            "lastModified": "2024-01-15T10:00:00.000Z",
            "isDeleted": 1,
            "isFavorite": 0
        }))
        .unwrap();

        assert!(record.is_deleted);
        let row = record.to_row(Collection::Drugs).unwrap();
        assert_eq!(row["is_favorite"], SqlValue::Integer(0));
        assert_eq!(row["is_deleted"], SqlValue::Integer(1));
    }

    #[test]
    fn test_nested_value_rejected_for_text_column() {
        let mut record = SyncRecord::from_json(prescription_json()).unwrap();
        record.fields.insert("dosage".into(), json!({"mg": 500}));
        assert!(matches!(
            record.to_row(Collection::Prescriptions),
            Err(DbError::Constraint(_))
        ));
    }

    #[test]
    fn test_garbage_boolean_rejected() {
        let result = SyncRecord::from_json(json!({"id": "x", "isDeleted": "maybe"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_record_meta_new() {
        let meta = RecordMeta::new();
        assert_eq!(meta.id.len(), 36);
        assert!(meta.owner_id.is_empty());
        assert!(!meta.is_deleted);
        assert!(meta.last_modified.ends_with('Z'));
    }

    proptest! {
        #[test]
        fn flag_columns_survive_row_conversion(favorite in any::<bool>(), deleted in any::<bool>()) {
            let record = SyncRecord::from_json(json!({
                "id": "d-1",
                "ownerId": "doc-1",
                "lastModified": "2024-01-15T10:00:00.000Z",
                "isDeleted": deleted,
                "isFavorite": favorite
            })).unwrap();

            let row = record.to_row(Collection::Drugs).unwrap();
            let back = SyncRecord::from_row(Collection::Drugs, &row).unwrap();
            prop_assert_eq!(back.is_deleted, deleted);
            prop_assert_eq!(&back.fields["isFavorite"], &Value::Bool(favorite));
        }
    }
}
