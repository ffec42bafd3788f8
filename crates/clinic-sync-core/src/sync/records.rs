//! Record-level access to the local store.
//!
//! Every local write of a syncable record, from the write path or from the
//! reconciler, goes through [`RecordStore::write`] or
//! [`RecordStore::apply_pulled`], both single-statement upserts.

use std::sync::Arc;

use crate::db::{DbError, Filter, LocalStore, Row, SqlValue};
use crate::models::{is_path_safe_id, Collection, SyncRecord};

use super::error::{SyncError, SyncResult};

/// Local-only acknowledgement column.
const SYNCED_AT: &str = "synced_at";

/// Vetoes replacing a local tombstone with a remote live copy that is not
/// strictly newer.
const TOMBSTONE_GUARD: &str =
    "NOT (is_deleted = 1 AND excluded.is_deleted = 0 AND excluded.last_modified <= last_modified)";

/// Who produced the copy being written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOrigin {
    /// Local-only mutation. A previous acknowledgement is kept.
    Local,
    /// The server holds this copy as of the given time.
    Acknowledged(String),
}

/// A record plus its local acknowledgement time.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub record: SyncRecord,
    /// NULL until the server has acknowledged the row once.
    pub synced_at: Option<String>,
}

impl StoredRecord {
    fn from_row(collection: Collection, row: &Row) -> SyncResult<Self> {
        let synced_at = match row.get(SYNCED_AT) {
            Some(SqlValue::Text(ts)) => Some(ts.clone()),
            _ => None,
        };
        Ok(Self {
            record: SyncRecord::from_row(collection, row)?,
            synced_at,
        })
    }

    /// Known to the server.
    pub fn is_acknowledged(&self) -> bool {
        self.synced_at.is_some()
    }
}

#[derive(Clone)]
pub struct RecordStore {
    store: Arc<dyn LocalStore>,
}

impl RecordStore {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }

    pub fn get(&self, collection: Collection, id: &str) -> SyncResult<Option<StoredRecord>> {
        let rows = self.store.query(
            collection.table(),
            Some(&Filter::eq("id", id)),
            None,
            Some(1),
        )?;
        rows.first()
            .map(|row| StoredRecord::from_row(collection, row))
            .transpose()
    }

    /// Non-deleted records of `owner_id`, newest first.
    pub fn list_active(&self, collection: Collection, owner_id: &str) -> SyncResult<Vec<SyncRecord>> {
        let filter = Filter::new(
            "owner_id = ? AND is_deleted = 0",
            vec![SqlValue::Text(owner_id.to_string())],
        );
        let rows = self
            .store
            .query(collection.table(), Some(&filter), Some("last_modified DESC"), None)?;
        rows.iter()
            .map(|row| SyncRecord::from_row(collection, row).map_err(SyncError::from))
            .collect()
    }

    /// Records of `owner_id` modified after `since` (all when `None`), oldest first.
    pub fn dirty_since(
        &self,
        collection: Collection,
        owner_id: &str,
        since: Option<&str>,
    ) -> SyncResult<Vec<StoredRecord>> {
        let filter = dirty_filter(owner_id, since);
        let rows = self
            .store
            .query(collection.table(), Some(&filter), Some("last_modified ASC, id ASC"), None)?;
        rows.iter()
            .map(|row| StoredRecord::from_row(collection, row))
            .collect()
    }

    pub fn count_dirty(
        &self,
        collection: Collection,
        owner_id: &str,
        since: Option<&str>,
    ) -> SyncResult<usize> {
        let filter = dirty_filter(owner_id, since);
        let sql = format!(
            "SELECT COUNT(*) AS n FROM {} WHERE {}",
            collection.table(),
            filter.expr
        );
        let rows = self.store.raw_query(&sql, &filter.args)?;
        match rows.first().and_then(|row| row.get("n")) {
            Some(SqlValue::Integer(n)) => Ok(*n as usize),
            _ => Ok(0),
        }
    }

    /// Insert or replace `record`, keeping columns the record does not carry.
    pub fn write(
        &self,
        collection: Collection,
        record: &SyncRecord,
        origin: WriteOrigin,
    ) -> SyncResult<()> {
        let mut row = record_row(collection, record)?;
        if let WriteOrigin::Acknowledged(at) = origin {
            row.insert(SYNCED_AT.into(), SqlValue::Text(at));
        }
        self.store.upsert(collection.table(), "id", &row, None)?;
        Ok(())
    }

    /// Apply a server copy. Returns false when a local tombstone kept its place.
    pub fn apply_pulled(
        &self,
        collection: Collection,
        record: &SyncRecord,
        synced_at: &str,
    ) -> SyncResult<bool> {
        let mut row = record_row(collection, record)?;
        row.insert(SYNCED_AT.into(), SqlValue::Text(synced_at.to_string()));
        Ok(self
            .store
            .upsert(collection.table(), "id", &row, Some(TOMBSTONE_GUARD))?)
    }

    /// Record that the server now holds row `id`.
    pub fn mark_acknowledged(&self, collection: Collection, id: &str, at: &str) -> SyncResult<()> {
        let mut row = Row::new();
        row.insert(SYNCED_AT.into(), SqlValue::Text(at.to_string()));
        self.store
            .update(collection.table(), &row, &Filter::eq("id", id))?;
        Ok(())
    }

    /// Physically remove acknowledged tombstones last modified at or before
    /// `watermark`. They can no longer be pushed or resurrected.
    pub fn evict_synced_tombstones(&self, collection: Collection, watermark: &str) -> SyncResult<usize> {
        let filter = Filter::new(
            "is_deleted = 1 AND synced_at IS NOT NULL AND last_modified <= ?",
            vec![SqlValue::Text(watermark.to_string())],
        );
        Ok(self.store.delete(collection.table(), &filter)?)
    }

    /// Validate that `record` fits the collection's columns.
    pub fn check(&self, collection: Collection, record: &SyncRecord) -> SyncResult<()> {
        record_row(collection, record).map(|_| ())
    }
}

fn dirty_filter(owner_id: &str, since: Option<&str>) -> Filter {
    match since {
        Some(since) => Filter::new(
            "owner_id = ? AND last_modified > ?",
            vec![
                SqlValue::Text(owner_id.to_string()),
                SqlValue::Text(since.to_string()),
            ],
        ),
        None => Filter::eq("owner_id", owner_id),
    }
}

/// Conversion failures are bad input, not storage failures.
fn record_row(collection: Collection, record: &SyncRecord) -> SyncResult<Row> {
    if record.id.is_empty() {
        return Err(SyncError::Malformed(format!("{} record without id", collection)));
    }
    if !is_path_safe_id(&record.id) {
        return Err(SyncError::Malformed(format!(
            "{} record has unusable id {:?}",
            collection, record.id
        )));
    }
    record.to_row(collection).map_err(|e| match e {
        DbError::Constraint(message) => SyncError::Malformed(message),
        other => SyncError::Storage(other),
    })
}
