//! Per-collection sync watermarks in `sync_tracking`.

use std::sync::Arc;

use crate::db::{Filter, LocalStore, Row, SqlValue};
use crate::models::{parse_timestamp, Collection};

use super::error::SyncResult;

const TABLE: &str = "sync_tracking";
const KEY: &str = "collection_name";
const VALUE: &str = "last_sync_timestamp";

#[derive(Clone)]
pub struct Watermarks {
    store: Arc<dyn LocalStore>,
}

impl Watermarks {
    pub fn new(store: Arc<dyn LocalStore>) -> Self {
        Self { store }
    }

    /// `None` means the collection has never completed a sync.
    pub fn get(&self, collection: Collection) -> SyncResult<Option<String>> {
        let rows = self.store.query(
            TABLE,
            Some(&Filter::eq(KEY, collection.table())),
            None,
            Some(1),
        )?;
        Ok(rows.first().and_then(|row| match row.get(VALUE) {
            Some(SqlValue::Text(ts)) => Some(ts.clone()),
            _ => None,
        }))
    }

    /// Write all `marks` in one transaction.
    pub fn commit(&self, marks: &[(Collection, String)]) -> SyncResult<()> {
        if marks.is_empty() {
            return Ok(());
        }

        let rows: Vec<Row> = marks
            .iter()
            .map(|(collection, ts)| {
                let mut row = Row::new();
                row.insert(KEY.into(), SqlValue::Text(collection.table().to_string()));
                row.insert(VALUE.into(), SqlValue::Text(ts.clone()));
                row
            })
            .collect();

        self.store.upsert_many(TABLE, KEY, &rows)?;
        Ok(())
    }
}

/// The watermark to commit after a successful cycle that started at
/// `cycle_start`: never earlier than `current`.
pub fn advance(current: Option<&str>, cycle_start: &str) -> String {
    match current {
        Some(current) => match (parse_timestamp(current), parse_timestamp(cycle_start)) {
            (Some(c), Some(s)) if c > s => current.to_string(),
            _ => cycle_start.to_string(),
        },
        None => cycle_start.to_string(),
    }
}
