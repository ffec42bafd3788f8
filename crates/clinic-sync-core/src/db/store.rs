//! Generic table store used by the sync layer.
//!
//! Rows are column-name → SQL value maps, so one implementation serves every
//! syncable table plus `sync_tracking`.

use std::collections::BTreeMap;

use rusqlite::{params_from_iter, Statement};

pub use rusqlite::types::Value as SqlValue;

use super::{Database, DbError, DbResult};

/// A table row keyed by column name.
pub type Row = BTreeMap<String, SqlValue>;

/// A `WHERE` expression with `?` placeholders and its arguments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub expr: String,
    pub args: Vec<SqlValue>,
}

impl Filter {
    pub fn new(expr: impl Into<String>, args: Vec<SqlValue>) -> Self {
        Self {
            expr: expr.into(),
            args,
        }
    }

    /// `column = ?` against a text value.
    pub fn eq(column: &str, value: &str) -> Self {
        Self::new(
            format!("{} = ?", column),
            vec![SqlValue::Text(value.to_string())],
        )
    }
}

/// Durable, transactional key-structured table store.
///
/// Every call is its own transaction boundary. Implementations must serialize
/// concurrent writers; callers add no locking of their own.
pub trait LocalStore: Send + Sync {
    /// Select rows, optionally filtered, ordered and limited.
    fn query(
        &self,
        table: &str,
        filter: Option<&Filter>,
        order_by: Option<&str>,
        limit: Option<usize>,
    ) -> DbResult<Vec<Row>>;

    /// Insert a new row. Fails if the primary key already exists.
    fn insert(&self, table: &str, row: &Row) -> DbResult<()>;

    /// Set the given columns on every row matching `filter`.
    fn update(&self, table: &str, row: &Row, filter: &Filter) -> DbResult<usize>;

    /// Physically delete matching rows. Only used for cache eviction.
    fn delete(&self, table: &str, filter: &Filter) -> DbResult<usize>;

    /// Insert `row`, replacing the columns it carries on any existing row with
    /// the same `key`. Columns absent from `row` keep their stored value.
    ///
    /// `guard` is an optional SQL condition evaluated against the existing row
    /// (`excluded.<col>` names the incoming value); when it is false the
    /// existing row is left untouched. Returns whether a row was written.
    fn upsert(&self, table: &str, key: &str, row: &Row, guard: Option<&str>) -> DbResult<bool>;

    /// Upsert several rows in a single transaction.
    fn upsert_many(&self, table: &str, key: &str, rows: &[Row]) -> DbResult<usize>;

    /// Escape hatch for queries the structured calls cannot express.
    fn raw_query(&self, sql: &str, args: &[SqlValue]) -> DbResult<Vec<Row>>;
}

impl LocalStore for Database {
    fn query(
        &self,
        table: &str,
        filter: Option<&Filter>,
        order_by: Option<&str>,
        limit: Option<usize>,
    ) -> DbResult<Vec<Row>> {
        validate_identifier(table)?;

        let mut sql = format!("SELECT * FROM {}", table);
        let mut args: &[SqlValue] = &[];
        if let Some(filter) = filter {
            sql.push_str(" WHERE ");
            sql.push_str(&filter.expr);
            args = filter.args.as_slice();
        }
        if let Some(order_by) = order_by {
            validate_order_by(order_by)?;
            sql.push_str(" ORDER BY ");
            sql.push_str(order_by);
        }
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        collect_rows(&mut stmt, args)
    }

    fn insert(&self, table: &str, row: &Row) -> DbResult<()> {
        validate_identifier(table)?;
        let columns = row_columns(row)?;

        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            table,
            columns.join(", "),
            placeholders(columns.len())
        );

        self.conn()?.execute(&sql, params_from_iter(row.values()))?;
        Ok(())
    }

    fn update(&self, table: &str, row: &Row, filter: &Filter) -> DbResult<usize> {
        validate_identifier(table)?;
        let columns = row_columns(row)?;

        let assignments: Vec<String> = columns.iter().map(|c| format!("{} = ?", c)).collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            table,
            assignments.join(", "),
            filter.expr
        );

        let args = row.values().chain(filter.args.iter());
        let rows_affected = self.conn()?.execute(&sql, params_from_iter(args))?;
        Ok(rows_affected)
    }

    fn delete(&self, table: &str, filter: &Filter) -> DbResult<usize> {
        validate_identifier(table)?;

        let sql = format!("DELETE FROM {} WHERE {}", table, filter.expr);
        let rows_affected = self
            .conn()?
            .execute(&sql, params_from_iter(filter.args.iter()))?;
        Ok(rows_affected)
    }

    fn upsert(&self, table: &str, key: &str, row: &Row, guard: Option<&str>) -> DbResult<bool> {
        let sql = upsert_sql(table, key, row, guard)?;
        let rows_affected = self.conn()?.execute(&sql, params_from_iter(row.values()))?;
        Ok(rows_affected > 0)
    }

    fn upsert_many(&self, table: &str, key: &str, rows: &[Row]) -> DbResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let mut written = 0;
        for row in rows {
            let sql = upsert_sql(table, key, row, None)?;
            written += tx.execute(&sql, params_from_iter(row.values()))?;
        }

        tx.commit()?;
        Ok(written)
    }

    fn raw_query(&self, sql: &str, args: &[SqlValue]) -> DbResult<Vec<Row>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        collect_rows(&mut stmt, args)
    }
}

/// Build `INSERT .. ON CONFLICT(key) DO UPDATE` for the columns in `row`.
fn upsert_sql(table: &str, key: &str, row: &Row, guard: Option<&str>) -> DbResult<String> {
    validate_identifier(table)?;
    validate_identifier(key)?;
    let columns = row_columns(row)?;

    if !row.contains_key(key) {
        return Err(DbError::Constraint(format!(
            "upsert into {} requires key column {}",
            table, key
        )));
    }

    let updates: Vec<String> = columns
        .iter()
        .filter(|c| **c != key)
        .map(|c| format!("{} = excluded.{}", c, c))
        .collect();

    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT({}) ",
        table,
        columns.join(", "),
        placeholders(columns.len()),
        key
    );

    if updates.is_empty() {
        sql.push_str("DO NOTHING");
    } else {
        sql.push_str("DO UPDATE SET ");
        sql.push_str(&updates.join(", "));
        if let Some(guard) = guard {
            sql.push_str(" WHERE ");
            sql.push_str(guard);
        }
    }

    Ok(sql)
}

fn collect_rows(stmt: &mut Statement<'_>, args: &[SqlValue]) -> DbResult<Vec<Row>> {
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

    let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
        let mut out = Row::new();
        for (i, name) in names.iter().enumerate() {
            out.insert(name.clone(), row.get::<_, SqlValue>(i)?);
        }
        Ok(out)
    })?;

    rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
}

fn row_columns(row: &Row) -> DbResult<Vec<&str>> {
    if row.is_empty() {
        return Err(DbError::Constraint("row has no columns".into()));
    }
    row.keys()
        .map(|c| validate_identifier(c).map(|_| c.as_str()))
        .collect()
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

/// Table and column names are interpolated into SQL, so only plain
/// identifiers are accepted.
fn validate_identifier(name: &str) -> DbResult<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };

    if valid {
        Ok(())
    } else {
        Err(DbError::InvalidIdentifier(name.to_string()))
    }
}

fn validate_order_by(order_by: &str) -> DbResult<()> {
    for term in order_by.split(',') {
        let mut parts = term.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some(column), direction, None) => {
                validate_identifier(column)?;
                if let Some(direction) = direction {
                    if !direction.eq_ignore_ascii_case("asc") && !direction.eq_ignore_ascii_case("desc")
                    {
                        return Err(DbError::InvalidIdentifier(order_by.to_string()));
                    }
                }
            }
            _ => return Err(DbError::InvalidIdentifier(order_by.to_string())),
        }
    }
    Ok(())
}
