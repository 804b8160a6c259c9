//! Branch-scoped access handles.

use crate::error::{Result, VcError};
use crate::store::with_transaction;
use crate::tables::{read_rows, record_rows, validate_table_name, Registry, TableInfo};
use crate::types::{quote_ident, Branch, Namespace, Row, Value, HASH_COLUMN};
use parking_lot::Mutex;
use rusqlite::{Connection, ToSql, TransactionBehavior};
use tracing::debug;

/// Row selection for updates and deletes.
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    /// Every row.
    All,
    /// The row with this key.
    Key(Value),
    /// Rows whose column equals the value (`IS` semantics, so `Null` matches null).
    Eq(String, Value),
}

impl Filter {
    pub fn key(value: impl Into<Value>) -> Self {
        Filter::Key(value.into())
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(column.into(), value.into())
    }

    fn to_sql(&self, info: &TableInfo) -> Result<(String, Vec<Value>)> {
        match self {
            Filter::All => Ok(("1".to_string(), Vec::new())),
            Filter::Key(value) => Ok((format!("{} IS ?", info.key_expr()), vec![value.clone()])),
            Filter::Eq(column, value) => {
                if !info.has_column(column) {
                    return Err(unknown_column(&info.table, column));
                }
                Ok((format!("{} IS ?", quote_ident(column)), vec![value.clone()]))
            }
        }
    }
}

/// Access handle confined to one branch's namespace.
///
/// Every call runs in its own transaction. Writes into tracked tables resolve
/// row digests before that transaction commits, so no reader ever sees a
/// tracked row without its digest.
pub struct BranchHandle<'r> {
    conn: &'r Mutex<Connection>,
    branch: String,
    namespace: Namespace,
}

impl<'r> BranchHandle<'r> {
    pub(crate) fn new(conn: &'r Mutex<Connection>, branch: Branch) -> Self {
        Self {
            conn,
            branch: branch.name,
            namespace: branch.namespace,
        }
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Every row of `table`, ordered by key.
    pub fn rows(&self, table: &str) -> Result<Vec<Row>> {
        with_transaction(self.conn, TransactionBehavior::Deferred, |tx| {
            let info = self.layout(tx, table)?;
            let rows = read_rows(tx, &self.namespace, &info, "1", &[])?;
            Ok(rows.into_iter().map(|(_, row)| row).collect())
        })
    }

    /// The row with `key`, if any.
    pub fn get(&self, table: &str, key: impl Into<Value>) -> Result<Option<Row>> {
        let key = key.into();
        with_transaction(self.conn, TransactionBehavior::Deferred, |tx| {
            let info = self.layout(tx, table)?;
            let condition = format!("{} IS ?1", info.key_expr());
            let mut rows = read_rows(tx, &self.namespace, &info, &condition, &[&key])?;
            Ok(rows.pop().map(|(_, row)| row))
        })
    }

    pub fn count(&self, table: &str) -> Result<u64> {
        with_transaction(self.conn, TransactionBehavior::Deferred, |tx| {
            self.layout(tx, table)?;
            let count: i64 = tx.query_row(
                &format!("SELECT COUNT(*) FROM {}", self.namespace.qualify(table)),
                [],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    /// Insert a row, returning it as stored (key, defaults and digest filled in).
    ///
    /// Any `vc_hash` value supplied by the caller is ignored.
    pub fn insert(&self, table: &str, mut row: Row) -> Result<Row> {
        row.remove(HASH_COLUMN);
        with_transaction(self.conn, TransactionBehavior::Immediate, |tx| {
            let info = self.layout(tx, table)?;
            check_columns(&info, &row)?;

            let physical = self.namespace.qualify(table);
            if row.is_empty() {
                tx.execute(&format!("INSERT INTO {physical} DEFAULT VALUES"), [])?;
            } else {
                let columns: Vec<String> = row.columns().map(|(c, _)| quote_ident(c)).collect();
                let placeholders = vec!["?"; columns.len()].join(", ");
                let values: Vec<&dyn ToSql> = row.columns().map(|(_, v)| v as &dyn ToSql).collect();
                tx.execute(
                    &format!(
                        "INSERT INTO {physical} ({}) VALUES ({placeholders})",
                        columns.join(", ")
                    ),
                    values.as_slice(),
                )?;
            }

            let (condition, inserted) = match row.get(&info.key) {
                Some(key) if !key.is_null() && !info.key_is_rowid() => {
                    (format!("{} = ?1", info.key_expr()), key.clone())
                }
                _ => ("rowid = ?1".to_string(), Value::Integer(tx.last_insert_rowid())),
            };
            let rows = read_rows(tx, &self.namespace, &info, &condition, &[&inserted])?;

            let mut stored = self.resolve(tx, &info, rows)?;
            debug!(branch = %self.branch, table, "row inserted");
            stored
                .pop()
                .ok_or_else(|| VcError::not_found("row", format!("{table} {inserted:?}")))
        })
    }

    /// Apply `changes` to every row matched by `filter`; returns the number of rows.
    ///
    /// The key column cannot be changed.
    pub fn update(&self, table: &str, filter: Filter, mut changes: Row) -> Result<usize> {
        changes.remove(HASH_COLUMN);
        if changes.is_empty() {
            return Err(VcError::InvalidOperation("update without columns".into()));
        }

        with_transaction(self.conn, TransactionBehavior::Immediate, |tx| {
            let info = self.layout(tx, table)?;
            check_columns(&info, &changes)?;
            if changes.contains(&info.key) {
                return Err(VcError::InvalidOperation(format!(
                    "key column {} of {table} cannot be updated",
                    info.key
                )));
            }

            let (condition, filter_values) = filter.to_sql(&info)?;
            let physical = self.namespace.qualify(table);

            let keys = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {} FROM {physical} WHERE {condition}",
                    info.key_expr()
                ))?;
                let params: Vec<&dyn ToSql> =
                    filter_values.iter().map(|v| v as &dyn ToSql).collect();
                let keys = stmt
                    .query_map(params.as_slice(), |row| row.get::<_, Value>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                keys
            };

            let assignments: Vec<String> = changes
                .columns()
                .map(|(c, _)| format!("{} = ?", quote_ident(c)))
                .collect();
            let params: Vec<&dyn ToSql> = changes
                .columns()
                .map(|(_, v)| v as &dyn ToSql)
                .chain(filter_values.iter().map(|v| v as &dyn ToSql))
                .collect();
            let updated = tx.execute(
                &format!(
                    "UPDATE {physical} SET {} WHERE {condition}",
                    assignments.join(", ")
                ),
                params.as_slice(),
            )?;

            let by_key = format!("{} = ?1", info.key_expr());
            for key in &keys {
                let rows = read_rows(tx, &self.namespace, &info, &by_key, &[key])?;
                self.resolve(tx, &info, rows)?;
            }

            debug!(branch = %self.branch, table, rows = updated, "rows updated");
            Ok(updated)
        })
    }

    /// Delete every row matched by `filter`; returns the number of rows.
    pub fn delete(&self, table: &str, filter: Filter) -> Result<usize> {
        with_transaction(self.conn, TransactionBehavior::Immediate, |tx| {
            let info = self.layout(tx, table)?;
            let (condition, values) = filter.to_sql(&info)?;
            let params: Vec<&dyn ToSql> = values.iter().map(|v| v as &dyn ToSql).collect();
            let deleted = tx.execute(
                &format!(
                    "DELETE FROM {} WHERE {condition}",
                    self.namespace.qualify(table)
                ),
                params.as_slice(),
            )?;
            debug!(branch = %self.branch, table, rows = deleted, "rows deleted");
            Ok(deleted)
        })
    }

    /// Layout of `table` in this handle's namespace.
    fn layout(&self, conn: &Connection, table: &str) -> Result<TableInfo> {
        validate_table_name(table)?;
        TableInfo::require(conn, &self.namespace, table)
    }

    /// Record digests for freshly written rows when the table is tracked.
    fn resolve(
        &self,
        conn: &Connection,
        info: &TableInfo,
        rows: Vec<(Value, Row)>,
    ) -> Result<Vec<Row>> {
        if Registry::new(conn).is_tracked(&info.table)? && info.has_column(HASH_COLUMN) {
            record_rows(conn, &self.namespace, info, rows)
        } else {
            Ok(rows.into_iter().map(|(_, row)| row).collect())
        }
    }
}

fn check_columns(info: &TableInfo, row: &Row) -> Result<()> {
    match row.columns().find(|(c, _)| !info.has_column(c)) {
        Some((column, _)) => Err(unknown_column(&info.table, column)),
        None => Ok(()),
    }
}

fn unknown_column(table: &str, column: &str) -> VcError {
    VcError::InvalidOperation(format!("{table} has no column {column}"))
}
