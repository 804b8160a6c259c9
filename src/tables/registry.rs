//! Tracked-table registry implementation.

use super::layout::{read_rows, TableInfo};
use super::validate_table_name;
use crate::blobs::ContentStore;
use crate::error::{Result, VcError};
use crate::types::{quote_ident, Hash, Namespace, Row, TrackedTable, Value, HASH_COLUMN};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

/// Registry of versioned tables over one open connection or transaction.
pub struct Registry<'c> {
    conn: &'c Connection,
}

impl<'c> Registry<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub(crate) fn create_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE vc_tracked_tables (
                table_name TEXT PRIMARY KEY,
                enabled    INTEGER NOT NULL DEFAULT 1
            );",
        )?;
        Ok(())
    }

    /// Start versioning `table`.
    ///
    /// Adds the hash column where missing and resolves the digest of every
    /// existing row in each of `namespaces` that holds the table. Returns
    /// `false` when the table was already tracked.
    pub fn track(&self, table: &str, namespaces: &[Namespace]) -> Result<bool> {
        validate_table_name(table)?;

        if self.status(table)? == Some(true) {
            debug!(table, "table already tracked");
            return Ok(false);
        }

        TableInfo::require(self.conn, &Namespace::primary(), table)?;

        self.conn.execute(
            "INSERT INTO vc_tracked_tables (table_name, enabled) VALUES (?1, 1)
             ON CONFLICT (table_name) DO UPDATE SET enabled = 1",
            params![table],
        )?;

        let mut hashed = 0usize;
        for namespace in namespaces {
            let Some(info) = TableInfo::load(self.conn, namespace, table)? else {
                continue;
            };
            let info = self.ensure_hash_column(namespace, info)?;
            let rows = read_rows(self.conn, namespace, &info, "1", &[])?;
            hashed += rows.len();
            record_rows(self.conn, namespace, &info, rows)?;
        }

        info!(table, rows = hashed, "table tracked");
        Ok(true)
    }

    /// Stop versioning `table`. Recorded content is kept.
    pub fn untrack(&self, table: &str) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE vc_tracked_tables SET enabled = 0 WHERE table_name = ?1",
            params![table],
        )?;
        if updated == 0 {
            return Err(VcError::UntrackedTable(table.to_string()));
        }
        info!(table, "table untracked");
        Ok(())
    }

    /// `Some(enabled)` for a registered table, `None` otherwise.
    pub fn status(&self, table: &str) -> Result<Option<bool>> {
        Ok(self
            .conn
            .query_row(
                "SELECT enabled FROM vc_tracked_tables WHERE table_name = ?1",
                params![table],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .map(|enabled| enabled != 0))
    }

    pub fn is_tracked(&self, table: &str) -> Result<bool> {
        Ok(self.status(table)? == Some(true))
    }

    /// Every registered table, by name.
    pub fn list(&self) -> Result<Vec<TrackedTable>> {
        let mut stmt = self
            .conn
            .prepare("SELECT table_name, enabled FROM vc_tracked_tables ORDER BY table_name")?;
        let tables = stmt
            .query_map([], |row| {
                Ok(TrackedTable {
                    name: row.get(0)?,
                    enabled: row.get::<_, i64>(1)? != 0,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tables)
    }

    /// Names of the tables that contribute to manifests.
    pub fn enabled(&self) -> Result<Vec<String>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|t| t.enabled)
            .map(|t| t.name)
            .collect())
    }

    /// Current `(key, digest)` pairs of `table` in `namespace`, ordered by key.
    ///
    /// A tracked table that the namespace does not hold snapshots as empty.
    pub fn snapshot(&self, table: &str, namespace: &Namespace) -> Result<Vec<(Value, Hash)>> {
        if !self.is_tracked(table)? {
            return Err(VcError::UntrackedTable(table.to_string()));
        }
        let Some(info) = TableInfo::load(self.conn, namespace, table)? else {
            return Ok(Vec::new());
        };

        let sql = format!(
            "SELECT {key}, {hash} FROM {physical} ORDER BY {key}",
            key = info.key_expr(),
            hash = quote_ident(HASH_COLUMN),
            physical = namespace.qualify(table),
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let pairs = stmt
            .query_map([], |row| Ok((row.get::<_, Value>(0)?, row.get::<_, Option<Hash>>(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        pairs
            .into_iter()
            .map(|(key, digest)| {
                digest.map(|d| (key.clone(), d)).ok_or_else(|| {
                    VcError::InvalidHash(format!("{table} row {key:?} has no digest"))
                })
            })
            .collect()
    }

    fn ensure_hash_column(&self, namespace: &Namespace, info: TableInfo) -> Result<TableInfo> {
        if info.has_column(HASH_COLUMN) {
            return Ok(info);
        }
        self.conn.execute_batch(&format!(
            "ALTER TABLE {} ADD COLUMN {} TEXT",
            namespace.qualify(&info.table),
            quote_ident(HASH_COLUMN),
        ))?;
        TableInfo::require(self.conn, namespace, &info.table)
    }
}

/// Resolve and store the digest of each row, returning the rows as stored.
pub(crate) fn record_rows(
    conn: &Connection,
    namespace: &Namespace,
    info: &TableInfo,
    rows: Vec<(Value, Row)>,
) -> Result<Vec<Row>> {
    let content = ContentStore::new(conn);
    let update = format!(
        "UPDATE {} SET {} = ?1 WHERE {} = ?2",
        namespace.qualify(&info.table),
        quote_ident(HASH_COLUMN),
        info.key_expr(),
    );

    let mut stored = Vec::with_capacity(rows.len());
    for (key, mut row) in rows {
        if key.is_null() {
            return Err(VcError::InvalidOperation(format!(
                "tracked table {} needs a non-null {} on every row",
                info.table, info.key
            )));
        }
        let digest = content.record(&info.table, &row)?;
        if row.digest() != Some(digest) {
            let updated = conn.execute(&update, params![digest, key])?;
            if updated != 1 {
                return Err(VcError::InvalidOperation(format!(
                    "digest of {} row {key:?} matched {updated} rows",
                    info.table
                )));
            }
            row.set(HASH_COLUMN, digest.to_hex());
        }
        stored.push(row);
    }
    Ok(stored)
}
