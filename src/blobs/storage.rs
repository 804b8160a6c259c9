//! Object table implementation.

use crate::error::{Result, VcError};
use crate::types::{Hash, Row, RowBlob, Value, HASH_COLUMN};
use rusqlite::{ffi, params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Content-addressed row storage over one open connection or transaction.
///
/// Holds nothing but the borrowed connection: every lookup is a fresh query.
pub struct ContentStore<'c> {
    conn: &'c Connection,
}

impl<'c> ContentStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    /// Create the empty object table.
    pub(crate) fn create_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE vc_objects (
                digest     TEXT PRIMARY KEY,
                table_name TEXT NOT NULL,
                payload    TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Serialize a row deterministically.
    ///
    /// The hash column is dropped and the remaining columns are written as a
    /// JSON object in lexicographic column order.
    pub fn canonicalize(row: &Row) -> Result<Vec<u8>> {
        let content: BTreeMap<&str, &Value> = row
            .columns()
            .filter(|(column, _)| *column != HASH_COLUMN)
            .collect();
        Ok(serde_json::to_vec(&content)?)
    }

    /// Digest of canonical bytes.
    pub fn hash(bytes: &[u8]) -> Hash {
        Hash::from_bytes(bytes)
    }

    /// Digest a row without recording it.
    pub fn digest(row: &Row) -> Result<Hash> {
        Ok(Self::hash(&Self::canonicalize(row)?))
    }

    /// Record a row's content, returning the digest to store back on the row.
    ///
    /// Content that is already present is not written again.
    pub fn record(&self, table: &str, row: &Row) -> Result<Hash> {
        let canonical = Self::canonicalize(row)?;
        let digest = Self::hash(&canonical);

        if self.exists(&digest)? {
            debug!(table, digest = %digest, "content already recorded");
            return Ok(digest);
        }

        let payload =
            String::from_utf8(canonical).map_err(|e| VcError::Serialization(e.to_string()))?;
        self.insert_blob(&digest, table, &payload)?;
        Ok(digest)
    }

    /// Insert a blob, treating a duplicate digest as success.
    ///
    /// Two writers can both miss the existence check for the same content;
    /// the loser hits the primary key and its insert collapses to a no-op.
    fn insert_blob(&self, digest: &Hash, table: &str, payload: &str) -> Result<()> {
        let inserted = self.conn.execute(
            "INSERT INTO vc_objects (digest, table_name, payload) VALUES (?1, ?2, ?3)",
            params![digest, table, payload],
        );

        match inserted {
            Ok(_) => {
                debug!(table, digest = %digest, "recorded new content");
                Ok(())
            }
            Err(e) if is_duplicate_key(&e) => {
                warn!(table, digest = %digest, "concurrent duplicate content insert absorbed");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Check if a blob exists.
    pub fn exists(&self, digest: &Hash) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM vc_objects WHERE digest = ?1",
                params![digest],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Get a blob by its digest.
    pub fn get(&self, digest: &Hash) -> Result<Option<RowBlob>> {
        Ok(self
            .conn
            .query_row(
                "SELECT digest, table_name, payload FROM vc_objects WHERE digest = ?1",
                params![digest],
                row_to_blob,
            )
            .optional()?)
    }

    /// All blobs, ascending by digest.
    pub fn list(&self) -> Result<Vec<RowBlob>> {
        let mut stmt = self
            .conn
            .prepare("SELECT digest, table_name, payload FROM vc_objects ORDER BY digest")?;
        let blobs = stmt
            .query_map([], row_to_blob)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(blobs)
    }

    /// Number of blobs in the object table.
    pub fn count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM vc_objects", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

fn is_duplicate_key(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(failure, _) => matches!(
            failure.extended_code,
            ffi::SQLITE_CONSTRAINT_PRIMARYKEY | ffi::SQLITE_CONSTRAINT_UNIQUE
        ),
        _ => false,
    }
}

fn row_to_blob(row: &rusqlite::Row) -> rusqlite::Result<RowBlob> {
    Ok(RowBlob {
        digest: row.get(0)?,
        table: row.get(1)?,
        payload: row.get(2)?,
    })
}
