//! Deterministic manifests of tracked-table content.

use crate::error::Result;
use crate::tables::Registry;
use crate::types::{Hash, Namespace, Value};
use serde::Serialize;

/// `(key, digest)` pairs of one tracked table, ordered by key.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TableManifest {
    pub table: String,
    pub rows: Vec<(Value, Hash)>,
}

/// Every tracked table's row digests at one point, ordered by table name.
///
/// Tables without rows are left out, so a manifest of empty tables is
/// empty and has no hash.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Manifest {
    tables: Vec<TableManifest>,
}

impl Manifest {
    /// Snapshot every enabled tracked table in `namespace`.
    pub fn build(registry: &Registry<'_>, namespace: &Namespace) -> Result<Self> {
        let mut tables = Vec::new();
        for table in registry.enabled()? {
            let rows = registry.snapshot(&table, namespace)?;
            if !rows.is_empty() {
                tables.push(TableManifest { table, rows });
            }
        }
        tables.sort_by(|a, b| a.table.cmp(&b.table));
        Ok(Self { tables })
    }

    pub fn tables(&self) -> &[TableManifest] {
        &self.tables
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn row_count(&self) -> usize {
        self.tables.iter().map(|t| t.rows.len()).sum()
    }

    /// Combined hash, `None` when no tracked table has rows.
    pub fn hash(&self) -> Result<Option<Hash>> {
        if self.is_empty() {
            return Ok(None);
        }
        Ok(Some(Hash::from_bytes(&serde_json::to_vec(self)?)))
    }
}
