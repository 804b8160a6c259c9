//! Tracked-table registry and table layout introspection.
//!
//! A tracked table carries a `vc_hash` column holding the digest of each
//! row's content. Only enabled tables take part in commit manifests.

mod ddl;
mod layout;
mod registry;

pub(crate) use ddl::TableSchema;
pub use layout::{ColumnInfo, TableInfo};
pub(crate) use layout::read_rows;
pub use registry::Registry;
pub(crate) use registry::record_rows;

use crate::error::{Result, VcError};

/// Check that a logical table name is usable from a branch handle.
///
/// Names are plain identifiers. The `vc_` prefix belongs to the engine and
/// `__` separates a namespace from a table, so neither may appear.
pub fn validate_table_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let starts_well = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_');
    let plain = name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    let lower = name.to_ascii_lowercase();

    if !starts_well
        || !plain
        || name.contains("__")
        || lower.starts_with("vc_")
        || lower.starts_with("sqlite_")
    {
        return Err(VcError::InvalidIdentifier(name.to_string()));
    }
    Ok(())
}
