//! Table layout introspection and row reading.

use crate::error::{Result, VcError};
use crate::types::{quote_ident, Namespace, Row, Value};
use rusqlite::{Connection, ToSql};

/// Pseudo-column used as the key of tables without a declared primary key.
const ROWID: &str = "rowid";

/// One column as reported by `pragma_table_info`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub declared_type: String,
    pub not_null: bool,
    /// Default expression, verbatim.
    pub default: Option<String>,
    pub primary_key: bool,
}

/// Layout of one table inside one namespace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableInfo {
    /// Logical table name.
    pub table: String,
    pub columns: Vec<ColumnInfo>,
    /// Key column, or `rowid` when the table declares no primary key.
    pub key: String,
}

impl TableInfo {
    /// Load the layout of `table` in `namespace`; `None` if the table is absent.
    pub fn load(conn: &Connection, namespace: &Namespace, table: &str) -> Result<Option<Self>> {
        let mut stmt = conn.prepare(
            "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1) ORDER BY cid",
        )?;
        let columns = stmt
            .query_map([namespace.physical_name(table)], |row| {
                Ok(ColumnInfo {
                    name: row.get(0)?,
                    declared_type: row.get(1)?,
                    not_null: row.get::<_, i64>(2)? != 0,
                    default: row.get(3)?,
                    primary_key: row.get::<_, i64>(4)? != 0,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        if columns.is_empty() {
            return Ok(None);
        }

        let keys: Vec<&ColumnInfo> = columns.iter().filter(|c| c.primary_key).collect();
        let key = match keys.as_slice() {
            [] => ROWID.to_string(),
            [single] => single.name.clone(),
            _ => {
                return Err(VcError::UnsupportedTable {
                    table: table.to_string(),
                    reason: "composite primary keys are not supported".into(),
                })
            }
        };

        Ok(Some(Self {
            table: table.to_string(),
            columns,
            key,
        }))
    }

    /// Load a layout that must exist.
    pub fn require(conn: &Connection, namespace: &Namespace, table: &str) -> Result<Self> {
        Self::load(conn, namespace, table)?
            .ok_or_else(|| VcError::not_found("table", format!("{namespace}.{table}")))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Whether the key is the implicit rowid rather than a declared column.
    pub fn key_is_rowid(&self) -> bool {
        !self.has_column(&self.key)
    }

    /// SQL expression selecting the key.
    pub(crate) fn key_expr(&self) -> String {
        if self.key_is_rowid() {
            ROWID.to_string()
        } else {
            quote_ident(&self.key)
        }
    }

    /// Column list for copying rows verbatim, rowid included when it is the key.
    pub(crate) fn copy_columns(&self) -> String {
        let mut names: Vec<String> = self.column_names().map(quote_ident).collect();
        if self.key_is_rowid() {
            names.insert(0, ROWID.to_string());
        }
        names.join(", ")
    }
}

/// Read `(key, row)` pairs from one namespace's copy of a table, ordered by key.
///
/// `condition` is spliced after `WHERE`; pass `"1"` for every row.
pub(crate) fn read_rows(
    conn: &Connection,
    namespace: &Namespace,
    info: &TableInfo,
    condition: &str,
    params: &[&dyn ToSql],
) -> Result<Vec<(Value, Row)>> {
    let names: Vec<&str> = info.column_names().collect();
    let select_list: Vec<String> = names.iter().map(|n| quote_ident(n)).collect();
    let sql = format!(
        "SELECT {key}, {cols} FROM {table} WHERE {condition} ORDER BY {key}",
        key = info.key_expr(),
        cols = select_list.join(", "),
        table = namespace.qualify(&info.table),
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params, |sql_row| {
            let key: Value = sql_row.get(0)?;
            let mut row = Row::new();
            for (i, name) in names.iter().enumerate() {
                row.set(*name, sql_row.get::<_, Value>(i + 1)?);
            }
            Ok((key, row))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}
