//! Schema statements copied between namespaces.
//!
//! A fork recreates each table from the `CREATE` statements SQLite keeps in
//! `sqlite_master`, so constraints, collations and indexes carry over
//! verbatim. Only object names are rewritten.

use crate::error::{Result, VcError};
use crate::types::{quote_ident, Namespace};
use rusqlite::{params, Connection};
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
    Space,
    Word,
    Ident,
    Literal,
    Punct,
}

#[derive(Clone, Copy, Debug)]
struct Token<'a> {
    kind: Kind,
    text: &'a str,
}

impl Token<'_> {
    fn is_word(&self, word: &str) -> bool {
        self.kind == Kind::Word && self.text.eq_ignore_ascii_case(word)
    }

    /// Identifier this token names, unquoted.
    fn ident(&self) -> Option<String> {
        match self.kind {
            Kind::Word => Some(self.text.to_string()),
            Kind::Ident if self.text.starts_with('[') => {
                Some(self.text[1..self.text.len() - 1].to_string())
            }
            Kind::Ident => {
                let quote = &self.text[..1];
                let inner = &self.text[1..self.text.len() - 1];
                Some(inner.replace(&quote.repeat(2), quote))
            }
            _ => None,
        }
    }
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

/// End of a quoted run starting at `start`; doubled quotes are escapes.
fn close_quoted(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn tokenize(sql: &str) -> Vec<Token<'_>> {
    let bytes = sql.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let start = i;
        let kind = match bytes[i] {
            b if b.is_ascii_whitespace() => {
                while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                    i += 1;
                }
                Kind::Space
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                Kind::Space
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i + 1 < bytes.len() && !(bytes[i] == b'*' && bytes[i + 1] == b'/') {
                    i += 1;
                }
                i = (i + 2).min(bytes.len());
                Kind::Space
            }
            q @ (b'"' | b'`') => {
                i = close_quoted(bytes, i, q);
                Kind::Ident
            }
            b'[' => {
                while i < bytes.len() && bytes[i] != b']' {
                    i += 1;
                }
                i = (i + 1).min(bytes.len());
                Kind::Ident
            }
            b'\'' => {
                i = close_quoted(bytes, i, b'\'');
                Kind::Literal
            }
            b if is_word_byte(b) => {
                while i < bytes.len() && is_word_byte(bytes[i]) {
                    i += 1;
                }
                Kind::Word
            }
            _ => {
                i += 1;
                Kind::Punct
            }
        };
        tokens.push(Token {
            kind,
            text: &sql[start..i],
        });
    }
    tokens
}

/// Statement under rewrite: tokens plus replacements keyed by token index.
struct Rewrite<'a> {
    tokens: Vec<Token<'a>>,
    /// Indices of the non-space tokens.
    significant: Vec<usize>,
    replaced: BTreeMap<usize, String>,
}

impl<'a> Rewrite<'a> {
    fn new(sql: &'a str) -> Self {
        let tokens = tokenize(sql);
        let significant = tokens
            .iter()
            .enumerate()
            .filter(|(_, t)| t.kind != Kind::Space)
            .map(|(i, _)| i)
            .collect();
        Self {
            tokens,
            significant,
            replaced: BTreeMap::new(),
        }
    }

    fn token(&self, at: usize) -> Option<&Token<'a>> {
        self.significant.get(at).map(|&i| &self.tokens[i])
    }

    /// Position of the object name after `CREATE ... <kind>`, skipping
    /// `IF NOT EXISTS` and a schema qualifier.
    fn name_after(&self, mut at: usize) -> Option<usize> {
        if self.token(at)?.is_word("IF") {
            at += 3;
        }
        if self.token(at + 1).map(|t| t.text) == Some(".") {
            at += 2;
        }
        self.token(at)?.ident().map(|_| at)
    }

    fn replace(&mut self, at: usize, name: &str) {
        let index = self.significant[at];
        self.replaced.insert(index, quote_ident(name));
    }

    fn finish(self) -> String {
        self.tokens
            .iter()
            .enumerate()
            .map(|(i, t)| self.replaced.get(&i).map(String::as_str).unwrap_or(t.text))
            .collect()
    }
}

fn unparsable(table: &str, sql: &str) -> VcError {
    VcError::UnsupportedTable {
        table: table.to_string(),
        reason: format!("cannot copy schema statement: {sql}"),
    }
}

/// Rewrite a `CREATE TABLE` statement to create `physical`.
///
/// Foreign keys naming a table in `renames` (keyed by lowercase physical
/// name) are pointed at its replacement.
pub(crate) fn rename_table(
    sql: &str,
    table: &str,
    physical: &str,
    renames: &BTreeMap<String, String>,
) -> Result<String> {
    let mut rewrite = Rewrite::new(sql);
    let is_create = rewrite.token(0).is_some_and(|t| t.is_word("CREATE"))
        && rewrite.token(1).is_some_and(|t| t.is_word("TABLE"));
    let name = is_create
        .then(|| rewrite.name_after(2))
        .flatten()
        .ok_or_else(|| unparsable(table, sql))?;
    rewrite.replace(name, physical);

    for at in name + 1..rewrite.significant.len() {
        let is_reference = rewrite.token(at).is_some_and(|t| t.is_word("REFERENCES"));
        let target = rewrite
            .token(at + 1)
            .and_then(Token::ident)
            .and_then(|t| renames.get(&t.to_ascii_lowercase()).cloned());
        if let (true, Some(target)) = (is_reference, target) {
            rewrite.replace(at + 1, &target);
        }
    }
    Ok(rewrite.finish())
}

/// Rewrite a `CREATE [UNIQUE] INDEX` statement to create `index` on `physical`.
pub(crate) fn rename_index(sql: &str, table: &str, index: &str, physical: &str) -> Result<String> {
    let mut rewrite = Rewrite::new(sql);
    let mut at = 1;
    if rewrite.token(at).is_some_and(|t| t.is_word("UNIQUE")) {
        at += 1;
    }
    let is_create = rewrite.token(0).is_some_and(|t| t.is_word("CREATE"))
        && rewrite.token(at).is_some_and(|t| t.is_word("INDEX"));
    let name = is_create
        .then(|| rewrite.name_after(at + 1))
        .flatten()
        .ok_or_else(|| unparsable(table, sql))?;
    let on = name + 1;
    if !rewrite.token(on).is_some_and(|t| t.is_word("ON"))
        || rewrite.token(on + 1).and_then(Token::ident).is_none()
    {
        return Err(unparsable(table, sql));
    }

    rewrite.replace(name, index);
    rewrite.replace(on + 1, physical);
    Ok(rewrite.finish())
}

/// Stored schema of one table copy: its `CREATE TABLE` and explicit indexes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct TableSchema {
    pub table_sql: String,
    /// `(name, sql)` of each index created with `CREATE INDEX`.
    pub indexes: Vec<(String, String)>,
}

impl TableSchema {
    pub(crate) fn load(conn: &Connection, namespace: &Namespace, table: &str) -> Result<Self> {
        let physical = namespace.physical_name(table);
        let table_sql: String = conn
            .query_row(
                "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE",
                params![physical],
                |row| row.get(0),
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    VcError::not_found("table", format!("{namespace}.{table}"))
                }
                other => other.into(),
            })?;

        let mut stmt = conn.prepare(
            "SELECT name, sql FROM sqlite_master
             WHERE type = 'index' AND tbl_name = ?1 COLLATE NOCASE AND sql IS NOT NULL
             ORDER BY name",
        )?;
        let indexes = stmt
            .query_map(params![physical], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Self { table_sql, indexes })
    }

    /// Statements recreating this schema as `table` in `target`.
    ///
    /// Returns the `CREATE TABLE` and, separately, the index statements so
    /// rows can be copied in between.
    pub(crate) fn recreate(
        &self,
        table: &str,
        source: &Namespace,
        target: &Namespace,
        renames: &BTreeMap<String, String>,
    ) -> Result<(String, Vec<String>)> {
        let create = rename_table(&self.table_sql, table, &target.physical_name(table), renames)?;

        let prefix = source.physical_name("");
        let indexes = self
            .indexes
            .iter()
            .map(|(name, sql)| {
                let logical = name.strip_prefix(&prefix).unwrap_or(name);
                rename_index(
                    sql,
                    table,
                    &target.physical_name(logical),
                    &target.physical_name(table),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        Ok((create, indexes))
    }
}
