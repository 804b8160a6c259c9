//! Core types for the versioning engine.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Name of the column that carries a tracked row's content digest.
pub const HASH_COLUMN: &str = "vc_hash";

/// Namespace backing the default branch: the user's own tables.
pub const PRIMARY_NAMESPACE: &str = "main";

/// Content hash (SHA-256), used for row digests, manifests and commits.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// Compute hash from bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Hash(hasher.finalize().into())
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Hash(arr))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({}...)", &self.to_hex()[..8])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl ToSql for Hash {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.to_hex()))
    }
}

impl FromSql for Hash {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Hash::from_hex(value.as_str()?).map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or_default();
        Timestamp(micros)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

impl ToSql for Timestamp {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0))
    }
}

impl FromSql for Timestamp {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value.as_i64().map(Timestamp)
    }
}

/// Reference to a user of the repository (author of commits, owner of sessions).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserRef(pub String);

impl UserRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for UserRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserRef({})", self.0)
    }
}

impl fmt::Display for UserRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserRef {
    fn from(s: &str) -> Self {
        UserRef(s.to_string())
    }
}

impl From<String> for UserRef {
    fn from(s: String) -> Self {
        UserRef(s)
    }
}

impl From<i64> for UserRef {
    fn from(id: i64) -> Self {
        UserRef(id.to_string())
    }
}

impl ToSql for UserRef {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Borrowed(ValueRef::Text(self.0.as_bytes())))
    }
}

impl FromSql for UserRef {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value.as_str().map(|s| UserRef(s.to_string()))
    }
}

/// Isolated storage area holding one branch's copies of the tracked tables.
///
/// The primary namespace maps logical table names onto the user's own tables;
/// every other namespace prefixes them, so `products` in namespace `b2` lives
/// in the physical table `b2__products`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Namespace(String);

impl Namespace {
    pub fn primary() -> Self {
        Namespace(PRIMARY_NAMESPACE.to_string())
    }

    /// Namespace allocated to a forked branch.
    pub fn for_branch(id: i64) -> Self {
        Namespace(format!("b{id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_primary(&self) -> bool {
        self.0 == PRIMARY_NAMESPACE
    }

    /// Physical table name of `table` inside this namespace.
    pub fn physical_name(&self, table: &str) -> String {
        if self.is_primary() {
            table.to_string()
        } else {
            format!("{}__{}", self.0, table)
        }
    }

    /// Quoted physical name, ready to splice into SQL.
    pub fn qualify(&self, table: &str) -> String {
        quote_ident(&self.physical_name(table))
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Namespace({})", self.0)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl ToSql for Namespace {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Borrowed(ValueRef::Text(self.0.as_bytes())))
    }
}

impl FromSql for Namespace {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value.as_str().map(|s| Namespace(s.to_string()))
    }
}

/// Quote an SQL identifier.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// A single column value, mirroring SQLite's storage classes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_real(&self) -> Option<f64> {
        match self {
            Value::Real(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_blob(&self) -> Option<&[u8]> {
        match self {
            Value::Blob(b) => Some(b),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i.into())
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Real(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Blob(b)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Borrowed(match self {
            Value::Null => ValueRef::Null,
            Value::Integer(i) => ValueRef::Integer(*i),
            Value::Real(f) => ValueRef::Real(*f),
            Value::Text(s) => ValueRef::Text(s.as_bytes()),
            Value::Blob(b) => ValueRef::Blob(b),
        }))
    }
}

impl FromSql for Value {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(f) => Value::Real(f),
            // Text that is not valid UTF-8 is kept byte for byte.
            ValueRef::Text(t) => match std::str::from_utf8(t) {
                Ok(s) => Value::Text(s.to_string()),
                Err(_) => Value::Blob(t.to_vec()),
            },
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        })
    }
}

/// A table row: an ordered mapping from column name to value.
///
/// Columns are kept in lexicographic order, which is also the canonical
/// order used for content hashing.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row {
    columns: BTreeMap<String, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style column assignment.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(column, value);
        self
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.columns.insert(column.into(), value.into());
    }

    pub fn remove(&mut self, column: &str) -> Option<Value> {
        self.columns.remove(column)
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    pub fn integer(&self, column: &str) -> Option<i64> {
        self.get(column).and_then(Value::as_integer)
    }

    pub fn real(&self, column: &str) -> Option<f64> {
        self.get(column).and_then(Value::as_real)
    }

    pub fn text(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(Value::as_text)
    }

    pub fn blob(&self, column: &str) -> Option<&[u8]> {
        self.get(column).and_then(Value::as_blob)
    }

    /// The content digest stored on a tracked row, if resolved.
    pub fn digest(&self) -> Option<Hash> {
        self.text(HASH_COLUMN).and_then(|s| Hash::from_hex(s).ok())
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut row = Row::new();
        for (k, v) in iter {
            row.set(k, v);
        }
        row
    }
}

/// A deduplicated row blob from the object table.
#[derive(Clone, Debug, PartialEq)]
pub struct RowBlob {
    pub digest: Hash,
    /// Table that first recorded this content.
    pub table: String,
    /// Canonical serialization of the row, hash column excluded.
    pub payload: String,
}

impl RowBlob {
    /// Decode the canonical payload back into a row.
    pub fn decode(&self) -> Result<Row, serde_json::Error> {
        serde_json::from_str(&self.payload)
    }
}

/// A tracked-table registry entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackedTable {
    pub name: String,
    pub enabled: bool,
}

/// An immutable commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Commit {
    pub hash: Hash,
    /// `None` only for the root commit.
    pub parent: Option<Hash>,
    /// Combined manifest hash; `None` when no tracked table had rows.
    pub manifest: Option<Hash>,
    pub author: UserRef,
    pub summary: String,
    pub description: String,
    pub created_at: Timestamp,
}

/// Branch metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Branch {
    pub id: i64,
    pub name: String,
    pub namespace: Namespace,
    pub head: Hash,
    pub is_default: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_roundtrip() {
        let hash = Hash::from_bytes(b"hello world");
        let parsed = Hash::from_hex(&hash.to_hex()).unwrap();
        assert_eq!(hash, parsed);
        assert_eq!(hash.to_hex().len(), 64);
    }

    #[test]
    fn test_hash_rejects_short_hex() {
        assert!(Hash::from_hex("abcd").is_err());
    }

    #[test]
    fn test_namespace_physical_names() {
        assert_eq!(Namespace::primary().physical_name("products"), "products");
        assert_eq!(Namespace::for_branch(3).physical_name("products"), "b3__products");
        assert_eq!(Namespace::for_branch(3).qualify("products"), "\"b3__products\"");
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_row_accessors() {
        let row = Row::new()
            .with("id", 1)
            .with("name", "boots")
            .with("price", 9.5)
            .with("note", None::<String>);

        assert_eq!(row.integer("id"), Some(1));
        assert_eq!(row.text("name"), Some("boots"));
        assert_eq!(row.real("price"), Some(9.5));
        assert!(row.get("note").unwrap().is_null());
        assert_eq!(row.text("id"), None);
        assert_eq!(row.len(), 4);
    }

    #[test]
    fn test_row_columns_are_sorted() {
        let row: Row = vec![("zeta", 1), ("alpha", 2), ("mid", 3)].into_iter().collect();
        let names: Vec<&str> = row.columns().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_invalid_utf8_text_reads_as_blob() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let read = |sql: &str| -> Value { conn.query_row(sql, [], |row| row.get(0)).unwrap() };

        assert_eq!(read("SELECT CAST(x'ff00fe' AS TEXT)"), Value::Blob(vec![0xff, 0x00, 0xfe]));
        assert_eq!(read("SELECT CAST(x'c3a9' AS TEXT)"), Value::Text("\u{e9}".to_string()));
    }

    #[test]
    fn test_value_json_is_untagged() {
        let row = Row::new().with("id", 1).with("name", "boots");
        assert_eq!(serde_json::to_string(&row).unwrap(), r#"{"id":1,"name":"boots"}"#);
    }
}
