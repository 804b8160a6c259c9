//! Branch manager implementation.

use crate::blobs::ContentStore;
use crate::commits::CommitEngine;
use crate::error::{Result, VcError};
use crate::sessions::SessionRouter;
use crate::tables::{Registry, TableInfo, TableSchema};
use crate::types::{Branch, Hash, Namespace, Timestamp, UserRef};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Summary of the root commit created by `init`.
pub const ROOT_SUMMARY: &str = "Initial commit";

/// Manages branches over one open transaction.
///
/// Each branch owns a namespace holding its own copy of every tracked table.
pub struct BranchManager<'c> {
    conn: &'c Connection,
}

impl<'c> BranchManager<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    fn create_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE vc_branches (
                id               INTEGER PRIMARY KEY,
                name             TEXT NOT NULL UNIQUE,
                namespace        TEXT NOT NULL UNIQUE,
                head_commit_hash TEXT NOT NULL REFERENCES vc_commits (commit_hash),
                is_default       INTEGER NOT NULL DEFAULT 0
            );
            CREATE UNIQUE INDEX vc_branches_single_default
                ON vc_branches (is_default) WHERE is_default = 1;",
        )?;
        Ok(())
    }

    /// Whether `init` has run against this database.
    pub fn is_initialized(&self) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'vc_branches'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// One-time bootstrap.
    ///
    /// Creates the engine tables, the parentless root commit authored by
    /// `system_author`, and the default branch backed by the primary namespace.
    pub fn init(
        &self,
        system_author: &UserRef,
        default_branch: &str,
        created_at: Timestamp,
    ) -> Result<Branch> {
        if self.is_initialized()? {
            return Err(VcError::AlreadyInitialized);
        }
        validate_branch_name(default_branch)?;

        ContentStore::create_schema(self.conn)?;
        Registry::create_schema(self.conn)?;
        CommitEngine::create_schema(self.conn)?;
        Self::create_schema(self.conn)?;
        SessionRouter::create_schema(self.conn)?;

        let root = CommitEngine::build(
            None,
            None,
            system_author.clone(),
            ROOT_SUMMARY.to_string(),
            String::new(),
            created_at,
        )?;
        CommitEngine::new(self.conn).insert(&root)?;

        self.conn.execute(
            "INSERT INTO vc_branches (id, name, namespace, head_commit_hash, is_default)
             VALUES (1, ?1, ?2, ?3, 1)",
            params![default_branch, Namespace::primary(), root.hash],
        )?;

        info!(branch = default_branch, root = %root.hash, "repository initialized");
        self.require(default_branch)
    }

    /// Get a branch by name.
    pub fn get(&self, name: &str) -> Result<Option<Branch>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, namespace, head_commit_hash, is_default
                 FROM vc_branches WHERE name = ?1",
                params![name],
                row_to_branch,
            )
            .optional()?)
    }

    /// Get a branch that must exist.
    pub fn require(&self, name: &str) -> Result<Branch> {
        self.get(name)?
            .ok_or_else(|| VcError::not_found("branch", name))
    }

    /// The branch carrying the default flag.
    pub fn default_branch(&self) -> Result<Branch> {
        self.conn
            .query_row(
                "SELECT id, name, namespace, head_commit_hash, is_default
                 FROM vc_branches WHERE is_default = 1",
                [],
                row_to_branch,
            )
            .optional()?
            .ok_or_else(|| VcError::not_found("branch", "<default>"))
    }

    /// All branches, in creation order.
    pub fn list(&self) -> Result<Vec<Branch>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, namespace, head_commit_hash, is_default
             FROM vc_branches ORDER BY id",
        )?;
        let branches = stmt
            .query_map([], row_to_branch)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(branches)
    }

    /// Fork `source` into a new branch with its own namespace.
    ///
    /// Every enabled tracked table of the source namespace is recreated and
    /// its live rows copied, digests included, so uncommitted edits carry over.
    /// The new head is the source's head.
    pub fn fork(&self, source: &str, name: &str, owner: &UserRef) -> Result<Branch> {
        validate_branch_name(name)?;
        let source = self.require(source)?;
        if self.get(name)?.is_some() {
            return Err(VcError::DuplicateName(name.to_string()));
        }

        let mut id: i64 = self
            .conn
            .query_row("SELECT COALESCE(MAX(id), 0) + 1 FROM vc_branches", [], |row| {
                row.get(0)
            })?;
        while self.namespace_in_use(&Namespace::for_branch(id))? {
            debug!(id, "namespace prefix taken by a user object, skipping");
            id += 1;
        }
        let namespace = Namespace::for_branch(id);

        self.conn
            .execute(
                "INSERT INTO vc_branches (id, name, namespace, head_commit_hash, is_default)
                 VALUES (?1, ?2, ?3, ?4, 0)",
                params![id, name, namespace, source.head],
            )
            .map_err(|e| match VcError::from(e) {
                VcError::StoreConstraintViolation(_) => VcError::DuplicateName(name.to_string()),
                other => other,
            })?;

        let mut tables = Vec::new();
        for table in Registry::new(self.conn).enabled()? {
            if let Some(layout) = TableInfo::load(self.conn, &source.namespace, &table)? {
                tables.push((table, layout));
            }
        }
        let renames: BTreeMap<String, String> = tables
            .iter()
            .map(|(table, _)| {
                (
                    source.namespace.physical_name(table).to_ascii_lowercase(),
                    namespace.physical_name(table),
                )
            })
            .collect();

        // Copies may reference each other; check foreign keys at commit.
        self.conn.execute_batch("PRAGMA defer_foreign_keys = ON;")?;
        for (table, layout) in &tables {
            let schema = TableSchema::load(self.conn, &source.namespace, table)?;
            let (create, indexes) =
                schema.recreate(table, &source.namespace, &namespace, &renames)?;
            self.conn.execute_batch(&create)?;

            let columns = layout.copy_columns();
            self.conn.execute(
                &format!(
                    "INSERT INTO {target} ({columns}) SELECT {columns} FROM {source}",
                    target = namespace.qualify(table),
                    source = source.namespace.qualify(table),
                ),
                [],
            )?;
            for index in &indexes {
                self.conn.execute_batch(index)?;
            }
        }
        let copied = tables.len();

        info!(
            branch = name,
            source = %source.name,
            owner = %owner,
            namespace = %namespace,
            tables = copied,
            "branch forked"
        );
        self.require(name)
    }

    /// Whether any schema object already uses `namespace`'s name prefix.
    fn namespace_in_use(&self, namespace: &Namespace) -> Result<bool> {
        let pattern = format!("{}\\_\\_%", namespace.as_str());
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE name LIKE ?1 ESCAPE '\\' LIMIT 1",
                params![pattern],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Point `user` at `branch`.
    pub fn switch(&self, user: &UserRef, branch: &str) -> Result<Branch> {
        let branch = self.require(branch)?;
        SessionRouter::new(self.conn).bind(user, &branch)?;
        info!(user = %user, branch = %branch.name, "branch switched");
        Ok(branch)
    }

    /// Move a branch head from `expected` to `new`, failing with `Conflict`
    /// if the head is no longer `expected`.
    pub fn advance_head(&self, branch: &str, expected: &Hash, new: &Hash) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE vc_branches SET head_commit_hash = ?1
             WHERE name = ?2 AND head_commit_hash = ?3",
            params![new, branch, expected],
        )?;
        if updated == 1 {
            return Ok(());
        }

        let current = self.require(branch)?;
        Err(VcError::Conflict {
            branch: branch.to_string(),
            expected: *expected,
            actual: current.head,
        })
    }
}

fn validate_branch_name(name: &str) -> Result<()> {
    if name.trim().is_empty() || name.trim() != name || name.chars().any(char::is_control) {
        return Err(VcError::InvalidIdentifier(name.to_string()));
    }
    Ok(())
}

fn row_to_branch(row: &rusqlite::Row) -> rusqlite::Result<Branch> {
    Ok(Branch {
        id: row.get(0)?,
        name: row.get(1)?,
        namespace: row.get(2)?,
        head: row.get(3)?,
        is_default: row.get::<_, i64>(4)? != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             CREATE TABLE products (id INTEGER PRIMARY KEY, name TEXT, colour TEXT);
             INSERT INTO products (name, colour) VALUES ('boots', 'black');
             CREATE TABLE scratch (note TEXT);",
        )
        .unwrap();
        BranchManager::new(&conn)
            .init(&UserRef::from("system"), "master", Timestamp(1))
            .unwrap();
        conn
    }

    #[test]
    fn test_init_creates_root_and_default() {
        let conn = test_db();
        let branches = BranchManager::new(&conn);

        let master = branches.default_branch().unwrap();
        assert_eq!(master.name, "master");
        assert!(master.is_default);
        assert!(master.namespace.is_primary());

        let root = CommitEngine::new(&conn).get(&master.head).unwrap();
        assert_eq!(root.parent, None);
        assert_eq!(root.manifest, None);
        assert_eq!(root.summary, ROOT_SUMMARY);
        assert_eq!(root.author, UserRef::from("system"));
    }

    #[test]
    fn test_init_twice_fails() {
        let conn = test_db();
        let result = BranchManager::new(&conn).init(&UserRef::from("system"), "main", Timestamp(2));
        assert!(matches!(result, Err(VcError::AlreadyInitialized)));
    }

    #[test]
    fn test_fork_copies_tracked_tables_only() {
        let conn = test_db();
        Registry::new(&conn)
            .track("products", &[Namespace::primary()])
            .unwrap();
        let branches = BranchManager::new(&conn);

        let fork = branches
            .fork("master", "update-boots", &UserRef::from("josh"))
            .unwrap();

        assert_eq!(fork.head, branches.require("master").unwrap().head);
        assert!(!fork.is_default);
        assert_ne!(fork.namespace, Namespace::primary());

        let master_rows = Registry::new(&conn)
            .snapshot("products", &Namespace::primary())
            .unwrap();
        let fork_rows = Registry::new(&conn).snapshot("products", &fork.namespace).unwrap();
        assert_eq!(master_rows, fork_rows);
        assert_eq!(fork_rows[0].0, Value::Integer(1));

        assert!(TableInfo::load(&conn, &fork.namespace, "scratch").unwrap().is_none());
    }

    #[test]
    fn test_fork_keeps_constraints_and_indexes() {
        let conn = test_db();
        conn.execute_batch(
            "CREATE TABLE stock (sku TEXT UNIQUE, qty INTEGER CHECK (qty >= 0));
             CREATE INDEX stock_by_qty ON stock (qty);
             INSERT INTO stock VALUES ('A', 1);",
        )
        .unwrap();
        Registry::new(&conn)
            .track("stock", &[Namespace::primary()])
            .unwrap();

        let fork = BranchManager::new(&conn)
            .fork("master", "feature", &UserRef::from("josh"))
            .unwrap();
        let stock = fork.namespace.qualify("stock");

        let duplicate = conn.execute(&format!("INSERT INTO {stock} (sku, qty) VALUES ('A', 2)"), []);
        assert!(matches!(
            duplicate.map_err(VcError::from),
            Err(VcError::StoreConstraintViolation(_))
        ));
        let negative = conn.execute(&format!("INSERT INTO {stock} (sku, qty) VALUES ('B', -1)"), []);
        assert!(matches!(
            negative.map_err(VcError::from),
            Err(VcError::StoreConstraintViolation(_))
        ));

        let schema = TableSchema::load(&conn, &fork.namespace, "stock").unwrap();
        assert_eq!(schema.indexes.len(), 1);
        assert_eq!(schema.indexes[0].0, fork.namespace.physical_name("stock_by_qty"));
    }

    #[test]
    fn test_fork_skips_namespace_taken_by_user_table() {
        let conn = test_db();
        conn.execute_batch("CREATE TABLE b2__products (id INTEGER PRIMARY KEY);")
            .unwrap();
        Registry::new(&conn)
            .track("products", &[Namespace::primary()])
            .unwrap();

        let fork = BranchManager::new(&conn)
            .fork("master", "feature", &UserRef::from("josh"))
            .unwrap();

        assert_eq!(fork.namespace, Namespace::for_branch(3));
        let copied = Registry::new(&conn).snapshot("products", &fork.namespace).unwrap();
        assert_eq!(copied.len(), 1);
    }

    #[test]
    fn test_fork_duplicate_name() {
        let conn = test_db();
        let branches = BranchManager::new(&conn);
        let owner = UserRef::from("josh");

        branches.fork("master", "feature", &owner).unwrap();
        let again = branches.fork("master", "feature", &owner);
        assert!(matches!(again, Err(VcError::DuplicateName(_))));

        let default_name = branches.fork("feature", "master", &owner);
        assert!(matches!(default_name, Err(VcError::DuplicateName(_))));
    }

    #[test]
    fn test_fork_unknown_source() {
        let conn = test_db();
        let result = BranchManager::new(&conn).fork("nope", "feature", &UserRef::from("josh"));
        assert!(matches!(result, Err(VcError::NotFound { kind: "branch", .. })));
    }

    #[test]
    fn test_fork_rejects_blank_names() {
        let conn = test_db();
        let branches = BranchManager::new(&conn);
        for name in ["", "  ", " padded", "tab\there"] {
            let result = branches.fork("master", name, &UserRef::from("josh"));
            assert!(matches!(result, Err(VcError::InvalidIdentifier(_))), "{name:?}");
        }
    }

    #[test]
    fn test_switch_requires_existing_branch() {
        let conn = test_db();
        let branches = BranchManager::new(&conn);
        let josh = UserRef::from("josh");

        let result = branches.switch(&josh, "nope");
        assert!(matches!(result, Err(VcError::NotFound { .. })));

        branches.fork("master", "feature", &josh).unwrap();
        branches.switch(&josh, "feature").unwrap();
        let current = SessionRouter::new(&conn).get_current_branch(&josh).unwrap();
        assert_eq!(current.name, "feature");
    }

    #[test]
    fn test_advance_head_check() {
        let conn = test_db();
        let branches = BranchManager::new(&conn);
        let master = branches.require("master").unwrap();

        let next = CommitEngine::build(
            Some(master.head),
            None,
            UserRef::from("josh"),
            "next".into(),
            String::new(),
            Timestamp(5),
        )
        .unwrap();
        CommitEngine::new(&conn).insert(&next).unwrap();

        branches.advance_head("master", &master.head, &next.hash).unwrap();
        let stale = branches.advance_head("master", &master.head, &next.hash);

        match stale {
            Err(VcError::Conflict { expected, actual, .. }) => {
                assert_eq!(expected, master.head);
                assert_eq!(actual, next.hash);
            }
            other => panic!("expected conflict, got {other:?}"),
        }
    }
}
