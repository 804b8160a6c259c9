//! Commit engine implementation.

use super::manifest::Manifest;
use crate::branches::BranchManager;
use crate::error::{Result, VcError};
use crate::tables::Registry;
use crate::types::{Commit, Hash, Timestamp, UserRef};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tracing::{debug, info};

/// Input for creating a commit.
#[derive(Clone, Debug)]
pub struct CommitRequest {
    pub author: UserRef,
    pub summary: String,
    pub description: String,
    /// Defaults to the time the commit is created.
    pub created_at: Option<Timestamp>,
    /// Branch to commit; defaults to the author's current branch.
    pub branch: Option<String>,
    /// Head the caller expects the branch to be at.
    ///
    /// Writers are serialized, so an unpinned request always commits on top
    /// of whatever head it finds and never reports `Conflict`. Pin the parent
    /// to detect that another writer moved the branch first.
    pub expected_parent: Option<Hash>,
}

impl CommitRequest {
    pub fn new(author: impl Into<UserRef>, summary: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            summary: summary.into(),
            description: String::new(),
            created_at: None,
            branch: None,
            expected_parent: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn created_at(mut self, created_at: Timestamp) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn on_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// Fail with `Conflict` unless the branch head is still `parent`.
    pub fn expecting_parent(mut self, parent: Hash) -> Self {
        self.expected_parent = Some(parent);
        self
    }
}

/// Fields a commit hash is computed from, in serialization order.
#[derive(Serialize)]
struct CommitPreimage<'a> {
    parent: Option<&'a Hash>,
    manifest: Option<&'a Hash>,
    author: &'a UserRef,
    summary: &'a str,
    description: &'a str,
    created_at: i64,
}

/// Records commits over one open transaction.
pub struct CommitEngine<'c> {
    conn: &'c Connection,
}

impl<'c> CommitEngine<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub(crate) fn create_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE vc_commits (
                commit_hash   TEXT PRIMARY KEY,
                parent_hash   TEXT REFERENCES vc_commits (commit_hash),
                manifest_hash TEXT,
                author        TEXT NOT NULL,
                summary       TEXT NOT NULL,
                description   TEXT NOT NULL,
                created_at    INTEGER NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Build a commit value, computing its hash.
    pub fn build(
        parent: Option<Hash>,
        manifest: Option<Hash>,
        author: UserRef,
        summary: String,
        description: String,
        created_at: Timestamp,
    ) -> Result<Commit> {
        let preimage = CommitPreimage {
            parent: parent.as_ref(),
            manifest: manifest.as_ref(),
            author: &author,
            summary: &summary,
            description: &description,
            created_at: created_at.0,
        };
        let hash = Hash::from_bytes(&serde_json::to_vec(&preimage)?);

        Ok(Commit {
            hash,
            parent,
            manifest,
            author,
            summary,
            description,
            created_at,
        })
    }

    /// Commit the current tracked content of `branch` and advance its head.
    ///
    /// Must run inside a transaction: on `Conflict` the inserted commit row is
    /// only discarded when the caller drops that transaction.
    pub fn create_commit(&self, branch: &str, request: &CommitRequest) -> Result<Commit> {
        let branches = BranchManager::new(self.conn);
        let branch = branches.require(branch)?;

        let manifest = Manifest::build(&Registry::new(self.conn), &branch.namespace)?;
        let parent = branch.head;

        if let Some(expected) = request.expected_parent {
            if expected != parent {
                return Err(VcError::Conflict {
                    branch: branch.name,
                    expected,
                    actual: parent,
                });
            }
        }

        let commit = Self::build(
            Some(parent),
            manifest.hash()?,
            request.author.clone(),
            request.summary.clone(),
            request.description.clone(),
            request.created_at.unwrap_or_else(Timestamp::now),
        )?;

        self.insert(&commit)?;
        branches.advance_head(&branch.name, &parent, &commit.hash)?;

        info!(
            branch = %branch.name,
            commit = %commit.hash,
            parent = %parent,
            rows = manifest.row_count(),
            "commit created"
        );
        Ok(commit)
    }

    /// Store a commit. A commit with the same hash has the same content, so
    /// an existing row is left as is.
    pub(crate) fn insert(&self, commit: &Commit) -> Result<()> {
        let inserted = self.conn.execute(
            "INSERT INTO vc_commits
                (commit_hash, parent_hash, manifest_hash, author, summary, description, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (commit_hash) DO NOTHING",
            params![
                commit.hash,
                commit.parent,
                commit.manifest,
                commit.author,
                commit.summary,
                commit.description,
                commit.created_at,
            ],
        )?;
        if inserted == 0 {
            debug!(commit = %commit.hash, "commit already stored");
        }
        Ok(())
    }

    /// Get a commit by hash.
    pub fn find(&self, hash: &Hash) -> Result<Option<Commit>> {
        Ok(self
            .conn
            .query_row(
                "SELECT commit_hash, parent_hash, manifest_hash, author, summary, description, created_at
                 FROM vc_commits WHERE commit_hash = ?1",
                params![hash],
                row_to_commit,
            )
            .optional()?)
    }

    /// Get a commit that must exist.
    pub fn get(&self, hash: &Hash) -> Result<Commit> {
        self.find(hash)?
            .ok_or_else(|| VcError::not_found("commit", hash.to_hex()))
    }

    pub fn count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM vc_commits", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

fn row_to_commit(row: &rusqlite::Row) -> rusqlite::Result<Commit> {
    Ok(Commit {
        hash: row.get(0)?,
        parent: row.get(1)?,
        manifest: row.get(2)?,
        author: row.get(3)?,
        summary: row.get(4)?,
        description: row.get(5)?,
        created_at: row.get(6)?,
    })
}
