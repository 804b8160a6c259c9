//! Main Repository struct tying all components together.

use crate::blobs::ContentStore;
use crate::branches::BranchManager;
use crate::commits::{CommitEngine, CommitRequest, Manifest};
use crate::error::{Result, VcError};
use crate::sessions::{BranchHandle, SessionRouter};
use crate::tables::Registry;
use crate::types::{Branch, Commit, Hash, RowBlob, Timestamp, TrackedTable, UserRef, Value};
use parking_lot::Mutex;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Repository configuration.
#[derive(Clone, Debug)]
pub struct RepositoryConfig {
    /// Database file; `None` keeps the repository in memory.
    pub path: Option<PathBuf>,

    /// Whether to create the database file if it doesn't exist.
    pub create_if_missing: bool,

    /// How long to wait for another writer before giving up.
    pub busy_timeout: Duration,

    /// Use write-ahead logging for file databases.
    pub wal: bool,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            path: None,
            create_if_missing: true,
            busy_timeout: Duration::from_secs(5),
            wal: true,
        }
    }
}

impl RepositoryConfig {
    /// Configuration for a database file at `path`.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }
}

/// Run `f` inside one transaction, committing only if it succeeds.
///
/// Dropping the transaction on error rolls back every partial effect.
pub(crate) fn with_transaction<T>(
    conn: &Mutex<Connection>,
    behavior: TransactionBehavior,
    f: impl FnOnce(&Transaction<'_>) -> Result<T>,
) -> Result<T> {
    let mut conn = conn.lock();
    let tx = conn.transaction_with_behavior(behavior)?;
    let value = f(&tx)?;
    tx.commit()?;
    Ok(value)
}

/// A version-controlled database.
///
/// Provides a unified interface for:
/// - Bootstrapping version control (`init`)
/// - Registering tracked tables
/// - Creating commits and branches
/// - Routing users to branch-scoped handles
///
/// The repository keeps no state besides its connection: every operation is
/// one transaction of fresh queries.
pub struct Repository {
    config: RepositoryConfig,
    conn: Mutex<Connection>,
}

impl Repository {
    /// Open a repository database, creating the file if allowed.
    pub fn open(config: RepositoryConfig) -> Result<Self> {
        let conn = match &config.path {
            None => Connection::open_in_memory()?,
            Some(path) => {
                if !path.exists() {
                    if !config.create_if_missing {
                        return Err(VcError::NotInitialized);
                    }
                    if let Some(parent) = path.parent() {
                        fs::create_dir_all(parent)?;
                    }
                }
                let conn = Connection::open(path)?;
                conn.busy_timeout(config.busy_timeout)?;
                if config.wal {
                    conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
                }
                conn
            }
        };

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        debug!(path = ?config.path, "repository opened");
        Ok(Self {
            config,
            conn: Mutex::new(conn),
        })
    }

    /// Open a private in-memory repository.
    pub fn open_in_memory() -> Result<Self> {
        Self::open(RepositoryConfig::default())
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    fn read<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        self.run(TransactionBehavior::Deferred, f)
    }

    fn write<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        self.run(TransactionBehavior::Immediate, f)
    }

    fn run<T>(
        &self,
        behavior: TransactionBehavior,
        f: impl FnOnce(&Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        with_transaction(&self.conn, behavior, |tx| {
            if !BranchManager::new(tx).is_initialized()? {
                return Err(VcError::NotInitialized);
            }
            f(tx)
        })
    }

    // --- Bootstrap ---

    /// Run schema SQL (user table definitions) against the primary namespace.
    pub fn apply_schema(&self, sql: &str) -> Result<()> {
        with_transaction(&self.conn, TransactionBehavior::Immediate, |tx| {
            tx.execute_batch(sql)?;
            Ok(())
        })
    }

    pub fn is_initialized(&self) -> Result<bool> {
        with_transaction(&self.conn, TransactionBehavior::Deferred, |tx| {
            BranchManager::new(tx).is_initialized()
        })
    }

    /// Add version control: root commit by `system_author`, default branch
    /// `default_branch` over the primary namespace.
    pub fn init(&self, system_author: impl Into<UserRef>, default_branch: &str) -> Result<Branch> {
        let system_author = system_author.into();
        with_transaction(&self.conn, TransactionBehavior::Immediate, |tx| {
            BranchManager::new(tx).init(&system_author, default_branch, Timestamp::now())
        })
    }

    // --- Tracked Tables ---

    /// Start versioning `table`; returns `false` if it already was.
    pub fn track_table(&self, table: &str) -> Result<bool> {
        self.write(|tx| {
            let namespaces: Vec<_> = BranchManager::new(tx)
                .list()?
                .into_iter()
                .map(|b| b.namespace)
                .collect();
            Registry::new(tx).track(table, &namespaces)
        })
    }

    pub fn untrack_table(&self, table: &str) -> Result<()> {
        self.write(|tx| Registry::new(tx).untrack(table))
    }

    pub fn tracked_tables(&self) -> Result<Vec<TrackedTable>> {
        self.read(|tx| Registry::new(tx).list())
    }

    /// `(key, digest)` pairs of `table` as seen on `branch`.
    pub fn snapshot(&self, table: &str, branch: &str) -> Result<Vec<(Value, Hash)>> {
        self.read(|tx| {
            let branch = BranchManager::new(tx).require(branch)?;
            Registry::new(tx).snapshot(table, &branch.namespace)
        })
    }

    /// Working manifest of `branch`: what a commit right now would record.
    pub fn manifest(&self, branch: &str) -> Result<Manifest> {
        self.read(|tx| {
            let branch = BranchManager::new(tx).require(branch)?;
            Manifest::build(&Registry::new(tx), &branch.namespace)
        })
    }

    // --- Commits ---

    /// Commit the request's branch, or the author's current branch.
    pub fn create_commit(&self, request: CommitRequest) -> Result<Commit> {
        self.write(|tx| {
            let branch = match &request.branch {
                Some(name) => name.clone(),
                None => SessionRouter::new(tx).branch_for_user(&request.author)?.name,
            };
            CommitEngine::new(tx).create_commit(&branch, &request)
        })
    }

    pub fn get_commit(&self, hash: &Hash) -> Result<Commit> {
        self.read(|tx| CommitEngine::new(tx).get(hash))
    }

    // --- Branches ---

    /// Fork `owner`'s current branch into a new branch `name`.
    ///
    /// The owner stays on their current branch.
    pub fn create_branch(&self, name: &str, owner: impl Into<UserRef>) -> Result<Branch> {
        let owner = owner.into();
        self.write(|tx| {
            let source = SessionRouter::new(tx).branch_for_user(&owner)?;
            BranchManager::new(tx).fork(&source.name, name, &owner)
        })
    }

    /// Fork an explicitly named branch.
    pub fn fork_branch(&self, source: &str, name: &str, owner: impl Into<UserRef>) -> Result<Branch> {
        let owner = owner.into();
        self.write(|tx| BranchManager::new(tx).fork(source, name, &owner))
    }

    pub fn switch_branch(&self, user: impl Into<UserRef>, branch: &str) -> Result<Branch> {
        let user = user.into();
        self.write(|tx| BranchManager::new(tx).switch(&user, branch))
    }

    /// The user's branch, falling back to the default branch.
    pub fn get_branch_for_user(&self, user: impl Into<UserRef>) -> Result<Branch> {
        let user = user.into();
        self.read(|tx| SessionRouter::new(tx).branch_for_user(&user))
    }

    /// The user's branch; `NotFound` if the user never switched.
    pub fn current_branch(&self, user: impl Into<UserRef>) -> Result<Branch> {
        let user = user.into();
        self.read(|tx| SessionRouter::new(tx).get_current_branch(&user))
    }

    pub fn get_branch(&self, name: &str) -> Result<Branch> {
        self.read(|tx| BranchManager::new(tx).require(name))
    }

    pub fn default_branch(&self) -> Result<Branch> {
        self.read(|tx| BranchManager::new(tx).default_branch())
    }

    pub fn list_branches(&self) -> Result<Vec<Branch>> {
        self.read(|tx| BranchManager::new(tx).list())
    }

    /// Handle whose reads and writes are confined to `branch`'s namespace.
    pub fn connection_for(&self, branch: &str) -> Result<BranchHandle<'_>> {
        self.read(|tx| SessionRouter::new(tx).handle_for(&self.conn, branch))
    }

    // --- Objects ---

    /// Every recorded row blob, ascending by digest.
    pub fn objects(&self) -> Result<Vec<RowBlob>> {
        self.read(|tx| ContentStore::new(tx).list())
    }

    pub fn get_object(&self, digest: &Hash) -> Result<Option<RowBlob>> {
        self.read(|tx| ContentStore::new(tx).get(digest))
    }
}
