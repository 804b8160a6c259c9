//! # rowgit
//!
//! Git-like version control for the rows of an SQLite database: branches,
//! commits, and content-addressed deduplication of row content.
//!
//! ## Core Concepts
//!
//! - **Objects**: Canonicalized row content, stored once per SHA-256 digest
//! - **Tracked tables**: Tables whose rows carry a `vc_hash` digest column
//! - **Commits**: Immutable records of every tracked table's digests, chained to a parent
//! - **Branches**: Isolated namespaces holding their own copies of the tracked tables
//! - **Sessions**: Which branch each user works on
//!
//! ## Example
//!
//! ```ignore
//! use rowgit::{CommitRequest, Filter, Repository, Row};
//!
//! let repo = Repository::open_in_memory()?;
//! repo.apply_schema("CREATE TABLE products (id INTEGER PRIMARY KEY, name TEXT, colour TEXT);")?;
//! repo.init("system", "master")?;
//! repo.track_table("products")?;
//!
//! let master = repo.connection_for("master")?;
//! master.insert("products", Row::new().with("name", "boots").with("colour", "black"))?;
//! repo.create_commit(CommitRequest::new("josh", "Add boots"))?;
//!
//! repo.create_branch("update-boots", "josh")?;
//! repo.connection_for("update-boots")?
//!     .update("products", Filter::All, Row::new().with("colour", "brown"))?;
//! ```

pub mod blobs;
pub mod branches;
pub mod commits;
pub mod error;
pub mod sessions;
pub mod store;
pub mod tables;
pub mod types;

// Re-exports
pub use blobs::ContentStore;
pub use branches::{BranchManager, ROOT_SUMMARY};
pub use commits::{CommitEngine, CommitRequest, Manifest, TableManifest};
pub use error::{Result, VcError};
pub use sessions::{BranchHandle, Filter, SessionRouter};
pub use store::{Repository, RepositoryConfig};
pub use tables::{ColumnInfo, Registry, TableInfo};
pub use types::*;
