//! Commits and manifests.
//!
//! A commit records the combined manifest hash of every tracked table in a
//! branch's namespace, chained to its parent. Commits are never mutated.

mod engine;
mod manifest;

pub use engine::{CommitEngine, CommitRequest};
pub use manifest::{Manifest, TableManifest};
