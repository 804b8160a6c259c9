//! Branch management.
//!
//! Branches are isolated namespaces of tracked-table copies. A fork copies
//! the source's live rows; from then on the two namespaces diverge freely.

mod manager;

pub use manager::{BranchManager, ROOT_SUMMARY};
