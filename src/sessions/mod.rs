//! Session routing and branch-scoped access.
//!
//! Sessions record which branch each user works on. Handles confine reads
//! and writes to a single branch's namespace.

mod handle;
mod router;

pub use handle::{BranchHandle, Filter};
pub use router::SessionRouter;
