//! Content-addressed row storage.
//!
//! Row content is canonicalized, hashed with SHA-256 and recorded once in the
//! append-only `vc_objects` table, keyed by digest (like Git objects).

mod storage;

pub use storage::ContentStore;
