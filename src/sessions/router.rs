//! User-to-branch session mapping.

use super::BranchHandle;
use crate::branches::BranchManager;
use crate::error::{Result, VcError};
use crate::types::{Branch, UserRef};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

/// Maps users to their active branch over one open transaction.
pub struct SessionRouter<'c> {
    conn: &'c Connection,
}

impl<'c> SessionRouter<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    pub(crate) fn create_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE vc_user_sessions (
                user_ref    TEXT PRIMARY KEY,
                branch_name TEXT NOT NULL REFERENCES vc_branches (name)
            );",
        )?;
        Ok(())
    }

    /// Name of the branch `user` last switched to.
    pub fn session(&self, user: &UserRef) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT branch_name FROM vc_user_sessions WHERE user_ref = ?1",
                params![user],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// The user's active branch; `NotFound` if the user never switched.
    pub fn get_current_branch(&self, user: &UserRef) -> Result<Branch> {
        let name = self
            .session(user)?
            .ok_or_else(|| VcError::not_found("session", user.as_str()))?;
        BranchManager::new(self.conn).require(&name)
    }

    /// The user's active branch, or the default branch without a session.
    pub fn branch_for_user(&self, user: &UserRef) -> Result<Branch> {
        let branches = BranchManager::new(self.conn);
        match self.session(user)? {
            Some(name) => branches.require(&name),
            None => branches.default_branch(),
        }
    }

    /// Handle confined to `branch`'s namespace.
    ///
    /// The handle runs its own transactions on `shared`, the connection this
    /// router's transaction was opened on.
    pub(crate) fn handle_for<'r>(
        &self,
        shared: &'r Mutex<Connection>,
        branch: &str,
    ) -> Result<BranchHandle<'r>> {
        let branch = BranchManager::new(self.conn).require(branch)?;
        Ok(BranchHandle::new(shared, branch))
    }

    pub(crate) fn bind(&self, user: &UserRef, branch: &Branch) -> Result<()> {
        self.conn.execute(
            "INSERT INTO vc_user_sessions (user_ref, branch_name) VALUES (?1, ?2)
             ON CONFLICT (user_ref) DO UPDATE SET branch_name = excluded.branch_name",
            params![user, branch.name],
        )?;
        Ok(())
    }
}
