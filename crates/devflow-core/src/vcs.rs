//! The version-control seam.
//!
//! Checkpoints, rollbacks and the post-navigation commit all go through
//! [`SnapshotStore`]. [`crate::git::GitRepo`] is the production implementation;
//! tests use an in-memory fake.

use std::collections::BTreeMap;

use crate::error::{DevflowError, Result};

pub trait SnapshotStore {
    /// Whether the configured root is inside a working tree.
    fn is_repository(&self) -> bool;

    /// Create an annotated tag at `HEAD`. Fails if the tag already exists.
    fn create_tag(&self, name: &str, message: &str) -> Result<()>;

    /// Hard-reset the working tree and index to `name`.
    fn reset_hard_to_tag(&self, name: &str) -> Result<()>;

    fn delete_tag(&self, name: &str) -> Result<()>;

    fn tag_exists(&self, name: &str) -> Result<bool>;

    /// Tags starting with `prefix`, sorted by name.
    fn list_tags(&self, prefix: &str) -> Result<Vec<String>>;

    /// Commits reachable from `HEAD` but not from `tag`.
    fn commits_since(&self, tag: &str) -> Result<usize>;

    /// Stage everything and commit. A clean tree is a successful no-op.
    fn commit_all(&self, message: &str, metadata: &BTreeMap<String, String>) -> Result<()>;

    fn has_uncommitted_changes(&self) -> Result<bool>;
}

/// Stands in when no version control can be used at the root.
///
/// Every operation fails with [`DevflowError::VcsUnavailable`], so best-effort
/// callers (the post-navigation commit) log and carry on while checkpoint
/// operations fail with the original reason.
#[derive(Debug, Clone)]
pub struct Unavailable {
    reason: String,
}

impl Unavailable {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    fn error(&self) -> DevflowError {
        DevflowError::VcsUnavailable(self.reason.clone())
    }
}

impl SnapshotStore for Unavailable {
    fn is_repository(&self) -> bool {
        false
    }

    fn create_tag(&self, _name: &str, _message: &str) -> Result<()> {
        Err(self.error())
    }

    fn reset_hard_to_tag(&self, _name: &str) -> Result<()> {
        Err(self.error())
    }

    fn delete_tag(&self, _name: &str) -> Result<()> {
        Err(self.error())
    }

    fn tag_exists(&self, _name: &str) -> Result<bool> {
        Err(self.error())
    }

    fn list_tags(&self, _prefix: &str) -> Result<Vec<String>> {
        Err(self.error())
    }

    fn commits_since(&self, _tag: &str) -> Result<usize> {
        Err(self.error())
    }

    fn commit_all(&self, _message: &str, _metadata: &BTreeMap<String, String>) -> Result<()> {
        Err(self.error())
    }

    fn has_uncommitted_changes(&self) -> Result<bool> {
        Err(self.error())
    }
}
