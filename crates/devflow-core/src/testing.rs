//! In-memory [`SnapshotStore`] for unit tests.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{DevflowError, Result};
use crate::store::Store;
use crate::vcs::SnapshotStore;

#[derive(Default)]
pub struct FakeState {
    pub tags: BTreeSet<String>,
    pub resets: Vec<String>,
    pub commits: Vec<(String, BTreeMap<String, String>)>,
    pub dirty: bool,
    pub commits_since: usize,
    pub fail_create: bool,
    pub fail_reset: bool,
    pub fail_delete: bool,
    pub fail_commit: bool,
}

#[derive(Default)]
pub struct FakeSnapshots {
    pub state: RefCell<FakeState>,
}

impl FakeSnapshots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(configure: impl FnOnce(&mut FakeState)) -> Self {
        let fake = Self::default();
        configure(&mut fake.state.borrow_mut());
        fake
    }

    pub fn tags(&self) -> Vec<String> {
        self.state.borrow().tags.iter().cloned().collect()
    }

    pub fn resets(&self) -> Vec<String> {
        self.state.borrow().resets.clone()
    }

    pub fn commit_count(&self) -> usize {
        self.state.borrow().commits.len()
    }
}

fn injected(command: &str) -> DevflowError {
    DevflowError::Vcs {
        command: command.to_string(),
        output: "injected failure".to_string(),
    }
}

impl SnapshotStore for FakeSnapshots {
    fn is_repository(&self) -> bool {
        true
    }

    fn create_tag(&self, name: &str, _message: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if state.fail_create {
            return Err(injected("git tag -a"));
        }
        if !state.tags.insert(name.to_string()) {
            return Err(DevflowError::Vcs {
                command: format!("git tag -a {name}"),
                output: format!("fatal: tag '{name}' already exists"),
            });
        }
        Ok(())
    }

    fn reset_hard_to_tag(&self, name: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if state.fail_reset || !state.tags.contains(name) {
            return Err(injected("git reset --hard"));
        }
        state.resets.push(name.to_string());
        state.dirty = false;
        Ok(())
    }

    fn delete_tag(&self, name: &str) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if state.fail_delete || !state.tags.remove(name) {
            return Err(injected("git tag -d"));
        }
        Ok(())
    }

    fn tag_exists(&self, name: &str) -> Result<bool> {
        Ok(self.state.borrow().tags.contains(name))
    }

    fn list_tags(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .state
            .borrow()
            .tags
            .iter()
            .filter(|t| t.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn commits_since(&self, _tag: &str) -> Result<usize> {
        Ok(self.state.borrow().commits_since)
    }

    fn commit_all(&self, message: &str, metadata: &BTreeMap<String, String>) -> Result<()> {
        let mut state = self.state.borrow_mut();
        if state.fail_commit {
            return Err(injected("git commit"));
        }
        state.commits.push((message.to_string(), metadata.clone()));
        state.dirty = false;
        Ok(())
    }

    fn has_uncommitted_changes(&self) -> Result<bool> {
        Ok(self.state.borrow().dirty)
    }
}

/// In-memory store with a project `shop` at `init`.
pub fn store_with_project() -> Store {
    let store = Store::open_in_memory().expect("in-memory store");
    store.create_project("shop", "Shop").expect("create project");
    store
}
