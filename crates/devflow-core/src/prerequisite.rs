//! Entry conditions for forward stage moves.
//!
//! Each destination stage maps to the artifacts that must already exist before
//! a project may move into it. Backward moves never consult this registry.

use std::collections::HashMap;

use crate::error::{DevflowError, Result};
use crate::store::Store;
use crate::types::{ArtifactKind, Stage, WorkStatus};

pub trait ArtifactPresence {
    /// Short description used in the error when the check fails.
    fn requirement(&self) -> String;

    fn is_present(&self, store: &Store, project_id: &str) -> Result<bool>;
}

/// A named document in the artifacts table.
pub struct StoredArtifact(pub ArtifactKind);

impl ArtifactPresence for StoredArtifact {
    fn requirement(&self) -> String {
        self.0.label().to_string()
    }

    fn is_present(&self, store: &Store, project_id: &str) -> Result<bool> {
        store.has_artifact(project_id, self.0)
    }
}

/// A development plan with at least one phase.
pub struct HasPhases;

impl ArtifactPresence for HasPhases {
    fn requirement(&self) -> String {
        "a development plan with at least one phase".to_string()
    }

    fn is_present(&self, store: &Store, project_id: &str) -> Result<bool> {
        Ok(!store.list_phases(project_id)?.is_empty())
    }
}

pub struct AllPhasesCompleted;

impl ArtifactPresence for AllPhasesCompleted {
    fn requirement(&self) -> String {
        "completion of every phase".to_string()
    }

    fn is_present(&self, store: &Store, project_id: &str) -> Result<bool> {
        let phases = store.list_phases(project_id)?;
        Ok(!phases.is_empty() && phases.iter().all(|p| p.status == WorkStatus::Completed))
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct Prerequisites {
    checks: HashMap<Stage, Vec<Box<dyn ArtifactPresence>>>,
}

impl Prerequisites {
    /// No checks at all: every one-step forward move is allowed.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn defaults() -> Self {
        let mut registry = Self::default();
        registry.register(Stage::Design, StoredArtifact(ArtifactKind::Interview));
        registry.register(Stage::Plan, StoredArtifact(ArtifactKind::Architecture));
        registry.register(Stage::Review, HasPhases);
        registry.register(Stage::Develop, HasPhases);
        registry.register(Stage::Complete, AllPhasesCompleted);
        registry
    }

    pub fn register(&mut self, stage: Stage, check: impl ArtifactPresence + 'static) {
        self.checks.entry(stage).or_default().push(Box::new(check));
    }

    /// Fails with the first unmet requirement for entering `stage`.
    pub fn check(&self, store: &Store, project_id: &str, stage: Stage) -> Result<()> {
        let Some(checks) = self.checks.get(&stage) else {
            return Ok(());
        };
        for check in checks {
            if !check.is_present(store, project_id)? {
                return Err(DevflowError::MissingPrerequisite {
                    stage: stage.to_string(),
                    requirement: check.requirement(),
                });
            }
        }
        Ok(())
    }
}
