//! Stage transitions.
//!
//! Backward moves are always allowed so a project can reiterate an earlier
//! stage. Forward moves advance one rank at a time and must satisfy the
//! destination's prerequisites. Every move, forced or not, lands in the
//! navigation log.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::checkpoint::CheckpointManager;
use crate::config::NavigationConfig;
use crate::error::Result;
use crate::prerequisite::Prerequisites;
use crate::store::Store;
use crate::types::{check_stage_order, ArtifactKind, Stage};
use crate::vcs::SnapshotStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationRecord {
    pub id: i64,
    pub project_id: String,
    pub from_stage: Stage,
    pub to_stage: Stage,
    /// Written through [`StageNavigator::force_stage`], bypassing validation.
    pub forced: bool,
    pub created_at: DateTime<Utc>,
}

impl NavigationRecord {
    pub fn is_backward(&self) -> bool {
        self.to_stage < self.from_stage
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NavigationResult {
    pub from_stage: Stage,
    pub to_stage: Stage,
    pub preserved_work: Vec<String>,
    pub regenerated_artifacts: Vec<String>,
    pub next_action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NavigationOptions {
    pub current_stage: Stage,
    pub can_go_back: Vec<Stage>,
    pub next_stage: Option<Stage>,
    pub can_go_forward: bool,
}

/// Work that survives a backward move, and work that will need redoing.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ArtifactImpact {
    pub preserved: Vec<String>,
    pub regenerated: Vec<String>,
}

pub struct StageNavigator<'a> {
    store: &'a Store,
    snapshots: &'a dyn SnapshotStore,
    prerequisites: Prerequisites,
    settings: NavigationConfig,
}

impl<'a> StageNavigator<'a> {
    pub fn new(
        store: &'a Store,
        snapshots: &'a dyn SnapshotStore,
        settings: &NavigationConfig,
    ) -> Self {
        let prerequisites = if settings.enforce_prerequisites {
            Prerequisites::defaults()
        } else {
            Prerequisites::none()
        };
        Self {
            store,
            snapshots,
            prerequisites,
            settings: settings.clone(),
        }
    }

    pub fn with_prerequisites(mut self, prerequisites: Prerequisites) -> Self {
        self.prerequisites = prerequisites;
        self
    }

    pub fn validate_transition(&self, project_id: &str, from: Stage, to: Stage) -> Result<()> {
        check_stage_order(from, to)?;
        if to.rank() == from.rank() + 1 {
            self.prerequisites.check(self.store, project_id, to)?;
        }
        Ok(())
    }

    /// Validate and describe a move without performing it.
    pub fn preview(&self, project_id: &str, to: Stage) -> Result<NavigationResult> {
        let project = self.store.get_project(project_id)?;
        let from = project.current_stage;
        self.validate_transition(project_id, from, to)?;
        let impact = self.determine_artifacts(project_id, from, to);
        Ok(NavigationResult {
            from_stage: from,
            to_stage: to,
            preserved_work: impact.preserved,
            regenerated_artifacts: impact.regenerated,
            next_action: to.hint().to_string(),
            checkpoint_id: None,
        })
    }

    pub fn navigate_to_stage(&self, project_id: &str, to: Stage) -> Result<NavigationResult> {
        let project = self.store.get_project(project_id)?;
        let from = project.current_stage;
        self.validate_transition(project_id, from, to)?;
        let impact = self.determine_artifacts(project_id, from, to);

        let backward = to < from;
        let checkpoint_id = if backward && self.settings.checkpoint_before_backtrack {
            self.checkpoint_before_backtrack(project_id, from, to)
        } else {
            None
        };

        self.store.set_stage(project_id, to)?;
        self.record_navigation(project_id, from, to, false);

        if self.settings.commit_on_navigate {
            let message = format!("devflow: navigate {from} -> {to}");
            let metadata = BTreeMap::from([
                ("project".to_string(), project_id.to_string()),
                ("from-stage".to_string(), from.to_string()),
                ("to-stage".to_string(), to.to_string()),
            ]);
            if let Err(e) = self.snapshots.commit_all(&message, &metadata) {
                warn!(project = project_id, error = %e, "post-navigation commit failed");
            }
        }

        info!(project = project_id, from = %from, to = %to, "navigated");
        Ok(NavigationResult {
            from_stage: from,
            to_stage: to,
            preserved_work: impact.preserved,
            regenerated_artifacts: impact.regenerated,
            next_action: to.hint().to_string(),
            checkpoint_id,
        })
    }

    /// Write `stage` without validation. Returns the stage the project was at.
    ///
    /// This is the one sanctioned bypass; it is still logged, marked forced.
    pub fn force_stage(&self, project_id: &str, stage: Stage) -> Result<Stage> {
        let project = self.store.get_project(project_id)?;
        let from = project.current_stage;
        self.store.set_stage(project_id, stage)?;
        self.record_navigation(project_id, from, stage, true);
        info!(project = project_id, from = %from, to = %stage, "stage forced");
        Ok(from)
    }

    /// Preserved and regenerated work for a move. Forward moves report
    /// nothing. Store lookups that fail count as absent.
    pub fn determine_artifacts(&self, project_id: &str, from: Stage, to: Stage) -> ArtifactImpact {
        let mut impact = ArtifactImpact::default();
        if to >= from {
            return impact;
        }

        for kind in [ArtifactKind::Interview, ArtifactKind::Architecture] {
            match self.store.has_artifact(project_id, kind) {
                Ok(true) => impact.preserved.push(capitalize(kind.label())),
                Ok(false) => {}
                Err(e) => warn!(project = project_id, artifact = %kind, error = %e, "artifact lookup failed"),
            }
        }
        match self.store.list_phases(project_id) {
            Ok(phases) if !phases.is_empty() => impact
                .preserved
                .push(format!("Development plan ({} phases)", phases.len())),
            Ok(_) => {}
            Err(e) => warn!(project = project_id, error = %e, "phase lookup failed"),
        }

        if to < Stage::Design && from > Stage::Design {
            impact.regenerated.push("Architecture document".to_string());
        }
        if to < Stage::Plan && from > Stage::Plan {
            impact.regenerated.push("Development plan".to_string());
        }
        impact
    }

    pub fn navigation_options(&self, project_id: &str) -> Result<NavigationOptions> {
        let current = self.store.get_project(project_id)?.current_stage;
        let can_go_back = Stage::all()
            .iter()
            .copied()
            .filter(|s| *s < current)
            .collect();
        let next_stage = current.next();
        Ok(NavigationOptions {
            current_stage: current,
            can_go_back,
            next_stage,
            can_go_forward: next_stage.is_some(),
        })
    }

    pub fn navigation_history(&self, project_id: &str) -> Result<Vec<NavigationRecord>> {
        self.store.list_navigation(project_id)
    }

    /// Number of backward moves the project has made.
    pub fn iteration_count(&self, project_id: &str) -> Result<usize> {
        Ok(self
            .store
            .list_navigation(project_id)?
            .iter()
            .filter(|r| r.is_backward())
            .count())
    }

    // -----------------------------------------------------------------------
    // Best-effort side effects
    // -----------------------------------------------------------------------

    fn record_navigation(&self, project_id: &str, from: Stage, to: Stage, forced: bool) {
        if let Err(e) = self.store.append_navigation(project_id, from, to, forced) {
            warn!(project = project_id, error = %e, "failed to append navigation log");
        }
        let key = format!("last_navigation:{project_id}");
        let value = format!(
            "{from}->{to} at {}",
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        if let Err(e) = self.store.set_config(&key, &value) {
            warn!(project = project_id, error = %e, "failed to record last navigation");
        }
    }

    fn checkpoint_before_backtrack(&self, project_id: &str, from: Stage, to: Stage) -> Option<String> {
        let manager = CheckpointManager::new(self.store, self.snapshots);
        let metadata = BTreeMap::from([
            ("type".to_string(), "auto".to_string()),
            ("from_stage".to_string(), from.to_string()),
            ("to_stage".to_string(), to.to_string()),
        ]);
        match manager.create_checkpoint(project_id, &format!("before-{to}"), metadata) {
            Ok(cp) => Some(cp.id),
            Err(e) => {
                warn!(project = project_id, error = %e, "checkpoint before backtrack failed");
                None
            }
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
