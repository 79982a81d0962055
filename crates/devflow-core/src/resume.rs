//! Where to pick work back up.
//!
//! The controller composes the checkpoint manager (tree restore), the
//! navigator (stage override, through `force_stage`) and the store (in-flight
//! reset) into a single `resume` call.

use serde::Serialize;
use tracing::{debug, info};

use crate::checkpoint::{Checkpoint, CheckpointManager};
use crate::config::NavigationConfig;
use crate::error::{DevflowError, Result};
use crate::navigator::StageNavigator;
use crate::progress::{format_duration, ProgressStats};
use crate::project::{next_open_phase, Phase, Project, Task};
use crate::store::Store;
use crate::types::{ArtifactKind, Stage, WorkStatus};
use crate::vcs::SnapshotStore;

#[derive(Debug, Clone, Serialize)]
pub struct IncompleteWork {
    pub project_id: String,
    pub current_stage: Stage,
    pub has_incomplete_work: bool,
    /// Not computed once the project has reached `complete`.
    pub progress: Option<ProgressStats>,
    pub latest_checkpoint: Option<Checkpoint>,
    pub summary: String,
}

#[derive(Debug, Clone, Default)]
pub struct ResumeOptions {
    pub project_id: String,
    pub from_checkpoint: Option<String>,
    pub restart_stage: bool,
    pub stage: Option<Stage>,
    pub selected_model: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResumeOutcome {
    pub project_id: String,
    /// Checkpoint id, or `current`.
    pub restored_from: String,
    pub stage: Stage,
    pub current_phase_id: Option<String>,
    pub restarted: bool,
    pub reset_phases: usize,
    pub reset_tasks: usize,
    pub selected_model: Option<String>,
    pub next_action: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ResumeContext {
    pub project_id: String,
    pub stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interview: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phases: Option<Vec<Phase>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blockers: Option<Vec<Task>>,
    /// Tasks of the phase the project is currently on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_tasks: Option<Vec<Task>>,
}

/// In-flight work a restart of `stage` would reset.
#[derive(Debug, Clone, Serialize)]
pub struct RestartPreview {
    pub stage: Stage,
    pub phases: Vec<Phase>,
    pub tasks: Vec<Task>,
}

impl RestartPreview {
    pub fn is_noop(&self) -> bool {
        self.phases.is_empty() && self.tasks.is_empty()
    }
}

pub const RESTORED_FROM_CURRENT: &str = "current";

pub fn selected_model_key(project_id: &str) -> String {
    format!("selected_model:{project_id}")
}

// ---------------------------------------------------------------------------
// ResumeController
// ---------------------------------------------------------------------------

pub struct ResumeController<'a> {
    store: &'a Store,
    checkpoints: CheckpointManager<'a>,
    navigator: StageNavigator<'a>,
}

impl<'a> ResumeController<'a> {
    pub fn new(
        store: &'a Store,
        snapshots: &'a dyn SnapshotStore,
        settings: &NavigationConfig,
    ) -> Self {
        Self {
            store,
            checkpoints: CheckpointManager::new(store, snapshots),
            navigator: StageNavigator::new(store, snapshots, settings),
        }
    }

    pub fn detect_incomplete_work(&self, project_id: &str) -> Result<IncompleteWork> {
        let project = self.store.get_project(project_id)?;
        let latest_checkpoint = self.checkpoints.latest_checkpoint(project_id)?;

        let (progress, has_incomplete_work) = if project.current_stage == Stage::Complete {
            (None, false)
        } else {
            let stats = self.store.calculate_progress(project_id)?;
            let incomplete =
                stats.completion_percentage < 100.0 || project.current_stage != Stage::Complete;
            (Some(stats), incomplete)
        };

        let summary = render_summary(&project, progress.as_ref(), latest_checkpoint.as_ref());
        Ok(IncompleteWork {
            project_id: project.id,
            current_stage: project.current_stage,
            has_incomplete_work,
            progress,
            latest_checkpoint,
            summary,
        })
    }

    pub fn resume(&self, options: &ResumeOptions) -> Result<ResumeOutcome> {
        let project_id = options.project_id.as_str();
        let mut project = self.store.get_project(project_id)?;

        let restored_from = match &options.from_checkpoint {
            Some(checkpoint_id) => {
                let checkpoint = self.checkpoints.get_checkpoint(checkpoint_id)?;
                if checkpoint.project_id != project_id {
                    return Err(DevflowError::InvalidCheckpoint {
                        id: checkpoint_id.clone(),
                        reason: format!("belongs to project '{}'", checkpoint.project_id),
                    });
                }
                self.checkpoints.rollback(checkpoint_id)?;
                project = self.store.get_project(project_id)?;
                checkpoint.id
            }
            None => RESTORED_FROM_CURRENT.to_string(),
        };

        if let Some(stage) = options.stage {
            if stage != project.current_stage {
                self.navigator.force_stage(project_id, stage)?;
            }
        }

        let stage = options.stage.unwrap_or(project.current_stage);
        let (mut reset_phases, mut reset_tasks) = (0, 0);
        if options.restart_stage {
            if stage == Stage::Develop {
                let counts = self.store.restart_in_flight(project_id)?;
                reset_phases = counts.phases;
                reset_tasks = counts.tasks;
                let phases = self.store.list_phases(project_id)?;
                let current = next_open_phase(&phases).map(|p| p.id.as_str());
                self.store.set_current_phase(project_id, current)?;
            } else {
                debug!(project = project_id, stage = %stage, "restart has no in-flight state to reset");
            }
        }

        if let Some(model) = &options.selected_model {
            self.store.set_config(&selected_model_key(project_id), model)?;
        }

        let project = self.store.get_project(project_id)?;
        let next_action = self.next_action(&project)?;

        info!(
            project = project_id,
            restored_from = %restored_from,
            stage = %project.current_stage,
            restarted = options.restart_stage,
            "resumed"
        );

        Ok(ResumeOutcome {
            project_id: project.id,
            restored_from,
            stage: project.current_stage,
            current_phase_id: project.current_phase_id,
            restarted: options.restart_stage,
            reset_phases,
            reset_tasks,
            selected_model: options.selected_model.clone(),
            next_action,
        })
    }

    pub fn list_available_checkpoints(&self, project_id: &str) -> Result<Vec<Checkpoint>> {
        self.checkpoints.list_checkpoints(project_id)
    }

    /// Artifacts relevant to `stage`. Lookups that fail are left out.
    pub fn get_resume_context(&self, project_id: &str, stage: Stage) -> ResumeContext {
        let mut context = ResumeContext {
            project_id: project_id.to_string(),
            stage: Some(stage),
            ..ResumeContext::default()
        };

        if stage >= Stage::Interview {
            context.interview = self.optional_artifact(project_id, ArtifactKind::Interview);
        }
        if stage >= Stage::Design {
            context.architecture = self.optional_artifact(project_id, ArtifactKind::Architecture);
        }
        if stage >= Stage::Plan {
            context.phases = self.store.list_phases(project_id).ok();
        }
        if stage == Stage::Develop {
            context.blockers = self.store.list_project_tasks(project_id).ok().map(|tasks| {
                tasks
                    .into_iter()
                    .filter(|t| t.status == WorkStatus::Blocked)
                    .collect()
            });
            context.current_tasks = self
                .store
                .get_project(project_id)
                .ok()
                .and_then(|p| p.current_phase_id)
                .and_then(|phase_id| self.store.list_tasks(&phase_id).ok());
        }
        context
    }

    pub fn restart_preview(&self, project_id: &str, stage: Stage) -> Result<RestartPreview> {
        self.store.get_project(project_id)?;
        if stage != Stage::Develop {
            return Ok(RestartPreview {
                stage,
                phases: Vec::new(),
                tasks: Vec::new(),
            });
        }
        let phases = self
            .store
            .list_phases(project_id)?
            .into_iter()
            .filter(|p| p.status == WorkStatus::InProgress)
            .collect();
        let tasks = self
            .store
            .list_project_tasks(project_id)?
            .into_iter()
            .filter(|t| t.status == WorkStatus::InProgress)
            .collect();
        Ok(RestartPreview {
            stage,
            phases,
            tasks,
        })
    }

    fn next_action(&self, project: &Project) -> Result<String> {
        if project.current_stage != Stage::Develop {
            return Ok(project.current_stage.hint().to_string());
        }
        let phases = self.store.list_phases(&project.id)?;
        Ok(match next_open_phase(&phases) {
            Some(phase) => format!("Continue phase {}: {}", phase.number, phase.title),
            None => "All phases are finished or blocked; resolve blockers or move to complete"
                .to_string(),
        })
    }

    fn optional_artifact(&self, project_id: &str, kind: ArtifactKind) -> Option<String> {
        match self.store.get_artifact(project_id, kind) {
            Ok(content) => Some(content),
            Err(e) => {
                debug!(project = project_id, artifact = %kind, error = %e, "artifact omitted from context");
                None
            }
        }
    }
}

fn render_summary(
    project: &Project,
    progress: Option<&ProgressStats>,
    latest: Option<&Checkpoint>,
) -> String {
    let mut lines = vec![
        format!("Project: {} ({})", project.name, project.id),
        format!("Stage: {}", project.current_stage),
    ];

    match progress {
        Some(stats) => {
            lines.push(format!("Progress: {:.1}% complete", stats.completion_percentage));
            lines.push(format!(
                "Phases: {}/{} completed",
                stats.phases.completed, stats.phases.total
            ));
            lines.push(format!(
                "Tasks: {}/{} completed, {} in progress, {} not started",
                stats.tasks.completed,
                stats.tasks.total,
                stats.tasks.in_progress,
                stats.tasks.not_started
            ));
            if stats.tasks.blocked > 0 {
                lines.push(format!("Warning: {} task(s) blocked", stats.tasks.blocked));
            }
            let mut timing = format!("Elapsed: {}", format_duration(stats.elapsed_seconds));
            if let Some(remaining) = stats.estimated_remaining_seconds {
                timing.push_str(&format!(", estimated remaining: {}", format_duration(remaining)));
            }
            lines.push(timing);
        }
        None => lines.push("All stages complete".to_string()),
    }

    if let Some(cp) = latest {
        lines.push(format!(
            "Latest checkpoint: {} ({})",
            cp.name,
            cp.created_at.format("%Y-%m-%d %H:%M")
        ));
    }

    lines.join("\n")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::{store_with_project, FakeSnapshots};
    use std::collections::BTreeMap;

    fn controller<'a>(store: &'a Store, fake: &'a FakeSnapshots) -> ResumeController<'a> {
        ResumeController::new(store, fake, &NavigationConfig::default())
    }

    fn options(stage: Option<Stage>, restart: bool) -> ResumeOptions {
        ResumeOptions {
            project_id: "shop".to_string(),
            stage,
            restart_stage: restart,
            ..ResumeOptions::default()
        }
    }

    #[test]
    fn complete_project_has_no_incomplete_work() {
        let store = store_with_project();
        let phase = store.create_phase("shop", 1, "Only").unwrap();
        let task = store.create_task(&phase.id, "t").unwrap();
        store.set_task_status(&task.id, WorkStatus::Completed, None).unwrap();
        store.set_phase_status(&phase.id, WorkStatus::Completed).unwrap();
        store.set_stage("shop", Stage::Complete).unwrap();
        let fake = FakeSnapshots::new();

        let work = controller(&store, &fake).detect_incomplete_work("shop").unwrap();
        assert!(!work.has_incomplete_work);
        assert!(work.progress.is_none());
        assert!(work.summary.contains("All stages complete"));
    }

    #[test]
    fn full_progress_before_complete_is_still_incomplete() {
        let store = store_with_project();
        let phase = store.create_phase("shop", 1, "Only").unwrap();
        let task = store.create_task(&phase.id, "t").unwrap();
        store.set_task_status(&task.id, WorkStatus::Completed, None).unwrap();
        store.set_stage("shop", Stage::Develop).unwrap();
        let fake = FakeSnapshots::new();

        let work = controller(&store, &fake).detect_incomplete_work("shop").unwrap();
        assert!(work.has_incomplete_work);
        assert_eq!(work.progress.unwrap().completion_percentage, 100.0);
    }

    #[test]
    fn summary_mentions_blockers_and_latest_checkpoint() {
        let store = store_with_project();
        let phase = store.create_phase("shop", 1, "Catalog").unwrap();
        let task = store.create_task(&phase.id, "Import").unwrap();
        store.create_task(&phase.id, "List").unwrap();
        store
            .set_task_status(&task.id, WorkStatus::Blocked, Some("no data"))
            .unwrap();
        let fake = FakeSnapshots::new();
        CheckpointManager::new(&store, &fake)
            .create_checkpoint("shop", "safe point", BTreeMap::new())
            .unwrap();

        let work = controller(&store, &fake).detect_incomplete_work("shop").unwrap();
        assert!(work.summary.contains("Stage: init"));
        assert!(work.summary.contains("Progress: 0.0% complete"));
        assert!(work.summary.contains("Warning: 1 task(s) blocked"));
        assert!(work.summary.contains("Latest checkpoint: safe point"));
        assert_eq!(work.latest_checkpoint.unwrap().name, "safe point");
    }

    #[test]
    fn resume_from_current_reports_hint() {
        let store = store_with_project();
        store.set_stage("shop", Stage::Design).unwrap();
        let fake = FakeSnapshots::new();

        let outcome = controller(&store, &fake).resume(&options(None, false)).unwrap();
        assert_eq!(outcome.restored_from, RESTORED_FROM_CURRENT);
        assert_eq!(outcome.stage, Stage::Design);
        assert_eq!(outcome.next_action, Stage::Design.hint());
        assert!(fake.resets().is_empty());
    }

    #[test]
    fn stage_override_bypasses_validation() {
        let store = store_with_project();
        store.set_stage("shop", Stage::Review).unwrap();
        let fake = FakeSnapshots::new();

        let outcome = controller(&store, &fake)
            .resume(&options(Some(Stage::Develop), false))
            .unwrap();
        assert_eq!(outcome.stage, Stage::Develop);
        assert_eq!(store.get_project("shop").unwrap().current_stage, Stage::Develop);

        let history = store.list_navigation("shop").unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].forced);
        assert_eq!(history[0].from_stage, Stage::Review);
    }

    #[test]
    fn stage_override_can_jump_anywhere() {
        let store = store_with_project();
        let fake = FakeSnapshots::new();
        let outcome = controller(&store, &fake)
            .resume(&options(Some(Stage::Complete), false))
            .unwrap();
        assert_eq!(outcome.stage, Stage::Complete);
    }

    #[test]
    fn restart_develop_resets_only_in_progress() {
        let store = store_with_project();
        store.set_stage("shop", Stage::Develop).unwrap();
        let done = store.create_phase("shop", 1, "Done").unwrap();
        let active = store.create_phase("shop", 2, "Active").unwrap();
        let blocked = store.create_phase("shop", 3, "Blocked").unwrap();
        store.set_phase_status(&done.id, WorkStatus::Completed).unwrap();
        store.set_phase_status(&active.id, WorkStatus::InProgress).unwrap();
        store.set_phase_status(&blocked.id, WorkStatus::Blocked).unwrap();
        let t_done = store.create_task(&done.id, "a").unwrap();
        let t_active = store.create_task(&active.id, "b").unwrap();
        let t_blocked = store.create_task(&blocked.id, "c").unwrap();
        store.set_task_status(&t_done.id, WorkStatus::Completed, None).unwrap();
        store.set_task_status(&t_active.id, WorkStatus::InProgress, None).unwrap();
        store.set_task_status(&t_blocked.id, WorkStatus::Blocked, Some("x")).unwrap();
        let fake = FakeSnapshots::new();
        let ctl = controller(&store, &fake);

        let preview = ctl.restart_preview("shop", Stage::Develop).unwrap();
        assert_eq!(preview.phases.len(), 1);
        assert_eq!(preview.tasks.len(), 1);

        let outcome = ctl.resume(&options(None, true)).unwrap();
        assert!(outcome.restarted);
        assert_eq!((outcome.reset_phases, outcome.reset_tasks), (1, 1));
        assert_eq!(store.get_phase(&done.id).unwrap().status, WorkStatus::Completed);
        assert_eq!(store.get_phase(&active.id).unwrap().status, WorkStatus::NotStarted);
        assert_eq!(store.get_phase(&blocked.id).unwrap().status, WorkStatus::Blocked);
        assert_eq!(store.get_task(&t_done.id).unwrap().status, WorkStatus::Completed);
        assert_eq!(store.get_task(&t_active.id).unwrap().status, WorkStatus::NotStarted);
        assert_eq!(store.get_task(&t_blocked.id).unwrap().status, WorkStatus::Blocked);
        assert_eq!(outcome.next_action, "Continue phase 2: Active");
        assert_eq!(outcome.current_phase_id.as_deref(), Some(active.id.as_str()));
        assert_eq!(
            store.get_project("shop").unwrap().current_phase_id,
            Some(active.id.clone())
        );
    }

    #[test]
    fn restart_other_stage_is_noop() {
        let store = store_with_project();
        store.set_stage("shop", Stage::Plan).unwrap();
        store.put_artifact("shop", ArtifactKind::Interview, "answers").unwrap();
        let phase = store.create_phase("shop", 1, "P").unwrap();
        store.set_phase_status(&phase.id, WorkStatus::InProgress).unwrap();
        let fake = FakeSnapshots::new();
        let ctl = controller(&store, &fake);

        assert!(ctl.restart_preview("shop", Stage::Plan).unwrap().is_noop());
        let outcome = ctl.resume(&options(None, true)).unwrap();
        assert_eq!((outcome.reset_phases, outcome.reset_tasks), (0, 0));
        assert_eq!(store.get_phase(&phase.id).unwrap().status, WorkStatus::InProgress);
        assert!(store.has_artifact("shop", ArtifactKind::Interview).unwrap());
    }

    #[test]
    fn restart_applies_to_overridden_stage() {
        let store = store_with_project();
        store.set_stage("shop", Stage::Review).unwrap();
        let phase = store.create_phase("shop", 1, "P").unwrap();
        store.set_phase_status(&phase.id, WorkStatus::InProgress).unwrap();
        let fake = FakeSnapshots::new();

        let outcome = controller(&store, &fake)
            .resume(&options(Some(Stage::Develop), true))
            .unwrap();
        assert_eq!(outcome.reset_phases, 1);
        assert_eq!(store.get_phase(&phase.id).unwrap().status, WorkStatus::NotStarted);
    }

    #[test]
    fn resume_from_checkpoint_restores_tree_only() {
        let store = store_with_project();
        let fake = FakeSnapshots::new();
        let cp = CheckpointManager::new(&store, &fake)
            .create_checkpoint("shop", "early", BTreeMap::new())
            .unwrap();
        store.set_stage("shop", Stage::Plan).unwrap();

        let outcome = controller(&store, &fake)
            .resume(&ResumeOptions {
                project_id: "shop".into(),
                from_checkpoint: Some(cp.id.clone()),
                ..ResumeOptions::default()
            })
            .unwrap();
        assert_eq!(outcome.restored_from, cp.id);
        assert_eq!(outcome.stage, Stage::Plan);
        assert_eq!(fake.resets(), vec![cp.vcs_tag]);
    }

    #[test]
    fn resume_rejects_foreign_checkpoint() {
        let store = store_with_project();
        store.create_project("blog", "Blog").unwrap();
        let fake = FakeSnapshots::new();
        let cp = CheckpointManager::new(&store, &fake)
            .create_checkpoint("blog", "x", BTreeMap::new())
            .unwrap();
        let err = controller(&store, &fake)
            .resume(&ResumeOptions {
                project_id: "shop".into(),
                from_checkpoint: Some(cp.id),
                ..ResumeOptions::default()
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(fake.resets().is_empty());
    }

    #[test]
    fn resume_from_missing_checkpoint_is_not_found() {
        let store = store_with_project();
        let fake = FakeSnapshots::new();
        let err = controller(&store, &fake)
            .resume(&ResumeOptions {
                project_id: "shop".into(),
                from_checkpoint: Some("nope".into()),
                ..ResumeOptions::default()
            })
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn selected_model_is_persisted() {
        let store = store_with_project();
        let fake = FakeSnapshots::new();
        let outcome = controller(&store, &fake)
            .resume(&ResumeOptions {
                project_id: "shop".into(),
                selected_model: Some("large".into()),
                ..ResumeOptions::default()
            })
            .unwrap();
        assert_eq!(outcome.selected_model.as_deref(), Some("large"));
        assert_eq!(store.get_config(&selected_model_key("shop")).unwrap(), "large");
    }

    #[test]
    fn develop_with_everything_done_says_so() {
        let store = store_with_project();
        store.set_stage("shop", Stage::Develop).unwrap();
        let phase = store.create_phase("shop", 1, "P").unwrap();
        store.set_phase_status(&phase.id, WorkStatus::Completed).unwrap();
        let fake = FakeSnapshots::new();
        let outcome = controller(&store, &fake).resume(&options(None, false)).unwrap();
        assert!(outcome.next_action.starts_with("All phases"));
    }

    #[test]
    fn context_includes_only_relevant_artifacts() {
        let store = store_with_project();
        store.put_artifact("shop", ArtifactKind::Interview, "answers").unwrap();
        let phase = store.create_phase("shop", 1, "P").unwrap();
        let task = store.create_task(&phase.id, "t").unwrap();
        store.set_task_status(&task.id, WorkStatus::Blocked, Some("x")).unwrap();
        let fake = FakeSnapshots::new();
        let ctl = controller(&store, &fake);

        let ctx = ctl.get_resume_context("shop", Stage::Interview);
        assert_eq!(ctx.interview.as_deref(), Some("answers"));
        assert!(ctx.architecture.is_none());
        assert!(ctx.phases.is_none());

        // architecture is missing; it is omitted rather than failing
        let ctx = ctl.get_resume_context("shop", Stage::Develop);
        assert!(ctx.architecture.is_none());
        assert_eq!(ctx.phases.unwrap().len(), 1);
        assert_eq!(ctx.blockers.unwrap().len(), 1);
        assert!(ctx.current_tasks.is_none());

        store.set_current_phase("shop", Some(&phase.id)).unwrap();
        let ctx = ctl.get_resume_context("shop", Stage::Develop);
        let current: Vec<_> = ctx.current_tasks.unwrap().into_iter().map(|t| t.id).collect();
        assert_eq!(current, [task.id.clone()]);

        let ctx = ctl.get_resume_context("ghost", Stage::Develop);
        assert!(ctx.interview.is_none());
    }

    #[test]
    fn list_available_checkpoints_passes_through() {
        let store = store_with_project();
        let fake = FakeSnapshots::new();
        let mgr = CheckpointManager::new(&store, &fake);
        mgr.create_checkpoint("shop", "a", BTreeMap::new()).unwrap();
        mgr.create_checkpoint("shop", "b", BTreeMap::new()).unwrap();
        let list = controller(&store, &fake).list_available_checkpoints("shop").unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].name, "a");
    }
}
