//! Named recovery points.
//!
//! A checkpoint is a version-control tag plus a store row pointing at it.
//! Rolling back resets the working tree to the tag and leaves the store alone:
//! stage, phase and task rows keep recording how far the project got even
//! after its files have been rewound.
//!
//! Checkpoints are append-only. `delete_checkpoint` exists for API
//! completeness and never removes anything.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DevflowError, Result};
use crate::store::Store;
use crate::vcs::SnapshotStore;

pub const TAG_PREFIX: &str = "checkpoint-";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub project_id: String,
    pub name: String,
    pub vcs_tag: String,
    pub created_at: DateTime<Utc>,
    pub metadata: BTreeMap<String, String>,
}

impl Checkpoint {
    /// `manual` or `auto`.
    pub fn kind(&self) -> &str {
        self.metadata.get("type").map(String::as_str).unwrap_or("manual")
    }
}

/// What a rollback to a checkpoint would discard and keep.
#[derive(Debug, Clone, Serialize)]
pub struct RollbackPreview {
    pub checkpoint: Checkpoint,
    pub uncommitted_changes: bool,
    pub commits_discarded: usize,
    pub preserved: Vec<String>,
}

impl RollbackPreview {
    pub fn lost(&self) -> Vec<String> {
        let mut lost = Vec::new();
        if self.uncommitted_changes {
            lost.push("uncommitted changes in the working tree".to_string());
        }
        if self.commits_discarded > 0 {
            lost.push(format!(
                "{} commit(s) made after this checkpoint",
                self.commits_discarded
            ));
        }
        lost
    }
}

// ---------------------------------------------------------------------------
// Names and tags
// ---------------------------------------------------------------------------

/// Spaces become dashes; anything other than ASCII letters, digits, `-` and
/// `_` is dropped.
pub fn sanitize_name(name: &str) -> Result<String> {
    let sanitized: String = name
        .chars()
        .map(|c| if c == ' ' { '-' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if sanitized.is_empty() {
        return Err(DevflowError::InvalidCheckpointName(name.to_string()));
    }
    Ok(sanitized)
}

static LAST_NANOS: AtomicI64 = AtomicI64::new(0);

/// Wall-clock instant at nanosecond resolution, strictly increasing within
/// the process.
fn unique_instant() -> DateTime<Utc> {
    let now = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let mut last = LAST_NANOS.load(Ordering::SeqCst);
    loop {
        let candidate = now.max(last + 1);
        match LAST_NANOS.compare_exchange(last, candidate, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => return Utc.timestamp_nanos(candidate),
            Err(actual) => last = actual,
        }
    }
}

fn tag_for(sanitized: &str, at: DateTime<Utc>) -> String {
    format!(
        "{TAG_PREFIX}{sanitized}-{}",
        at.timestamp_nanos_opt().unwrap_or_default()
    )
}

// ---------------------------------------------------------------------------
// CheckpointManager
// ---------------------------------------------------------------------------

pub struct CheckpointManager<'a> {
    store: &'a Store,
    snapshots: &'a dyn SnapshotStore,
}

impl<'a> CheckpointManager<'a> {
    pub fn new(store: &'a Store, snapshots: &'a dyn SnapshotStore) -> Self {
        Self { store, snapshots }
    }

    /// Tag `HEAD` and record the checkpoint.
    ///
    /// Two calls with the same name produce two checkpoints. If the store
    /// write fails after tagging, the tag is deleted again so no orphan is
    /// left behind.
    pub fn create_checkpoint(
        &self,
        project_id: &str,
        name: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<Checkpoint> {
        self.store.get_project(project_id)?;
        let sanitized = sanitize_name(name)?;
        let created_at = unique_instant();
        let vcs_tag = tag_for(&sanitized, created_at);

        let mut metadata = metadata;
        metadata
            .entry("type".to_string())
            .or_insert_with(|| "manual".to_string());
        metadata.insert("project_id".to_string(), project_id.to_string());
        metadata.insert(
            "created_at".to_string(),
            created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        );

        let message = format!("Checkpoint '{name}' for {project_id}");
        self.snapshots.create_tag(&vcs_tag, &message)?;

        let checkpoint = Checkpoint {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            name: name.to_string(),
            vcs_tag,
            created_at,
            metadata,
        };

        if let Err(e) = self.store.insert_checkpoint(&checkpoint) {
            match self.snapshots.delete_tag(&checkpoint.vcs_tag) {
                Ok(()) => warn!(
                    tag = %checkpoint.vcs_tag,
                    "checkpoint record not saved; removed its tag"
                ),
                Err(del) => warn!(
                    tag = %checkpoint.vcs_tag,
                    error = %del,
                    "checkpoint record not saved and its tag could not be removed; delete it manually"
                ),
            }
            return Err(e);
        }

        info!(
            project = project_id,
            checkpoint = %checkpoint.id,
            tag = %checkpoint.vcs_tag,
            "checkpoint created"
        );
        Ok(checkpoint)
    }

    /// Checkpoint named after a phase, tagged `type: auto`.
    pub fn create_auto_checkpoint(&self, project_id: &str, phase_id: &str) -> Result<Checkpoint> {
        let phase = self.store.get_phase(phase_id)?;
        let name = format!("phase-{}-{}", phase.number, phase.title);
        let metadata = BTreeMap::from([
            ("type".to_string(), "auto".to_string()),
            ("phase_id".to_string(), phase.id.clone()),
            ("phase".to_string(), phase.number.to_string()),
            ("title".to_string(), phase.title.clone()),
        ]);
        self.create_checkpoint(project_id, &name, metadata)
    }

    pub fn list_checkpoints(&self, project_id: &str) -> Result<Vec<Checkpoint>> {
        self.store.list_checkpoints(project_id)
    }

    pub fn get_checkpoint(&self, id: &str) -> Result<Checkpoint> {
        self.store.get_checkpoint(id)
    }

    pub fn latest_checkpoint(&self, project_id: &str) -> Result<Option<Checkpoint>> {
        Ok(self
            .store
            .list_checkpoints(project_id)?
            .into_iter()
            .max_by_key(|c| c.created_at))
    }

    /// Resolve a checkpoint id, tag, or name. A name that was used more than
    /// once resolves to the most recent checkpoint carrying it.
    pub fn find_by_reference(&self, project_id: &str, reference: &str) -> Result<Checkpoint> {
        let checkpoints = self.store.list_checkpoints(project_id)?;
        if let Some(cp) = checkpoints
            .iter()
            .find(|c| c.id == reference || c.vcs_tag == reference)
        {
            return Ok(cp.clone());
        }
        checkpoints
            .into_iter()
            .filter(|c| c.name == reference)
            .max_by_key(|c| c.created_at)
            .ok_or_else(|| DevflowError::CheckpointNotFound(reference.to_string()))
    }

    /// Reset the working tree to the checkpoint's tag. Store rows are not
    /// touched.
    pub fn rollback(&self, checkpoint_id: &str) -> Result<Checkpoint> {
        let checkpoint = self.validate_checkpoint(checkpoint_id)?;
        self.snapshots.reset_hard_to_tag(&checkpoint.vcs_tag)?;
        info!(
            project = %checkpoint.project_id,
            checkpoint = %checkpoint.id,
            tag = %checkpoint.vcs_tag,
            "rolled back working tree"
        );
        Ok(checkpoint)
    }

    pub fn rollback_to_latest(&self, project_id: &str) -> Result<Checkpoint> {
        let latest = self
            .latest_checkpoint(project_id)?
            .ok_or_else(|| DevflowError::NoCheckpoints(project_id.to_string()))?;
        self.rollback(&latest.id)
    }

    /// Record-level check only: the row exists and names a tag.
    pub fn validate_checkpoint(&self, id: &str) -> Result<Checkpoint> {
        let checkpoint = self.store.get_checkpoint(id)?;
        if checkpoint.vcs_tag.trim().is_empty() {
            return Err(DevflowError::InvalidCheckpoint {
                id: id.to_string(),
                reason: "vcs tag is empty".to_string(),
            });
        }
        Ok(checkpoint)
    }

    /// [`validate_checkpoint`](Self::validate_checkpoint) plus a check that
    /// the tag is still present in version control.
    pub fn verify_snapshot(&self, id: &str) -> Result<Checkpoint> {
        let checkpoint = self.validate_checkpoint(id)?;
        if !self.snapshots.tag_exists(&checkpoint.vcs_tag)? {
            return Err(DevflowError::InvalidCheckpoint {
                id: id.to_string(),
                reason: format!(
                    "tag '{}' no longer exists in version control",
                    checkpoint.vcs_tag
                ),
            });
        }
        Ok(checkpoint)
    }

    /// Checkpoint tags in version control that no checkpoint row points at.
    ///
    /// These are left behind when a store write failed and the compensating
    /// tag delete failed too.
    pub fn orphaned_tags(&self) -> Result<Vec<String>> {
        let mut known = std::collections::BTreeSet::new();
        for project in self.store.list_projects()? {
            for cp in self.store.list_checkpoints(&project.id)? {
                known.insert(cp.vcs_tag);
            }
        }
        Ok(self
            .snapshots
            .list_tags(TAG_PREFIX)?
            .into_iter()
            .filter(|tag| !known.contains(tag))
            .collect())
    }

    /// Never deletes. Checkpoint history is append-only.
    pub fn delete_checkpoint(&self, id: &str) -> Result<()> {
        debug!(checkpoint = id, "delete requested; checkpoints are kept");
        Ok(())
    }

    pub fn rollback_preview(&self, id: &str) -> Result<RollbackPreview> {
        let checkpoint = self.verify_snapshot(id)?;
        let project = self.store.get_project(&checkpoint.project_id)?;
        let phases = self.store.list_phases(&project.id)?;
        let tasks = self.store.list_project_tasks(&project.id)?;
        let total_checkpoints = self.store.list_checkpoints(&project.id)?.len();

        let uncommitted_changes = self.snapshots.has_uncommitted_changes()?;
        let commits_discarded = self.snapshots.commits_since(&checkpoint.vcs_tag)?;

        let preserved = vec![
            format!("project stage ({})", project.current_stage),
            format!(
                "status of {} phase(s) and {} task(s)",
                phases.len(),
                tasks.len()
            ),
            format!("checkpoint history ({total_checkpoints} checkpoint(s))"),
        ];

        Ok(RollbackPreview {
            checkpoint,
            uncommitted_changes,
            commits_discarded,
            preserved,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::{store_with_project, FakeSnapshots};
    use crate::types::{Stage, WorkStatus};

    #[test]
    fn sanitize_drops_unsafe_characters() {
        assert_eq!(sanitize_name("before big refactor").unwrap(), "before-big-refactor");
        assert_eq!(sanitize_name("v1.2/rc!").unwrap(), "v12rc");
        assert_eq!(sanitize_name("snake_case-ok").unwrap(), "snake_case-ok");
        let err = sanitize_name("!!!").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(sanitize_name("").is_err());
    }

    #[test]
    fn instants_strictly_increase() {
        let a = unique_instant();
        let b = unique_instant();
        let c = unique_instant();
        assert!(a < b && b < c);
    }

    #[test]
    fn create_records_tag_and_metadata() {
        let store = store_with_project();
        let fake = FakeSnapshots::new();
        let mgr = CheckpointManager::new(&store, &fake);

        let extra = BTreeMap::from([("reason".to_string(), "demo".to_string())]);
        let cp = mgr.create_checkpoint("shop", "before refactor", extra).unwrap();

        assert!(cp.vcs_tag.starts_with("checkpoint-before-refactor-"));
        assert_eq!(fake.tags(), vec![cp.vcs_tag.clone()]);
        assert_eq!(cp.kind(), "manual");
        assert_eq!(cp.metadata["project_id"], "shop");
        assert_eq!(cp.metadata["reason"], "demo");
        assert!(DateTime::parse_from_rfc3339(&cp.metadata["created_at"]).is_ok());
        assert_eq!(mgr.get_checkpoint(&cp.id).unwrap(), cp);
    }

    #[test]
    fn caller_cannot_override_reserved_metadata() {
        let store = store_with_project();
        let fake = FakeSnapshots::new();
        let mgr = CheckpointManager::new(&store, &fake);
        let meta = BTreeMap::from([
            ("project_id".to_string(), "other".to_string()),
            ("created_at".to_string(), "yesterday".to_string()),
        ]);
        let cp = mgr.create_checkpoint("shop", "x", meta).unwrap();
        assert_eq!(cp.metadata["project_id"], "shop");
        assert_ne!(cp.metadata["created_at"], "yesterday");
    }

    #[test]
    fn same_name_twice_gives_distinct_checkpoints() {
        let store = store_with_project();
        let fake = FakeSnapshots::new();
        let mgr = CheckpointManager::new(&store, &fake);

        let a = mgr.create_checkpoint("shop", "same", BTreeMap::new()).unwrap();
        let b = mgr.create_checkpoint("shop", "same", BTreeMap::new()).unwrap();
        assert_ne!(a.id, b.id);
        assert_ne!(a.vcs_tag, b.vcs_tag);
        assert_eq!(mgr.list_checkpoints("shop").unwrap().len(), 2);
    }

    #[test]
    fn tag_failure_writes_nothing() {
        let store = store_with_project();
        let fake = FakeSnapshots::with(|s| s.fail_create = true);
        let mgr = CheckpointManager::new(&store, &fake);

        let err = mgr.create_checkpoint("shop", "x", BTreeMap::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::VcsFailure);
        assert!(mgr.list_checkpoints("shop").unwrap().is_empty());
    }

    #[test]
    fn store_failure_removes_tag() {
        let store = store_with_project();
        store
            .connection()
            .execute_batch("DROP TABLE checkpoints")
            .unwrap();
        let fake = FakeSnapshots::new();
        let mgr = CheckpointManager::new(&store, &fake);

        let err = mgr.create_checkpoint("shop", "x", BTreeMap::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PersistenceFailure);
        assert!(fake.tags().is_empty());
    }

    #[test]
    fn orphaned_tags_are_those_without_a_row() {
        let store = store_with_project();
        store.create_project("blog", "Blog").unwrap();
        let fake = FakeSnapshots::new();
        let mgr = CheckpointManager::new(&store, &fake);

        let a = mgr.create_checkpoint("shop", "a", BTreeMap::new()).unwrap();
        let b = mgr.create_checkpoint("blog", "b", BTreeMap::new()).unwrap();
        {
            let mut state = fake.state.borrow_mut();
            state.tags.insert("checkpoint-lost-1".to_string());
            state.tags.insert("release-1".to_string());
        }

        assert_eq!(mgr.orphaned_tags().unwrap(), ["checkpoint-lost-1"]);
        assert!(fake.tags().contains(&a.vcs_tag));
        assert!(fake.tags().contains(&b.vcs_tag));
    }

    #[test]
    fn store_failure_with_failed_compensation_keeps_store_error() {
        let store = store_with_project();
        store
            .connection()
            .execute_batch("DROP TABLE checkpoints")
            .unwrap();
        let fake = FakeSnapshots::with(|s| s.fail_delete = true);
        let mgr = CheckpointManager::new(&store, &fake);

        let err = mgr.create_checkpoint("shop", "x", BTreeMap::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PersistenceFailure);
        assert_eq!(fake.tags().len(), 1);
    }

    #[test]
    fn unknown_project_is_not_found() {
        let store = store_with_project();
        let fake = FakeSnapshots::new();
        let mgr = CheckpointManager::new(&store, &fake);
        let err = mgr.create_checkpoint("ghost", "x", BTreeMap::new()).unwrap_err();
        assert!(err.is_not_found());
        assert!(fake.tags().is_empty());
    }

    #[test]
    fn auto_checkpoint_names_phase() {
        let store = store_with_project();
        let phase = store.create_phase("shop", 2, "Checkout").unwrap();
        let fake = FakeSnapshots::new();
        let mgr = CheckpointManager::new(&store, &fake);

        let cp = mgr.create_auto_checkpoint("shop", &phase.id).unwrap();
        assert_eq!(cp.name, "phase-2-Checkout");
        assert_eq!(cp.kind(), "auto");
        assert_eq!(cp.metadata["phase_id"], phase.id);
        assert_eq!(cp.metadata["phase"], "2");
        assert_eq!(cp.metadata["title"], "Checkout");
    }

    #[test]
    fn rollback_resets_tree_but_not_store() {
        let store = store_with_project();
        let phase = store.create_phase("shop", 1, "Catalog").unwrap();
        let task = store.create_task(&phase.id, "List").unwrap();
        let fake = FakeSnapshots::new();
        let mgr = CheckpointManager::new(&store, &fake);

        let cp = mgr.create_checkpoint("shop", "early", BTreeMap::new()).unwrap();

        store.set_stage("shop", Stage::Develop).unwrap();
        store.set_phase_status(&phase.id, WorkStatus::InProgress).unwrap();
        store.set_task_status(&task.id, WorkStatus::Completed, None).unwrap();

        mgr.rollback(&cp.id).unwrap();

        assert_eq!(fake.resets(), vec![cp.vcs_tag]);
        assert_eq!(store.get_project("shop").unwrap().current_stage, Stage::Develop);
        assert_eq!(store.get_phase(&phase.id).unwrap().status, WorkStatus::InProgress);
        assert_eq!(store.get_task(&task.id).unwrap().status, WorkStatus::Completed);
    }

    #[test]
    fn rollback_to_latest_picks_newest() {
        let store = store_with_project();
        let fake = FakeSnapshots::new();
        let mgr = CheckpointManager::new(&store, &fake);
        mgr.create_checkpoint("shop", "first", BTreeMap::new()).unwrap();
        let second = mgr.create_checkpoint("shop", "second", BTreeMap::new()).unwrap();

        let restored = mgr.rollback_to_latest("shop").unwrap();
        assert_eq!(restored.id, second.id);
    }

    #[test]
    fn rollback_to_latest_without_checkpoints_is_not_found() {
        let store = store_with_project();
        let fake = FakeSnapshots::new();
        let mgr = CheckpointManager::new(&store, &fake);
        let err = mgr.rollback_to_latest("shop").unwrap_err();
        assert!(matches!(err, DevflowError::NoCheckpoints(_)));
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(fake.resets().is_empty());
    }

    #[test]
    fn rollback_propagates_vcs_failure() {
        let store = store_with_project();
        let fake = FakeSnapshots::new();
        let mgr = CheckpointManager::new(&store, &fake);
        let cp = mgr.create_checkpoint("shop", "x", BTreeMap::new()).unwrap();
        fake.state.borrow_mut().fail_reset = true;
        assert_eq!(mgr.rollback(&cp.id).unwrap_err().kind(), ErrorKind::VcsFailure);
    }

    #[test]
    fn validate_missing_and_empty_tag() {
        let store = store_with_project();
        let fake = FakeSnapshots::new();
        let mgr = CheckpointManager::new(&store, &fake);
        assert!(mgr.validate_checkpoint("nope").unwrap_err().is_not_found());

        store
            .insert_checkpoint(&Checkpoint {
                id: "broken".into(),
                project_id: "shop".into(),
                name: "broken".into(),
                vcs_tag: String::new(),
                created_at: Utc::now(),
                metadata: BTreeMap::new(),
            })
            .unwrap();
        let err = mgr.validate_checkpoint("broken").unwrap_err();
        assert!(matches!(err, DevflowError::InvalidCheckpoint { .. }));
    }

    #[test]
    fn verify_detects_deleted_tag() {
        let store = store_with_project();
        let fake = FakeSnapshots::new();
        let mgr = CheckpointManager::new(&store, &fake);
        let cp = mgr.create_checkpoint("shop", "x", BTreeMap::new()).unwrap();

        assert!(mgr.verify_snapshot(&cp.id).is_ok());
        fake.state.borrow_mut().tags.clear();
        assert!(mgr.validate_checkpoint(&cp.id).is_ok());
        assert_eq!(
            mgr.verify_snapshot(&cp.id).unwrap_err().kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn delete_never_shrinks_history() {
        let store = store_with_project();
        let fake = FakeSnapshots::new();
        let mgr = CheckpointManager::new(&store, &fake);
        let cp = mgr.create_checkpoint("shop", "keep", BTreeMap::new()).unwrap();

        mgr.delete_checkpoint(&cp.id).unwrap();
        mgr.delete_checkpoint("does-not-exist").unwrap();
        assert_eq!(mgr.list_checkpoints("shop").unwrap().len(), 1);
        assert_eq!(fake.tags().len(), 1);
    }

    #[test]
    fn find_by_reference_resolves_id_tag_and_name() {
        let store = store_with_project();
        let fake = FakeSnapshots::new();
        let mgr = CheckpointManager::new(&store, &fake);
        let old = mgr.create_checkpoint("shop", "dup", BTreeMap::new()).unwrap();
        let new = mgr.create_checkpoint("shop", "dup", BTreeMap::new()).unwrap();

        assert_eq!(mgr.find_by_reference("shop", &old.id).unwrap().id, old.id);
        assert_eq!(mgr.find_by_reference("shop", &old.vcs_tag).unwrap().id, old.id);
        assert_eq!(mgr.find_by_reference("shop", "dup").unwrap().id, new.id);
        assert!(mgr.find_by_reference("shop", "missing").unwrap_err().is_not_found());
    }

    #[test]
    fn preview_lists_losses_and_preserved_state() {
        let store = store_with_project();
        store.create_phase("shop", 1, "Catalog").unwrap();
        let fake = FakeSnapshots::new();
        let mgr = CheckpointManager::new(&store, &fake);
        let cp = mgr.create_checkpoint("shop", "x", BTreeMap::new()).unwrap();
        {
            let mut state = fake.state.borrow_mut();
            state.dirty = true;
            state.commits_since = 3;
        }

        let preview = mgr.rollback_preview(&cp.id).unwrap();
        assert_eq!(preview.lost().len(), 2);
        assert!(preview.lost()[1].starts_with("3 commit"));
        assert!(preview.preserved[0].contains("init"));
        assert!(preview.preserved[1].contains("1 phase"));
    }
}
