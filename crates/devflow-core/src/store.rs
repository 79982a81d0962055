//! SQLite-backed project store.
//!
//! One `Store` is opened per CLI invocation. Concurrent invocations against the
//! same project rely on SQLite's own file locking; the busy timeout turns a
//! short lock wait into a retry inside SQLite rather than an immediate error.
//!
//! Timestamps are stored as RFC 3339 text with nanosecond precision so that
//! lexical order equals chronological order.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::checkpoint::Checkpoint;
use crate::error::{DevflowError, Result};
use crate::navigator::NavigationRecord;
use crate::paths;
use crate::progress::ProgressStats;
use crate::project::{Phase, Project, Task};
use crate::schema::SCHEMA;
use crate::types::{ArtifactKind, Stage, WorkStatus};

/// Rows touched by [`Store::restart_in_flight`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestartCounts {
    pub phases: usize,
    pub tasks: usize,
}

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open or create the store at `path` and apply the schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::configure(Connection::open(path)?)
    }

    /// Open the store of an initialized project root.
    pub fn open_at_root(root: &Path) -> Result<Self> {
        let path = paths::store_path(root);
        if !path.exists() {
            return Err(DevflowError::NotInitialized);
        }
        Self::open(&path)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::configure(Connection::open_in_memory()?)
    }

    fn configure(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    // -----------------------------------------------------------------------
    // Projects
    // -----------------------------------------------------------------------

    pub fn create_project(&self, id: &str, name: &str) -> Result<Project> {
        paths::validate_project_id(id)?;
        let project = Project {
            id: id.to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
            current_stage: Stage::Init,
            current_phase_id: None,
        };
        self.conn.execute(
            "INSERT INTO projects (id, name, created_at, current_stage, current_phase_id)
             VALUES (?1, ?2, ?3, ?4, NULL)",
            params![
                project.id,
                project.name,
                timestamp(project.created_at),
                project.current_stage.as_str()
            ],
        )?;
        Ok(project)
    }

    /// Return the project, creating it at `init` if it does not exist yet.
    pub fn ensure_project(&self, id: &str, name: &str) -> Result<Project> {
        match self.get_project(id) {
            Ok(project) => Ok(project),
            Err(DevflowError::ProjectNotFound(_)) => self.create_project(id, name),
            Err(e) => Err(e),
        }
    }

    pub fn get_project(&self, id: &str) -> Result<Project> {
        self.conn
            .query_row(
                "SELECT id, name, created_at, current_stage, current_phase_id
                 FROM projects WHERE id = ?1",
                params![id],
                project_from_row,
            )
            .optional()?
            .ok_or_else(|| DevflowError::ProjectNotFound(id.to_string()))
    }

    pub fn list_projects(&self) -> Result<Vec<Project>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, created_at, current_stage, current_phase_id
             FROM projects ORDER BY created_at",
        )?;
        let rows = stmt.query_map([], project_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn set_stage(&self, project_id: &str, stage: Stage) -> Result<()> {
        let n = self.conn.execute(
            "UPDATE projects SET current_stage = ?1 WHERE id = ?2",
            params![stage.as_str(), project_id],
        )?;
        if n == 0 {
            return Err(DevflowError::ProjectNotFound(project_id.to_string()));
        }
        Ok(())
    }

    pub fn set_current_phase(&self, project_id: &str, phase_id: Option<&str>) -> Result<()> {
        let n = self.conn.execute(
            "UPDATE projects SET current_phase_id = ?1 WHERE id = ?2",
            params![phase_id, project_id],
        )?;
        if n == 0 {
            return Err(DevflowError::ProjectNotFound(project_id.to_string()));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Phases
    // -----------------------------------------------------------------------

    pub fn create_phase(&self, project_id: &str, number: u32, title: &str) -> Result<Phase> {
        self.get_project(project_id)?;
        let phase = Phase {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            number,
            title: title.to_string(),
            status: WorkStatus::NotStarted,
        };
        self.conn.execute(
            "INSERT INTO phases (id, project_id, number, title, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                phase.id,
                phase.project_id,
                phase.number,
                phase.title,
                phase.status.as_str(),
                timestamp(Utc::now())
            ],
        )?;
        Ok(phase)
    }

    pub fn get_phase(&self, id: &str) -> Result<Phase> {
        self.conn
            .query_row(
                "SELECT id, project_id, number, title, status FROM phases WHERE id = ?1",
                params![id],
                phase_from_row,
            )
            .optional()?
            .ok_or_else(|| DevflowError::PhaseNotFound(id.to_string()))
    }

    /// Phases of a project in plan order.
    pub fn list_phases(&self, project_id: &str) -> Result<Vec<Phase>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, project_id, number, title, status
             FROM phases WHERE project_id = ?1 ORDER BY number, rowid",
        )?;
        let rows = stmt.query_map(params![project_id], phase_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn set_phase_status(&self, id: &str, status: WorkStatus) -> Result<()> {
        let n = self.conn.execute(
            "UPDATE phases SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id],
        )?;
        if n == 0 {
            return Err(DevflowError::PhaseNotFound(id.to_string()));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Tasks
    // -----------------------------------------------------------------------

    pub fn create_task(&self, phase_id: &str, title: &str) -> Result<Task> {
        self.get_phase(phase_id)?;
        let task = Task {
            id: Uuid::new_v4().to_string(),
            phase_id: phase_id.to_string(),
            title: title.to_string(),
            status: WorkStatus::NotStarted,
            blocker: None,
            created_at: Utc::now(),
        };
        self.conn.execute(
            "INSERT INTO tasks (id, phase_id, title, status, blocker, created_at)
             VALUES (?1, ?2, ?3, ?4, NULL, ?5)",
            params![
                task.id,
                task.phase_id,
                task.title,
                task.status.as_str(),
                timestamp(task.created_at)
            ],
        )?;
        Ok(task)
    }

    pub fn get_task(&self, id: &str) -> Result<Task> {
        self.conn
            .query_row(
                "SELECT id, phase_id, title, status, blocker, created_at FROM tasks WHERE id = ?1",
                params![id],
                task_from_row,
            )
            .optional()?
            .ok_or_else(|| DevflowError::TaskNotFound(id.to_string()))
    }

    pub fn list_tasks(&self, phase_id: &str) -> Result<Vec<Task>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, phase_id, title, status, blocker, created_at
             FROM tasks WHERE phase_id = ?1 ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![phase_id], task_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Every task of every phase of the project, in plan order.
    pub fn list_project_tasks(&self, project_id: &str) -> Result<Vec<Task>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.id, t.phase_id, t.title, t.status, t.blocker, t.created_at
             FROM tasks t JOIN phases p ON p.id = t.phase_id
             WHERE p.project_id = ?1
             ORDER BY p.number, p.rowid, t.rowid",
        )?;
        let rows = stmt.query_map(params![project_id], task_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn set_task_status(&self, id: &str, status: WorkStatus, blocker: Option<&str>) -> Result<()> {
        let n = self.conn.execute(
            "UPDATE tasks SET status = ?1, blocker = ?2 WHERE id = ?3",
            params![status.as_str(), blocker, id],
        )?;
        if n == 0 {
            return Err(DevflowError::TaskNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Reset every `in_progress` phase and task of the project to
    /// `not_started` in one transaction. Completed and blocked rows are left
    /// alone.
    pub fn restart_in_flight(&self, project_id: &str) -> Result<RestartCounts> {
        self.get_project(project_id)?;
        let tx = self.conn.unchecked_transaction()?;
        let phases = tx.execute(
            "UPDATE phases SET status = 'not_started'
             WHERE project_id = ?1 AND status = 'in_progress'",
            params![project_id],
        )?;
        let tasks = tx.execute(
            "UPDATE tasks SET status = 'not_started'
             WHERE status = 'in_progress'
               AND phase_id IN (SELECT id FROM phases WHERE project_id = ?1)",
            params![project_id],
        )?;
        tx.commit()?;
        Ok(RestartCounts { phases, tasks })
    }

    // -----------------------------------------------------------------------
    // Artifacts
    // -----------------------------------------------------------------------

    pub fn put_artifact(&self, project_id: &str, kind: ArtifactKind, content: &str) -> Result<()> {
        self.get_project(project_id)?;
        self.conn.execute(
            "INSERT INTO artifacts (project_id, kind, content, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(project_id, kind)
             DO UPDATE SET content = excluded.content, updated_at = excluded.updated_at",
            params![project_id, kind.as_str(), content, timestamp(Utc::now())],
        )?;
        Ok(())
    }

    pub fn get_artifact(&self, project_id: &str, kind: ArtifactKind) -> Result<String> {
        self.conn
            .query_row(
                "SELECT content FROM artifacts WHERE project_id = ?1 AND kind = ?2",
                params![project_id, kind.as_str()],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| DevflowError::ArtifactNotFound {
                kind: kind.label().to_string(),
                project: project_id.to_string(),
            })
    }

    pub fn has_artifact(&self, project_id: &str, kind: ArtifactKind) -> Result<bool> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM artifacts WHERE project_id = ?1 AND kind = ?2",
            params![project_id, kind.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    // -----------------------------------------------------------------------
    // Checkpoints
    // -----------------------------------------------------------------------

    pub fn insert_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let metadata = serde_json::to_string(&checkpoint.metadata)?;
        self.conn.execute(
            "INSERT INTO checkpoints (id, project_id, name, vcs_tag, created_at, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                checkpoint.id,
                checkpoint.project_id,
                checkpoint.name,
                checkpoint.vcs_tag,
                timestamp(checkpoint.created_at),
                metadata
            ],
        )?;
        Ok(())
    }

    pub fn get_checkpoint(&self, id: &str) -> Result<Checkpoint> {
        self.conn
            .query_row(
                "SELECT id, project_id, name, vcs_tag, created_at, metadata
                 FROM checkpoints WHERE id = ?1",
                params![id],
                checkpoint_from_row,
            )
            .optional()?
            .ok_or_else(|| DevflowError::CheckpointNotFound(id.to_string()))
    }

    /// Checkpoints of a project, oldest first.
    pub fn list_checkpoints(&self, project_id: &str) -> Result<Vec<Checkpoint>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, project_id, name, vcs_tag, created_at, metadata
             FROM checkpoints WHERE project_id = ?1 ORDER BY created_at, rowid",
        )?;
        let rows = stmt.query_map(params![project_id], checkpoint_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // -----------------------------------------------------------------------
    // Navigation log
    // -----------------------------------------------------------------------

    pub fn append_navigation(
        &self,
        project_id: &str,
        from: Stage,
        to: Stage,
        forced: bool,
    ) -> Result<NavigationRecord> {
        let created_at = Utc::now();
        self.conn.execute(
            "INSERT INTO navigation_log (project_id, from_stage, to_stage, forced, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                project_id,
                from.as_str(),
                to.as_str(),
                forced,
                timestamp(created_at)
            ],
        )?;
        Ok(NavigationRecord {
            id: self.conn.last_insert_rowid(),
            project_id: project_id.to_string(),
            from_stage: from,
            to_stage: to,
            forced,
            created_at,
        })
    }

    /// Navigation records of a project, oldest first.
    pub fn list_navigation(&self, project_id: &str) -> Result<Vec<NavigationRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, project_id, from_stage, to_stage, forced, created_at
             FROM navigation_log WHERE project_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![project_id], navigation_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // -----------------------------------------------------------------------
    // Key/value config
    // -----------------------------------------------------------------------

    pub fn set_config(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO config (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, timestamp(Utc::now())],
        )?;
        Ok(())
    }

    pub fn get_config(&self, key: &str) -> Result<String> {
        self.conn
            .query_row(
                "SELECT value FROM config WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| DevflowError::ConfigKeyNotFound(key.to_string()))
    }

    // -----------------------------------------------------------------------
    // Progress
    // -----------------------------------------------------------------------

    pub fn calculate_progress(&self, project_id: &str) -> Result<ProgressStats> {
        let project = self.get_project(project_id)?;
        let phases = self.list_phases(project_id)?;
        let tasks = self.list_project_tasks(project_id)?;
        Ok(ProgressStats::compute(
            project.created_at,
            &phases,
            &tasks,
            Utc::now(),
        ))
    }
}

// ---------------------------------------------------------------------------
// Row helpers
// ---------------------------------------------------------------------------

pub(crate) fn timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn conversion_error(
    idx: usize,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn ts_col(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn parsed_col<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = DevflowError>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e| conversion_error(idx, e))
}

fn project_from_row(row: &Row) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: ts_col(row, 2)?,
        current_stage: parsed_col(row, 3)?,
        current_phase_id: row.get(4)?,
    })
}

fn phase_from_row(row: &Row) -> rusqlite::Result<Phase> {
    Ok(Phase {
        id: row.get(0)?,
        project_id: row.get(1)?,
        number: row.get(2)?,
        title: row.get(3)?,
        status: parsed_col(row, 4)?,
    })
}

fn task_from_row(row: &Row) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        phase_id: row.get(1)?,
        title: row.get(2)?,
        status: parsed_col(row, 3)?,
        blocker: row.get(4)?,
        created_at: ts_col(row, 5)?,
    })
}

fn checkpoint_from_row(row: &Row) -> rusqlite::Result<Checkpoint> {
    let raw: String = row.get(5)?;
    let metadata: BTreeMap<String, String> =
        serde_json::from_str(&raw).map_err(|e| conversion_error(5, e))?;
    Ok(Checkpoint {
        id: row.get(0)?,
        project_id: row.get(1)?,
        name: row.get(2)?,
        vcs_tag: row.get(3)?,
        created_at: ts_col(row, 4)?,
        metadata,
    })
}

fn navigation_from_row(row: &Row) -> rusqlite::Result<NavigationRecord> {
    Ok(NavigationRecord {
        id: row.get(0)?,
        project_id: row.get(1)?,
        from_stage: parsed_col(row, 2)?,
        to_stage: parsed_col(row, 3)?,
        forced: row.get(4)?,
        created_at: ts_col(row, 5)?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
