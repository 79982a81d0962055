use crate::types::{Stage, WorkStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Project
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub current_stage: Stage,
    pub current_phase_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub id: String,
    pub project_id: String,
    pub number: u32,
    pub title: String,
    pub status: WorkStatus,
}

impl Phase {
    /// Phases a developer could pick up next: started or not yet started.
    pub fn is_open(&self) -> bool {
        matches!(self.status, WorkStatus::InProgress | WorkStatus::NotStarted)
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub phase_id: String,
    pub title: String,
    pub status: WorkStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocker: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// First phase, in plan order, that still has work to do.
pub fn next_open_phase(phases: &[Phase]) -> Option<&Phase> {
    phases.iter().find(|p| p.is_open())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
