use crate::error::{DevflowError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// The fixed pipeline every project moves through.
///
/// Declaration order is the rank order; `rank()` is the only notion of
/// "forward" and "backward" anywhere in the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Init,
    Interview,
    Design,
    Plan,
    Review,
    Develop,
    Complete,
}

impl Stage {
    pub fn all() -> &'static [Stage] {
        &[
            Stage::Init,
            Stage::Interview,
            Stage::Design,
            Stage::Plan,
            Stage::Review,
            Stage::Develop,
            Stage::Complete,
        ]
    }

    pub fn rank(self) -> usize {
        self as usize
    }

    pub fn from_rank(rank: usize) -> Option<Stage> {
        Stage::all().get(rank).copied()
    }

    pub fn next(self) -> Option<Stage> {
        Stage::from_rank(self.rank() + 1)
    }

    pub fn previous(self) -> Option<Stage> {
        self.rank().checked_sub(1).and_then(Stage::from_rank)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Init => "init",
            Stage::Interview => "interview",
            Stage::Design => "design",
            Stage::Plan => "plan",
            Stage::Review => "review",
            Stage::Develop => "develop",
            Stage::Complete => "complete",
        }
    }

    /// What the operator should do next while sitting in this stage.
    pub fn hint(self) -> &'static str {
        match self {
            Stage::Init => "Run the interview to capture project requirements",
            Stage::Interview => "Continue the interview to complete the requirements",
            Stage::Design => "Generate the architecture document from the interview",
            Stage::Plan => "Generate the development plan from the architecture",
            Stage::Review => "Review the development plan before starting work",
            Stage::Develop => "Execute the next phase of the development plan",
            Stage::Complete => "Project complete; review the results",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = DevflowError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "init" => Ok(Stage::Init),
            "interview" => Ok(Stage::Interview),
            "design" => Ok(Stage::Design),
            "plan" => Ok(Stage::Plan),
            "review" => Ok(Stage::Review),
            "develop" => Ok(Stage::Develop),
            "complete" => Ok(Stage::Complete),
            _ => Err(DevflowError::InvalidStage(s.to_string())),
        }
    }
}

/// Ordering rules for a stage move, independent of any project state.
///
/// Backward moves are always legal (reiteration); forward moves may advance
/// exactly one rank.
pub fn check_stage_order(from: Stage, to: Stage) -> Result<()> {
    if from == to {
        return Err(DevflowError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
            reason: "already at this stage".to_string(),
        });
    }
    if to.rank() > from.rank() + 1 {
        return Err(DevflowError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
            reason: "cannot skip stages; must complete the intervening stage first".to_string(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// WorkStatus
// ---------------------------------------------------------------------------

/// Status shared by phases and tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    NotStarted,
    InProgress,
    Completed,
    Blocked,
}

impl WorkStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkStatus::NotStarted => "not_started",
            WorkStatus::InProgress => "in_progress",
            WorkStatus::Completed => "completed",
            WorkStatus::Blocked => "blocked",
        }
    }
}

impl fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for WorkStatus {
    type Err = DevflowError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(WorkStatus::NotStarted),
            "in_progress" => Ok(WorkStatus::InProgress),
            "completed" => Ok(WorkStatus::Completed),
            "blocked" => Ok(WorkStatus::Blocked),
            _ => Err(DevflowError::InvalidStatus(s.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// ArtifactKind
// ---------------------------------------------------------------------------

/// Project documents the store keeps alongside stage and phase state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Interview,
    Architecture,
}

impl ArtifactKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::Interview => "interview",
            ArtifactKind::Architecture => "architecture",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ArtifactKind::Interview => "interview responses",
            ArtifactKind::Architecture => "architecture document",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
