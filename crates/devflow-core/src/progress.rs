//! Progress aggregates derived from phase and task rows.
//!
//! Nothing here is persisted: `ProgressStats` is recomputed on every read so it
//! can never drift from the rows it summarizes.

use crate::project::{Phase, Task};
use crate::types::WorkStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub total: usize,
    pub not_started: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub blocked: usize,
}

impl StatusCounts {
    fn tally(statuses: impl Iterator<Item = WorkStatus>) -> Self {
        let mut counts = StatusCounts::default();
        for status in statuses {
            counts.total += 1;
            match status {
                WorkStatus::NotStarted => counts.not_started += 1,
                WorkStatus::InProgress => counts.in_progress += 1,
                WorkStatus::Completed => counts.completed += 1,
                WorkStatus::Blocked => counts.blocked += 1,
            }
        }
        counts
    }

    pub fn remaining(&self) -> usize {
        self.total - self.completed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressStats {
    /// Completed tasks over all tasks, 0–100. Zero when there are no tasks.
    pub completion_percentage: f64,
    pub phases: StatusCounts,
    pub tasks: StatusCounts,
    pub elapsed_seconds: i64,
    /// Linear extrapolation from the completed-task rate; `None` until a task
    /// has been completed.
    pub estimated_remaining_seconds: Option<i64>,
}

impl ProgressStats {
    pub fn compute(
        created_at: DateTime<Utc>,
        phases: &[Phase],
        tasks: &[Task],
        now: DateTime<Utc>,
    ) -> Self {
        let phases = StatusCounts::tally(phases.iter().map(|p| p.status));
        let tasks = StatusCounts::tally(tasks.iter().map(|t| t.status));

        let completion_percentage = if tasks.total == 0 {
            0.0
        } else {
            tasks.completed as f64 * 100.0 / tasks.total as f64
        };

        let elapsed_seconds = (now - created_at).num_seconds().max(0);
        let estimated_remaining_seconds = if tasks.completed == 0 {
            None
        } else {
            let per_task = elapsed_seconds as f64 / tasks.completed as f64;
            Some((per_task * tasks.remaining() as f64).round() as i64)
        };

        Self {
            completion_percentage,
            phases,
            tasks,
            elapsed_seconds,
            estimated_remaining_seconds,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completion_percentage >= 100.0
    }
}

/// Compact duration for summaries: `2d 4h`, `3h 12m`, `7m`, `<1m`.
pub fn format_duration(seconds: i64) -> String {
    let minutes = seconds / 60;
    let hours = minutes / 60;
    let days = hours / 24;
    if days > 0 {
        format!("{}d {}h", days, hours % 24)
    } else if hours > 0 {
        format!("{}h {}m", hours, minutes % 60)
    } else if minutes > 0 {
        format!("{minutes}m")
    } else {
        "<1m".to_string()
    }
}
