use thiserror::Error;

/// Coarse classification of every [`DevflowError`].
///
/// Operators see the full message; callers that need to branch on the kind of
/// failure (tests, the CLI's exit path) match on this instead of variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Validation,
    VcsFailure,
    PersistenceFailure,
}

#[derive(Debug, Error)]
pub enum DevflowError {
    #[error("not initialized: run 'devflow init'")]
    NotInitialized,

    #[error("project not found: {0}")]
    ProjectNotFound(String),

    #[error("phase not found: {0}")]
    PhaseNotFound(String),

    #[error("task not found: {0}")]
    TaskNotFound(String),

    #[error("checkpoint not found: {0}")]
    CheckpointNotFound(String),

    #[error("no checkpoints found for project '{0}'")]
    NoCheckpoints(String),

    #[error("{kind} not found for project '{project}'")]
    ArtifactNotFound { kind: String, project: String },

    #[error("config key not found: {0}")]
    ConfigKeyNotFound(String),

    #[error("invalid stage '{0}': expected one of init, interview, design, plan, review, develop, complete")]
    InvalidStage(String),

    #[error("invalid status '{0}': expected one of not_started, in_progress, completed, blocked")]
    InvalidStatus(String),

    #[error("invalid transition from {from} to {to}: {reason}")]
    InvalidTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("cannot enter stage '{stage}': {requirement} is missing")]
    MissingPrerequisite { stage: String, requirement: String },

    #[error("invalid checkpoint name '{0}': must contain at least one letter, digit, '-' or '_'")]
    InvalidCheckpointName(String),

    #[error("invalid checkpoint {id}: {reason}")]
    InvalidCheckpoint { id: String, reason: String },

    #[error("invalid project id '{0}': must be lowercase alphanumeric with hyphens")]
    InvalidProjectId(String),

    #[error("'{command}' failed: {output}")]
    Vcs { command: String, output: String },

    #[error("'{command}' timed out after {seconds}s")]
    VcsTimeout { command: String, seconds: u64 },

    #[error("version control unavailable: {0}")]
    VcsUnavailable(String),

    #[error("not a git repository: {0}")]
    NotARepository(String),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl DevflowError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DevflowError::NotInitialized
            | DevflowError::ProjectNotFound(_)
            | DevflowError::PhaseNotFound(_)
            | DevflowError::TaskNotFound(_)
            | DevflowError::CheckpointNotFound(_)
            | DevflowError::NoCheckpoints(_)
            | DevflowError::ArtifactNotFound { .. }
            | DevflowError::ConfigKeyNotFound(_) => ErrorKind::NotFound,

            DevflowError::InvalidStage(_)
            | DevflowError::InvalidStatus(_)
            | DevflowError::InvalidTransition { .. }
            | DevflowError::MissingPrerequisite { .. }
            | DevflowError::InvalidCheckpointName(_)
            | DevflowError::InvalidCheckpoint { .. }
            | DevflowError::InvalidProjectId(_) => ErrorKind::Validation,

            DevflowError::Vcs { .. }
            | DevflowError::VcsTimeout { .. }
            | DevflowError::VcsUnavailable(_)
            | DevflowError::NotARepository(_) => ErrorKind::VcsFailure,

            DevflowError::Store(_)
            | DevflowError::Io(_)
            | DevflowError::Yaml(_)
            | DevflowError::Json(_) => ErrorKind::PersistenceFailure,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

pub type Result<T> = std::result::Result<T, DevflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(
            DevflowError::NoCheckpoints("p".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            DevflowError::InvalidStage("Design".into()).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            DevflowError::VcsTimeout {
                command: "git tag".into(),
                seconds: 3
            }
            .kind(),
            ErrorKind::VcsFailure
        );
        assert_eq!(
            DevflowError::Io(std::io::Error::other("disk full")).kind(),
            ErrorKind::PersistenceFailure
        );
    }

    #[test]
    fn vcs_error_carries_output() {
        let err = DevflowError::Vcs {
            command: "git tag -a x".into(),
            output: "fatal: tag 'x' already exists".into(),
        };
        assert!(err.to_string().contains("already exists"));
    }
}
