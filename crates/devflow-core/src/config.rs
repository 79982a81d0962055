use crate::error::{DevflowError, Result};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// VcsConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VcsConfig {
    #[serde(default = "default_vcs_binary")]
    pub binary: String,
    /// Deadline for each version-control invocation. `0` waits forever.
    #[serde(default = "default_vcs_timeout")]
    pub timeout_seconds: u64,
}

fn default_vcs_binary() -> String {
    "git".to_string()
}

fn default_vcs_timeout() -> u64 {
    30
}

impl Default for VcsConfig {
    fn default() -> Self {
        Self {
            binary: default_vcs_binary(),
            timeout_seconds: default_vcs_timeout(),
        }
    }
}

impl VcsConfig {
    pub fn timeout(&self) -> Option<Duration> {
        if self.timeout_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.timeout_seconds))
        }
    }
}

// ---------------------------------------------------------------------------
// NavigationConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationConfig {
    /// Require the entry artifact of a stage before moving forward into it.
    #[serde(default = "default_true")]
    pub enforce_prerequisites: bool,
    /// Commit the working tree after every stage move (best-effort).
    #[serde(default = "default_true")]
    pub commit_on_navigate: bool,
    /// Take an automatic checkpoint before moving backward.
    #[serde(default)]
    pub checkpoint_before_backtrack: bool,
}

fn default_true() -> bool {
    true
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            enforce_prerequisites: true,
            commit_on_navigate: true,
            checkpoint_before_backtrack: false,
        }
    }
}

// ---------------------------------------------------------------------------
// ProjectConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub id: String,
    pub name: String,
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: u32,
    pub project: ProjectConfig,
    #[serde(default)]
    pub vcs: VcsConfig,
    #[serde(default)]
    pub navigation: NavigationConfig,
}

fn default_version() -> u32 {
    1
}

impl Config {
    pub fn new(project_id: impl Into<String>, project_name: impl Into<String>) -> Self {
        Self {
            version: 1,
            project: ProjectConfig {
                id: project_id.into(),
                name: project_name.into(),
            },
            vcs: VcsConfig::default(),
            navigation: NavigationConfig::default(),
        }
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(DevflowError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if let Err(e) = paths::validate_project_id(&self.project.id) {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!("project.id: {e}"),
            });
        }

        if self.vcs.binary.trim().is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "vcs.binary is empty".to_string(),
            });
        }

        if self.vcs.timeout_seconds == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "vcs.timeout_seconds is 0: a hung git process will hang devflow"
                    .to_string(),
            });
        }

        if !self.navigation.enforce_prerequisites {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "navigation.enforce_prerequisites is off: stages can be entered \
                          without their input artifacts"
                    .to_string(),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
