pub mod checkpoint;
pub mod init;
pub mod navigate;
pub mod resume;
pub mod rollback;
pub mod status;

use anyhow::{bail, Context as _};
use devflow_core::{
    config::Config,
    git::GitRepo,
    store::Store,
    vcs::{SnapshotStore, Unavailable},
    DevflowError,
};
use std::io::IsTerminal;
use std::path::Path;
use tracing::debug;

/// Everything a command needs from an initialized root.
pub struct Context {
    pub config: Config,
    pub store: Store,
    vcs: Vcs,
}

enum Vcs {
    Git(GitRepo),
    Missing(Unavailable),
}

impl Context {
    /// A missing git binary is not an error here: navigation and status work
    /// without one. Commands that need snapshots call [`Context::require_snapshots`].
    pub fn open(root: &Path) -> anyhow::Result<Self> {
        let config = Config::load(root).context("failed to load config")?;
        let store = Store::open_at_root(root).context("failed to open project store")?;
        let vcs = match GitRepo::new(root, &config.vcs) {
            Ok(git) => Vcs::Git(git),
            Err(e) => {
                debug!(error = %e, "continuing without version control");
                let reason = match e {
                    DevflowError::VcsUnavailable(reason) => reason,
                    other => other.to_string(),
                };
                Vcs::Missing(Unavailable::new(reason))
            }
        };
        Ok(Self { config, store, vcs })
    }

    /// Version control for best-effort use. Every call fails when git is missing.
    pub fn snapshots(&self) -> &dyn SnapshotStore {
        match &self.vcs {
            Vcs::Git(git) => git,
            Vcs::Missing(missing) => missing,
        }
    }

    pub fn require_snapshots(&self) -> anyhow::Result<&dyn SnapshotStore> {
        if let Vcs::Missing(missing) = &self.vcs {
            bail!("version control unavailable: {}", missing.reason());
        }
        Ok(self.snapshots())
    }

    /// `--project` if given, else the project this root was initialized for.
    pub fn project_id(&self, explicit: Option<&str>) -> String {
        explicit
            .map(str::to_string)
            .unwrap_or_else(|| self.config.project.id.clone())
    }
}

/// Ask before a destructive step. `--yes` skips the prompt; without a
/// terminal the command refuses instead of guessing.
pub fn confirm(prompt: &str, assume_yes: bool) -> anyhow::Result<bool> {
    if assume_yes {
        return Ok(true);
    }
    if !std::io::stdin().is_terminal() {
        bail!("confirmation required but no terminal is attached; re-run with --yes");
    }
    let answer = dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .context("failed to read confirmation")?;
    Ok(answer)
}

/// Report that the operator declined a destructive step.
pub fn cancelled(what: &str, json: bool) -> anyhow::Result<()> {
    if json {
        return crate::output::print_json(&serde_json::json!({ "cancelled": true }));
    }
    println!("{what} cancelled.");
    Ok(())
}
