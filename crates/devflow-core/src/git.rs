//! `git` implementation of [`SnapshotStore`].
//!
//! Every invocation runs under an optional deadline. A hung `git` (credential
//! prompt, lock contention on a network filesystem) is killed and reported as
//! [`DevflowError::VcsTimeout`] instead of hanging the command.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::time::Duration;

use tracing::debug;

use crate::config::VcsConfig;
use crate::error::{DevflowError, Result};
use crate::vcs::SnapshotStore;

const MAX_OUTPUT: usize = 10 * 1024;

pub struct GitRepo {
    root: PathBuf,
    binary: PathBuf,
    timeout: Option<Duration>,
}

impl GitRepo {
    /// Locate the configured binary on `PATH` and bind it to `root`.
    pub fn new(root: &Path, config: &VcsConfig) -> Result<Self> {
        let binary = which::which(&config.binary).map_err(|e| {
            DevflowError::VcsUnavailable(format!("'{}' not found on PATH: {e}", config.binary))
        })?;
        Ok(Self {
            root: root.to_path_buf(),
            binary,
            timeout: config.timeout(),
        })
    }

    /// Run `git <args>` in the root and return stdout on success.
    fn git(&self, args: &[&str]) -> Result<String> {
        let command = format!("git {}", args.join(" "));
        debug!(command = %command, "running");
        let mut cmd = Command::new(&self.binary);
        cmd.args(args).current_dir(&self.root);
        let out = run_with_deadline(cmd, &command, self.timeout)?;
        if out.success {
            Ok(out.stdout)
        } else {
            Err(DevflowError::Vcs {
                command,
                output: combine_output(&out.stdout, &out.stderr),
            })
        }
    }

    fn ensure_repository(&self) -> Result<()> {
        if self.is_repository() {
            Ok(())
        } else {
            Err(DevflowError::NotARepository(self.root.display().to_string()))
        }
    }
}

impl SnapshotStore for GitRepo {
    fn is_repository(&self) -> bool {
        matches!(
            self.git(&["rev-parse", "--is-inside-work-tree"]),
            Ok(out) if out.trim() == "true"
        )
    }

    fn create_tag(&self, name: &str, message: &str) -> Result<()> {
        self.ensure_repository()?;
        self.git(&["tag", "-a", name, "-m", message]).map(drop)
    }

    fn reset_hard_to_tag(&self, name: &str) -> Result<()> {
        self.ensure_repository()?;
        let target = format!("refs/tags/{name}");
        self.git(&["reset", "--hard", &target]).map(drop)
    }

    fn delete_tag(&self, name: &str) -> Result<()> {
        self.git(&["tag", "-d", name]).map(drop)
    }

    fn tag_exists(&self, name: &str) -> Result<bool> {
        let out = self.git(&["tag", "--list", name])?;
        Ok(out.lines().any(|line| line.trim() == name))
    }

    fn list_tags(&self, prefix: &str) -> Result<Vec<String>> {
        let pattern = format!("{prefix}*");
        let out = self.git(&["tag", "--list", &pattern])?;
        let mut tags: Vec<String> = out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();
        tags.sort();
        Ok(tags)
    }

    fn commits_since(&self, tag: &str) -> Result<usize> {
        let range = format!("refs/tags/{tag}..HEAD");
        let out = self.git(&["rev-list", "--count", &range])?;
        out.trim().parse().map_err(|_| DevflowError::Vcs {
            command: format!("git rev-list --count {range}"),
            output: format!("unexpected output: {}", out.trim()),
        })
    }

    fn commit_all(&self, message: &str, metadata: &BTreeMap<String, String>) -> Result<()> {
        self.ensure_repository()?;
        if !self.has_uncommitted_changes()? {
            debug!("working tree clean, nothing to commit");
            return Ok(());
        }
        self.git(&["add", "-A"])?;
        let body = commit_message(message, metadata);
        self.git(&["commit", "-m", &body]).map(drop)
    }

    fn has_uncommitted_changes(&self) -> Result<bool> {
        let out = self.git(&["status", "--porcelain"])?;
        Ok(!out.trim().is_empty())
    }
}

/// Subject line followed by `key: value` trailers.
fn commit_message(message: &str, metadata: &BTreeMap<String, String>) -> String {
    if metadata.is_empty() {
        return message.to_string();
    }
    let trailers: Vec<String> = metadata.iter().map(|(k, v)| format!("{k}: {v}")).collect();
    format!("{message}\n\n{}", trailers.join("\n"))
}

// ---------------------------------------------------------------------------
// Subprocess with deadline
// ---------------------------------------------------------------------------

struct ProcessOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

/// Spawn `cmd` and wait at most `timeout` for it to exit.
///
/// stdout and stderr are drained on their own threads so a chatty child
/// cannot fill a pipe and deadlock. On expiry the child is killed by pid.
fn run_with_deadline(
    mut cmd: Command,
    label: &str,
    timeout: Option<Duration>,
) -> Result<ProcessOutput> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| DevflowError::VcsUnavailable(format!("failed to spawn '{label}': {e}")))?;

    let child_pid = child.id();
    let stdout_handle = child.stdout.take();
    let stderr_handle = child.stderr.take();

    let stdout_thread = std::thread::spawn(move || drain(stdout_handle));
    let stderr_thread = std::thread::spawn(move || drain(stderr_handle));

    let wait_result = match timeout {
        None => child.wait(),
        Some(limit) => {
            let (tx, rx) = mpsc::channel();
            std::thread::spawn(move || {
                let _ = tx.send(child.wait());
            });
            match rx.recv_timeout(limit) {
                Ok(result) => result,
                Err(_) => {
                    // Reader threads see EOF once the killed child's pipes close.
                    kill_process(child_pid);
                    return Err(DevflowError::VcsTimeout {
                        command: label.to_string(),
                        seconds: limit.as_secs(),
                    });
                }
            }
        }
    };

    let stdout = stdout_thread.join().unwrap_or_default();
    let stderr = stderr_thread.join().unwrap_or_default();
    let status = wait_result?;

    Ok(ProcessOutput {
        success: status.success(),
        stdout,
        stderr,
    })
}

fn drain<R: Read>(handle: Option<R>) -> String {
    let mut buf = String::new();
    if let Some(mut r) = handle {
        let _ = r.read_to_string(&mut buf);
    }
    buf
}

/// Combine stdout/stderr and cap to 10KB, keeping the tail.
fn combine_output(stdout: &str, stderr: &str) -> String {
    let output = match (stdout.trim().is_empty(), stderr.trim().is_empty()) {
        (true, _) => stderr.to_string(),
        (false, true) => stdout.to_string(),
        (false, false) => format!("{stdout}\n{stderr}"),
    };
    let trimmed = output.trim();
    if trimmed.len() <= MAX_OUTPUT {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - MAX_OUTPUT;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    trimmed[start..].to_string()
}

/// SIGKILL by pid. Best-effort.
fn kill_process(pid: u32) {
    let _ = Command::new("kill")
        .arg("-9")
        .arg(pid.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
