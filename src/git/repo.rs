//! Git invocation wrapper for provenance queries and commits

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use thiserror::Error;

use super::status::GitStatusEntry;

/// Sentinel recorded when the revision or diff cannot be determined
pub const UNKNOWN_REVISION: &str = "unknown";

#[derive(Error, Debug)]
pub enum GitError {
    #[error("git {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },
    #[error("Not a git repository: {0}")]
    NotAGitRepo(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Handle on a working tree, invoking the `git` binary as a child process
///
/// Read-only queries ([`revision`](Self::revision), [`diff`](Self::diff),
/// [`status`](Self::status)) never fail: they degrade to [`UNKNOWN_REVISION`]
/// or an empty result. Mutating operations propagate [`GitError`].
#[derive(Debug, Clone)]
pub struct GitRepo {
    /// Directory git commands run in
    workdir: PathBuf,
    /// Resolved git executable
    git: PathBuf,
}

impl GitRepo {
    /// Create a handle for `workdir`, locating git on PATH
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        let git = which::which("git").unwrap_or_else(|_| PathBuf::from("git"));
        Self {
            workdir: workdir.into(),
            git,
        }
    }

    /// Use an explicit git executable instead of the one found on PATH
    pub fn with_git_binary(mut self, git: impl Into<PathBuf>) -> Self {
        self.git = git.into();
        self
    }

    /// Directory git commands run in
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn output<I, S>(&self, args: I) -> std::io::Result<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        Command::new(&self.git)
            .args(args)
            .current_dir(&self.workdir)
            .output()
    }

    /// Run a command whose failure is fatal, returning trimmed stdout
    fn run(&self, args: &[&str]) -> Result<String, GitError> {
        let output = self.output(args)?;
        if !output.status.success() {
            return Err(GitError::CommandFailed {
                command: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Run a read-only query, yielding None on any failure
    fn query(&self, args: &[&str]) -> Option<String> {
        match self.output(args) {
            Ok(o) if o.status.success() => Some(String::from_utf8_lossy(&o.stdout).to_string()),
            Ok(o) => {
                tracing::debug!(
                    command = %args.join(" "),
                    stderr = %String::from_utf8_lossy(&o.stderr).trim(),
                    "git query failed"
                );
                None
            }
            Err(e) => {
                tracing::debug!(command = %args.join(" "), error = %e, "git could not be run");
                None
            }
        }
    }

    /// Check if the working directory is inside a git repository
    pub fn is_repository(&self) -> bool {
        self.query(&["rev-parse", "--git-dir"]).is_some()
    }

    /// Current commit id, or [`UNKNOWN_REVISION`] when it cannot be resolved
    ///
    /// Re-queries git on every call.
    pub fn revision(&self) -> String {
        self.query(&["rev-parse", "HEAD"])
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| UNKNOWN_REVISION.to_string())
    }

    /// Diff of `path` against `reference`, or [`UNKNOWN_REVISION`] on failure
    pub fn diff(&self, reference: &str, path: &Path) -> String {
        let output = self.output([
            OsStr::new("diff"),
            OsStr::new(reference),
            OsStr::new("--"),
            path.as_os_str(),
        ]);
        match output {
            Ok(o) if o.status.success() => String::from_utf8_lossy(&o.stdout).trim().to_string(),
            _ => UNKNOWN_REVISION.to_string(),
        }
    }

    /// Working-tree status entries; empty when the query fails
    pub fn status(&self) -> Vec<GitStatusEntry> {
        self.query(&["status", "--porcelain"])
            .map(|out| GitStatusEntry::parse_porcelain(&out))
            .unwrap_or_default()
    }

    /// Working-tree status entries, propagating failure
    pub fn status_checked(&self) -> Result<Vec<GitStatusEntry>, GitError> {
        let output = self.output(["status", "--porcelain"])?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("not a git repository") {
                return Err(GitError::NotAGitRepo(self.workdir.clone()));
            }
            return Err(GitError::CommandFailed {
                command: "status --porcelain".to_string(),
                stderr: stderr.trim().to_string(),
            });
        }
        Ok(GitStatusEntry::parse_porcelain(&String::from_utf8_lossy(
            &output.stdout,
        )))
    }

    /// Stage every change in the working tree, including untracked files
    pub fn stage_all(&self) -> Result<(), GitError> {
        self.run(&["add", "-A"]).map(|_| ())
    }

    /// Stage the given paths
    pub fn stage(&self, paths: &[&str]) -> Result<(), GitError> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut args = vec!["add", "--"];
        args.extend_from_slice(paths);
        self.run(&args).map(|_| ())
    }

    /// Commit the index with `message`
    pub fn commit(&self, message: &str) -> Result<(), GitError> {
        self.run(&["commit", "-m", message]).map(|_| ())
    }

    /// Current branch name, or `detached@<short sha>` when HEAD is detached
    pub fn current_branch(&self) -> Result<String, GitError> {
        let branch = self.run(&["branch", "--show-current"])?;
        if branch.is_empty() {
            let sha = self.run(&["rev-parse", "--short", "HEAD"])?;
            return Ok(format!("detached@{}", sha));
        }
        Ok(branch)
    }

    /// Point `name` at `reference`, creating or moving the branch
    pub fn force_set_branch(&self, name: &str, reference: &str) -> Result<(), GitError> {
        self.run(&["branch", "-f", name, reference]).map(|_| ())
    }

    /// Switch the working tree to `name`
    pub fn checkout(&self, name: &str) -> Result<(), GitError> {
        self.run(&["checkout", name]).map(|_| ())
    }
}
