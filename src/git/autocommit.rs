//! Commit-everything-then-switch policy for the experiments branch

use super::repo::{GitError, GitRepo};

/// Default branch that collects experiment commits
pub const DEFAULT_EXPERIMENTS_BRANCH: &str = "experiments";

/// What [`AutoCommitPolicy::commit_all_and_switch`] did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoCommitOutcome {
    /// Working tree was clean; nothing committed, no branch touched
    Clean,
    /// Committed while already on the experiments branch
    AlreadyOnBranch { commit: String },
    /// Committed on `from`, then moved the experiments branch there and switched to it
    Switched { from: String, commit: String },
}

/// Commits all outstanding changes on the current branch, then fast-forwards
/// the experiments branch to that commit and checks it out.
///
/// The current branch keeps the commit; the experiments branch is only
/// repointed, never committed onto directly.
#[derive(Debug, Clone)]
pub struct AutoCommitPolicy {
    branch: String,
}

impl Default for AutoCommitPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_EXPERIMENTS_BRANCH)
    }
}

impl AutoCommitPolicy {
    pub fn new(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
        }
    }

    /// Target branch name
    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Stage and commit everything, then repoint and switch to the target branch
    ///
    /// A clean tree, or a directory that is not a repository, is a no-op. Once
    /// there is something to commit, any failing git invocation aborts the
    /// sequence with the error.
    pub fn commit_all_and_switch(
        &self,
        repo: &GitRepo,
        message: &str,
    ) -> Result<AutoCommitOutcome, GitError> {
        // Outside a repository the status query degrades to empty: nothing to commit
        let status = repo.status();
        if status.is_empty() {
            tracing::info!(workdir = %repo.workdir().display(), "Nothing to commit");
            return Ok(AutoCommitOutcome::Clean);
        }

        let current = repo.current_branch()?;

        repo.stage_all()?;
        repo.commit(message)?;
        let commit = repo.revision();
        tracing::info!(
            branch = %current,
            commit = %commit,
            changes = status.len(),
            "Committed outstanding changes"
        );

        if current == self.branch {
            tracing::info!(branch = %self.branch, "Already on experiments branch");
            return Ok(AutoCommitOutcome::AlreadyOnBranch { commit });
        }

        repo.force_set_branch(&self.branch, "HEAD")?;
        repo.checkout(&self.branch)?;
        tracing::info!(from = %current, to = %self.branch, "Switched to experiments branch");

        Ok(AutoCommitOutcome::Switched {
            from: current,
            commit,
        })
    }
}
