//! Git operations module

mod autocommit;
mod repo;
mod status;

pub use autocommit::{AutoCommitOutcome, AutoCommitPolicy, DEFAULT_EXPERIMENTS_BRANCH};
pub use repo::{GitError, GitRepo, UNKNOWN_REVISION};
pub use status::GitStatusEntry;
