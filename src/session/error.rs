use thiserror::Error;

use crate::config::ConfigError;
use crate::git::GitError;
use crate::snapshot::SnapshotError;
use crate::tracking::TrackingError;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Experiment {0} was already started")]
    AlreadyStarted(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Git(#[from] GitError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Tracking(#[from] TrackingError),
}
