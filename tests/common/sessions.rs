//! Session construction helpers
//!
//! Builds sessions rooted in a [`TestRepo`](super::git_fixtures::TestRepo)
//! with a fixed run command and, optionally, a recording backend.

#![allow(dead_code)]

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use easy_experiment::config::{Config, RunCommandConfig, TrackingConfig};
use easy_experiment::tracking::mock::{BackendCall, RecordingBackend};
use easy_experiment::{ExperimentSession, RunCommand, SessionOptions, SessionVariant};
use parking_lot::Mutex;

pub type CallLog = Arc<Mutex<Vec<BackendCall>>>;

/// Recorded command used by every test session
pub fn test_run_command() -> RunCommand {
    RunCommand::from_args(
        &RunCommandConfig::default(),
        ["python", "train.py", "--epochs", "3"].map(OsString::from),
    )
}

/// Config rooted at `repo_dir`, snapshots under `<repo_dir>/experiments`
pub fn test_config(repo_dir: &Path) -> Config {
    Config::default()
        .with_repo_dir(repo_dir.to_path_buf())
        .with_parent_dir(PathBuf::from("experiments"))
        .with_tracking(TrackingConfig::default())
}

/// Session without a tracking backend
pub fn untracked_session(repo_dir: &Path, variant: SessionVariant) -> ExperimentSession {
    let options = SessionOptions::new(variant).with_run_command(test_run_command());
    ExperimentSession::new(test_config(repo_dir), options).expect("Failed to create session")
}

/// Session with a recording backend; returns the captured call log
pub fn tracked_session(repo_dir: &Path, variant: SessionVariant) -> (ExperimentSession, CallLog) {
    tracked_session_with(repo_dir, SessionOptions::new(variant), RecordingBackend::new())
}

/// Like [`tracked_session`] with custom options and backend
pub fn tracked_session_with(
    repo_dir: &Path,
    options: SessionOptions,
    backend: RecordingBackend,
) -> (ExperimentSession, CallLog) {
    let calls = backend.calls_handle();
    let options = options
        .with_run_command(test_run_command())
        .with_backend(Box::new(backend));
    let session =
        ExperimentSession::new(test_config(repo_dir), options).expect("Failed to create session");
    (session, calls)
}

/// Operation names of the captured calls, in order
pub fn ops(calls: &CallLog) -> Vec<&'static str> {
    calls.lock().iter().map(BackendCall::op).collect()
}
