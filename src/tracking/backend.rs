//! Remote experiment-tracking backend interface

use std::collections::BTreeMap;
use std::path::Path;

use crate::model::{MetricSet, ParameterSet};
use crate::tracking::error::TrackingError;

/// Identity of a run opened on the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunInfo {
    /// Backend-assigned run id
    pub run_id: String,
    /// Root URI artifacts for this run are stored under
    pub artifact_uri: String,
}

/// Operations a tracking service must provide
///
/// Calls are blocking. Implementations keep the currently open run; the
/// logging methods fail with [`TrackingError::NoActiveRun`] before
/// [`start_run`](Self::start_run).
pub trait TrackingBackend: Send {
    /// Point the backend at a tracking server
    fn set_tracking_uri(&mut self, uri: &str) -> Result<(), TrackingError>;

    /// Select (creating if needed) the experiment new runs belong to
    fn set_experiment(&mut self, name: &str) -> Result<(), TrackingError>;

    /// Open a run with the given display name
    fn start_run(&mut self, name: &str) -> Result<RunInfo, TrackingError>;

    /// Finish the open run
    fn end_run(&mut self) -> Result<(), TrackingError>;

    fn set_tags(&mut self, tags: &BTreeMap<String, String>) -> Result<(), TrackingError>;

    fn log_params(&mut self, params: &ParameterSet) -> Result<(), TrackingError>;

    fn log_metrics(&mut self, metrics: &MetricSet, step: Option<i64>)
        -> Result<(), TrackingError>;

    /// Upload one file, optionally under `artifact_path` within the run's artifacts
    fn log_artifact(&mut self, path: &Path, artifact_path: Option<&str>)
        -> Result<(), TrackingError>;

    /// Upload every file below `dir`, keeping relative paths
    fn log_artifacts(&mut self, dir: &Path, artifact_path: Option<&str>)
        -> Result<(), TrackingError>;
}
