//! In-memory tracking backend for deterministic testing
//!
//! Implements [`TrackingBackend`] without any network access and records
//! every call in order, so tests can assert on what a session sent and when.
//!
//! # Example
//! ```
//! use easy_experiment::tracking::mock::{BackendCall, RecordingBackend};
//! use easy_experiment::tracking::TrackingBackend;
//!
//! let backend = RecordingBackend::new();
//! let calls = backend.calls_handle();
//!
//! let mut boxed: Box<dyn TrackingBackend> = Box::new(backend);
//! boxed.start_run("exp-1").unwrap();
//!
//! assert!(matches!(calls.lock()[0], BackendCall::StartRun { .. }));
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use walkdir::WalkDir;

use crate::model::{MetricSet, ParameterSet};
use crate::tracking::backend::{RunInfo, TrackingBackend};
use crate::tracking::error::TrackingError;

/// One captured backend call
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    SetTrackingUri(String),
    SetExperiment(String),
    StartRun { name: String, run_id: String },
    EndRun,
    SetTags(BTreeMap<String, String>),
    LogParams(ParameterSet),
    LogMetrics { metrics: MetricSet, step: Option<i64> },
    /// File contents are captured at call time, since temporary files vanish afterwards
    LogArtifact {
        path: PathBuf,
        artifact_path: Option<String>,
        contents: Option<Vec<u8>>,
    },
    LogArtifacts {
        dir: PathBuf,
        artifact_path: Option<String>,
        files: Vec<String>,
    },
}

impl BackendCall {
    /// Short operation name, matching the names accepted by [`RecordingBackend::failing_on`]
    pub fn op(&self) -> &'static str {
        match self {
            BackendCall::SetTrackingUri(_) => "set_tracking_uri",
            BackendCall::SetExperiment(_) => "set_experiment",
            BackendCall::StartRun { .. } => "start_run",
            BackendCall::EndRun => "end_run",
            BackendCall::SetTags(_) => "set_tags",
            BackendCall::LogParams(_) => "log_params",
            BackendCall::LogMetrics { .. } => "log_metrics",
            BackendCall::LogArtifact { .. } => "log_artifact",
            BackendCall::LogArtifacts { .. } => "log_artifacts",
        }
    }
}

/// Recording tracking backend
///
/// Clone the [`calls_handle`](Self::calls_handle) before boxing the backend
/// to keep access to the captured calls.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    calls: Arc<Mutex<Vec<BackendCall>>>,
    failing: HashSet<&'static str>,
    runs_started: usize,
    active: bool,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call of the named operation fail (the call is still recorded)
    pub fn failing_on(mut self, op: &'static str) -> Self {
        self.failing.insert(op);
        self
    }

    /// Shared handle on the captured calls
    pub fn calls_handle(&self) -> Arc<Mutex<Vec<BackendCall>>> {
        Arc::clone(&self.calls)
    }

    fn record(&mut self, call: BackendCall) -> Result<(), TrackingError> {
        let op = call.op();
        self.calls.lock().push(call);
        if self.failing.contains(op) {
            return Err(TrackingError::Backend(format!("{} failed", op)));
        }
        Ok(())
    }

    fn require_run(&self) -> Result<(), TrackingError> {
        if self.active {
            Ok(())
        } else {
            Err(TrackingError::NoActiveRun)
        }
    }
}

impl TrackingBackend for RecordingBackend {
    fn set_tracking_uri(&mut self, uri: &str) -> Result<(), TrackingError> {
        self.record(BackendCall::SetTrackingUri(uri.to_string()))
    }

    fn set_experiment(&mut self, name: &str) -> Result<(), TrackingError> {
        self.record(BackendCall::SetExperiment(name.to_string()))
    }

    fn start_run(&mut self, name: &str) -> Result<RunInfo, TrackingError> {
        self.runs_started += 1;
        let run_id = format!("run-{:03}", self.runs_started);
        self.record(BackendCall::StartRun {
            name: name.to_string(),
            run_id: run_id.clone(),
        })?;
        self.active = true;
        Ok(RunInfo {
            artifact_uri: format!("mlflow-artifacts:/0/{}/artifacts", run_id),
            run_id,
        })
    }

    fn end_run(&mut self) -> Result<(), TrackingError> {
        self.require_run()?;
        self.record(BackendCall::EndRun)?;
        self.active = false;
        Ok(())
    }

    fn set_tags(&mut self, tags: &BTreeMap<String, String>) -> Result<(), TrackingError> {
        self.require_run()?;
        self.record(BackendCall::SetTags(tags.clone()))
    }

    fn log_params(&mut self, params: &ParameterSet) -> Result<(), TrackingError> {
        self.require_run()?;
        self.record(BackendCall::LogParams(params.clone()))
    }

    fn log_metrics(
        &mut self,
        metrics: &MetricSet,
        step: Option<i64>,
    ) -> Result<(), TrackingError> {
        self.require_run()?;
        self.record(BackendCall::LogMetrics {
            metrics: metrics.clone(),
            step,
        })
    }

    fn log_artifact(
        &mut self,
        path: &Path,
        artifact_path: Option<&str>,
    ) -> Result<(), TrackingError> {
        self.require_run()?;
        self.record(BackendCall::LogArtifact {
            path: path.to_path_buf(),
            artifact_path: artifact_path.map(str::to_string),
            contents: std::fs::read(path).ok(),
        })
    }

    fn log_artifacts(
        &mut self,
        dir: &Path,
        artifact_path: Option<&str>,
    ) -> Result<(), TrackingError> {
        self.require_run()?;
        let mut files = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry?;
            if entry.file_type().is_file() {
                if let Ok(rel) = entry.path().strip_prefix(dir) {
                    files.push(rel.to_string_lossy().to_string());
                }
            }
        }
        self.record(BackendCall::LogArtifacts {
            dir: dir.to_path_buf(),
            artifact_path: artifact_path.map(str::to_string),
            files,
        })
    }
}
