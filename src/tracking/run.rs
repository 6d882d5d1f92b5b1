//! Remote tracking run lifecycle

use std::collections::BTreeMap;
use std::path::Path;

use crate::config::TrackingConfig;
use crate::model::{ExperimentId, MetricSet, ParameterSet};
use crate::tracking::backend::{RunInfo, TrackingBackend};
use crate::tracking::error::TrackingError;
use crate::tracking::mlflow::MlflowClient;

pub const TAG_EXPERIMENT_ID: &str = "easy_experiment.experiment_id";
pub const TAG_GIT_HASH: &str = "git.hash";
pub const TAG_SAVE_DIR: &str = "easy_experiment.save_dir";

/// Tracking state
///
/// `Disabled` is fixed at construction and never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Disabled,
    Inactive,
    Active,
}

/// What a run is opened for
#[derive(Debug, Clone, Copy)]
pub struct RunContext<'a> {
    pub experiment_id: &'a ExperimentId,
    pub revision: &'a str,
    /// Local snapshot directory; uploaded as artifacts and tagged when present
    pub snapshot_dir: Option<&'a Path>,
}

/// One tracking run per experiment session
pub struct TrackingRunSession {
    state: RunState,
    backend: Option<Box<dyn TrackingBackend>>,
    config: TrackingConfig,
    run: Option<RunInfo>,
}

impl std::fmt::Debug for TrackingRunSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingRunSession")
            .field("state", &self.state)
            .field("config", &self.config)
            .field("run", &self.run)
            .finish_non_exhaustive()
    }
}

impl TrackingRunSession {
    /// Decide availability once; an injected backend is always available
    ///
    /// Tracking that is enabled but has neither a backend nor a URI is a
    /// configuration error. Only `enabled = false` yields a disabled session.
    pub fn new(
        config: &TrackingConfig,
        backend: Option<Box<dyn TrackingBackend>>,
    ) -> Result<Self, TrackingError> {
        if !config.enabled {
            tracing::debug!("Tracking disabled by configuration");
            return Ok(Self::with_backend(config, None));
        }

        let backend: Box<dyn TrackingBackend> = match backend {
            Some(backend) => backend,
            None if config.uri.is_some() => Box::new(MlflowClient::new()?),
            None => return Err(TrackingError::MissingTrackingUri),
        };
        Ok(Self::with_backend(config, Some(backend)))
    }

    fn with_backend(config: &TrackingConfig, backend: Option<Box<dyn TrackingBackend>>) -> Self {
        let state = if backend.is_some() {
            RunState::Inactive
        } else {
            RunState::Disabled
        };

        Self {
            state,
            backend,
            config: config.clone(),
            run: None,
        }
    }

    /// A session that never tracks
    pub fn disabled() -> Self {
        Self::with_backend(&TrackingConfig::disabled(), None)
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == RunState::Active
    }

    pub fn is_enabled(&self) -> bool {
        self.state != RunState::Disabled
    }

    pub fn run_id(&self) -> Option<&str> {
        self.run.as_ref().map(|run| run.run_id.as_str())
    }

    /// Open the run and apply tags
    ///
    /// Returns `None` when tracking is disabled. Opening an already active
    /// session returns the existing run id.
    pub fn open(&mut self, ctx: RunContext<'_>) -> Result<Option<String>, TrackingError> {
        let Some(backend) = self.backend.as_mut() else {
            return Ok(None);
        };
        if self.state == RunState::Active {
            return Ok(self.run.as_ref().map(|run| run.run_id.clone()));
        }

        if let Some(uri) = &self.config.uri {
            backend.set_tracking_uri(uri)?;
        }
        if let Some(experiment) = &self.config.experiment {
            backend.set_experiment(experiment)?;
        }

        let run = backend.start_run(ctx.experiment_id.as_str())?;
        let run_id = run.run_id.clone();
        self.run = Some(run);
        self.state = RunState::Active;
        tracing::info!(run_id = %run_id, experiment_id = %ctx.experiment_id, "Tracking run started");

        let tags = merged_tags(&ctx, &self.config.tags);
        backend.set_tags(&tags)?;

        if let Some(dir) = ctx.snapshot_dir {
            backend.log_artifacts(dir, None)?;
        }

        Ok(Some(run_id))
    }

    /// End the run; safe to call repeatedly
    pub fn close(&mut self) -> Result<(), TrackingError> {
        if self.state != RunState::Active {
            return Ok(());
        }
        self.state = RunState::Inactive;
        if let Some(backend) = self.backend.as_mut() {
            backend.end_run()?;
            tracing::info!(run_id = ?self.run_id(), "Tracking run ended");
        }
        Ok(())
    }

    pub fn log_params(&mut self, params: &ParameterSet) -> Result<(), TrackingError> {
        match self.active_backend() {
            Some(backend) => backend.log_params(params),
            None => Ok(()),
        }
    }

    pub fn log_metrics(&mut self, metrics: &MetricSet, step: Option<i64>) -> Result<(), TrackingError> {
        match self.active_backend() {
            Some(backend) => backend.log_metrics(metrics, step),
            None => Ok(()),
        }
    }

    /// Backend of an active run, `None` otherwise
    pub(super) fn active_backend(&mut self) -> Option<&mut (dyn TrackingBackend + 'static)> {
        if self.state != RunState::Active {
            return None;
        }
        self.backend.as_deref_mut()
    }
}

/// Built-in run tags, overridden by caller tags
fn merged_tags(ctx: &RunContext<'_>, extra: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();
    tags.insert(TAG_EXPERIMENT_ID.to_string(), ctx.experiment_id.to_string());
    tags.insert(TAG_GIT_HASH.to_string(), ctx.revision.to_string());
    if let Some(dir) = ctx.snapshot_dir {
        tags.insert(TAG_SAVE_DIR.to_string(), dir.display().to_string());
    }
    tags.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    tags
}
