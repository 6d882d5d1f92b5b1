//! Experiment session lifecycle
//!
//! An [`ExperimentSession`] sequences auto-commit, the local snapshot and the
//! tracking run for one experiment:
//!
//! 1. auto-commit outstanding changes (variants that auto-commit)
//! 2. copy sources into the snapshot directory and seal it (local variants)
//! 3. open the tracking run (tracking variants)
//! 4. record the invoking command, best effort
//! 5. upload revision and sources straight to the run (cloud-only)

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::config::{Config, ConfigOverrides};
use crate::git::{AutoCommitPolicy, GitRepo};
use crate::model::{ExperimentId, MetricSet, ParameterSet};
use crate::session::error::SessionError;
use crate::session::variant::SessionVariant;
use crate::snapshot::{SnapshotError, SnapshotStore, RUN_COMMAND_FILE};
use crate::tracking::{ArtifactPayload, RunContext, RunState, TrackingBackend, TrackingRunSession};
use crate::util::RunCommand;

/// Artifact name the revision is uploaded under in cloud-only sessions
pub const GIT_HASH_ARTIFACT: &str = "git_hash.txt";
/// Artifact directory source files are uploaded under in cloud-only sessions
pub const SOURCE_ARTIFACT_PATH: &str = "source";
/// Tracking parameter holding the invoking command
pub const RUN_COMMAND_PARAM: &str = "run_command";

/// Options for constructing an [`ExperimentSession`]
#[derive(Default)]
pub struct SessionOptions {
    pub variant: SessionVariant,
    /// Caller-supplied id; a random one is generated otherwise
    pub experiment_id: Option<ExperimentId>,
    /// Write `<basename>.diff` next to each copied source
    pub record_diffs: bool,
    /// Command recorded for the run; defaults to the current process invocation
    pub run_command: Option<RunCommand>,
    /// Tracking backend to use instead of the configured server
    pub backend: Option<Box<dyn TrackingBackend>>,
}

impl SessionOptions {
    pub fn new(variant: SessionVariant) -> Self {
        Self {
            variant,
            ..Self::default()
        }
    }

    pub fn with_experiment_id(mut self, id: impl Into<ExperimentId>) -> Self {
        self.experiment_id = Some(id.into());
        self
    }

    pub fn with_diffs(mut self, record_diffs: bool) -> Self {
        self.record_diffs = record_diffs;
        self
    }

    pub fn with_run_command(mut self, command: RunCommand) -> Self {
        self.run_command = Some(command);
        self
    }

    pub fn with_backend(mut self, backend: Box<dyn TrackingBackend>) -> Self {
        self.backend = Some(backend);
        self
    }
}

/// One recorded experiment run
pub struct ExperimentSession {
    variant: SessionVariant,
    experiment_id: ExperimentId,
    repo: GitRepo,
    autocommit: AutoCommitPolicy,
    store: Option<SnapshotStore>,
    tracking: TrackingRunSession,
    run_command: RunCommand,
    /// Last parameters written, forwarded to the run once it opens
    params: Option<ParameterSet>,
    started: bool,
}

impl std::fmt::Debug for ExperimentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExperimentSession")
            .field("variant", &self.variant)
            .field("experiment_id", &self.experiment_id)
            .field("save_dir", &self.save_dir())
            .field("tracking", &self.tracking)
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

impl ExperimentSession {
    /// Create a session; local variants create the snapshot directory here
    pub fn new(config: Config, options: SessionOptions) -> Result<Self, SessionError> {
        let variant = options.variant;
        let experiment_id = options.experiment_id.unwrap_or_else(ExperimentId::generate);

        // Tracking is resolved first so a misconfiguration leaves nothing on disk
        let tracking = if variant.tracks() {
            TrackingRunSession::new(&config.tracking, options.backend)?
        } else {
            if options.backend.is_some() {
                tracing::debug!(variant = %variant, "Ignoring tracking backend for untracked variant");
            }
            TrackingRunSession::disabled()
        };

        let store = if variant.snapshots_locally() {
            let parent_dir = config.repo_dir.join(&config.parent_dir);
            let store = SnapshotStore::create(&parent_dir, experiment_id.as_str())?
                .with_diffs(options.record_diffs);
            Some(store)
        } else {
            None
        };

        let run_command = options
            .run_command
            .unwrap_or_else(|| RunCommand::resolve(&config.run_command));

        tracing::debug!(
            experiment_id = %experiment_id,
            variant = %variant,
            tracking = ?tracking.state(),
            "Created experiment session"
        );

        Ok(Self {
            variant,
            experiment_id,
            repo: GitRepo::new(&config.repo_dir),
            autocommit: AutoCommitPolicy::new(config.experiments_branch.clone()),
            store,
            tracking,
            run_command,
            params: None,
            started: false,
        })
    }

    /// Create a session from the process environment and config files
    pub fn from_env(options: SessionOptions) -> Result<Self, SessionError> {
        let config = Config::load(ConfigOverrides::default())?;
        Self::new(config, options)
    }

    /// Record the experiment and return its id
    ///
    /// `commit_message` defaults to the experiment id. A session can only be
    /// started once.
    pub fn start(
        &mut self,
        files: &[PathBuf],
        commit_message: Option<&str>,
    ) -> Result<ExperimentId, SessionError> {
        if self.started {
            return Err(SessionError::AlreadyStarted(self.experiment_id.to_string()));
        }
        self.started = true;

        if self.variant.auto_commits() {
            self.auto_commit(commit_message)?;
        }

        let revision = self.repo.revision();

        if let Some(store) = self.store.as_mut() {
            store.snapshot(&self.repo, files)?;
            if let Err(e) = store.write_run_command(self.run_command.as_str()) {
                tracing::warn!(error = %e, "Failed to record run command");
            }
            store.seal()?;
        }

        self.tracking.open(RunContext {
            experiment_id: &self.experiment_id,
            revision: &revision,
            snapshot_dir: self.store.as_ref().map(SnapshotStore::dir),
        })?;

        if let Some(params) = &self.params {
            self.tracking.log_params(params)?;
        }

        if self.tracking.is_active() {
            self.record_run_command();
        }

        if self.variant.is_cloud_only() {
            self.upload_sources(&revision, files);
        }

        tracing::info!(
            experiment_id = %self.experiment_id,
            revision = %revision,
            save_dir = ?self.save_dir(),
            run_id = ?self.tracking.run_id(),
            "Experiment started"
        );
        Ok(self.experiment_id.clone())
    }

    fn auto_commit(&self, commit_message: Option<&str>) -> Result<(), SessionError> {
        let message = commit_message.unwrap_or(self.experiment_id.as_str());
        match self.autocommit.commit_all_and_switch(&self.repo, message) {
            Ok(outcome) => {
                tracing::debug!(?outcome, "Auto-commit finished");
                Ok(())
            }
            Err(e) if self.variant.is_cloud_only() => {
                tracing::warn!(error = %e, "Auto-commit failed, continuing without it");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Tracking parameter and artifact for the run command; failures are logged
    fn record_run_command(&mut self) {
        let mut params = ParameterSet::new();
        params.insert(
            RUN_COMMAND_PARAM.to_string(),
            Value::String(self.run_command.as_param_value().to_string()),
        );
        if let Err(e) = self.tracking.log_params(&params) {
            tracing::warn!(error = %e, "Failed to log run command parameter");
        }

        let bytes = self.run_command.as_str().as_bytes().to_vec();
        if let Err(e) = self.tracking.log_artifact(bytes, None, Some(RUN_COMMAND_FILE)) {
            tracing::warn!(error = %e, "Failed to log run command artifact");
        }
    }

    /// Cloud-only provenance: revision and sources go straight to the run
    fn upload_sources(&mut self, revision: &str, files: &[PathBuf]) {
        let bytes = revision.as_bytes().to_vec();
        if let Err(e) = self.tracking.log_artifact(bytes, None, Some(GIT_HASH_ARTIFACT)) {
            tracing::warn!(error = %e, "Failed to log revision artifact");
        }

        for file in files {
            if !file.is_file() {
                tracing::warn!(file = %file.display(), "Skipping missing source file");
                continue;
            }
            if let Err(e) =
                self.tracking
                    .log_artifact(file.as_path(), Some(SOURCE_ARTIFACT_PATH), None)
            {
                tracing::warn!(file = %file.display(), error = %e, "Failed to upload source file");
            }
        }
    }

    /// Write parameters locally and mirror them to the tracking run
    ///
    /// Before `start` the parameters go straight into the snapshot directory
    /// and are forwarded once the run opens. After the directory is sealed
    /// they only reach the tracking run, and without an active run the write
    /// fails with [`SnapshotError::Sealed`]. Last write wins.
    pub fn write_params(&mut self, params: &ParameterSet) -> Result<(), SessionError> {
        if let Some(store) = &self.store {
            if store.is_sealed() {
                if !self.tracking.is_active() {
                    return Err(SnapshotError::Sealed(store.dir().to_path_buf()).into());
                }
                tracing::warn!(
                    dir = %store.dir().display(),
                    "Snapshot directory is sealed, parameters are only sent to the tracking run"
                );
            } else {
                store.write_parameters(params)?;
            }
        }

        self.params = Some(params.clone());
        self.tracking.log_params(params)?;
        Ok(())
    }

    pub fn log_metrics(&mut self, metrics: &MetricSet, step: Option<i64>) -> Result<(), SessionError> {
        self.tracking.log_metrics(metrics, step)?;
        Ok(())
    }

    /// Upload an artifact to the tracking run; no-op unless it is active
    pub fn log_artifact<'a>(
        &mut self,
        payload: impl Into<ArtifactPayload<'a>>,
        artifact_path: Option<&str>,
        filename: Option<&str>,
    ) -> Result<(), SessionError> {
        self.tracking.log_artifact(payload, artifact_path, filename)?;
        Ok(())
    }

    /// Close the tracking run; the snapshot directory needs no teardown
    pub fn end(&mut self) -> Result<(), SessionError> {
        self.tracking.close()?;
        Ok(())
    }

    pub fn experiment_id(&self) -> &ExperimentId {
        &self.experiment_id
    }

    pub fn variant(&self) -> SessionVariant {
        self.variant
    }

    /// Snapshot directory, `None` for cloud-only sessions
    pub fn save_dir(&self) -> Option<&Path> {
        self.store.as_ref().map(SnapshotStore::dir)
    }

    pub fn tracking_run_id(&self) -> Option<&str> {
        self.tracking.run_id()
    }

    pub fn tracking_state(&self) -> RunState {
        self.tracking.state()
    }

    pub fn run_command(&self) -> &RunCommand {
        &self.run_command
    }

    pub fn is_started(&self) -> bool {
        self.started
    }
}

impl Drop for ExperimentSession {
    fn drop(&mut self) {
        if !self.tracking.is_active() {
            return;
        }
        tracing::warn!(
            experiment_id = %self.experiment_id,
            "Experiment session dropped with an open tracking run, closing it"
        );
        if let Err(e) = self.tracking.close() {
            tracing::warn!(error = %e, "Failed to close tracking run");
        }
    }
}
