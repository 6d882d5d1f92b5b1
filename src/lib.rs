pub mod config;
pub mod git;
pub mod model;
pub mod session;
pub mod snapshot;
pub mod tracking;
pub mod util;

pub use config::{Config, ConfigError, ConfigOverrides, TrackingConfig};
pub use git::{AutoCommitPolicy, GitError, GitRepo, UNKNOWN_REVISION};
pub use model::{ExperimentId, MetricSet, ParameterSet};
pub use session::{ExperimentSession, SessionError, SessionOptions, SessionVariant};
pub use snapshot::{SnapshotError, SnapshotStore};
pub use tracking::{
    ArtifactPayload, MlflowClient, RunState, TrackingBackend, TrackingError, TrackingRunSession,
};
pub use util::RunCommand;
