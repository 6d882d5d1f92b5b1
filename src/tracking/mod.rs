//! Remote experiment tracking

mod artifact;
mod backend;
mod error;
mod mlflow;
pub mod mock;
mod run;

pub use artifact::ArtifactPayload;
pub use backend::{RunInfo, TrackingBackend};
pub use error::TrackingError;
pub use mlflow::MlflowClient;
pub use run::{
    RunContext, RunState, TrackingRunSession, TAG_EXPERIMENT_ID, TAG_GIT_HASH, TAG_SAVE_DIR,
};
