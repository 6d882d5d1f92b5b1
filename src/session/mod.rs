//! Experiment sessions
//!
//! Composes the git, snapshot and tracking modules into the four session
//! variants.

mod error;
mod experiment;
mod variant;

pub use error::SessionError;
pub use experiment::{
    ExperimentSession, SessionOptions, GIT_HASH_ARTIFACT, RUN_COMMAND_PARAM,
    SOURCE_ARTIFACT_PATH,
};
pub use variant::SessionVariant;
