//! Artifact logging for paths, byte buffers and readers

use std::fmt;
use std::fs;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use tempfile::TempDir;

use crate::tracking::error::TrackingError;
use crate::tracking::run::TrackingRunSession;

/// Data accepted by [`TrackingRunSession::log_artifact`]
pub enum ArtifactPayload<'a> {
    /// Existing file or directory, uploaded in place
    Path(PathBuf),
    /// In-memory contents; requires a filename
    Bytes(Vec<u8>),
    /// Stream read to completion; requires a filename
    Reader(Box<dyn Read + 'a>),
}

impl fmt::Debug for ArtifactPayload<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactPayload::Path(path) => f.debug_tuple("Path").field(path).finish(),
            ArtifactPayload::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            ArtifactPayload::Reader(_) => f.write_str("Reader(..)"),
        }
    }
}

impl From<PathBuf> for ArtifactPayload<'_> {
    fn from(path: PathBuf) -> Self {
        ArtifactPayload::Path(path)
    }
}

impl From<&Path> for ArtifactPayload<'_> {
    fn from(path: &Path) -> Self {
        ArtifactPayload::Path(path.to_path_buf())
    }
}

impl From<Vec<u8>> for ArtifactPayload<'_> {
    fn from(bytes: Vec<u8>) -> Self {
        ArtifactPayload::Bytes(bytes)
    }
}

impl From<&[u8]> for ArtifactPayload<'_> {
    fn from(bytes: &[u8]) -> Self {
        ArtifactPayload::Bytes(bytes.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for ArtifactPayload<'_> {
    fn from(bytes: &[u8; N]) -> Self {
        ArtifactPayload::Bytes(bytes.to_vec())
    }
}

impl<'a> ArtifactPayload<'a> {
    /// Wrap any reader
    pub fn reader(reader: impl Read + 'a) -> Self {
        ArtifactPayload::Reader(Box::new(reader))
    }
}

impl TrackingRunSession {
    /// Upload an artifact to the active run; no-op otherwise
    ///
    /// Byte and reader payloads are written to `filename` inside a fresh
    /// temporary directory, which is removed before returning whether or not
    /// the upload succeeded.
    pub fn log_artifact<'a>(
        &mut self,
        payload: impl Into<ArtifactPayload<'a>>,
        artifact_path: Option<&str>,
        filename: Option<&str>,
    ) -> Result<(), TrackingError> {
        let Some(backend) = self.active_backend() else {
            return Ok(());
        };

        let payload = payload.into();
        if let ArtifactPayload::Path(path) = &payload {
            if path.is_dir() {
                return backend.log_artifacts(path, artifact_path);
            }
            if path.is_file() {
                return backend.log_artifact(path, artifact_path);
            }
        }

        let filename = filename.ok_or(TrackingError::MissingFilename)?;
        validate_filename(filename)?;

        let staging = TempDir::new()?;
        let staged = staging.path().join(filename);
        match payload {
            ArtifactPayload::Bytes(bytes) => fs::write(&staged, bytes)?,
            ArtifactPayload::Reader(mut reader) => {
                let mut file = fs::File::create(&staged)?;
                io::copy(&mut reader, &mut file)?;
            }
            ArtifactPayload::Path(path) => {
                return Err(TrackingError::UnsupportedPayload(format!(
                    "{} is neither a file nor a directory",
                    path.display()
                )));
            }
        }

        tracing::debug!(path = %staged.display(), "Uploading staged artifact");
        backend.log_artifact(&staged, artifact_path)
    }
}

/// A filename must be a single plain path component
fn validate_filename(filename: &str) -> Result<(), TrackingError> {
    let mut components = Path::new(filename).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(TrackingError::InvalidFilename(filename.to_string())),
    }
}
