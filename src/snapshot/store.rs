//! Append-only snapshot directory for a single experiment

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use walkdir::WalkDir;

use crate::git::GitRepo;

/// File holding the revision id
pub const HASH_FILE: &str = "hash";
/// File holding the JSON parameter blob
pub const PARAMS_FILE: &str = "prm.json";
/// File holding the recorded invocation command
pub const RUN_COMMAND_FILE: &str = "run_command.txt";
/// Suffix for optional per-source diff files
pub const DIFF_SUFFIX: &str = ".diff";

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Snapshot directory already exists: {0}")]
    AlreadyExists(PathBuf),
    #[error("Snapshot directory is sealed: {0}")]
    Sealed(PathBuf),
    #[error("Source path has no file name: {0}")]
    InvalidSource(PathBuf),
    #[error("Failed to read source {path}: {source}")]
    ReadSource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to serialize parameters: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Failed to walk snapshot directory: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Owner of one `<parent_dir>/<experiment_id>` directory
///
/// The directory is populated incrementally and then [sealed](Self::seal):
/// every file becomes `r--r--r--` and every directory `r-xr-xr-x`. After
/// sealing, all write methods return [`SnapshotError::Sealed`].
#[derive(Debug)]
pub struct SnapshotStore {
    dir: PathBuf,
    record_diffs: bool,
    sealed: bool,
}

impl SnapshotStore {
    /// Create the snapshot directory for `experiment_id` under `parent_dir`
    ///
    /// Missing ancestors of `parent_dir` are created; the experiment directory
    /// itself must not exist yet.
    pub fn create(parent_dir: &Path, experiment_id: &str) -> Result<Self, SnapshotError> {
        let dir = parent_dir.join(experiment_id);
        if dir.exists() {
            return Err(SnapshotError::AlreadyExists(dir));
        }
        fs::create_dir_all(parent_dir)?;
        fs::create_dir(&dir).map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => SnapshotError::AlreadyExists(dir.clone()),
            _ => SnapshotError::Io(e),
        })?;

        tracing::debug!(dir = %dir.display(), "Created snapshot directory");
        Ok(Self {
            dir,
            record_diffs: false,
            sealed: false,
        })
    }

    /// Also write `<basename>.diff` (diff against HEAD) beside each copied source
    pub fn with_diffs(mut self, record_diffs: bool) -> Self {
        self.record_diffs = record_diffs;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Refuse writes after sealing; recreate the directory if it vanished
    fn prepare_write(&self) -> Result<(), SnapshotError> {
        if self.sealed {
            return Err(SnapshotError::Sealed(self.dir.clone()));
        }
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    fn write_file(&self, name: &str, contents: impl AsRef<[u8]>) -> Result<(), SnapshotError> {
        fs::write(self.dir.join(name), contents)?;
        Ok(())
    }

    /// Record the current revision and copy each source file by base name
    ///
    /// Sources sharing a base name overwrite each other; the last one wins.
    pub fn snapshot(&self, repo: &GitRepo, files: &[PathBuf]) -> Result<(), SnapshotError> {
        self.prepare_write()?;

        if files.is_empty() {
            self.write_file(HASH_FILE, repo.revision())?;
        }

        for file in files {
            self.write_file(HASH_FILE, repo.revision())?;

            let name = file
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| SnapshotError::InvalidSource(file.clone()))?;
            let source = fs::read(file).map_err(|source| SnapshotError::ReadSource {
                path: file.clone(),
                source,
            })?;
            self.write_file(name, &source)?;

            if self.record_diffs {
                let diff = repo.diff("HEAD", file);
                self.write_file(&format!("{}{}", name, DIFF_SUFFIX), diff)?;
            }

            tracing::debug!(source = %file.display(), name, "Copied source into snapshot");
        }

        Ok(())
    }

    /// Serialize `params` to `prm.json`, replacing any previous contents
    pub fn write_parameters<T: Serialize + ?Sized>(&self, params: &T) -> Result<(), SnapshotError> {
        self.prepare_write()?;
        let json = serde_json::to_vec(params)?;
        self.write_file(PARAMS_FILE, json)
    }

    /// Write the invocation command to `run_command.txt`
    pub fn write_run_command(&self, command: &str) -> Result<(), SnapshotError> {
        self.prepare_write()?;
        self.write_file(RUN_COMMAND_FILE, command)
    }

    /// Make the whole subtree read-only. Terminal: no writes succeed afterwards.
    pub fn seal(&mut self) -> Result<(), SnapshotError> {
        if self.sealed {
            return Ok(());
        }

        // Children before parents so directories are still writable while we descend
        for entry in WalkDir::new(&self.dir).contents_first(true) {
            let entry = entry?;
            set_read_only(entry.path(), entry.file_type().is_dir())?;
        }

        self.sealed = true;
        tracing::info!(dir = %self.dir.display(), "Sealed snapshot directory");
        Ok(())
    }
}

#[cfg(unix)]
fn set_read_only(path: &Path, is_dir: bool) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = if is_dir { 0o555 } else { 0o444 };
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_read_only(path: &Path, _is_dir: bool) -> std::io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_readonly(true);
    fs::set_permissions(path, permissions)
}
