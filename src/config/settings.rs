use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::git::DEFAULT_EXPERIMENTS_BRANCH;
use crate::util::paths::{config_path, DEFAULT_PARENT_DIR, PROJECT_CONFIG_FILE};

/// Example configuration file contents (bundled with the binary)
pub const EXAMPLE_CONFIG: &str = include_str!("config.toml.example");

/// Tracking server URI
pub const ENV_TRACKING_URI: &str = "MLFLOW_TRACKING_URI";
/// Tracking experiment name
pub const ENV_TRACKING_EXPERIMENT: &str = "EASY_EXPERIMENT_MLFLOW_EXPERIMENT";
/// Older name for [`ENV_TRACKING_EXPERIMENT`], still honoured
pub const ENV_TRACKING_EXPERIMENT_LEGACY: &str = "PYEASYEXPERIMENT_MLFLOW_EXPERIMENT";
/// Replaces the reconstructed invocation command entirely
pub const ENV_RUN_COMMAND: &str = "EASY_EXPERIMENT_RUN_COMMAND";
/// Prepended to the reconstructed invocation command
pub const ENV_RUN_COMMAND_PREFIX: &str = "EASY_EXPERIMENT_RUN_COMMAND_PREFIX";
/// Replaces the executable in the reconstructed invocation command
pub const ENV_EXECUTABLE: &str = "EASY_EXPERIMENT_EXECUTABLE";
/// Explicit config file path
pub const ENV_CONFIG: &str = "EASY_EXPERIMENT_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    MissingFile(PathBuf),
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Cannot determine working directory: {0}")]
    WorkingDir(#[source] std::io::Error),
}

/// Remote tracking settings
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingConfig {
    /// Tracking requested at all
    pub enabled: bool,
    /// Tracking server URI; tracking is unavailable without one
    pub uri: Option<String>,
    /// Experiment name runs are filed under
    pub experiment: Option<String>,
    /// Caller tags, applied over the built-in run tags
    pub tags: BTreeMap<String, String>,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            uri: None,
            experiment: None,
            tags: BTreeMap::new(),
        }
    }
}

impl TrackingConfig {
    /// Tracking explicitly switched off
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

/// Inputs for reconstructing the invocation command
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunCommandConfig {
    /// Full command text used verbatim
    pub command: Option<String>,
    /// Text prepended to the reconstructed command
    pub prefix: Option<String>,
    /// Executable substituted for argv[0]
    pub executable: Option<String>,
}

/// Application configuration, resolved once and never re-read
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Directory snapshot folders are created under
    pub parent_dir: PathBuf,
    /// Working tree git commands run in
    pub repo_dir: PathBuf,
    /// Branch auto-commit moves to the newest experiment commit
    pub experiments_branch: String,
    pub tracking: TrackingConfig,
    pub run_command: RunCommandConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            parent_dir: PathBuf::from(DEFAULT_PARENT_DIR),
            repo_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            experiments_branch: DEFAULT_EXPERIMENTS_BRANCH.to_string(),
            tracking: TrackingConfig::default(),
            run_command: RunCommandConfig::default(),
        }
    }
}

/// Explicitly supplied values; these win over environment and file
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub config_file: Option<PathBuf>,
    pub parent_dir: Option<PathBuf>,
    pub repo_dir: Option<PathBuf>,
    pub experiments_branch: Option<String>,
    pub tracking_enabled: Option<bool>,
    pub tracking_uri: Option<String>,
    pub tracking_experiment: Option<String>,
    /// Merged over tags from the config file
    pub tags: BTreeMap<String, String>,
    pub run_command: Option<String>,
    pub run_command_prefix: Option<String>,
    pub executable: Option<String>,
}

/// TOML representation of the tracking section
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TomlTrackingConfig {
    pub enabled: Option<bool>,
    pub uri: Option<String>,
    pub experiment: Option<String>,
    pub tags: Option<BTreeMap<String, String>>,
}

/// TOML representation of the config file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TomlConfig {
    pub parent_dir: Option<PathBuf>,
    pub experiments_branch: Option<String>,
    pub tracking: Option<TomlTrackingConfig>,
}

impl Config {
    /// Resolve configuration from overrides, the process environment and config files
    pub fn load(overrides: ConfigOverrides) -> Result<Self, ConfigError> {
        Self::resolve(overrides, |key| std::env::var(key).ok())
    }

    /// Resolve configuration with an explicit environment lookup
    ///
    /// Precedence: overrides, then `env`, then the config file, then defaults.
    /// Empty environment values count as unset.
    pub fn resolve<F>(overrides: ConfigOverrides, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let repo_dir = match overrides.repo_dir {
            Some(dir) => dir,
            None => std::env::current_dir().map_err(ConfigError::WorkingDir)?,
        };

        let file = Self::locate_file(overrides.config_file.as_deref(), &env, &repo_dir)?
            .map(|path| Self::read_file(&path))
            .transpose()?
            .unwrap_or_default();
        let file_tracking = file.tracking.unwrap_or_default();

        let mut tags = file_tracking.tags.unwrap_or_default();
        tags.extend(overrides.tags);

        let tracking = TrackingConfig {
            enabled: overrides
                .tracking_enabled
                .or(file_tracking.enabled)
                .unwrap_or(true),
            uri: overrides
                .tracking_uri
                .or_else(|| env(ENV_TRACKING_URI))
                .or(file_tracking.uri),
            experiment: overrides
                .tracking_experiment
                .or_else(|| env(ENV_TRACKING_EXPERIMENT))
                .or_else(|| env(ENV_TRACKING_EXPERIMENT_LEGACY))
                .or(file_tracking.experiment),
            tags,
        };

        let run_command = RunCommandConfig {
            command: overrides.run_command.or_else(|| env(ENV_RUN_COMMAND)),
            prefix: overrides
                .run_command_prefix
                .or_else(|| env(ENV_RUN_COMMAND_PREFIX)),
            executable: overrides.executable.or_else(|| env(ENV_EXECUTABLE)),
        };

        Ok(Self {
            parent_dir: overrides
                .parent_dir
                .or(file.parent_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PARENT_DIR)),
            repo_dir,
            experiments_branch: overrides
                .experiments_branch
                .or(file.experiments_branch)
                .unwrap_or_else(|| DEFAULT_EXPERIMENTS_BRANCH.to_string()),
            tracking,
            run_command,
        })
    }

    /// Pick the config file: explicit path, env path, project file, user file
    fn locate_file(
        explicit: Option<&Path>,
        env: &dyn Fn(&str) -> Option<String>,
        repo_dir: &Path,
    ) -> Result<Option<PathBuf>, ConfigError> {
        if let Some(path) = explicit
            .map(Path::to_path_buf)
            .or_else(|| env(ENV_CONFIG).map(PathBuf::from))
        {
            if !path.exists() {
                return Err(ConfigError::MissingFile(path));
            }
            return Ok(Some(path));
        }

        let project = repo_dir.join(PROJECT_CONFIG_FILE);
        if project.exists() {
            return Ok(Some(project));
        }

        let user = config_path();
        if user.exists() {
            return Ok(Some(user));
        }

        Ok(None)
    }

    fn read_file(path: &Path) -> Result<TomlConfig, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let parsed = toml::from_str::<TomlConfig>(&contents).map_err(|source| {
            ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }
        })?;
        tracing::debug!(path = %path.display(), "Loaded config file");
        Ok(parsed)
    }

    pub fn with_repo_dir(mut self, dir: PathBuf) -> Self {
        self.repo_dir = dir;
        self
    }

    pub fn with_parent_dir(mut self, dir: PathBuf) -> Self {
        self.parent_dir = dir;
        self
    }

    pub fn with_tracking(mut self, tracking: TrackingConfig) -> Self {
        self.tracking = tracking;
        self
    }
}

/// Write the bundled example config to `path`, creating parent directories
///
/// Refuses to overwrite an existing file.
pub fn write_example_config(path: &Path) -> std::io::Result<()> {
    if path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("{} already exists", path.display()),
        ));
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, EXAMPLE_CONFIG)
}
