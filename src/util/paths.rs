//! Path utilities for easy-experiment data directories

use std::path::PathBuf;

/// Default directory snapshots are created under, relative to the working directory
pub const DEFAULT_PARENT_DIR: &str = "experiments";

/// Project-local config file name
pub const PROJECT_CONFIG_FILE: &str = "easy-experiment.toml";

/// Get the user data directory (~/.easy-experiment)
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".easy-experiment"))
        .unwrap_or_else(|| PathBuf::from(".easy-experiment"))
}

/// Get the user config file path (~/.easy-experiment/config.toml)
pub fn config_path() -> PathBuf {
    data_dir().join("config.toml")
}
