//! Utility modules

pub mod paths;
pub mod run_command;

pub use paths::{config_path, data_dir, DEFAULT_PARENT_DIR, PROJECT_CONFIG_FILE};
pub use run_command::{shell_join, shell_quote, RunCommand, MAX_PARAM_VALUE_LEN};
