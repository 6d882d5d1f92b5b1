mod settings;

pub use settings::{
    write_example_config, Config, ConfigError, ConfigOverrides, RunCommandConfig, TomlConfig,
    TomlTrackingConfig, TrackingConfig, ENV_CONFIG, ENV_EXECUTABLE, ENV_RUN_COMMAND,
    ENV_RUN_COMMAND_PREFIX, ENV_TRACKING_EXPERIMENT, ENV_TRACKING_EXPERIMENT_LEGACY,
    ENV_TRACKING_URI, EXAMPLE_CONFIG,
};
