use std::collections::BTreeMap;
use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::{Command, ExitCode};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use easy_experiment::config::{write_example_config, RunCommandConfig};
use easy_experiment::util::config_path;
use easy_experiment::{
    Config, ConfigOverrides, ExperimentSession, GitRepo, MetricSet, ParameterSet, RunCommand,
    SessionOptions, SessionVariant,
};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

/// Set in the environment of commands started by `run`
const ENV_CHILD_EXPERIMENT_ID: &str = "EASY_EXPERIMENT_ID";
const ENV_CHILD_EXPERIMENT_DIR: &str = "EASY_EXPERIMENT_DIR";

#[derive(Parser)]
#[command(name = "easy-experiment", version, about = "Record experiment provenance")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: ./easy-experiment.toml, then ~/.easy-experiment/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log progress to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Never contact a tracking server
    #[arg(long, global = true)]
    no_tracking: bool,

    /// Tracking server URI (overrides MLFLOW_TRACKING_URI)
    #[arg(long, global = true)]
    tracking_uri: Option<String>,

    /// Tracking experiment name
    #[arg(long, global = true)]
    tracking_experiment: Option<String>,

    /// Extra run tag, KEY=VALUE (repeatable)
    #[arg(long = "tag", global = true, value_parser = parse_key_value)]
    tags: Vec<(String, String)>,
}

#[derive(Subcommand)]
enum Commands {
    /// Record an experiment and print its id
    Record {
        /// Source files to snapshot
        files: Vec<PathBuf>,

        #[command(flatten)]
        session: SessionArgs,
    },

    /// Record an experiment, then run a command inside it
    Run {
        /// Source file to snapshot (repeatable)
        #[arg(long = "file")]
        files: Vec<PathBuf>,

        #[command(flatten)]
        session: SessionArgs,

        /// Command to run, after `--`
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// Print the current git revision
    Revision,

    /// Write an example config file
    InitConfig {
        /// Destination (default: ~/.easy-experiment/config.toml)
        path: Option<PathBuf>,
    },
}

#[derive(Args)]
struct SessionArgs {
    /// Session variant: local, local-autocommit, local-tracking, cloud-only
    #[arg(long, default_value_t = SessionVariant::Local)]
    variant: SessionVariant,

    /// Directory snapshot folders are created under
    #[arg(long)]
    parent_dir: Option<PathBuf>,

    /// Experiment id (default: random UUID)
    #[arg(long)]
    id: Option<String>,

    /// Auto-commit message (default: the experiment id)
    #[arg(short, long)]
    message: Option<String>,

    /// Parameter, KEY=VALUE (repeatable); JSON values are parsed, anything else is a string
    #[arg(long = "param", value_parser = parse_key_value)]
    params: Vec<(String, String)>,

    /// Also record a diff against HEAD for each source file
    #[arg(long)]
    diffs: bool,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

fn parameter_set(pairs: &[(String, String)]) -> ParameterSet {
    pairs
        .iter()
        .map(|(key, raw)| {
            let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()));
            (key.clone(), value)
        })
        .collect()
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "info" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .init();
}

impl Cli {
    fn overrides(&self, session: Option<&SessionArgs>) -> ConfigOverrides {
        ConfigOverrides {
            config_file: self.config.clone(),
            parent_dir: session.and_then(|s| s.parent_dir.clone()),
            tracking_enabled: self.no_tracking.then_some(false),
            tracking_uri: self.tracking_uri.clone(),
            tracking_experiment: self.tracking_experiment.clone(),
            tags: self.tags.iter().cloned().collect::<BTreeMap<_, _>>(),
            ..ConfigOverrides::default()
        }
    }
}

fn open_session(
    config: Config,
    args: &SessionArgs,
    run_command: Option<RunCommand>,
) -> Result<ExperimentSession> {
    let mut options = SessionOptions::new(args.variant).with_diffs(args.diffs);
    if let Some(id) = &args.id {
        options = options.with_experiment_id(id.as_str());
    }
    if let Some(command) = run_command {
        options = options.with_run_command(command);
    }

    let mut session =
        ExperimentSession::new(config, options).context("Failed to create experiment session")?;
    if !args.params.is_empty() {
        session.write_params(&parameter_set(&args.params))?;
    }
    Ok(session)
}

fn cmd_record(config: Config, files: &[PathBuf], args: &SessionArgs) -> Result<()> {
    let mut session = open_session(config, args, None)?;
    let id = session
        .start(files, args.message.as_deref())
        .context("Failed to start experiment")?;
    session.end().context("Failed to close tracking run")?;
    println!("{}", id);
    Ok(())
}

fn cmd_run(
    config: Config,
    files: &[PathBuf],
    args: &SessionArgs,
    command: &[String],
) -> Result<ExitCode> {
    let Some((program, program_args)) = command.split_first() else {
        bail!("No command given");
    };

    let recorded = RunCommandConfig {
        command: None,
        executable: None,
        ..config.run_command.clone()
    };
    let run_command = RunCommand::from_args(&recorded, command.iter().map(OsString::from));

    let mut session = open_session(config, args, Some(run_command))?;
    let id = session
        .start(files, args.message.as_deref())
        .context("Failed to start experiment")?;

    let mut child = Command::new(program);
    child.args(program_args).env(ENV_CHILD_EXPERIMENT_ID, id.as_str());
    if let Some(dir) = session.save_dir() {
        child.env(ENV_CHILD_EXPERIMENT_DIR, dir);
    }

    tracing::info!(experiment_id = %id, program = %program, "Running command");
    let status = match child.status() {
        Ok(status) => status,
        Err(e) => {
            session.end().context("Failed to close tracking run")?;
            return Err(e).with_context(|| format!("Failed to run {}", program));
        }
    };

    // Killed by a signal: no exit code
    let code = status.code().unwrap_or(-1);
    let mut metrics = MetricSet::new();
    metrics.insert("exit_code".to_string(), f64::from(code));
    if let Err(e) = session.log_metrics(&metrics, None) {
        tracing::warn!(error = %e, "Failed to log exit code");
    }
    session.end().context("Failed to close tracking run")?;

    eprintln!("{}", id);
    Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match &cli.command {
        Commands::Record { files, session } => {
            let config = Config::load(cli.overrides(Some(session)))?;
            cmd_record(config, files, session)?;
        }
        Commands::Run {
            files,
            session,
            command,
        } => {
            let config = Config::load(cli.overrides(Some(session)))?;
            return cmd_run(config, files, session, command);
        }
        Commands::Revision => {
            let dir = std::env::current_dir().context("Cannot determine working directory")?;
            println!("{}", GitRepo::new(dir).revision());
        }
        Commands::InitConfig { path } => {
            let path = path.clone().unwrap_or_else(config_path);
            write_example_config(&path)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("{}", path.display());
        }
    }
    Ok(ExitCode::SUCCESS)
}
