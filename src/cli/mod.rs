//! The `discovery-schema` command-line entrypoint: one file per subcommand and a `mod.rs` that
//! assembles the `clap::Parser` and dispatches.

mod generate;
mod service;
mod validate;

use crate::conf::config::Config;
use crate::conf::Configuration;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;

pub use validate::TargetKind;

/// discovery-schema: a task-schema registry and container-execution dispatcher.
#[derive(Debug, Parser)]
#[command(name = "discovery-schema")]
#[command(bin_name = "discovery-schema")]
#[command(version)]
struct Args {
    /// Path to a TOML configuration file, overriding the default search locations.
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Write the task/workflow JSON-schema-of-schemas to a directory.
    Generate {
        #[arg(short = 'O', long)]
        output: PathBuf,
    },
    /// Validate one or more task/workflow schema files without registering them.
    Validate {
        /// A single file to validate.
        #[arg(short = 'f', long, conflicts_with = "dir")]
        file: Option<PathBuf>,
        /// Validate every recognized schema file in this directory.
        #[arg(long = "dir", conflicts_with = "file")]
        dir: Option<PathBuf>,
        #[arg(short = 't', long, default_value = "auto")]
        kind: TargetKind,
    },
    /// Start the request plane (schema registry, run submission).
    Serve,
    /// Start the worker plane (drains the dispatch queue, executes runs).
    Worker,
}

/// Parses `std::env::args()`, dispatches to the matched subcommand, and returns the process's
/// exit code. `generate`/`validate` run synchronously to completion; `serve`/`worker` load
/// configuration, initialize logging, and block until shutdown.
pub async fn init() -> ExitCode {
    let args = Args::parse();

    match args.command {
        Commands::Generate { output } => match generate::generate(&output) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("{} {e:?}", "error:".red().bold());
                ExitCode::FAILURE
            }
        },
        Commands::Validate { file, dir, kind } => run_validate(file, dir, kind),
        Commands::Serve => run_service(args.config, service::serve).await,
        Commands::Worker => run_service(args.config, service::worker).await,
    }
}

fn run_validate(file: Option<PathBuf>, dir: Option<PathBuf>, kind: TargetKind) -> ExitCode {
    let errors = if let Some(dir) = dir {
        validate::validate_dir(&dir, kind)
    } else if let Some(file) = file {
        validate::validate_file(&file, kind).err().into_iter().collect()
    } else {
        eprintln!("{} one of -f/--file or --dir is required", "error:".red().bold());
        return ExitCode::FAILURE;
    };

    if errors.is_empty() {
        ExitCode::SUCCESS
    } else {
        for e in &errors {
            eprintln!("{} {e}", "error:".red().bold());
        }
        ExitCode::FAILURE
    }
}

async fn run_service<F, Fut>(config_path: Option<PathBuf>, start: F) -> ExitCode
where
    F: FnOnce(Config) -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<()>>,
{
    let config = match Configuration::<Config>::load(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} could not load configuration: {e:?}", "error:".red().bold());
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = crate::logging::init(&config.general.log_level, config.development.pretty_logging) {
        eprintln!("{} could not init logging: {e:?}", "error:".red().bold());
        return ExitCode::FAILURE;
    }

    match start(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e:?}", "error:".red().bold());
            ExitCode::FAILURE
        }
    }
}
