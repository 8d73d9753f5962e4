// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! CLI command definitions and handlers
//!
//! Defines the command-line interface for trainflow.

pub mod graph;
pub mod publish;
pub mod register;
pub mod run;
pub mod train;
pub mod validate;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use crate::backend::{LocalWorkspace, RunContext, Workspace};
use crate::config::{ExecutionMode, Settings};
use crate::errors::{TrainflowError, TrainflowResult};
use crate::steps::{RegisterArgs, TrainArgs};

/// ML training pipeline orchestrator
///
/// Build, validate and publish training pipelines; register trained models
/// once per build.
#[derive(Parser, Debug)]
#[clap(
    name = "trainflow",
    version,
    about = "ML training pipeline orchestrator with build-scoped model registration",
    long_about = None,
    after_help = "Examples:\n\
        trainflow validate                        Validate pipeline.yaml\n\
        trainflow graph --format mermaid          Show the step graph\n\
        trainflow publish --version 42            Publish the pipeline\n\
        trainflow run --param build_id=42         Submit the pipeline locally\n\
        trainflow register --run_id <ID>          Register a trained model\n\n\
        See 'trainflow <command> --help' for more information on a specific command."
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// Change to directory before executing
    #[clap(short = 'C', long, global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,

    /// Where this process runs
    #[clap(
        long,
        global = true,
        value_enum,
        env = "TRAINFLOW_MODE",
        default_value_t = ExecutionMode::Local
    )]
    pub mode: ExecutionMode,

    /// Directory of the local workspace store
    #[clap(long, global = true, env = "TRAINFLOW_WORKSPACE_DIR", value_name = "DIR")]
    pub workspace_dir: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate pipeline definition
    Validate {
        /// Pipeline file to validate
        #[clap(default_value = "pipeline.yaml")]
        pipeline: PathBuf,
    },

    /// Show pipeline as a graph
    Graph {
        /// Pipeline file
        #[clap(default_value = "pipeline.yaml")]
        pipeline: PathBuf,

        /// Output format
        #[clap(short, long, default_value = "text", value_name = "text|dot|mermaid")]
        format: GraphFormat,
    },

    /// Validate and publish the pipeline
    Publish {
        /// Pipeline file
        #[clap(default_value = "pipeline.yaml")]
        pipeline: PathBuf,

        /// Published name (defaults to the pipeline's name)
        #[clap(short, long)]
        name: Option<String>,

        /// Published version
        #[clap(long = "version", env = "BUILD_BUILDID", value_name = "VERSION")]
        pipeline_version: Option<String>,

        /// Published description
        #[clap(short, long)]
        description: Option<String>,

        /// Print the published handle as JSON
        #[clap(long)]
        json: bool,
    },

    /// Submit the pipeline to the local workspace
    Run {
        /// Pipeline file
        #[clap(default_value = "pipeline.yaml")]
        pipeline: PathBuf,

        /// Pipeline parameter value (repeatable)
        #[clap(short, long = "param", value_name = "NAME=VALUE", value_parser = parse_key_val)]
        params: Vec<(String, String)>,

        /// Trainer program for train steps
        #[clap(long, value_name = "PROGRAM")]
        trainer: Option<PathBuf>,

        /// Dry run (show what would be done)
        #[clap(long)]
        dry_run: bool,
    },

    /// Train a model (train step entry point)
    Train(TrainArgs),

    /// Register a trained model (register step entry point)
    Register(RegisterArgs),
}

/// Graph output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphFormat {
    Text,
    Dot,
    Mermaid,
}

impl std::str::FromStr for GraphFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "dot" => Ok(Self::Dot),
            "mermaid" => Ok(Self::Mermaid),
            _ => Err(format!("Unknown graph format: {}", s)),
        }
    }
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected NAME=VALUE, got '{}'", s)),
    }
}

/// Dispatch a parsed command line
pub async fn dispatch(cli: Cli) -> TrainflowResult<()> {
    if let Some(ref dir) = cli.directory {
        std::env::set_current_dir(dir).map_err(|e| {
            TrainflowError::configuration(format!(
                "Failed to change to directory '{}': {}",
                dir.display(),
                e
            ))
        })?;
    }

    let verbose = cli.verbose;
    let settings = || Settings::from_env(cli.mode, cli.workspace_dir.clone());

    match cli.command {
        Commands::Validate { pipeline } => validate::run(pipeline, verbose).await,
        Commands::Graph { pipeline, format } => graph::run(pipeline, format, verbose).await,
        Commands::Publish {
            pipeline,
            name,
            pipeline_version,
            description,
            json,
        } => publish::run(&settings(), pipeline, name, pipeline_version, description, json).await,
        Commands::Run {
            pipeline,
            params,
            trainer,
            dry_run,
        } => run::run(&settings(), pipeline, params, trainer, dry_run, verbose).await,
        Commands::Train(args) => train::run(&settings(), args).await,
        Commands::Register(args) => register::run(&settings(), args).await,
    }
}

/// Open the workspace store named by the settings
pub(crate) async fn open_workspace(settings: &Settings) -> TrainflowResult<LocalWorkspace> {
    tracing::debug!(
        workspace = %settings.workspace_name,
        mode = %settings.mode,
        dir = %settings.workspace_dir.display(),
        "Opening workspace"
    );
    LocalWorkspace::open(&settings.workspace_dir, settings.workspace_name.clone()).await
}

/// The run this process works in
///
/// Remote: the run the backend scheduled, named by `TRAINFLOW_RUN_ID`.
/// Local: a fresh top-level run in the configured experiment.
pub(crate) async fn current_run(
    workspace: &dyn Workspace,
    settings: &Settings,
) -> TrainflowResult<Arc<dyn RunContext>> {
    match settings.mode {
        ExecutionMode::Local => workspace.start_run(&settings.experiment_name, None).await,
        ExecutionMode::Remote => {
            let run_id = settings.current_run_id.as_deref().ok_or_else(|| {
                TrainflowError::configuration_with_help(
                    "Remote mode needs the id of the current run",
                    "Set TRAINFLOW_RUN_ID or use --mode local",
                )
            })?;
            workspace.get_run(run_id).await?.ok_or_else(|| {
                TrainflowError::backend(
                    "get_run",
                    format!("run '{}' not found in workspace '{}'", run_id, workspace.name()),
                )
            })
        }
    }
}

/// Close a command's run according to the command's result
pub(crate) async fn finish_run<T>(
    ctx: &dyn RunContext,
    result: TrainflowResult<T>,
) -> TrainflowResult<T> {
    match result {
        Ok(value) => {
            ctx.complete().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(close) = ctx.fail(&e.to_string()).await {
                tracing::warn!(run_id = ctx.id(), error = %close, "Failed to mark run as failed");
            }
            Err(e)
        }
    }
}
