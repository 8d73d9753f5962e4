// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! `register` entry point

use async_trait::async_trait;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{parse_step_args, StepOutput, StepRunner};
use crate::backend::{RunContext, Workspace};
use crate::config::{ExecutionMode, Settings, DEFAULT_MODEL_NAME};
use crate::errors::{TrainflowError, TrainflowResult};
use crate::registration::{RegistrationGuard, RegistrationOutcome, RunIdentity};

pub const ENTRY_POINT: &str = "register";

/// Arguments of the register step
#[derive(Parser, Debug, Clone, PartialEq)]
#[clap(about = "Register a trained model once per build")]
pub struct RegisterArgs {
    /// The build ID of the build triggering this pipeline run
    #[clap(long = "build_id")]
    pub build_id: Option<String>,

    /// Training run ID
    #[clap(long = "run_id")]
    pub run_id: Option<String>,

    /// Name of the model artifact
    #[clap(long = "model_name", default_value = DEFAULT_MODEL_NAME)]
    pub model_name: String,
}

/// Runs the `register` entry point
pub struct RegisterStep {
    guard: RegistrationGuard,
    mode: ExecutionMode,
    fallback_build_id: Option<String>,
}

impl RegisterStep {
    pub fn new(workspace: Arc<dyn Workspace>, settings: &Settings) -> Self {
        Self::with_guard(RegistrationGuard::new(workspace, settings.registration()), settings)
    }

    /// Use a guard that shares its lock table with other steps
    pub fn with_guard(guard: RegistrationGuard, settings: &Settings) -> Self {
        Self {
            guard,
            mode: settings.mode,
            fallback_build_id: match settings.mode {
                ExecutionMode::Local => settings.build_id.clone(),
                ExecutionMode::Remote => None,
            },
        }
    }

    /// Work out which run produced the model and which build asked for it
    pub fn identity(&self, ctx: &dyn RunContext, args: &RegisterArgs) -> TrainflowResult<RunIdentity> {
        let parent_id = ctx.parent().map(|p| p.id().to_string());

        let run_id = match (args.run_id.clone(), self.mode) {
            (Some(run_id), _) => run_id,
            (None, ExecutionMode::Remote) => parent_id.clone().ok_or_else(|| {
                TrainflowError::backend(
                    "resolve_run",
                    format!("run '{}' has no parent pipeline run", ctx.id()),
                )
            })?,
            (None, ExecutionMode::Local) => {
                return Err(TrainflowError::configuration_with_help(
                    "No training run id provided",
                    "Pass --run_id with the id of the run that trained the model",
                ))
            }
        };

        let build_id = args.build_id.clone().or_else(|| self.fallback_build_id.clone());

        Ok(RunIdentity::new(run_id)
            .with_build_id(build_id)
            .with_parent(parent_id))
    }

    /// Register the model produced by the resolved training run
    pub async fn register(
        &self,
        ctx: &dyn RunContext,
        args: &RegisterArgs,
    ) -> TrainflowResult<RegistrationOutcome> {
        let identity = self.identity(ctx, args)?;
        let location = PathBuf::from("./outputs").join(&args.model_name);

        self.guard
            .register_artifact(ctx, &identity, &args.model_name, &location)
            .await
    }
}

#[async_trait]
impl StepRunner for RegisterStep {
    fn entry_point(&self) -> &str {
        ENTRY_POINT
    }

    async fn run(
        &self,
        ctx: Arc<dyn RunContext>,
        args: &[String],
        _working_dir: &Path,
    ) -> TrainflowResult<StepOutput> {
        let args: RegisterArgs = parse_step_args(ENTRY_POINT, args)?;

        let summary = match self.register(ctx.as_ref(), &args).await? {
            RegistrationOutcome::Registered(record) => format!(
                "registered {} version {}",
                record.artifact_name, record.version
            ),
            RegistrationOutcome::Skipped { run_id } => {
                format!("no run '{}' found, registration skipped", run_id)
            }
        };

        Ok(StepOutput {
            artifacts: Vec::new(),
            summary,
        })
    }
}
