// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Step entry points
//!
//! A step's `entry_point` selects a [`StepRunner`]. The same argument
//! structs back both the `trainflow train`/`trainflow register` commands
//! and the arguments rendered from a pipeline step's parameters.

mod register;
mod train;
mod trainer;

pub use register::{RegisterArgs, RegisterStep};
pub use train::{TrainArgs, TrainReport, TrainStep};
pub use trainer::{ModelTrainer, ProcessTrainer, TrainingOutcome, TrainingRequest};

use async_trait::async_trait;
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::backend::RunContext;
use crate::errors::{TrainflowError, TrainflowResult};

/// What a step produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutput {
    /// Files written by the step
    pub artifacts: Vec<PathBuf>,
    /// One-line human readable summary
    pub summary: String,
}

/// Runs one entry point inside a step run
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Entry point name this runner handles
    fn entry_point(&self) -> &str;

    /// Execute with rendered `--key value` arguments
    ///
    /// The caller owns the run lifecycle; runners neither complete nor fail
    /// `ctx`.
    async fn run(
        &self,
        ctx: Arc<dyn RunContext>,
        args: &[String],
        working_dir: &Path,
    ) -> TrainflowResult<StepOutput>;
}

/// Parse rendered step arguments into an argument struct
pub(crate) fn parse_step_args<T: Parser>(entry_point: &str, args: &[String]) -> TrainflowResult<T> {
    let argv = std::iter::once(entry_point.to_string()).chain(args.iter().cloned());
    T::try_parse_from(argv).map_err(|e| {
        TrainflowError::configuration_with_help(
            format!("invalid arguments for entry point '{}'", entry_point),
            e.to_string().trim().to_string(),
        )
    })
}
