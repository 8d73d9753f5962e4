// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Run command - submit the pipeline to the local workspace

use colored::Colorize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use super::open_workspace;
use crate::backend::Workspace;
use crate::config::{ExecutionMode, Settings};
use crate::errors::{TrainflowError, TrainflowResult};
use crate::pipeline::{Pipeline, PipelineExecutor, PipelineValidator, SubmissionOptions};
use crate::steps::{ProcessTrainer, RegisterStep, TrainStep};
use crate::utils::print_warning;

/// Run the pipeline
pub async fn run(
    settings: &Settings,
    pipeline_path: PathBuf,
    params: Vec<(String, String)>,
    trainer: Option<PathBuf>,
    dry_run: bool,
    verbose: bool,
) -> TrainflowResult<()> {
    let pipeline = Pipeline::from_file(&pipeline_path)?;

    let report = PipelineValidator::report(&pipeline);
    if report.has_warnings() && verbose {
        eprintln!("{}", "Pipeline warnings:".yellow().bold());
        for warning in &report.warnings {
            print_warning(warning);
        }
        eprintln!();
    }

    let working_dir = std::env::current_dir()?;
    let workspace: Arc<dyn Workspace> = Arc::new(open_workspace(settings).await?);

    // Steps run inside the submission's runs, not in this process's context
    let step_settings = Settings {
        mode: ExecutionMode::Remote,
        ..settings.clone()
    };

    let mut train = TrainStep::new(Arc::clone(&workspace), &step_settings);
    if let Some(ref program) = trainer {
        train = train.with_trainer(Arc::new(ProcessTrainer::new(program)?));
    }

    let executor = PipelineExecutor::new(Arc::clone(&workspace), settings.experiment_name.clone())
        .with_runner(Box::new(train))
        .with_runner(Box::new(RegisterStep::new(Arc::clone(&workspace), &step_settings)));

    let options = SubmissionOptions {
        parameters: params.into_iter().collect::<BTreeMap<_, _>>(),
        experiment: None,
        dry_run,
        verbose,
    };

    let result = executor.execute(&pipeline, &working_dir, &options).await?;

    if let Some(ref run_id) = result.parent_run_id {
        println!("  Pipeline run: {}", run_id.cyan());
    }

    if result.success {
        return Ok(());
    }

    Err(result
        .into_first_error()
        .unwrap_or_else(|| TrainflowError::configuration("Pipeline run failed")))
}
