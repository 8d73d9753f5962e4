// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Register command - register a trained model once per build

use colored::Colorize;
use std::sync::Arc;

use super::{current_run, finish_run, open_workspace};
use crate::backend::Workspace;
use crate::config::{ExecutionMode, Settings};
use crate::errors::{TrainflowError, TrainflowResult};
use crate::registration::RegistrationOutcome;
use crate::steps::{RegisterArgs, RegisterStep};
use crate::utils::{print_success, print_warning};

/// Run the register command
pub async fn run(settings: &Settings, args: RegisterArgs) -> TrainflowResult<()> {
    if settings.mode == ExecutionMode::Local && args.run_id.is_none() {
        return Err(TrainflowError::configuration_with_help(
            "No training run id provided",
            "Pass --run_id with the id of the run that trained the model",
        ));
    }

    let workspace: Arc<dyn Workspace> = Arc::new(open_workspace(settings).await?);
    let ctx = current_run(workspace.as_ref(), settings).await?;

    let step = RegisterStep::new(Arc::clone(&workspace), settings);
    let result = step.register(ctx.as_ref(), &args).await;
    let outcome = finish_run(ctx.as_ref(), result).await?;

    match outcome {
        RegistrationOutcome::Registered(record) => {
            print_success(&format!(
                "Registered {} version {}",
                record.artifact_name.bold(),
                record.version
            ));
            println!("    run id: {}", record.run_id);
            for (key, value) in record.tags.to_map() {
                println!("    {}: {}", key.dimmed(), value);
            }
        }
        RegistrationOutcome::Skipped { run_id } => {
            print_warning(&format!(
                "No run '{}' found in workspace '{}', skipping model registration",
                run_id,
                workspace.name()
            ));
        }
    }

    Ok(())
}
