// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Train command - run the train entry point in this process

use colored::Colorize;
use std::sync::Arc;

use super::{current_run, finish_run, open_workspace};
use crate::backend::Workspace;
use crate::config::Settings;
use crate::errors::TrainflowResult;
use crate::steps::{TrainArgs, TrainStep};
use crate::utils::print_success;

/// Run the train command
pub async fn run(settings: &Settings, args: TrainArgs) -> TrainflowResult<()> {
    args.check()?;

    let working_dir = std::env::current_dir()?;
    let workspace: Arc<dyn Workspace> = Arc::new(open_workspace(settings).await?);
    let ctx = current_run(workspace.as_ref(), settings).await?;

    let step = TrainStep::new(Arc::clone(&workspace), settings);
    let result = step.train(Arc::clone(&ctx), &args, &working_dir).await;
    let report = finish_run(ctx.as_ref(), result).await?;

    print_success(&format!(
        "Trained on {} version {} (alpha {})",
        report.dataset.name, report.dataset.version, report.alpha
    ));
    for (key, value) in &report.metrics {
        println!("    {}: {}", key, value);
    }
    println!("    model:  {}", report.model_path.display());
    println!("    run id: {}", ctx.id().cyan());

    Ok(())
}
