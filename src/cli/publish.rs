// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Publish command - validate and publish the pipeline

use colored::Colorize;
use std::path::PathBuf;

use super::open_workspace;
use crate::config::Settings;
use crate::errors::{TrainflowError, TrainflowResult};
use crate::pipeline::{Pipeline, PipelinePublisher};
use crate::utils::create_spinner;

/// Run the publish command
pub async fn run(
    settings: &Settings,
    pipeline_path: PathBuf,
    name: Option<String>,
    version: Option<String>,
    description: Option<String>,
    json: bool,
) -> TrainflowResult<()> {
    let pipeline = Pipeline::from_file(&pipeline_path)?;

    let version = version
        .or_else(|| pipeline.version.clone())
        .ok_or_else(|| {
            TrainflowError::configuration_with_help(
                "No pipeline version given",
                "Pass --version, set BUILD_BUILDID or add version to the pipeline file",
            )
        })?;
    let name = name.unwrap_or_else(|| pipeline.name.clone());
    let description = description
        .or_else(|| pipeline.description.clone())
        .unwrap_or_default();

    let workspace = open_workspace(settings).await?;

    let spinner = (!json).then(|| create_spinner(&format!("Publishing {}...", name)));
    let result = PipelinePublisher::publish(&workspace, &pipeline, &name, &description, &version).await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    let handle = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&handle)?);
        return Ok(());
    }

    println!("  {} Published {} {}", "✓".green(), handle.name.bold(), handle.version);
    println!("    id:          {}", handle.id);
    println!("    fingerprint: {}", handle.fingerprint.dimmed());
    println!("    workspace:   {}", settings.workspace_name);

    Ok(())
}
