// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Validate command - check pipeline definition

use colored::Colorize;
use std::path::PathBuf;

use crate::errors::{TrainflowError, TrainflowResult};
use crate::pipeline::{Pipeline, PipelineValidator};
use crate::utils::{print_error, print_success, print_warning};

/// Run the validate command
pub async fn run(pipeline_path: PathBuf, verbose: bool) -> TrainflowResult<()> {
    println!("{}", "Validating pipeline...".bold());
    println!();

    let pipeline = match Pipeline::from_file(&pipeline_path) {
        Ok(p) => p,
        Err(e) => {
            print_error("Failed to load pipeline");
            eprintln!();
            return Err(e);
        }
    };

    print_success("Pipeline file is valid YAML");

    let report = PipelineValidator::report(&pipeline);

    if !report.errors.is_empty() {
        println!();
        println!("{}:", "Errors".red().bold());
        for error in &report.errors {
            print_error(error);
        }
    }

    if !report.warnings.is_empty() {
        println!();
        println!("{}:", "Warnings".yellow().bold());
        for warning in &report.warnings {
            print_warning(warning);
        }
    }

    if verbose {
        println!();
        println!("{}:", "Pipeline summary".bold());
        println!("  Name: {}", pipeline.name);
        if let Some(ref version) = pipeline.version {
            println!("  Version: {}", version);
        }
        println!("  Steps: {}", pipeline.steps.len());
        for step in &pipeline.steps {
            let deps = if step.depends_on.is_empty() {
                String::new()
            } else {
                format!(" [depends: {}]", step.depends_on.join(", "))
            };
            println!("    - {} ({}){}", step.name, step.entry_point, deps.dimmed());
        }
        let params: Vec<String> = pipeline
            .pipeline_parameters()
            .map(|(step, param)| format!("{} = {} ({})", param.name, param.default, step.name))
            .collect();
        if !params.is_empty() {
            println!("  Pipeline parameters:");
            for param in params {
                println!("    - {}", param);
            }
        }
        if let Ok(fingerprint) = pipeline.fingerprint() {
            println!("  Fingerprint: {}", fingerprint.dimmed());
        }
    }

    println!();

    if !report.is_valid() {
        // Prefer the typed graph error so the exit code says what broke
        return Err(PipelineValidator::validate(&pipeline)
            .err()
            .unwrap_or_else(|| TrainflowError::configuration("Pipeline validation failed")));
    }

    if report.has_warnings() {
        println!("{}", "Pipeline is valid but has warnings.".yellow().bold());
    } else {
        println!("{}", "Pipeline is valid!".green().bold());
    }
    Ok(())
}
