// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! trainflow - ML training pipeline orchestrator
//!
//! Build, validate and publish training pipelines and register trained
//! models at most once per build.

use clap::Parser;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use trainflow::cli::{dispatch, Cli};
use trainflow::utils::should_use_colors;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trainflow=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    if !should_use_colors() {
        colored::control::set_override(false);
    }

    let cli = Cli::parse();

    match dispatch(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = e.exit_code();
            let suggestion = e.suggestion();

            eprintln!("{:?}", miette::Report::new(e));
            if let Some(suggestion) = suggestion {
                eprintln!("{}", suggestion);
            }

            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}
