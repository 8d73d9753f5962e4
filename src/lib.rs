// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! # trainflow - ML Training Pipeline Orchestrator
//!
//! `trainflow` assembles training steps into a validated DAG, publishes it
//! as a versioned pipeline, and registers the trained model at most once
//! per triggering build.
//!
//! ## Features
//!
//! - **Pipeline construction** - Steps, late-bound pipeline parameters and a
//!   dependency graph checked for cycles and dangling references
//! - **Build-scoped registration** - A rerun of the same build never creates
//!   a second model version
//! - **Traceability** - Build id and build URI are tagged on the model, the
//!   step run and the pipeline run
//! - **Local workspace** - Runs, datasets and registrations in a JSON store
//!
//! ## Quick Start
//!
//! ```bash
//! # Check the pipeline definition
//! trainflow validate pipeline.yaml
//!
//! # Publish it for the current build
//! BUILD_BUILDID=42 trainflow publish pipeline.yaml
//!
//! # Submit it to the local workspace
//! trainflow run pipeline.yaml --param build_id=42 --trainer ./train.sh
//! ```

pub mod backend;
pub mod cli;
pub mod config;
pub mod errors;
pub mod pipeline;
pub mod registration;
pub mod steps;
pub mod utils;

// Re-export commonly used types
pub use backend::{LocalWorkspace, RunContext, Workspace};
pub use config::{ExecutionMode, Settings};
pub use errors::{GraphError, RegistrationError, TrainflowError, TrainflowResult};
pub use pipeline::{Pipeline, PipelineExecutor, PipelinePublisher, PipelineValidator, StepDefinition};
pub use registration::{RegistrationGuard, RegistrationOutcome, RunIdentity};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
