// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Pipeline definitions and types
//!
//! Step definitions, the dependency graph built from them, validation,
//! publishing and local submission.

mod dag;
mod definition;
mod executor;
mod publish;
mod validation;

pub use dag::DagBuilder;
pub use definition::*;
pub use executor::{PipelineExecutor, StepOutcome, StepState, SubmissionOptions, SubmissionResult};
pub use publish::PipelinePublisher;
pub use validation::{ExecutionPlan, PipelineValidator, ValidationResult};
