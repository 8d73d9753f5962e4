// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Error types
//!
//! Errors are split along the lines the orchestration cares about: graph
//! errors are found before anything is submitted, registration errors stop a
//! single registration attempt, backend errors are whatever the execution
//! backend reported, and configuration errors are raised before the backend
//! is touched at all.

mod recovery;

pub use recovery::RecoverySuggestion;

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for trainflow operations
pub type TrainflowResult<T> = Result<T, TrainflowError>;

/// Errors raised while constructing or validating a pipeline graph
#[derive(Error, Debug, Diagnostic, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Pipeline has no steps defined")]
    #[diagnostic(
        code(trainflow::graph::empty),
        help("Add at least one step to the pipeline definition")
    )]
    Empty,

    #[error("Duplicate step name: '{name}'")]
    #[diagnostic(
        code(trainflow::graph::duplicate_name),
        help("Step names must be unique within a pipeline")
    )]
    DuplicateName { name: String },

    #[error("Step '{step}' depends on unknown step '{dependency}'")]
    #[diagnostic(
        code(trainflow::graph::dangling_dependency),
        help("Check that '{dependency}' is defined in the same pipeline")
    )]
    DanglingDependency { step: String, dependency: String },

    #[error("Circular dependency detected: {}", steps.join(" → "))]
    #[diagnostic(
        code(trainflow::graph::cycle),
        help("Review the depends_on lists of these steps to remove the cycle")
    )]
    Cycle { steps: Vec<String> },

    #[error("Pipeline parameter '{name}' has conflicting defaults ('{first}' vs '{second}')")]
    #[diagnostic(
        code(trainflow::graph::conflicting_parameter),
        help("Every step referencing '{name}' must declare the same default")
    )]
    ConflictingParameter {
        name: String,
        first: String,
        second: String,
    },
}

/// Errors raised by the registration guard
#[derive(Error, Debug, Diagnostic, Clone, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("Model '{artifact}' is already registered for run '{run_id}' (build {build_id})")]
    #[diagnostic(
        code(trainflow::registration::already_registered),
        help("Registration is at most once per build; trigger a new build to register again")
    )]
    AlreadyRegistered {
        artifact: String,
        run_id: String,
        build_id: String,
    },
}

/// Main error type for trainflow
#[derive(Error, Debug, Diagnostic)]
pub enum TrainflowError {
    // ─────────────────────────────────────────────────────────────────────────
    // Orchestration Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Registration(#[from] RegistrationError),

    #[error("Backend call '{operation}' failed: {message}")]
    #[diagnostic(code(trainflow::backend))]
    Backend { operation: String, message: String },

    #[error("Configuration error: {reason}")]
    #[diagnostic(code(trainflow::configuration))]
    Configuration {
        reason: String,
        #[help]
        help: Option<String>,
    },

    #[error("Invalid tag '{key}': {reason}")]
    #[diagnostic(code(trainflow::invalid_tag))]
    InvalidTag { key: String, reason: String },

    #[error("No step runner registered for entry point '{entry_point}'")]
    #[diagnostic(
        code(trainflow::runner_not_found),
        help("Built-in entry points: train, register")
    )]
    RunnerNotFound { entry_point: String },

    // ─────────────────────────────────────────────────────────────────────────
    // Trainer Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Trainer program '{program}' not found")]
    #[diagnostic(
        code(trainflow::tool_not_found),
        help("Install '{program}' or pass --trainer with the full path")
    )]
    ToolNotFound { program: String },

    #[error("Trainer process failed: {message}")]
    #[diagnostic(code(trainflow::process_failed))]
    ProcessFailed {
        message: String,
        #[help]
        help: Option<String>,
    },

    // ─────────────────────────────────────────────────────────────────────────
    // File Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("Pipeline file not found: {path}")]
    #[diagnostic(
        code(trainflow::pipeline_not_found),
        help("Create a pipeline.yaml or pass the path explicitly")
    )]
    PipelineNotFound { path: PathBuf },

    #[error("Failed to read file '{path}': {error}")]
    #[diagnostic(code(trainflow::file_read_error))]
    FileReadError { path: PathBuf, error: String },

    #[error("Failed to write file '{path}': {error}")]
    #[diagnostic(code(trainflow::file_write_error))]
    FileWriteError { path: PathBuf, error: String },

    // ─────────────────────────────────────────────────────────────────────────
    // IO/System Errors
    // ─────────────────────────────────────────────────────────────────────────
    #[error("IO error: {message}")]
    #[diagnostic(code(trainflow::io_error))]
    Io { message: String },

    #[error("YAML parsing error: {message}")]
    #[diagnostic(code(trainflow::yaml_error))]
    Yaml { message: String },

    #[error("JSON parsing error: {message}")]
    #[diagnostic(code(trainflow::json_error))]
    Json { message: String },
}

impl From<std::io::Error> for TrainflowError {
    fn from(e: std::io::Error) -> Self {
        Self::Io { message: e.to_string() }
    }
}

impl From<serde_yaml::Error> for TrainflowError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Yaml { message: e.to_string() }
    }
}

impl From<serde_json::Error> for TrainflowError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json { message: e.to_string() }
    }
}

impl TrainflowError {
    /// Create a backend error for the named operation
    pub fn backend(operation: &str, message: impl Into<String>) -> Self {
        Self::Backend {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    /// Create a configuration error without a help line
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
            help: None,
        }
    }

    /// Create a configuration error with a help line
    pub fn configuration_with_help(reason: impl Into<String>, help: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
            help: Some(help.into()),
        }
    }

    /// Process exit code for this error
    ///
    /// Each taxonomy entry gets its own code so CI can tell a duplicate
    /// registration apart from a broken backend.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Graph(_) => 2,
            Self::Registration(_) => 3,
            Self::Backend { .. } => 4,
            Self::Configuration { .. } => 5,
            _ => 1,
        }
    }

    /// Recovery suggestion for errors that have an obvious next step
    pub fn suggestion(&self) -> Option<RecoverySuggestion> {
        match self {
            Self::Graph(GraphError::Cycle { steps }) => {
                Some(RecoverySuggestion::fix_circular_dependency(steps))
            }
            Self::Graph(GraphError::DanglingDependency { step, dependency }) => {
                Some(RecoverySuggestion::fix_dangling_dependency(step, dependency))
            }
            Self::Registration(RegistrationError::AlreadyRegistered {
                artifact,
                build_id,
                ..
            }) => Some(RecoverySuggestion::already_registered(artifact, build_id)),
            Self::ToolNotFound { program } => Some(RecoverySuggestion::install_trainer(program)),
            _ => None,
        }
    }
}
