// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Model trainer
//!
//! Fitting the model is delegated to an external program. The program gets
//! its inputs through environment variables, writes the serialized model to
//! `TRAINFLOW_MODEL_OUT` and prints its metrics as a JSON object on the last
//! line of stdout.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::process::Command;

use crate::backend::Dataset;
use crate::errors::{TrainflowError, TrainflowResult};

/// Inputs for one training run
#[derive(Debug, Clone)]
pub struct TrainingRequest {
    pub dataset: Dataset,
    pub alpha: f64,
    /// Where the trainer must write the model
    pub model_path: PathBuf,
    pub working_dir: PathBuf,
}

/// Output of one training run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingOutcome {
    pub metrics: BTreeMap<String, f64>,
    pub duration: Duration,
}

/// The numeric training collaborator
#[async_trait]
pub trait ModelTrainer: Send + Sync {
    /// Fit a model and write it to `request.model_path`
    async fn train(&self, request: &TrainingRequest) -> TrainflowResult<TrainingOutcome>;

    /// Check if the trainer can run
    async fn check_available(&self) -> TrainflowResult<bool>;
}

/// Trainer backed by an external program
pub struct ProcessTrainer {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessTrainer {
    /// Locate `program` on PATH (or use it as given if it is a path)
    pub fn new(program: &Path) -> TrainflowResult<Self> {
        // the trainer runs in the step's working dir, so pin relative paths now
        let program = if program.is_absolute() {
            program.to_path_buf()
        } else if program.components().count() > 1 {
            std::env::current_dir()?.join(program)
        } else {
            which::which(program).map_err(|_| TrainflowError::ToolNotFound {
                program: program.display().to_string(),
            })?
        };

        Ok(Self {
            program,
            args: Vec::new(),
        })
    }

    /// Extra arguments for the program
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    fn parse_metrics(stdout: &str) -> TrainflowResult<BTreeMap<String, f64>> {
        let line = stdout
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .ok_or_else(|| TrainflowError::ProcessFailed {
                message: "trainer printed no metrics".into(),
                help: Some("Print a JSON object such as {\"mse\": 0.1} as the last line".into()),
            })?;

        serde_json::from_str(line).map_err(|e| TrainflowError::ProcessFailed {
            message: format!("could not parse metrics line '{}': {}", line, e),
            help: Some("Metrics must be a flat JSON object of numbers".into()),
        })
    }
}

#[async_trait]
impl ModelTrainer for ProcessTrainer {
    async fn train(&self, request: &TrainingRequest) -> TrainflowResult<TrainingOutcome> {
        let start = Instant::now();

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .current_dir(&request.working_dir)
            .env("TRAINFLOW_DATASET_ID", &request.dataset.id)
            .env("TRAINFLOW_DATASET_NAME", &request.dataset.name)
            .env("TRAINFLOW_DATASET_VERSION", request.dataset.version.to_string())
            .env("TRAINFLOW_DATASET_PATH", &request.dataset.path)
            .env("TRAINFLOW_ALPHA", request.alpha.to_string())
            .env("TRAINFLOW_MODEL_OUT", &request.model_path);

        tracing::debug!(program = %self.program.display(), "Starting trainer");

        let output = cmd.output().await.map_err(|e| TrainflowError::ProcessFailed {
            message: format!("failed to start '{}': {}", self.program.display(), e),
            help: None,
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            return Err(TrainflowError::ProcessFailed {
                message: format!(
                    "'{}' exited with code {}",
                    self.program.display(),
                    output.status.code().unwrap_or(-1)
                ),
                help: (!stderr.trim().is_empty()).then(|| stderr.trim().to_string()),
            });
        }

        if !request.model_path.exists() {
            return Err(TrainflowError::ProcessFailed {
                message: format!(
                    "trainer did not write a model to {}",
                    request.model_path.display()
                ),
                help: Some("Write the serialized model to $TRAINFLOW_MODEL_OUT".into()),
            });
        }

        Ok(TrainingOutcome {
            metrics: Self::parse_metrics(&stdout)?,
            duration: start.elapsed(),
        })
    }

    async fn check_available(&self) -> TrainflowResult<bool> {
        Ok(self.program.exists())
    }
}
