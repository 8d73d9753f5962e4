// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Pipeline definition structures
//!
//! Defines the schema for pipeline.yaml files and the in-memory step model.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::errors::{TrainflowError, TrainflowResult};

/// Pipeline definition from pipeline.yaml
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pipeline {
    /// Pipeline name
    pub name: String,

    /// Version to publish under (usually the build id)
    #[serde(default)]
    pub version: Option<String>,

    /// Pipeline description
    #[serde(default)]
    pub description: Option<String>,

    /// Steps in declaration order
    pub steps: Vec<StepDefinition>,
}

impl Pipeline {
    /// Assemble a pipeline from step definitions
    ///
    /// This does not validate anything; the same steps always produce an
    /// equal pipeline.
    pub fn build(name: impl Into<String>, steps: Vec<StepDefinition>) -> Self {
        Self {
            name: name.into(),
            version: None,
            description: None,
            steps,
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the version
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Load pipeline from a YAML file
    pub fn from_file(path: &std::path::Path) -> TrainflowResult<Self> {
        if !path.exists() {
            return Err(TrainflowError::PipelineNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| TrainflowError::FileReadError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::from_yaml(&content)
    }

    /// Parse pipeline from YAML string
    pub fn from_yaml(yaml: &str) -> TrainflowResult<Self> {
        serde_yaml::from_str(yaml).map_err(Into::into)
    }

    /// Serialize pipeline to YAML
    pub fn to_yaml(&self) -> TrainflowResult<String> {
        serde_yaml::to_string(self).map_err(Into::into)
    }

    /// Get a step by name
    pub fn get_step(&self, name: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Get all step names
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }

    /// All late-bound parameter references, in declaration order
    pub fn pipeline_parameters(&self) -> impl Iterator<Item = (&StepDefinition, &PipelineParameter)> {
        self.steps.iter().flat_map(|step| {
            step.parameters.iter().filter_map(move |p| match &p.value {
                ParamValue::Pipeline(param) => Some((step, param)),
                ParamValue::Literal(_) => None,
            })
        })
    }

    /// Content fingerprint of the pipeline structure
    ///
    /// Hashes the canonical JSON form, so two pipelines built from the same
    /// steps share a fingerprint.
    pub fn fingerprint(&self) -> TrainflowResult<String> {
        let bytes = serde_json::to_vec(self)?;
        Ok(blake3::hash(&bytes).to_hex().to_string())
    }
}

/// A single unit of work in a pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Step name (must be unique within pipeline)
    pub name: String,

    /// Step description
    #[serde(default)]
    pub description: Option<String>,

    /// Entry point executed by the backend
    pub entry_point: String,

    /// Ordered parameter bindings passed to the entry point
    #[serde(default)]
    pub parameters: Vec<Parameter>,

    /// Step dependencies (other step names)
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Compute target the backend should schedule on
    #[serde(default)]
    pub compute_target: Option<String>,

    /// Source directory uploaded with the step
    #[serde(default)]
    pub source_dir: Option<PathBuf>,

    /// Runtime environment for the step
    #[serde(default)]
    pub run_config: RunConfig,

    /// Let the backend reuse a previous result for identical inputs
    #[serde(default)]
    pub allow_reuse: bool,
}

impl StepDefinition {
    /// Create a step with no parameters or dependencies
    pub fn new(name: impl Into<String>, entry_point: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            entry_point: entry_point.into(),
            parameters: Vec::new(),
            depends_on: Vec::new(),
            compute_target: None,
            source_dir: None,
            run_config: RunConfig::default(),
            allow_reuse: false,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Bind a literal parameter
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.push(Parameter {
            key: key.into(),
            value: ParamValue::Literal(value.into()),
        });
        self
    }

    /// Bind a parameter to a late-bound pipeline parameter
    pub fn pipeline_param(
        mut self,
        key: impl Into<String>,
        name: impl Into<String>,
        default: impl Into<String>,
    ) -> Self {
        self.parameters.push(Parameter {
            key: key.into(),
            value: ParamValue::Pipeline(PipelineParameter {
                name: name.into(),
                default: default.into(),
            }),
        });
        self
    }

    /// Declare a predecessor
    pub fn depends_on(mut self, step: impl Into<String>) -> Self {
        self.depends_on.push(step.into());
        self
    }

    pub fn compute_target(mut self, target: impl Into<String>) -> Self {
        self.compute_target = Some(target.into());
        self
    }

    pub fn source_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.source_dir = Some(dir.into());
        self
    }

    pub fn run_config(mut self, run_config: RunConfig) -> Self {
        self.run_config = run_config;
        self
    }

    pub fn allow_reuse(mut self, allow: bool) -> Self {
        self.allow_reuse = allow;
        self
    }

    /// Render parameters as `--key value` arguments
    ///
    /// Pipeline parameters missing from `resolved` fall back to their default.
    pub fn render_arguments(&self, resolved: &BTreeMap<String, String>) -> Vec<String> {
        let mut args = Vec::with_capacity(self.parameters.len() * 2);
        for param in &self.parameters {
            args.push(format!("--{}", param.key));
            args.push(param.value.resolve(resolved).to_string());
        }
        args
    }
}

/// A key/value parameter binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub key: String,
    pub value: ParamValue,
}

/// Value of a parameter binding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    /// Late-bound value resolved at submission time
    Pipeline(PipelineParameter),

    /// Fixed value
    Literal(String),
}

impl ParamValue {
    /// Resolve against submission-time values
    pub fn resolve<'a>(&'a self, resolved: &'a BTreeMap<String, String>) -> &'a str {
        match self {
            Self::Literal(value) => value,
            Self::Pipeline(param) => resolved
                .get(&param.name)
                .map(String::as_str)
                .unwrap_or(&param.default),
        }
    }
}

/// A named pipeline parameter with a default
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineParameter {
    /// Parameter name, shared by every step that references it
    #[serde(rename = "pipeline_param")]
    pub name: String,

    /// Value used when the submission does not override it
    #[serde(default)]
    pub default: String,
}

/// Runtime environment for a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Run inside a container
    #[serde(default = "default_true")]
    pub docker: bool,

    /// Conda packages to install
    #[serde(default)]
    pub conda_packages: Vec<String>,

    /// Pip packages to install
    #[serde(default)]
    pub pip_packages: Vec<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            docker: true,
            conda_packages: Vec::new(),
            pip_packages: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_train_evaluate_pipeline() {
        let yaml = r#"
name: "training-pipeline"
description: "Model training/retraining pipeline"
steps:
  - name: "Train Model"
    entry_point: train
    compute_target: cpu-cluster
    parameters:
      - key: model_name
        value:
          pipeline_param: model_name
          default: sklearn_regression_model.pkl
      - key: dataset_name
        value: diabetes_ds
  - name: "Evaluate Model"
    entry_point: register
    depends_on:
      - "Train Model"
"#;

        let pipeline = Pipeline::from_yaml(yaml).unwrap();
        assert_eq!(pipeline.name, "training-pipeline");
        assert_eq!(pipeline.steps.len(), 2);

        let train = pipeline.get_step("Train Model").unwrap();
        assert!(train.run_config.docker);
        assert!(!train.allow_reuse);
        assert_eq!(
            train.parameters[0].value,
            ParamValue::Pipeline(PipelineParameter {
                name: "model_name".into(),
                default: "sklearn_regression_model.pkl".into(),
            })
        );
        assert_eq!(
            train.parameters[1].value,
            ParamValue::Literal("diabetes_ds".into())
        );
        assert_eq!(pipeline.steps[1].depends_on, vec!["Train Model"]);
    }

    #[test]
    fn test_render_arguments_resolves_pipeline_parameters() {
        let step = StepDefinition::new("train", "train")
            .pipeline_param("model_name", "model_name", "default.pkl")
            .pipeline_param("build_id", "release_id", "0")
            .param("dataset_name", "diabetes_ds");

        let mut resolved = BTreeMap::new();
        resolved.insert("release_id".to_string(), "123".to_string());

        assert_eq!(
            step.render_arguments(&resolved),
            vec![
                "--model_name",
                "default.pkl",
                "--build_id",
                "123",
                "--dataset_name",
                "diabetes_ds"
            ]
        );
    }

    #[test]
    fn test_build_is_structural() {
        let steps = || {
            vec![
                StepDefinition::new("train", "train"),
                StepDefinition::new("evaluate", "register").depends_on("train"),
            ]
        };

        let a = Pipeline::build("p", steps());
        let b = Pipeline::build("p", steps());
        assert_eq!(a, b);
        assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());

        let c = Pipeline::build("p", vec![StepDefinition::new("train", "train")]);
        assert_ne!(a.fingerprint().unwrap(), c.fingerprint().unwrap());
    }

    #[test]
    fn test_pipeline_parameters_in_declaration_order() {
        let pipeline = Pipeline::build(
            "p",
            vec![
                StepDefinition::new("train", "train")
                    .pipeline_param("model_name", "model_name", "m.pkl")
                    .param("alpha", "0.5"),
                StepDefinition::new("evaluate", "register")
                    .pipeline_param("build_id", "release_id", "0"),
            ],
        );

        let names: Vec<_> = pipeline
            .pipeline_parameters()
            .map(|(step, p)| (step.name.as_str(), p.name.as_str()))
            .collect();
        assert_eq!(names, vec![("train", "model_name"), ("evaluate", "release_id")]);
    }
}
