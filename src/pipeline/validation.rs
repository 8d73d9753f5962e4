// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Pipeline validation
//!
//! Validates a pipeline before anything is published or submitted.

use std::collections::BTreeMap;

use crate::errors::{GraphError, TrainflowResult};
use crate::pipeline::{DagBuilder, Pipeline, StepDefinition};

/// A validated pipeline, ready for submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    /// Step names in execution order
    pub order: Vec<String>,
    /// Indices into `Pipeline::steps`, same order as `order`
    pub indices: Vec<usize>,
    /// Pipeline parameters and their defaults
    pub parameters: BTreeMap<String, String>,
}

/// Pipeline validator
pub struct PipelineValidator;

impl PipelineValidator {
    /// Validate a pipeline, failing on the first graph error
    pub fn validate(pipeline: &Pipeline) -> TrainflowResult<ExecutionPlan> {
        if pipeline.steps.is_empty() {
            return Err(GraphError::Empty.into());
        }

        let dag = DagBuilder::build(pipeline)?;
        let indices = dag.topological_order()?;
        let order = indices
            .iter()
            .map(|&idx| pipeline.steps[idx].name.clone())
            .collect();
        let parameters = Self::parameter_registry(pipeline)?;

        Ok(ExecutionPlan {
            order,
            indices,
            parameters,
        })
    }

    /// Collect every pipeline parameter by name
    ///
    /// One name resolves to one value per submission, so all references
    /// must agree on the default.
    fn parameter_registry(pipeline: &Pipeline) -> Result<BTreeMap<String, String>, GraphError> {
        let mut registry: BTreeMap<String, String> = BTreeMap::new();

        for (_, param) in pipeline.pipeline_parameters() {
            match registry.get(&param.name) {
                Some(existing) if *existing != param.default => {
                    return Err(GraphError::ConflictingParameter {
                        name: param.name.clone(),
                        first: existing.clone(),
                        second: param.default.clone(),
                    });
                }
                Some(_) => {}
                None => {
                    registry.insert(param.name.clone(), param.default.clone());
                }
            }
        }

        Ok(registry)
    }

    /// Collect every error and warning for reporting
    pub fn report(pipeline: &Pipeline) -> ValidationResult {
        let mut result = ValidationResult::new();

        if pipeline.steps.is_empty() {
            result.add_error(&GraphError::Empty.to_string());
        }

        // Duplicates are reported first since the DAG stops at the first one
        let mut seen_names = std::collections::HashSet::new();
        for step in &pipeline.steps {
            if !seen_names.insert(&step.name) {
                result.add_error(&GraphError::DuplicateName { name: step.name.clone() }.to_string());
            }
        }

        match DagBuilder::build(pipeline) {
            Ok(_) => {}
            Err(GraphError::DuplicateName { .. }) => {}
            Err(e) => result.add_error(&e.to_string()),
        }

        if let Err(e) = Self::parameter_registry(pipeline) {
            result.add_error(&e.to_string());
        }

        for step in &pipeline.steps {
            Self::validate_step(step, &mut result);
        }

        result
    }

    /// Validate a single step
    fn validate_step(step: &StepDefinition, result: &mut ValidationResult) {
        if step.entry_point.trim().is_empty() {
            result.add_error(&format!("Step '{}': entry point is empty", step.name));
        }

        if step.allow_reuse {
            result.add_warning(&format!(
                "Step '{}': allow_reuse is enabled, the backend may skip it and keep a stale artifact",
                step.name
            ));
        }

        let mut keys = std::collections::HashSet::new();
        for param in &step.parameters {
            if !keys.insert(&param.key) {
                result.add_warning(&format!(
                    "Step '{}': parameter '{}' is bound more than once",
                    step.name, param.key
                ));
            }
        }
    }
}

/// Result of pipeline validation
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }

    pub fn add_warning(&mut self, message: &str) {
        self.warnings.push(message.to_string());
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}
