// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Pipeline publishing

use tracing::info;

use crate::backend::{PublishedPipelineHandle, Workspace};
use crate::errors::{TrainflowError, TrainflowResult};
use crate::pipeline::{Pipeline, PipelineValidator};

/// Publishes validated pipelines to a workspace
pub struct PipelinePublisher;

impl PipelinePublisher {
    /// Validate `pipeline` and publish it under `name` and `version`
    ///
    /// Nothing reaches the backend for an invalid pipeline. Every successful
    /// call creates a new backend-side record, even for an identical
    /// pipeline.
    pub async fn publish(
        workspace: &dyn Workspace,
        pipeline: &Pipeline,
        name: &str,
        description: &str,
        version: &str,
    ) -> TrainflowResult<PublishedPipelineHandle> {
        let plan = PipelineValidator::validate(pipeline)?;

        if name.trim().is_empty() {
            return Err(TrainflowError::configuration("Published pipeline name must not be empty"));
        }
        if version.trim().is_empty() {
            return Err(TrainflowError::configuration_with_help(
                "Published pipeline version must not be empty",
                "Pass --version or set BUILD_BUILDID",
            ));
        }

        let handle = workspace
            .publish_pipeline(pipeline, name, description, version)
            .await?;

        info!(
            pipeline = %handle.name,
            id = %handle.id,
            version = %handle.version,
            steps = plan.order.len(),
            fingerprint = %handle.fingerprint,
            workspace = workspace.name(),
            "Published pipeline"
        );

        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LocalWorkspace;
    use crate::errors::GraphError;
    use crate::pipeline::StepDefinition;

    fn training_pipeline() -> Pipeline {
        Pipeline::build(
            "diabetes-training",
            vec![
                StepDefinition::new("Train Model", "train")
                    .pipeline_param("build_id", "build_id", "0")
                    .param("step_output", "pipeline_data"),
                StepDefinition::new("Register Model", "register")
                    .pipeline_param("build_id", "build_id", "0")
                    .depends_on("Train Model"),
            ],
        )
    }

    #[tokio::test]
    async fn test_publish_creates_new_record_each_call() {
        let ws = LocalWorkspace::in_memory("ws");
        let pipeline = training_pipeline();

        let first = PipelinePublisher::publish(&ws, &pipeline, "diabetes-training", "Model training", "42")
            .await
            .unwrap();
        let second = PipelinePublisher::publish(&ws, &pipeline, "diabetes-training", "Model training", "42")
            .await
            .unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(first.fingerprint, second.fingerprint);
        assert_eq!(first.fingerprint, pipeline.fingerprint().unwrap());
        assert_eq!(ws.published_pipelines().await.len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_pipeline_never_reaches_backend() {
        let ws = LocalWorkspace::in_memory("ws");
        let pipeline = Pipeline::build(
            "broken",
            vec![StepDefinition::new("Register Model", "register").depends_on("Train Model")],
        );

        let result = PipelinePublisher::publish(&ws, &pipeline, "broken", "", "1").await;
        assert!(matches!(
            result,
            Err(TrainflowError::Graph(GraphError::DanglingDependency { .. }))
        ));
        assert!(ws.published_pipelines().await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_version_is_rejected() {
        let ws = LocalWorkspace::in_memory("ws");
        let result = PipelinePublisher::publish(&ws, &training_pipeline(), "p", "", " ").await;
        assert!(matches!(result, Err(TrainflowError::Configuration { .. })));
        assert_eq!(ws.stats().await.pipelines, 0);
    }
}
