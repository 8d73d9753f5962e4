// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Execution backend contract
//!
//! The orchestration core only talks to the execution backend through these
//! traits. Runs, the model registry, datasets and published pipelines all
//! live on the backend side; nothing here enforces uniqueness of
//! registrations.

mod local;

pub use local::{LocalWorkspace, RunRecord, WorkspaceStats};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::errors::TrainflowResult;
use crate::pipeline::Pipeline;
use crate::registration::{ArtifactTags, RegistrationRecord};

/// Lifecycle state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    /// Whether the run has finished, successfully or not
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One execution instance, possibly nested under a pipeline run
#[async_trait]
pub trait RunContext: Send + Sync {
    /// Run identifier
    fn id(&self) -> &str;

    /// Experiment the run belongs to
    fn experiment_name(&self) -> &str;

    /// The enclosing pipeline run, if any
    fn parent(&self) -> Option<Arc<dyn RunContext>>;

    /// Attach or overwrite a tag
    async fn tag(&self, key: &str, value: &str) -> TrainflowResult<()>;

    /// Log a scalar metric
    async fn log(&self, key: &str, value: f64, description: Option<&str>) -> TrainflowResult<()>;

    /// Mark the run as successfully finished
    async fn complete(&self) -> TrainflowResult<()>;

    /// Mark the run as failed
    async fn fail(&self, reason: &str) -> TrainflowResult<()>;

    /// Current lifecycle state
    async fn status(&self) -> TrainflowResult<RunStatus>;

    /// Tags currently attached to the run
    async fn tags(&self) -> TrainflowResult<BTreeMap<String, String>>;
}

/// Filter for registry queries
///
/// All present criteria must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationFilter {
    pub run_id: Option<String>,
    pub tags: Vec<(String, String)>,
}

impl RegistrationFilter {
    /// Match records produced by a run
    pub fn by_run(run_id: &str) -> Self {
        Self {
            run_id: Some(run_id.to_string()),
            tags: Vec::new(),
        }
    }

    /// Match records carrying a tag
    pub fn by_tag(key: &str, value: &str) -> Self {
        Self {
            run_id: None,
            tags: vec![(key.to_string(), value.to_string())],
        }
    }

    /// Check a record against the filter
    pub fn matches(&self, record: &RegistrationRecord) -> bool {
        if let Some(ref run_id) = self.run_id {
            if record.run_id != *run_id {
                return false;
            }
        }
        self.tags
            .iter()
            .all(|(k, v)| record.tags.get(k) == Some(v.as_str()))
    }
}

/// Model registry
#[async_trait]
pub trait ModelRegistry: Send + Sync {
    /// List existing registrations of an artifact name
    async fn list(
        &self,
        artifact_name: &str,
        filter: &RegistrationFilter,
    ) -> TrainflowResult<Vec<RegistrationRecord>>;

    /// Create a new registration, assigning the next version
    async fn create(
        &self,
        run_id: &str,
        artifact_name: &str,
        artifact_path: &Path,
        tags: &ArtifactTags,
    ) -> TrainflowResult<RegistrationRecord>;
}

/// A registered dataset version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: String,
    pub name: String,
    pub version: u32,
    pub datastore: String,
    pub path: String,
}

/// Dataset registry
#[async_trait]
pub trait DatasetStore: Send + Sync {
    /// Fetch a dataset by name; `None` or `"latest"` selects the newest version
    async fn get_by_name(&self, name: &str, version: Option<&str>) -> TrainflowResult<Dataset>;

    /// Register a file on a datastore as a new version of a dataset
    async fn register(&self, name: &str, datastore: &str, file_path: &str) -> TrainflowResult<Dataset>;
}

/// A published, immutable pipeline version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedPipelineHandle {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub fingerprint: String,
    pub published_at: DateTime<Utc>,
}

/// Connection to an execution backend
#[async_trait]
pub trait Workspace: Send + Sync {
    /// Workspace name
    fn name(&self) -> &str;

    /// Model registry of this workspace
    fn registry(&self) -> &dyn ModelRegistry;

    /// Dataset registry of this workspace
    fn datasets(&self) -> &dyn DatasetStore;

    /// Start a run, optionally nested under a parent run
    async fn start_run(
        &self,
        experiment: &str,
        parent: Option<&str>,
    ) -> TrainflowResult<Arc<dyn RunContext>>;

    /// Look up a run by id
    async fn get_run(&self, run_id: &str) -> TrainflowResult<Option<Arc<dyn RunContext>>>;

    /// Publish a pipeline; every call creates a new backend-side record
    async fn publish_pipeline(
        &self,
        pipeline: &Pipeline,
        name: &str,
        description: &str,
        version: &str,
    ) -> TrainflowResult<PublishedPipelineHandle>;
}
