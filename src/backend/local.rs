// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Local workspace
//!
//! An in-process backend used for local runs and tests. State can be kept
//! in memory only, or persisted as a JSON file in a workspace directory so
//! runs and registrations survive across CLI invocations.
//!
//! A persistent workspace is shared between processes. Every read reloads
//! the state file and every write is a read-modify-write of the current
//! file under an exclusive lock on `workspace.lock`, so one process never
//! overwrites what another committed. The in-memory copy is replaced only
//! after a write succeeded.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    Dataset, DatasetStore, ModelRegistry, PublishedPipelineHandle, RegistrationFilter,
    RunContext, RunStatus, Workspace,
};
use crate::errors::{TrainflowError, TrainflowResult};
use crate::pipeline::Pipeline;
use crate::registration::{ArtifactTags, RegistrationRecord};

const STATE_FILE: &str = "workspace.json";
const LOCK_FILE: &str = "workspace.lock";

/// Persisted record of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: String,
    pub experiment: String,
    pub parent_id: Option<String>,
    pub status: RunStatus,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub metrics: Vec<Metric>,
    #[serde(default)]
    pub failure: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

/// A logged scalar metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub key: String,
    pub value: f64,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct WorkspaceState {
    #[serde(default)]
    runs: BTreeMap<String, RunRecord>,
    #[serde(default)]
    registrations: Vec<RegistrationRecord>,
    #[serde(default)]
    datasets: Vec<Dataset>,
    #[serde(default)]
    pipelines: Vec<PublishedPipelineHandle>,
}

/// Workspace statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkspaceStats {
    /// Number of runs
    pub runs: usize,
    /// Number of registrations
    pub registrations: usize,
    /// Number of published pipeline versions
    pub pipelines: usize,
    /// Number of registry list queries served since open
    pub registry_queries: usize,
}

/// State file plus the lock file that serializes access to it
struct StateStore {
    state_file: PathBuf,
    lock_file: PathBuf,
}

impl StateStore {
    fn new(dir: &Path) -> Self {
        Self {
            state_file: dir.join(STATE_FILE),
            lock_file: dir.join(LOCK_FILE),
        }
    }

    fn lock(&self) -> TrainflowResult<fd_lock::RwLock<File>> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_file)
            .map_err(|e| TrainflowError::FileWriteError {
                path: self.lock_file.clone(),
                error: e.to_string(),
            })?;
        Ok(fd_lock::RwLock::new(file))
    }

    fn lock_error(&self, e: std::io::Error) -> TrainflowError {
        TrainflowError::backend(
            "workspace.lock",
            format!("failed to lock {}: {}", self.lock_file.display(), e),
        )
    }

    fn load(&self) -> TrainflowResult<WorkspaceState> {
        if !self.state_file.exists() {
            return Ok(WorkspaceState::default());
        }

        let content =
            std::fs::read_to_string(&self.state_file).map_err(|e| TrainflowError::FileReadError {
                path: self.state_file.clone(),
                error: e.to_string(),
            })?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Write through a temporary file so a failed write leaves the old state intact
    fn save(&self, state: &WorkspaceState) -> TrainflowResult<()> {
        let content = serde_json::to_string_pretty(state)?;
        let tmp = self.state_file.with_extension("json.tmp");

        std::fs::write(&tmp, content)
            .and_then(|()| std::fs::rename(&tmp, &self.state_file))
            .map_err(|e| TrainflowError::FileWriteError {
                path: self.state_file.clone(),
                error: e.to_string(),
            })
    }

    /// Current state under a shared lock
    fn read(&self) -> TrainflowResult<WorkspaceState> {
        let lock = self.lock()?;
        let _guard = lock.read().map_err(|e| self.lock_error(e))?;
        self.load()
    }

    /// Apply `f` to the current state and write it back under an exclusive lock
    fn update<T, F>(&self, f: F) -> TrainflowResult<(WorkspaceState, T)>
    where
        F: FnOnce(&mut WorkspaceState) -> TrainflowResult<T>,
    {
        let mut lock = self.lock()?;
        let _guard = lock.write().map_err(|e| self.lock_error(e))?;

        let mut state = self.load()?;
        let value = f(&mut state)?;
        self.save(&state)?;
        Ok((state, value))
    }
}

struct Shared {
    name: String,
    /// Last state read or committed; authoritative only without a store
    state: RwLock<WorkspaceState>,
    store: Option<StateStore>,
    registry_queries: AtomicUsize,
}

impl Shared {
    /// Read from the current state
    async fn current<T, F>(&self, f: F) -> TrainflowResult<T>
    where
        F: FnOnce(&WorkspaceState) -> T + Send,
    {
        let mut cached = self.state.write().await;
        if let Some(ref store) = self.store {
            *cached = store.read()?;
        }
        Ok(f(&*cached))
    }

    /// Like [`Shared::current`], falling back to the last known state when
    /// the state file cannot be read
    async fn inspect<T, F>(&self, f: F) -> T
    where
        F: FnOnce(&WorkspaceState) -> T + Send,
    {
        let mut cached = self.state.write().await;
        if let Some(ref store) = self.store {
            match store.read() {
                Ok(fresh) => *cached = fresh,
                Err(e) => tracing::warn!(error = %e, "Could not reload workspace state"),
            }
        }
        f(&*cached)
    }

    /// Commit a change; nothing is applied when `f` or the write fails
    async fn update<T, F>(&self, f: F) -> TrainflowResult<T>
    where
        F: FnOnce(&mut WorkspaceState) -> TrainflowResult<T> + Send,
    {
        let mut cached = self.state.write().await;
        let (next, value) = match self.store {
            Some(ref store) => store.update(f)?,
            None => {
                let mut next = cached.clone();
                let value = f(&mut next)?;
                (next, value)
            }
        };
        *cached = next;
        Ok(value)
    }

    async fn update_run<F>(&self, run_id: &str, operation: &str, f: F) -> TrainflowResult<()>
    where
        F: FnOnce(&mut RunRecord) + Send,
    {
        self.update(|state| {
            let run = state.runs.get_mut(run_id).ok_or_else(|| {
                TrainflowError::backend(operation, format!("run '{}' not found", run_id))
            })?;
            f(run);
            Ok(())
        })
        .await
    }
}

/// In-process workspace backend
#[derive(Clone)]
pub struct LocalWorkspace {
    shared: Arc<Shared>,
}

impl LocalWorkspace {
    /// Create a workspace that lives only in memory
    pub fn in_memory(name: impl Into<String>) -> Self {
        Self::with_state(name.into(), WorkspaceState::default(), None)
    }

    /// Open (or create) a workspace persisted in `dir`
    pub async fn open(dir: &Path, name: impl Into<String>) -> TrainflowResult<Self> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| TrainflowError::FileWriteError {
                path: dir.to_path_buf(),
                error: e.to_string(),
            })?;

        let store = StateStore::new(dir);
        let state = store.read()?;

        tracing::debug!(path = %store.state_file.display(), "Opened local workspace");
        Ok(Self::with_state(name.into(), state, Some(store)))
    }

    fn with_state(name: String, state: WorkspaceState, store: Option<StateStore>) -> Self {
        Self {
            shared: Arc::new(Shared {
                name,
                state: RwLock::new(state),
                store,
                registry_queries: AtomicUsize::new(0),
            }),
        }
    }

    /// Snapshot of a run record
    pub async fn run_record(&self, run_id: &str) -> Option<RunRecord> {
        self.shared
            .inspect(|state| state.runs.get(run_id).cloned())
            .await
    }

    /// Child runs of a run, in start order
    pub async fn child_runs(&self, parent_id: &str) -> Vec<RunRecord> {
        let mut children: Vec<RunRecord> = self
            .shared
            .inspect(|state| {
                state
                    .runs
                    .values()
                    .filter(|r| r.parent_id.as_deref() == Some(parent_id))
                    .cloned()
                    .collect()
            })
            .await;
        children.sort_by_key(|r| r.started_at);
        children
    }

    /// All registrations, oldest first
    pub async fn registrations(&self) -> Vec<RegistrationRecord> {
        self.shared.inspect(|state| state.registrations.clone()).await
    }

    /// Published pipeline versions, oldest first
    pub async fn published_pipelines(&self) -> Vec<PublishedPipelineHandle> {
        self.shared.inspect(|state| state.pipelines.clone()).await
    }

    /// Workspace statistics
    pub async fn stats(&self) -> WorkspaceStats {
        let registry_queries = self.shared.registry_queries.load(Ordering::SeqCst);
        self.shared
            .inspect(|state| WorkspaceStats {
                runs: state.runs.len(),
                registrations: state.registrations.len(),
                pipelines: state.pipelines.len(),
                registry_queries,
            })
            .await
    }

    fn run_handle(&self, record: &RunRecord) -> Arc<dyn RunContext> {
        Arc::new(LocalRun {
            id: record.id.clone(),
            experiment: record.experiment.clone(),
            parent_id: record.parent_id.clone(),
            shared: Arc::clone(&self.shared),
        })
    }
}

#[async_trait]
impl Workspace for LocalWorkspace {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn registry(&self) -> &dyn ModelRegistry {
        self
    }

    fn datasets(&self) -> &dyn DatasetStore {
        self
    }

    async fn start_run(
        &self,
        experiment: &str,
        parent: Option<&str>,
    ) -> TrainflowResult<Arc<dyn RunContext>> {
        let record = RunRecord {
            id: Uuid::new_v4().to_string(),
            experiment: experiment.to_string(),
            parent_id: parent.map(String::from),
            status: RunStatus::Running,
            tags: BTreeMap::new(),
            metrics: Vec::new(),
            failure: None,
            started_at: Utc::now(),
            ended_at: None,
        };
        let handle = self.run_handle(&record);

        self.shared
            .update(move |state| {
                if let Some(ref parent_id) = record.parent_id {
                    if !state.runs.contains_key(parent_id) {
                        return Err(TrainflowError::backend(
                            "start_run",
                            format!("parent run '{}' not found", parent_id),
                        ));
                    }
                }
                state.runs.insert(record.id.clone(), record);
                Ok(())
            })
            .await?;

        tracing::debug!(run_id = handle.id(), parent = ?parent, "Started run");
        Ok(handle)
    }

    async fn get_run(&self, run_id: &str) -> TrainflowResult<Option<Arc<dyn RunContext>>> {
        let record = self
            .shared
            .current(|state| state.runs.get(run_id).cloned())
            .await?;
        Ok(record.map(|r| self.run_handle(&r)))
    }

    async fn publish_pipeline(
        &self,
        pipeline: &Pipeline,
        name: &str,
        description: &str,
        version: &str,
    ) -> TrainflowResult<PublishedPipelineHandle> {
        let handle = PublishedPipelineHandle {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: description.to_string(),
            version: version.to_string(),
            fingerprint: pipeline.fingerprint()?,
            published_at: Utc::now(),
        };

        let record = handle.clone();
        self.shared
            .update(move |state| {
                state.pipelines.push(record);
                Ok(())
            })
            .await?;

        Ok(handle)
    }
}

#[async_trait]
impl ModelRegistry for LocalWorkspace {
    async fn list(
        &self,
        artifact_name: &str,
        filter: &RegistrationFilter,
    ) -> TrainflowResult<Vec<RegistrationRecord>> {
        self.shared.registry_queries.fetch_add(1, Ordering::SeqCst);

        self.shared
            .current(|state| {
                state
                    .registrations
                    .iter()
                    .filter(|r| r.artifact_name == artifact_name && filter.matches(r))
                    .cloned()
                    .collect()
            })
            .await
    }

    async fn create(
        &self,
        run_id: &str,
        artifact_name: &str,
        artifact_path: &Path,
        tags: &ArtifactTags,
    ) -> TrainflowResult<RegistrationRecord> {
        self.shared
            .update(|state| {
                if !state.runs.contains_key(run_id) {
                    return Err(TrainflowError::backend(
                        "registry.create",
                        format!("run '{}' not found", run_id),
                    ));
                }

                let version = state
                    .registrations
                    .iter()
                    .filter(|r| r.artifact_name == artifact_name)
                    .map(|r| r.version)
                    .max()
                    .unwrap_or(0)
                    + 1;

                let record = RegistrationRecord {
                    artifact_name: artifact_name.to_string(),
                    version,
                    run_id: run_id.to_string(),
                    artifact_location: artifact_path.to_path_buf(),
                    tags: tags.clone(),
                    created_at: Utc::now(),
                };

                state.registrations.push(record.clone());
                Ok(record)
            })
            .await
    }
}

#[async_trait]
impl DatasetStore for LocalWorkspace {
    async fn get_by_name(&self, name: &str, version: Option<&str>) -> TrainflowResult<Dataset> {
        let wanted: Option<u32> = match version {
            None | Some("latest") => None,
            Some(v) => Some(v.parse().map_err(|_| {
                TrainflowError::configuration(format!("invalid dataset version '{}'", v))
            })?),
        };

        let found = self
            .shared
            .current(|state| {
                let mut versions = state.datasets.iter().filter(|d| d.name == name);
                match wanted {
                    None => versions.max_by_key(|d| d.version).cloned(),
                    Some(wanted) => versions.find(|d| d.version == wanted).cloned(),
                }
            })
            .await?;

        found.ok_or_else(|| {
            TrainflowError::backend(
                "datasets.get_by_name",
                format!("dataset '{}' (version {}) not found", name, version.unwrap_or("latest")),
            )
        })
    }

    async fn register(&self, name: &str, datastore: &str, file_path: &str) -> TrainflowResult<Dataset> {
        self.shared
            .update(|state| {
                let version = state
                    .datasets
                    .iter()
                    .filter(|d| d.name == name)
                    .map(|d| d.version)
                    .max()
                    .unwrap_or(0)
                    + 1;

                let dataset = Dataset {
                    id: Uuid::new_v4().to_string(),
                    name: name.to_string(),
                    version,
                    datastore: datastore.to_string(),
                    path: file_path.to_string(),
                };

                state.datasets.push(dataset.clone());
                Ok(dataset)
            })
            .await
    }
}


struct LocalRun {
    id: String,
    experiment: String,
    parent_id: Option<String>,
    shared: Arc<Shared>,
}

#[async_trait]
impl RunContext for LocalRun {
    fn id(&self) -> &str {
        &self.id
    }

    fn experiment_name(&self) -> &str {
        &self.experiment
    }

    fn parent(&self) -> Option<Arc<dyn RunContext>> {
        let parent_id = self.parent_id.as_ref()?;
        Some(Arc::new(LocalRun {
            id: parent_id.clone(),
            experiment: self.experiment.clone(),
            // nesting is one level deep in this backend
            parent_id: None,
            shared: Arc::clone(&self.shared),
        }))
    }

    async fn tag(&self, key: &str, value: &str) -> TrainflowResult<()> {
        let (key, value) = (key.to_string(), value.to_string());
        self.shared
            .update_run(&self.id, "run.tag", move |run| {
                run.tags.insert(key, value);
            })
            .await
    }

    async fn log(&self, key: &str, value: f64, description: Option<&str>) -> TrainflowResult<()> {
        let metric = Metric {
            key: key.to_string(),
            value,
            description: description.map(String::from),
        };
        self.shared
            .update_run(&self.id, "run.log", move |run| run.metrics.push(metric))
            .await
    }

    async fn complete(&self) -> TrainflowResult<()> {
        self.shared
            .update_run(&self.id, "run.complete", |run| {
                run.status = RunStatus::Completed;
                run.ended_at = Some(Utc::now());
            })
            .await
    }

    async fn fail(&self, reason: &str) -> TrainflowResult<()> {
        let reason = reason.to_string();
        self.shared
            .update_run(&self.id, "run.fail", move |run| {
                run.status = RunStatus::Failed;
                run.failure = Some(reason);
                run.ended_at = Some(Utc::now());
            })
            .await
    }

    async fn status(&self) -> TrainflowResult<RunStatus> {
        self.shared
            .current(|state| state.runs.get(&self.id).map(|r| r.status))
            .await?
            .ok_or_else(|| TrainflowError::backend("run.status", format!("run '{}' not found", self.id)))
    }

    async fn tags(&self) -> TrainflowResult<BTreeMap<String, String>> {
        self.shared
            .current(|state| state.runs.get(&self.id).map(|r| r.tags.clone()))
            .await?
            .ok_or_else(|| TrainflowError::backend("run.tags", format!("run '{}' not found", self.id)))
    }
}
