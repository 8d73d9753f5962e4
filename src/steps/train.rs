// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! `train` entry point

use async_trait::async_trait;
use clap::Parser;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::trainer::{ModelTrainer, ProcessTrainer, TrainingRequest};
use super::{parse_step_args, StepOutput, StepRunner};
use crate::backend::{Dataset, RunContext, Workspace};
use crate::config::{ExecutionMode, Settings, TrainingConfig, DEFAULT_MODEL_NAME};
use crate::errors::{TrainflowError, TrainflowResult};
use crate::registration::{build_uri, TAG_BUILD_ID, TAG_BUILD_URI};

pub const ENTRY_POINT: &str = "train";

/// Value of `data_file_path` meaning "use the registered dataset"
const USE_EXISTING_DATASET: &str = "none";

/// Arguments of the train step
#[derive(Parser, Debug, Clone, PartialEq)]
#[clap(about = "Train a model on a named dataset")]
pub struct TrainArgs {
    /// The build ID of the build triggering this pipeline run
    #[clap(long = "build_id")]
    pub build_id: Option<String>,

    /// Name of the model artifact
    #[clap(long = "model_name", default_value = DEFAULT_MODEL_NAME)]
    pub model_name: String,

    /// Output directory for passing the model to the next step
    #[clap(long = "step_output")]
    pub step_output: Option<PathBuf>,

    /// Dataset version (latest when omitted)
    #[clap(long = "dataset_version")]
    pub dataset_version: Option<String>,

    /// Data file path on the datastore; a new dataset version is registered
    /// from it unless it is `none`
    #[clap(long = "data_file_path")]
    pub data_file_path: Option<String>,

    /// Caller run id, for example an orchestrator's pipeline run id
    #[clap(long = "caller_run_id")]
    pub caller_run_id: Option<String>,

    /// Dataset name
    #[clap(long = "dataset_name")]
    pub dataset_name: Option<String>,

    /// Trainer program
    #[clap(long, env = "TRAINFLOW_TRAINER", value_name = "PROGRAM")]
    pub trainer: Option<PathBuf>,

    /// Training configuration file
    #[clap(long, default_value = "config.json")]
    pub config: PathBuf,
}

impl TrainArgs {
    /// Fail on missing required inputs before touching the backend
    pub fn check(&self) -> TrainflowResult<(&str, &Path)> {
        let dataset_name = self
            .dataset_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                TrainflowError::configuration_with_help(
                    "No dataset provided",
                    "Pass --dataset_name with the name of a registered dataset",
                )
            })?;

        let step_output = self.step_output.as_deref().ok_or_else(|| {
            TrainflowError::configuration_with_help(
                "No step output directory provided",
                "Pass --step_output with the directory the next step reads the model from",
            )
        })?;

        Ok((dataset_name, step_output))
    }

    fn registers_new_dataset(&self) -> Option<&str> {
        self.data_file_path
            .as_deref()
            .filter(|p| !p.is_empty() && *p != USE_EXISTING_DATASET)
    }
}

/// What a training run produced
#[derive(Debug, Clone, PartialEq)]
pub struct TrainReport {
    pub dataset: Dataset,
    pub alpha: f64,
    pub metrics: BTreeMap<String, f64>,
    /// Model handed to the next step
    pub model_path: PathBuf,
    /// Copy kept with the run outputs
    pub outputs_copy: PathBuf,
}

impl From<TrainReport> for StepOutput {
    fn from(report: TrainReport) -> Self {
        let mse = report
            .metrics
            .get("mse")
            .map(|v| format!(", mse {:.4}", v))
            .unwrap_or_default();

        StepOutput {
            summary: format!(
                "trained on {} v{} (alpha {}{})",
                report.dataset.name, report.dataset.version, report.alpha, mse
            ),
            artifacts: vec![report.model_path, report.outputs_copy],
        }
    }
}

/// Runs the `train` entry point
pub struct TrainStep {
    workspace: Arc<dyn Workspace>,
    trainer: Option<Arc<dyn ModelTrainer>>,
    datastore_name: Option<String>,
    build_uri_base: Option<String>,
    fallback_build_id: Option<String>,
}

impl TrainStep {
    pub fn new(workspace: Arc<dyn Workspace>, settings: &Settings) -> Self {
        Self {
            workspace,
            trainer: None,
            datastore_name: settings.datastore_name.clone(),
            build_uri_base: settings.build_uri_base.clone(),
            fallback_build_id: match settings.mode {
                ExecutionMode::Local => settings.build_id.clone(),
                ExecutionMode::Remote => None,
            },
        }
    }

    /// Use a fixed trainer instead of `--trainer`
    pub fn with_trainer(mut self, trainer: Arc<dyn ModelTrainer>) -> Self {
        self.trainer = Some(trainer);
        self
    }

    /// Train a model inside `ctx`
    pub async fn train(
        &self,
        ctx: Arc<dyn RunContext>,
        args: &TrainArgs,
        working_dir: &Path,
    ) -> TrainflowResult<TrainReport> {
        let (dataset_name, step_output) = args.check()?;
        let trainer = self.trainer(args)?;

        let config = TrainingConfig::load(&working_dir.join(&args.config))?;
        info!(alpha = config.alpha, "Training parameters loaded");

        let parent = ctx.parent();
        let lineage: Vec<&Arc<dyn RunContext>> = std::iter::once(&ctx).chain(parent.as_ref()).collect();
        let scope = parent.as_ref().unwrap_or(&ctx);

        let dataset = self.resolve_dataset(args, dataset_name).await?;
        scope.tag("datasetId", &dataset.id).await?;
        if let Some(ref caller) = args.caller_run_id {
            scope.tag("callerRunId", caller).await?;
        }

        for run in &lineage {
            run.log("alpha", config.alpha, None).await?;
        }

        tokio::fs::create_dir_all(working_dir.join(step_output)).await?;
        let model_path = working_dir.join(step_output).join(&args.model_name);

        let outcome = trainer
            .train(&TrainingRequest {
                dataset: dataset.clone(),
                alpha: config.alpha,
                model_path: model_path.clone(),
                working_dir: working_dir.to_path_buf(),
            })
            .await?;
        debug!(duration_ms = outcome.duration.as_millis() as u64, "Trainer finished");

        if let Some(mse) = outcome.metrics.get("mse") {
            for run in &lineage {
                run.log("mse", *mse, Some("Mean squared error metric")).await?;
            }
        }

        let outputs_dir = working_dir.join("outputs");
        tokio::fs::create_dir_all(&outputs_dir).await?;
        let outputs_copy = outputs_dir.join(&args.model_name);
        tokio::fs::copy(&model_path, &outputs_copy)
            .await
            .map_err(|e| TrainflowError::FileWriteError {
                path: outputs_copy.clone(),
                error: e.to_string(),
            })?;

        self.tag_training_run(&ctx, &lineage, args).await?;

        info!(
            run_id = ctx.id(),
            dataset = %dataset.name,
            dataset_version = dataset.version,
            model = %model_path.display(),
            "Model trained"
        );

        Ok(TrainReport {
            dataset,
            alpha: config.alpha,
            metrics: outcome.metrics,
            model_path,
            outputs_copy,
        })
    }

    fn trainer(&self, args: &TrainArgs) -> TrainflowResult<Arc<dyn ModelTrainer>> {
        if let Some(ref trainer) = self.trainer {
            return Ok(Arc::clone(trainer));
        }

        match args.trainer {
            Some(ref program) => Ok(Arc::new(ProcessTrainer::new(program)?)),
            None => Err(TrainflowError::configuration_with_help(
                "No trainer configured",
                "Pass --trainer <PROGRAM> or set TRAINFLOW_TRAINER",
            )),
        }
    }

    async fn resolve_dataset(&self, args: &TrainArgs, dataset_name: &str) -> TrainflowResult<Dataset> {
        let datasets = self.workspace.datasets();

        let Some(file_path) = args.registers_new_dataset() else {
            return datasets
                .get_by_name(dataset_name, args.dataset_version.as_deref())
                .await;
        };

        let datastore = self.datastore_name.as_deref().ok_or_else(|| {
            TrainflowError::configuration_with_help(
                "DATASTORE_NAME is required to register a new dataset version",
                "Set DATASTORE_NAME or pass --data_file_path none to use the existing dataset",
            )
        })?;

        let dataset = datasets.register(dataset_name, datastore, file_path).await?;
        info!(
            dataset = dataset_name,
            version = dataset.version,
            datastore,
            path = file_path,
            "Registered new dataset version"
        );
        Ok(dataset)
    }

    async fn tag_training_run(
        &self,
        ctx: &Arc<dyn RunContext>,
        lineage: &[&Arc<dyn RunContext>],
        args: &TrainArgs,
    ) -> TrainflowResult<()> {
        ctx.tag("runType", "train").await?;

        let Some(build_id) = args.build_id.as_deref().or(self.fallback_build_id.as_deref()) else {
            return Ok(());
        };

        let uri = self
            .build_uri_base
            .as_deref()
            .map(|base| build_uri(base, build_id));

        for run in lineage {
            run.tag(TAG_BUILD_ID, build_id).await?;
            if let Some(ref uri) = uri {
                run.tag(TAG_BUILD_URI, uri).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl StepRunner for TrainStep {
    fn entry_point(&self) -> &str {
        ENTRY_POINT
    }

    async fn run(
        &self,
        ctx: Arc<dyn RunContext>,
        args: &[String],
        working_dir: &Path,
    ) -> TrainflowResult<StepOutput> {
        let args: TrainArgs = parse_step_args(ENTRY_POINT, args)?;
        self.train(ctx, &args, working_dir).await.map(StepOutput::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DatasetStore, LocalWorkspace};
    use crate::steps::TrainingOutcome;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Writes a fixed model and reports a fixed mse
    #[derive(Default)]
    struct FakeTrainer {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl ModelTrainer for FakeTrainer {
        async fn train(&self, request: &TrainingRequest) -> TrainflowResult<TrainingOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(TrainflowError::ProcessFailed {
                    message: "trainer crashed".into(),
                    help: None,
                });
            }
            std::fs::write(&request.model_path, format!("ridge alpha={}", request.alpha))?;
            Ok(TrainingOutcome {
                metrics: BTreeMap::from([("mse".to_string(), 0.125)]),
                ..TrainingOutcome::default()
            })
        }

        async fn check_available(&self) -> TrainflowResult<bool> {
            Ok(true)
        }
    }

    fn settings(vars: &[(&str, &str)]) -> Settings {
        let vars: Vec<(String, String)> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(ExecutionMode::Remote, Some(PathBuf::from("unused")), move |key| {
            vars.iter().find(|(k, _)| k == key).map(|(_, v)| v.clone())
        })
    }

    fn args(extra: &[&str]) -> TrainArgs {
        let argv = std::iter::once("train").chain(extra.iter().copied());
        TrainArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_args_use_snake_case_flags() {
        let parsed = args(&["--build_id", "123", "--dataset_name", "diabetes_ds", "--step_output", "out"]);
        assert_eq!(parsed.build_id.as_deref(), Some("123"));
        assert_eq!(parsed.model_name, DEFAULT_MODEL_NAME);
        assert_eq!(parsed.config, PathBuf::from("config.json"));
        assert!(parsed.registers_new_dataset().is_none());

        let parsed = args(&["--data_file_path", "none"]);
        assert!(parsed.registers_new_dataset().is_none());
        let parsed = args(&["--data_file_path", "diabetes.csv"]);
        assert_eq!(parsed.registers_new_dataset(), Some("diabetes.csv"));
    }

    #[tokio::test]
    async fn test_missing_dataset_name_fails_before_backend() {
        let ws = LocalWorkspace::in_memory("ws");
        let run = ws.start_run("exp", None).await.unwrap();
        let trainer = Arc::new(FakeTrainer::default());
        let step = TrainStep::new(Arc::new(ws.clone()), &settings(&[])).with_trainer(trainer.clone());
        let dir = TempDir::new().unwrap();

        let result = step
            .train(Arc::clone(&run), &args(&["--step_output", "out"]), dir.path())
            .await;

        assert!(matches!(result, Err(TrainflowError::Configuration { .. })));
        assert_eq!(trainer.calls.load(Ordering::SeqCst), 0);
        let record = ws.run_record(run.id()).await.unwrap();
        assert!(record.tags.is_empty());
        assert!(record.metrics.is_empty());
    }

    #[tokio::test]
    async fn test_train_logs_and_tags_run_and_parent() {
        let ws = LocalWorkspace::in_memory("ws");
        ws.register("diabetes_ds", "blobstore", "diabetes.csv").await.unwrap();
        let parent = ws.start_run("exp", None).await.unwrap();
        let run = ws.start_run("exp", Some(parent.id())).await.unwrap();

        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("config.json"), r#"{"training": {"alpha": 0.1}}"#).unwrap();

        let step = TrainStep::new(
            Arc::new(ws.clone()),
            &settings(&[("BUILDURI_BASE", "https://ci/build/")]),
        )
        .with_trainer(Arc::new(FakeTrainer::default()));

        let report = step
            .train(
                Arc::clone(&run),
                &args(&[
                    "--build_id",
                    "123",
                    "--dataset_name",
                    "diabetes_ds",
                    "--step_output",
                    "step",
                    "--caller_run_id",
                    "adf-1",
                ]),
                dir.path(),
            )
            .await
            .unwrap();

        assert_eq!(report.alpha, 0.1);
        assert_eq!(report.dataset.version, 1);
        assert!(report.model_path.ends_with("step/sklearn_regression_model.pkl"));
        assert_eq!(
            std::fs::read(&report.model_path).unwrap(),
            std::fs::read(dir.path().join("outputs/sklearn_regression_model.pkl")).unwrap()
        );

        let run_record = ws.run_record(run.id()).await.unwrap();
        assert_eq!(run_record.tags["runType"], "train");
        assert_eq!(run_record.tags["buildId"], "123");
        assert_eq!(run_record.tags["buildUri"], "https://ci/build/123");
        let mse = run_record.metrics.iter().find(|m| m.key == "mse").unwrap();
        assert_eq!(mse.description.as_deref(), Some("Mean squared error metric"));

        let parent_record = ws.run_record(parent.id()).await.unwrap();
        assert_eq!(parent_record.tags["datasetId"], report.dataset.id);
        assert_eq!(parent_record.tags["callerRunId"], "adf-1");
        assert_eq!(parent_record.tags["buildUri"], "https://ci/build/123");
        assert!(!parent_record.tags.contains_key("runType"));
        let logged: Vec<&str> = parent_record.metrics.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(logged, vec!["alpha", "mse"]);
    }

    #[tokio::test]
    async fn test_data_file_path_registers_new_dataset_version() {
        let ws = LocalWorkspace::in_memory("ws");
        ws.register("diabetes_ds", "blobstore", "old.csv").await.unwrap();
        let run = ws.start_run("exp", None).await.unwrap();
        let dir = TempDir::new().unwrap();

        let step = TrainStep::new(Arc::new(ws.clone()), &settings(&[("DATASTORE_NAME", "blobstore")]))
            .with_trainer(Arc::new(FakeTrainer::default()));

        let report = step
            .train(
                run,
                &args(&[
                    "--dataset_name",
                    "diabetes_ds",
                    "--data_file_path",
                    "new.csv",
                    "--step_output",
                    "step",
                ]),
                dir.path(),
            )
            .await
            .unwrap();

        assert_eq!(report.dataset.version, 2);
        assert_eq!(report.dataset.path, "new.csv");
        assert_eq!(report.alpha, 0.5);
    }

    #[tokio::test]
    async fn test_registering_dataset_requires_datastore() {
        let ws = LocalWorkspace::in_memory("ws");
        let run = ws.start_run("exp", None).await.unwrap();
        let dir = TempDir::new().unwrap();
        let step = TrainStep::new(Arc::new(ws), &settings(&[]))
            .with_trainer(Arc::new(FakeTrainer::default()));

        let result = step
            .train(
                run,
                &args(&["--dataset_name", "d", "--data_file_path", "x.csv", "--step_output", "s"]),
                dir.path(),
            )
            .await;
        assert!(matches!(result, Err(TrainflowError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_trainer_failure_leaves_no_outputs() {
        let ws = LocalWorkspace::in_memory("ws");
        ws.register("diabetes_ds", "blobstore", "diabetes.csv").await.unwrap();
        let run = ws.start_run("exp", None).await.unwrap();
        let dir = TempDir::new().unwrap();

        let trainer = FakeTrainer {
            fail: true,
            ..FakeTrainer::default()
        };
        let step = TrainStep::new(Arc::new(ws.clone()), &settings(&[])).with_trainer(Arc::new(trainer));

        let result = step
            .train(
                Arc::clone(&run),
                &args(&["--build_id", "123", "--dataset_name", "diabetes_ds", "--step_output", "s"]),
                dir.path(),
            )
            .await;

        assert!(matches!(result, Err(TrainflowError::ProcessFailed { .. })));
        assert!(!dir.path().join("outputs").exists());
        assert!(!ws.run_record(run.id()).await.unwrap().tags.contains_key("buildId"));
    }

    #[tokio::test]
    async fn test_runner_rejects_unknown_arguments() {
        let ws = LocalWorkspace::in_memory("ws");
        let run = ws.start_run("exp", None).await.unwrap();
        let step = TrainStep::new(Arc::new(ws), &settings(&[]));

        let result = step
            .run(run, &["--no_such_flag".into(), "x".into()], Path::new("."))
            .await;
        assert!(matches!(result, Err(TrainflowError::Configuration { .. })));
    }
}
