// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Pipeline executor
//!
//! Submits a pipeline to a workspace: one parent run per submission, one
//! child run per step, steps in dependency order.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use colored::Colorize;
use tracing::{info, warn};

use crate::backend::{RunContext, Workspace};
use crate::errors::{TrainflowError, TrainflowResult};
use crate::pipeline::{ExecutionPlan, Pipeline, PipelineValidator, StepDefinition};
use crate::steps::{StepOutput, StepRunner};
use crate::utils::{print_header, print_numbered};

/// Options for one submission
#[derive(Debug, Clone, Default)]
pub struct SubmissionOptions {
    /// Values for pipeline parameters, by parameter name
    pub parameters: BTreeMap<String, String>,
    /// Experiment override
    pub experiment: Option<String>,
    /// Only show what would be done
    pub dry_run: bool,
    /// Verbose output
    pub verbose: bool,
}

/// Terminal state of a step within a submission
#[derive(Debug)]
pub enum StepState {
    Completed(StepOutput),
    Failed(TrainflowError),
    /// Not run because a predecessor did not complete
    Skipped { blocked_by: String },
}

/// What happened to one step
#[derive(Debug)]
pub struct StepOutcome {
    pub name: String,
    /// Child run, absent for skipped steps
    pub run_id: Option<String>,
    pub state: StepState,
    pub duration: Duration,
}

impl StepOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self.state, StepState::Completed(_))
    }
}

/// Result of a submission
#[derive(Debug)]
pub struct SubmissionResult {
    /// Parent pipeline run, absent for dry runs
    pub parent_run_id: Option<String>,
    /// Outcomes in execution order
    pub steps: Vec<StepOutcome>,
    /// Whether every step completed
    pub success: bool,
    pub duration: Duration,
}

impl SubmissionResult {
    pub fn step(&self, name: &str) -> Option<&StepOutcome> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Take the error of the first failed step
    pub fn into_first_error(self) -> Option<TrainflowError> {
        self.steps.into_iter().find_map(|s| match s.state {
            StepState::Failed(e) => Some(e),
            _ => None,
        })
    }
}

/// Pipeline executor
pub struct PipelineExecutor {
    /// Registered runners by entry point
    runners: HashMap<String, Box<dyn StepRunner>>,
    workspace: Arc<dyn Workspace>,
    experiment: String,
}

/// Inputs shared by every step of one submission
struct Submission<'a> {
    parent: Arc<dyn RunContext>,
    working_dir: &'a Path,
    resolved: BTreeMap<String, String>,
    experiment: &'a str,
    options: &'a SubmissionOptions,
}

/// Mark a run failed on an error that is about to be returned
async fn abandon(run: &dyn RunContext, error: &TrainflowError) {
    if let Err(close) = run.fail(&error.to_string()).await {
        warn!(run_id = run.id(), error = %close, "Failed to mark run as failed");
    }
}

impl PipelineExecutor {
    pub fn new(workspace: Arc<dyn Workspace>, experiment: impl Into<String>) -> Self {
        Self {
            runners: HashMap::new(),
            workspace,
            experiment: experiment.into(),
        }
    }

    /// Register a runner under its entry point
    pub fn register_runner(&mut self, runner: Box<dyn StepRunner>) {
        self.runners.insert(runner.entry_point().to_string(), runner);
    }

    pub fn with_runner(mut self, runner: Box<dyn StepRunner>) -> Self {
        self.register_runner(runner);
        self
    }

    /// Submit a pipeline
    ///
    /// Validation, parameter resolution and runner lookup all happen before
    /// the first backend call. Step failures are reported in the result
    /// rather than returned as errors.
    pub async fn execute(
        &self,
        pipeline: &Pipeline,
        working_dir: &Path,
        options: &SubmissionOptions,
    ) -> TrainflowResult<SubmissionResult> {
        let start = Instant::now();

        let plan = PipelineValidator::validate(pipeline)?;
        let resolved = Self::resolve_parameters(&plan, &options.parameters)?;
        self.check_runners(pipeline)?;

        self.print_execution_plan(pipeline, &plan, &resolved);

        if options.dry_run {
            return Ok(SubmissionResult {
                parent_run_id: None,
                steps: Vec::new(),
                success: true,
                duration: start.elapsed(),
            });
        }

        let experiment = options.experiment.as_deref().unwrap_or(&self.experiment);
        let parent = self.workspace.start_run(experiment, None).await?;
        let submission = Submission {
            parent: Arc::clone(&parent),
            working_dir,
            resolved,
            experiment,
            options,
        };

        let outcomes = match self.run_steps(pipeline, &plan, &submission).await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                abandon(parent.as_ref(), &e).await;
                return Err(e);
            }
        };

        let success = outcomes.iter().all(StepOutcome::is_completed);
        let closed = if success {
            parent.complete().await
        } else {
            let failed: Vec<&str> = outcomes
                .iter()
                .filter(|o| matches!(o.state, StepState::Failed(_)))
                .map(|o| o.name.as_str())
                .collect();
            parent
                .fail(&format!("step(s) failed: {}", failed.join(", ")))
                .await
        };
        if let Err(e) = closed {
            abandon(parent.as_ref(), &e).await;
            return Err(e);
        }

        let duration = start.elapsed();
        println!();
        if success {
            println!(
                "{}",
                format!("Pipeline completed successfully in {:.2}s", duration.as_secs_f64()).green()
            );
        } else {
            println!(
                "{}",
                format!("Pipeline failed after {:.2}s", duration.as_secs_f64()).red()
            );
        }

        Ok(SubmissionResult {
            parent_run_id: Some(parent.id().to_string()),
            steps: outcomes,
            success,
            duration,
        })
    }

    /// Run every step under the parent run, in plan order
    async fn run_steps(
        &self,
        pipeline: &Pipeline,
        plan: &ExecutionPlan,
        submission: &Submission<'_>,
    ) -> TrainflowResult<Vec<StepOutcome>> {
        submission.parent.tag("pipelineName", &pipeline.name).await?;
        info!(
            pipeline = %pipeline.name,
            run_id = submission.parent.id(),
            experiment = submission.experiment,
            steps = plan.order.len(),
            "Submitted pipeline"
        );

        let mut completed: HashSet<&str> = HashSet::new();
        let mut outcomes = Vec::with_capacity(plan.indices.len());

        for &idx in &plan.indices {
            let step = &pipeline.steps[idx];

            if let Some(blocked_by) = step
                .depends_on
                .iter()
                .find(|dep| !completed.contains(dep.as_str()))
            {
                println!(
                    "  {} {} {}",
                    "○".dimmed(),
                    step.name.dimmed(),
                    format!("(skipped, '{}' did not complete)", blocked_by).dimmed()
                );
                outcomes.push(StepOutcome {
                    name: step.name.clone(),
                    run_id: None,
                    state: StepState::Skipped {
                        blocked_by: blocked_by.clone(),
                    },
                    duration: Duration::ZERO,
                });
                continue;
            }

            let outcome = self.execute_step(step, submission).await?;
            if outcome.is_completed() {
                completed.insert(step.name.as_str());
            }
            outcomes.push(outcome);
        }

        Ok(outcomes)
    }

    /// Run one step in its own child run
    async fn execute_step(
        &self,
        step: &StepDefinition,
        submission: &Submission<'_>,
    ) -> TrainflowResult<StepOutcome> {
        let start = Instant::now();
        let runner = self.runner(&step.entry_point)?;

        let child = self
            .workspace
            .start_run(submission.experiment, Some(submission.parent.id()))
            .await?;

        match self.run_in_child(step, runner, &child, submission).await {
            Ok(state) => Ok(StepOutcome {
                name: step.name.clone(),
                run_id: Some(child.id().to_string()),
                state,
                duration: start.elapsed(),
            }),
            Err(e) => {
                abandon(child.as_ref(), &e).await;
                Err(e)
            }
        }
    }

    async fn run_in_child(
        &self,
        step: &StepDefinition,
        runner: &dyn StepRunner,
        child: &Arc<dyn RunContext>,
        submission: &Submission<'_>,
    ) -> TrainflowResult<StepState> {
        let start = Instant::now();
        let verbose = submission.options.verbose;
        child.tag("stepName", &step.name).await?;

        let args = step.render_arguments(&submission.resolved);
        let step_dir = match step.source_dir {
            Some(ref dir) => submission.working_dir.join(dir),
            None => submission.working_dir.to_path_buf(),
        };

        print!("  {} {}...", "→".blue(), step.name);
        if verbose {
            println!();
            println!("    {}", format!("{} {}", step.entry_point, args.join(" ")).dimmed());
        }

        match runner.run(Arc::clone(child), &args, &step_dir).await {
            Ok(output) => {
                child.complete().await?;
                println!(
                    "\r  {} {} ({:.2}s)",
                    "✓".green(),
                    step.name.bold(),
                    start.elapsed().as_secs_f64()
                );
                if verbose && !output.summary.is_empty() {
                    println!("    {}", output.summary.dimmed());
                }
                Ok(StepState::Completed(output))
            }
            Err(e) => {
                child.fail(&e.to_string()).await?;
                println!("\r  {} {} failed", "✗".red(), step.name.bold());
                if verbose {
                    eprintln!("    {}", e.to_string().dimmed());
                }
                warn!(step = %step.name, run_id = child.id(), error = %e, "Step failed");
                Ok(StepState::Failed(e))
            }
        }
    }

    /// One value per pipeline parameter name for the whole submission
    fn resolve_parameters(
        plan: &ExecutionPlan,
        overrides: &BTreeMap<String, String>,
    ) -> TrainflowResult<BTreeMap<String, String>> {
        if let Some(unknown) = overrides.keys().find(|k| !plan.parameters.contains_key(*k)) {
            let known: Vec<&str> = plan.parameters.keys().map(String::as_str).collect();
            return Err(TrainflowError::configuration_with_help(
                format!("Unknown pipeline parameter '{}'", unknown),
                if known.is_empty() {
                    "This pipeline declares no pipeline parameters".to_string()
                } else {
                    format!("Declared pipeline parameters: {}", known.join(", "))
                },
            ));
        }

        let mut resolved = plan.parameters.clone();
        resolved.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(resolved)
    }

    fn runner(&self, entry_point: &str) -> TrainflowResult<&dyn StepRunner> {
        self.runners
            .get(entry_point)
            .map(Box::as_ref)
            .ok_or_else(|| TrainflowError::RunnerNotFound {
                entry_point: entry_point.to_string(),
            })
    }

    fn check_runners(&self, pipeline: &Pipeline) -> TrainflowResult<()> {
        for step in &pipeline.steps {
            self.runner(&step.entry_point)?;
        }
        Ok(())
    }

    fn print_execution_plan(
        &self,
        pipeline: &Pipeline,
        plan: &ExecutionPlan,
        resolved: &BTreeMap<String, String>,
    ) {
        println!();
        print_header(&format!("Pipeline: {}", pipeline.name));
        println!(
            "Execution plan ({} step{}):",
            plan.indices.len(),
            if plan.indices.len() == 1 { "" } else { "s" }
        );
        println!();

        for (i, &idx) in plan.indices.iter().enumerate() {
            let step = &pipeline.steps[idx];
            let mut line = format!("{} ({})", step.name.bold(), step.entry_point);
            if !step.depends_on.is_empty() {
                line.push_str(&format!(
                    " {}",
                    format!("[depends: {}]", step.depends_on.join(", ")).dimmed()
                ));
            }
            print_numbered(i + 1, &line);
        }

        if !resolved.is_empty() {
            println!();
            for (name, value) in resolved {
                println!("  {} = {}", name.cyan(), value);
            }
        }

        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        DatasetStore, LocalWorkspace, ModelRegistry, PublishedPipelineHandle, RunStatus,
    };
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Local workspace whose compute target refuses every step run
    struct NoStepRuns {
        inner: LocalWorkspace,
        parent_id: Mutex<Option<String>>,
    }

    #[async_trait]
    impl Workspace for NoStepRuns {
        fn name(&self) -> &str {
            self.inner.name()
        }

        fn registry(&self) -> &dyn ModelRegistry {
            self.inner.registry()
        }

        fn datasets(&self) -> &dyn DatasetStore {
            self.inner.datasets()
        }

        async fn start_run(
            &self,
            experiment: &str,
            parent: Option<&str>,
        ) -> TrainflowResult<Arc<dyn RunContext>> {
            if parent.is_some() {
                return Err(TrainflowError::backend("start_run", "compute target unavailable"));
            }
            let run = self.inner.start_run(experiment, None).await?;
            *self.parent_id.lock().unwrap() = Some(run.id().to_string());
            Ok(run)
        }

        async fn get_run(&self, run_id: &str) -> TrainflowResult<Option<Arc<dyn RunContext>>> {
            self.inner.get_run(run_id).await
        }

        async fn publish_pipeline(
            &self,
            pipeline: &Pipeline,
            name: &str,
            description: &str,
            version: &str,
        ) -> TrainflowResult<PublishedPipelineHandle> {
            self.inner
                .publish_pipeline(pipeline, name, description, version)
                .await
        }
    }

    /// Records the arguments it was called with
    struct RecordingRunner {
        entry_point: String,
        fail: bool,
        calls: Arc<Mutex<Vec<Vec<String>>>>,
    }

    impl RecordingRunner {
        fn boxed(entry_point: &str, fail: bool, calls: &Arc<Mutex<Vec<Vec<String>>>>) -> Box<dyn StepRunner> {
            Box::new(Self {
                entry_point: entry_point.to_string(),
                fail,
                calls: Arc::clone(calls),
            })
        }
    }

    #[async_trait]
    impl StepRunner for RecordingRunner {
        fn entry_point(&self) -> &str {
            &self.entry_point
        }

        async fn run(
            &self,
            _ctx: Arc<dyn RunContext>,
            args: &[String],
            _working_dir: &Path,
        ) -> TrainflowResult<StepOutput> {
            self.calls.lock().unwrap().push(args.to_vec());
            if self.fail {
                return Err(TrainflowError::ProcessFailed {
                    message: format!("{} exploded", self.entry_point),
                    help: None,
                });
            }
            Ok(StepOutput::default())
        }
    }

    fn training_pipeline() -> Pipeline {
        Pipeline::build(
            "diabetes-training",
            vec![
                StepDefinition::new("Train Model", "train")
                    .pipeline_param("build_id", "build_id", "0")
                    .param("model_name", "model.pkl"),
                StepDefinition::new("Evaluate Model", "evaluate")
                    .pipeline_param("build_id", "build_id", "0")
                    .depends_on("Train Model"),
                StepDefinition::new("Register Model", "register")
                    .pipeline_param("build_id", "build_id", "0")
                    .depends_on("Evaluate Model"),
            ],
        )
    }

    fn executor(ws: &LocalWorkspace, fail_train: bool, calls: &Arc<Mutex<Vec<Vec<String>>>>) -> PipelineExecutor {
        PipelineExecutor::new(Arc::new(ws.clone()), "exp")
            .with_runner(RecordingRunner::boxed("train", fail_train, calls))
            .with_runner(RecordingRunner::boxed("evaluate", false, calls))
            .with_runner(RecordingRunner::boxed("register", false, calls))
    }

    #[tokio::test]
    async fn test_successful_submission_completes_all_runs() {
        let ws = LocalWorkspace::in_memory("ws");
        let calls = Arc::new(Mutex::new(Vec::new()));

        let result = executor(&ws, false, &calls)
            .execute(&training_pipeline(), Path::new("."), &SubmissionOptions::default())
            .await
            .unwrap();

        assert!(result.success);
        let order: Vec<&str> = result.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(order, vec!["Train Model", "Evaluate Model", "Register Model"]);

        let parent_id = result.parent_run_id.unwrap();
        assert_eq!(ws.run_record(&parent_id).await.unwrap().status, RunStatus::Completed);
        let children = ws.child_runs(&parent_id).await;
        assert_eq!(children.len(), 3);
        assert!(children.iter().all(|c| c.status == RunStatus::Completed));
    }

    #[tokio::test]
    async fn test_training_failure_skips_dependents_and_fails_parent() {
        let ws = LocalWorkspace::in_memory("ws");
        let calls = Arc::new(Mutex::new(Vec::new()));

        let result = executor(&ws, true, &calls)
            .execute(&training_pipeline(), Path::new("."), &SubmissionOptions::default())
            .await
            .unwrap();

        assert!(!result.success);
        assert!(matches!(result.step("Train Model").unwrap().state, StepState::Failed(_)));
        match &result.step("Evaluate Model").unwrap().state {
            StepState::Skipped { blocked_by } => assert_eq!(blocked_by, "Train Model"),
            other => panic!("expected skipped, got {:?}", other),
        }
        match &result.step("Register Model").unwrap().state {
            StepState::Skipped { blocked_by } => assert_eq!(blocked_by, "Evaluate Model"),
            other => panic!("expected skipped, got {:?}", other),
        }
        assert_eq!(calls.lock().unwrap().len(), 1);

        let parent_id = result.parent_run_id.clone().unwrap();
        let parent = ws.run_record(&parent_id).await.unwrap();
        assert_eq!(parent.status, RunStatus::Failed);
        assert!(parent.failure.unwrap().contains("Train Model"));

        let children = ws.child_runs(&parent_id).await;
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].status, RunStatus::Failed);

        assert!(matches!(
            result.into_first_error(),
            Some(TrainflowError::ProcessFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_pipeline_parameter_resolves_identically_for_every_step() {
        let ws = LocalWorkspace::in_memory("ws");
        let calls = Arc::new(Mutex::new(Vec::new()));
        let options = SubmissionOptions {
            parameters: BTreeMap::from([("build_id".to_string(), "123".to_string())]),
            ..SubmissionOptions::default()
        };

        executor(&ws, false, &calls)
            .execute(&training_pipeline(), Path::new("."), &options)
            .await
            .unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls[0], vec!["--build_id", "123", "--model_name", "model.pkl"]);
        assert_eq!(calls[1], vec!["--build_id", "123"]);
        assert_eq!(calls[2], vec!["--build_id", "123"]);
    }

    #[tokio::test]
    async fn test_unknown_parameter_fails_before_any_run() {
        let ws = LocalWorkspace::in_memory("ws");
        let calls = Arc::new(Mutex::new(Vec::new()));
        let options = SubmissionOptions {
            parameters: BTreeMap::from([("bulid_id".to_string(), "123".to_string())]),
            ..SubmissionOptions::default()
        };

        let result = executor(&ws, false, &calls)
            .execute(&training_pipeline(), Path::new("."), &options)
            .await;

        assert!(matches!(result, Err(TrainflowError::Configuration { .. })));
        assert_eq!(ws.stats().await.runs, 0);
    }

    #[tokio::test]
    async fn test_missing_runner_fails_before_any_run() {
        let ws = LocalWorkspace::in_memory("ws");
        let calls = Arc::new(Mutex::new(Vec::new()));
        let executor = PipelineExecutor::new(Arc::new(ws.clone()), "exp")
            .with_runner(RecordingRunner::boxed("train", false, &calls));

        let result = executor
            .execute(&training_pipeline(), Path::new("."), &SubmissionOptions::default())
            .await;

        assert!(matches!(result, Err(TrainflowError::RunnerNotFound { ref entry_point }) if entry_point == "evaluate"));
        assert_eq!(ws.stats().await.runs, 0);
    }

    #[tokio::test]
    async fn test_dry_run_starts_nothing() {
        let ws = LocalWorkspace::in_memory("ws");
        let calls = Arc::new(Mutex::new(Vec::new()));
        let options = SubmissionOptions {
            dry_run: true,
            ..SubmissionOptions::default()
        };

        let result = executor(&ws, false, &calls)
            .execute(&training_pipeline(), Path::new("."), &options)
            .await
            .unwrap();

        assert!(result.success);
        assert!(result.parent_run_id.is_none());
        assert_eq!(ws.stats().await.runs, 0);
        assert!(calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_backend_error_mid_submission_fails_parent() {
        let ws = LocalWorkspace::in_memory("ws");
        let calls = Arc::new(Mutex::new(Vec::new()));
        let backend = Arc::new(NoStepRuns {
            inner: ws.clone(),
            parent_id: Mutex::new(None),
        });
        let executor = PipelineExecutor::new(backend.clone(), "exp")
            .with_runner(RecordingRunner::boxed("train", false, &calls))
            .with_runner(RecordingRunner::boxed("evaluate", false, &calls))
            .with_runner(RecordingRunner::boxed("register", false, &calls));

        let result = executor
            .execute(&training_pipeline(), Path::new("."), &SubmissionOptions::default())
            .await;
        assert!(matches!(result, Err(TrainflowError::Backend { .. })));
        assert!(calls.lock().unwrap().is_empty());

        let parent_id = backend.parent_id.lock().unwrap().clone().unwrap();
        let parent = ws.run_record(&parent_id).await.unwrap();
        assert_eq!(parent.status, RunStatus::Failed);
        assert!(parent.failure.unwrap().contains("compute target unavailable"));
        assert_eq!(ws.stats().await.runs, 1);
    }
}
