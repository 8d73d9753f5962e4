// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Model registration guard
//!
//! Registers a trained artifact at most once per triggering build. Runs
//! without a build id are local or ad-hoc and always register.
//!
//! The duplicate check is a query against the registry made right before
//! the commit, serialized per `(artifact, build)` inside this process by a
//! [`KeyedLock`]. The backend itself does not enforce uniqueness, so two
//! processes racing on the same build are not linearized.

mod lock;
mod record;

pub use lock::{KeyGuard, KeyedLock};
pub use record::{
    ArtifactTags, RegistrationRecord, RunIdentity, TAG_AREA, TAG_BUILD_ID, TAG_BUILD_URI,
    TAG_EXPERIMENT_NAME, TAG_RUN_ID, TAG_TYPE,
};

use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::backend::{RegistrationFilter, RunContext, Workspace};
use crate::errors::{RegistrationError, TrainflowError, TrainflowResult};

/// Static inputs to the tag set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationSettings {
    /// Value of the `area` tag
    pub area: String,
    /// Value of the `type` tag
    pub model_type: String,
    /// Prefix the build id is appended to for `buildUri`
    pub build_uri_base: Option<String>,
}

impl Default for RegistrationSettings {
    fn default() -> Self {
        Self {
            area: "diabetes".into(),
            model_type: "regression".into(),
            build_uri_base: None,
        }
    }
}

/// Result of a registration attempt that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    /// A new record was committed
    Registered(RegistrationRecord),
    /// No run was found for a build-less identity; nothing to register
    Skipped { run_id: String },
}

impl RegistrationOutcome {
    pub fn record(&self) -> Option<&RegistrationRecord> {
        match self {
            Self::Registered(record) => Some(record),
            Self::Skipped { .. } => None,
        }
    }
}

/// Build URI for a build id
pub fn build_uri(base: &str, build_id: &str) -> String {
    format!("{}{}", base, build_id)
}

/// Enforces at-most-once registration per build
#[derive(Clone)]
pub struct RegistrationGuard {
    workspace: Arc<dyn Workspace>,
    settings: RegistrationSettings,
    locks: KeyedLock,
}

impl RegistrationGuard {
    pub fn new(workspace: Arc<dyn Workspace>, settings: RegistrationSettings) -> Self {
        Self {
            workspace,
            settings,
            locks: KeyedLock::new(),
        }
    }

    /// Share a lock table with other guards in this process
    pub fn with_locks(mut self, locks: KeyedLock) -> Self {
        self.locks = locks;
        self
    }

    /// Register `artifact_name` produced by `identity.run_id`
    ///
    /// `ctx` is the run performing the registration; with a build id it is
    /// tagged with `buildId`/`buildUri`, as is the identity's parent run.
    pub async fn register_artifact(
        &self,
        ctx: &dyn RunContext,
        identity: &RunIdentity,
        artifact_name: &str,
        artifact_location: &Path,
    ) -> TrainflowResult<RegistrationOutcome> {
        match identity.build_id {
            None => self.register_unscoped(identity, artifact_name, artifact_location).await,
            Some(ref build_id) => {
                let _guard = self.locks.lock(artifact_name, build_id).await;
                self.register_for_build(ctx, identity, build_id, artifact_name, artifact_location)
                    .await
            }
        }
    }

    /// Local or ad-hoc run: no duplicate check
    async fn register_unscoped(
        &self,
        identity: &RunIdentity,
        artifact_name: &str,
        artifact_location: &Path,
    ) -> TrainflowResult<RegistrationOutcome> {
        let Some(run) = self.workspace.get_run(&identity.run_id).await? else {
            warn!(
                run_id = %identity.run_id,
                artifact = artifact_name,
                "No run found for this run id, skipping model registration"
            );
            return Ok(RegistrationOutcome::Skipped {
                run_id: identity.run_id.clone(),
            });
        };

        let tags = ArtifactTags::new(
            &self.settings.area,
            &self.settings.model_type,
            &identity.run_id,
            run.experiment_name(),
        )?;

        self.commit(identity, artifact_name, artifact_location, tags)
            .await
            .map(RegistrationOutcome::Registered)
    }

    async fn register_for_build(
        &self,
        ctx: &dyn RunContext,
        identity: &RunIdentity,
        build_id: &str,
        artifact_name: &str,
        artifact_location: &Path,
    ) -> TrainflowResult<RegistrationOutcome> {
        self.ensure_not_registered(artifact_name, &identity.run_id, build_id)
            .await?;

        let run = self.workspace.get_run(&identity.run_id).await?.ok_or_else(|| {
            TrainflowError::backend(
                "get_run",
                format!("run '{}' not found in workspace '{}'", identity.run_id, self.workspace.name()),
            )
        })?;

        let mut tags = ArtifactTags::new(
            &self.settings.area,
            &self.settings.model_type,
            &identity.run_id,
            run.experiment_name(),
        )?
        .with_build_id(build_id);

        let uri = self
            .settings
            .build_uri_base
            .as_deref()
            .map(|base| build_uri(base, build_id));
        if let Some(ref uri) = uri {
            tags.insert(TAG_BUILD_URI, uri.as_str())?;
        }

        self.tag_for_traceability(ctx, identity, build_id, uri.as_deref())
            .await?;

        self.commit(identity, artifact_name, artifact_location, tags)
            .await
            .map(RegistrationOutcome::Registered)
    }

    /// Fail if this run or this build already registered the artifact
    async fn ensure_not_registered(
        &self,
        artifact_name: &str,
        run_id: &str,
        build_id: &str,
    ) -> TrainflowResult<()> {
        let registry = self.workspace.registry();

        let by_run = registry
            .list(artifact_name, &RegistrationFilter::by_run(run_id))
            .await?;
        let by_build = registry
            .list(artifact_name, &RegistrationFilter::by_tag(TAG_BUILD_ID, build_id))
            .await?;

        if by_run.is_empty() && by_build.is_empty() {
            info!(artifact = artifact_name, run_id, build_id, "Model is not registered for this run");
            return Ok(());
        }

        let err = RegistrationError::AlreadyRegistered {
            artifact: artifact_name.to_string(),
            run_id: run_id.to_string(),
            build_id: build_id.to_string(),
        };
        warn!(
            artifact = artifact_name,
            run_id,
            build_id,
            workspace = self.workspace.name(),
            "{}",
            err
        );
        Err(err.into())
    }

    async fn tag_for_traceability(
        &self,
        ctx: &dyn RunContext,
        identity: &RunIdentity,
        build_id: &str,
        uri: Option<&str>,
    ) -> TrainflowResult<()> {
        let parent = match identity.parent_run_id {
            Some(ref parent_id) => self.workspace.get_run(parent_id).await?,
            None => None,
        };

        ctx.tag(TAG_BUILD_ID, build_id).await?;
        if let Some(uri) = uri {
            ctx.tag(TAG_BUILD_URI, uri).await?;
        }

        if let Some(parent) = parent.filter(|p| p.id() != ctx.id()) {
            parent.tag(TAG_BUILD_ID, build_id).await?;
            if let Some(uri) = uri {
                parent.tag(TAG_BUILD_URI, uri).await?;
            }
        }

        Ok(())
    }

    async fn commit(
        &self,
        identity: &RunIdentity,
        artifact_name: &str,
        artifact_location: &Path,
        tags: ArtifactTags,
    ) -> TrainflowResult<RegistrationRecord> {
        match self
            .workspace
            .registry()
            .create(&identity.run_id, artifact_name, artifact_location, &tags)
            .await
        {
            Ok(record) => {
                info!(
                    artifact = %record.artifact_name,
                    version = record.version,
                    run_id = %record.run_id,
                    build_id = ?identity.build_id,
                    "Model registered"
                );
                Ok(record)
            }
            Err(e) => {
                error!(
                    artifact = artifact_name,
                    location = %artifact_location.display(),
                    run_id = %identity.run_id,
                    parent_run_id = ?identity.parent_run_id,
                    build_id = ?identity.build_id,
                    tags = ?tags.to_map(),
                    error = %e,
                    "Model registration failed"
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LocalWorkspace;

    struct Fixture {
        ws: LocalWorkspace,
        guard: RegistrationGuard,
        parent: Arc<dyn RunContext>,
        train: Arc<dyn RunContext>,
        register: Arc<dyn RunContext>,
    }

    async fn fixture(build_uri_base: Option<&str>) -> Fixture {
        let ws = LocalWorkspace::in_memory("ws");
        let parent = ws.start_run("exp", None).await.unwrap();
        let train = ws.start_run("exp", Some(parent.id())).await.unwrap();
        let register = ws.start_run("exp", Some(parent.id())).await.unwrap();

        let settings = RegistrationSettings {
            build_uri_base: build_uri_base.map(String::from),
            ..RegistrationSettings::default()
        };
        let guard = RegistrationGuard::new(Arc::new(ws.clone()), settings);

        Fixture {
            ws,
            guard,
            parent,
            train,
            register,
        }
    }

    fn identity(f: &Fixture, build_id: Option<&str>) -> RunIdentity {
        RunIdentity::new(f.train.id())
            .with_build_id(build_id.map(String::from))
            .with_parent(Some(f.parent.id().to_string()))
    }

    #[tokio::test]
    async fn test_second_registration_for_build_is_refused() {
        let f = fixture(None).await;
        let id = identity(&f, Some("123"));
        let location = Path::new("./outputs/model.pkl");

        let first = f
            .guard
            .register_artifact(f.register.as_ref(), &id, "model.pkl", location)
            .await
            .unwrap();
        let record = first.record().unwrap();
        assert_eq!(record.tags.build_id.as_deref(), Some("123"));
        assert_eq!(record.tags.run_id, f.train.id());
        assert_eq!(record.artifact_location, location);

        let second = f
            .guard
            .register_artifact(f.register.as_ref(), &id, "model.pkl", location)
            .await;
        assert!(matches!(
            second,
            Err(TrainflowError::Registration(RegistrationError::AlreadyRegistered { .. }))
        ));
        assert_eq!(f.ws.registrations().await.len(), 1);
    }

    #[tokio::test]
    async fn test_same_build_from_another_run_is_refused() {
        let f = fixture(None).await;
        let location = Path::new("./outputs/model.pkl");

        f.guard
            .register_artifact(f.register.as_ref(), &identity(&f, Some("123")), "model.pkl", location)
            .await
            .unwrap();

        let other = RunIdentity::new(f.register.id()).with_build_id(Some("123".into()));
        let result = f
            .guard
            .register_artifact(f.register.as_ref(), &other, "model.pkl", location)
            .await;
        assert!(matches!(result, Err(TrainflowError::Registration(_))));

        // a different artifact name is a different key
        f.guard
            .register_artifact(f.register.as_ref(), &other, "scaler.pkl", location)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_registrations_yield_one_success() {
        let f = fixture(None).await;
        let id = identity(&f, Some("123"));
        let location = Path::new("./outputs/model.pkl");

        let (a, b) = tokio::join!(
            f.guard.register_artifact(f.register.as_ref(), &id, "model.pkl", location),
            f.guard.register_artifact(f.register.as_ref(), &id, "model.pkl", location),
        );

        let successes = [&a, &b].iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        assert_eq!(f.ws.registrations().await.len(), 1);
    }

    #[tokio::test]
    async fn test_build_uri_tags_record_and_runs() {
        let f = fixture(Some("https://ci/build/")).await;
        let id = identity(&f, Some("123"));

        let outcome = f
            .guard
            .register_artifact(f.register.as_ref(), &id, "model.pkl", Path::new("./outputs/model.pkl"))
            .await
            .unwrap();

        let record = outcome.record().unwrap();
        assert_eq!(record.tags.build_uri(), Some("https://ci/build/123"));

        let run_tags = f.register.tags().await.unwrap();
        assert_eq!(run_tags["buildId"], "123");
        assert_eq!(run_tags["buildUri"], "https://ci/build/123");

        let parent_tags = f.parent.tags().await.unwrap();
        assert_eq!(parent_tags["buildId"], "123");
        assert_eq!(parent_tags["buildUri"], "https://ci/build/123");
    }

    #[tokio::test]
    async fn test_without_build_id_always_registers_and_never_queries() {
        let f = fixture(Some("https://ci/build/")).await;
        let id = identity(&f, None);
        let location = Path::new("./outputs/model.pkl");

        for _ in 0..2 {
            let outcome = f
                .guard
                .register_artifact(f.register.as_ref(), &id, "model.pkl", location)
                .await
                .unwrap();
            let record = outcome.record().unwrap();
            assert!(record.tags.build_id.is_none());
            assert!(record.tags.build_uri().is_none());
            assert_eq!(record.tags.experiment_name, "exp");
        }

        let stats = f.ws.stats().await;
        assert_eq!(stats.registrations, 2);
        assert_eq!(stats.registry_queries, 0);
        assert!(f.register.tags().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_run_without_build_id_is_skipped() {
        let f = fixture(None).await;
        let id = RunIdentity::new("does-not-exist");

        let outcome = f
            .guard
            .register_artifact(f.register.as_ref(), &id, "model.pkl", Path::new("./outputs/model.pkl"))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            RegistrationOutcome::Skipped {
                run_id: "does-not-exist".into()
            }
        );
        assert!(f.ws.registrations().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_run_with_build_id_is_a_backend_error() {
        let f = fixture(None).await;
        let id = RunIdentity::new("does-not-exist").with_build_id(Some("123".into()));

        let result = f
            .guard
            .register_artifact(f.register.as_ref(), &id, "model.pkl", Path::new("./outputs/model.pkl"))
            .await;

        assert!(matches!(result, Err(TrainflowError::Backend { .. })));
        assert!(f.register.tags().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_workspace_handle_sees_committed_registration() {
        let dir = tempfile::TempDir::new().unwrap();
        let ws_a = LocalWorkspace::open(dir.path(), "ws").await.unwrap();
        let ws_b = LocalWorkspace::open(dir.path(), "ws").await.unwrap();

        let parent = ws_a.start_run("exp", None).await.unwrap();
        let ctx_a = ws_a.start_run("exp", Some(parent.id())).await.unwrap();
        let ctx_b = ws_b.start_run("exp", Some(parent.id())).await.unwrap();

        let guard_a = RegistrationGuard::new(Arc::new(ws_a), RegistrationSettings::default());
        let guard_b = RegistrationGuard::new(Arc::new(ws_b), RegistrationSettings::default());
        let identity = RunIdentity::new(parent.id())
            .with_build_id(Some("123".into()))
            .with_parent(Some(parent.id().to_string()));
        let location = Path::new("./outputs/model.pkl");

        guard_a
            .register_artifact(ctx_a.as_ref(), &identity, "model.pkl", location)
            .await
            .unwrap();
        let second = guard_b
            .register_artifact(ctx_b.as_ref(), &identity, "model.pkl", location)
            .await;
        assert!(matches!(
            second,
            Err(TrainflowError::Registration(RegistrationError::AlreadyRegistered { .. }))
        ));

        let reopened = LocalWorkspace::open(dir.path(), "ws").await.unwrap();
        let records = reopened.registrations().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].version, 1);
        assert_eq!(reopened.stats().await.runs, 3);
    }

    #[test]
    fn test_build_uri_concatenates() {
        assert_eq!(build_uri("https://ci/build/", "123"), "https://ci/build/123");
    }
}
