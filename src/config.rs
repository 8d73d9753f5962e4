// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Runtime configuration
//!
//! Everything read from the environment is read once, here, and passed
//! down explicitly.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::errors::{TrainflowError, TrainflowResult};
use crate::registration::RegistrationSettings;

/// Default regularization strength when config.json does not set one
pub const DEFAULT_ALPHA: f64 = 0.5;

/// Default artifact name for the trained model
pub const DEFAULT_MODEL_NAME: &str = "sklearn_regression_model.pkl";

/// Where the process is running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ExecutionMode {
    /// On a developer machine, outside any pipeline run
    #[default]
    Local,
    /// Inside a step run scheduled by the backend
    Remote,
}

impl std::fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// Settings resolved at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub mode: ExecutionMode,
    pub workspace_name: String,
    pub experiment_name: String,
    pub resource_group: Option<String>,
    pub subscription_id: Option<String>,
    /// `BUILD_BUILDID` of the triggering build
    pub build_id: Option<String>,
    /// `BUILDURI_BASE`; the build id is appended to it
    pub build_uri_base: Option<String>,
    pub datastore_name: Option<String>,
    /// Run the backend scheduled this process for (remote mode)
    pub current_run_id: Option<String>,
    /// Directory of the local workspace store
    pub workspace_dir: PathBuf,
    pub model_area: String,
    pub model_type: String,
}

impl Settings {
    /// Resolve settings from the process environment
    ///
    /// In local mode a `.env` file in the working directory is loaded first;
    /// variables already set in the environment win.
    pub fn from_env(mode: ExecutionMode, workspace_dir: Option<PathBuf>) -> Self {
        if mode == ExecutionMode::Local {
            match dotenvy::dotenv() {
                Ok(path) => tracing::debug!(path = %path.display(), "Loaded .env"),
                Err(e) if e.not_found() => {}
                Err(e) => tracing::warn!(error = %e, "Failed to load .env"),
            }
        }

        Self::from_lookup(mode, workspace_dir, |key| std::env::var(key).ok())
    }

    /// Resolve settings through an arbitrary variable lookup
    pub fn from_lookup<F>(mode: ExecutionMode, workspace_dir: Option<PathBuf>, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let workspace_dir = workspace_dir
            .or_else(|| var("TRAINFLOW_WORKSPACE_DIR").map(PathBuf::from))
            .unwrap_or_else(default_workspace_dir);

        Self {
            mode,
            workspace_name: var("WORKSPACE_NAME").unwrap_or_else(|| "local".into()),
            experiment_name: var("EXPERIMENT_NAME").unwrap_or_else(|| "trainflow".into()),
            resource_group: var("RESOURCE_GROUP"),
            subscription_id: var("SUBSCRIPTION_ID"),
            build_id: var("BUILD_BUILDID"),
            build_uri_base: var("BUILDURI_BASE"),
            datastore_name: var("DATASTORE_NAME"),
            current_run_id: var("TRAINFLOW_RUN_ID"),
            workspace_dir,
            model_area: var("MODEL_AREA").unwrap_or_else(|| "diabetes".into()),
            model_type: var("MODEL_TYPE").unwrap_or_else(|| "regression".into()),
        }
    }

    /// Inputs for the registration guard
    pub fn registration(&self) -> RegistrationSettings {
        RegistrationSettings {
            area: self.model_area.clone(),
            model_type: self.model_type.clone(),
            build_uri_base: self.build_uri_base.clone(),
        }
    }
}

fn default_workspace_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "trainflow", "trainflow")
        .map(|dirs| dirs.data_dir().join("workspace"))
        .unwrap_or_else(|| PathBuf::from(".trainflow"))
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    training: TrainingSection,
}

#[derive(Debug, Default, Deserialize)]
struct TrainingSection {
    alpha: Option<f64>,
}

/// Hyper-parameters for the train step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingConfig {
    pub alpha: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self { alpha: DEFAULT_ALPHA }
    }
}

impl TrainingConfig {
    /// Load from a `config.json` file
    ///
    /// A missing file or a missing `training.alpha` both yield the default.
    pub fn load(path: &Path) -> TrainflowResult<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No training config, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| TrainflowError::FileReadError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> TrainflowResult<Self> {
        let file: ConfigFile = serde_json::from_str(json)?;
        let alpha = file.training.alpha.unwrap_or(DEFAULT_ALPHA);

        if !alpha.is_finite() || alpha < 0.0 {
            return Err(TrainflowError::configuration_with_help(
                format!("training.alpha must be a non-negative number, got {}", alpha),
                "Set training.alpha in config.json, e.g. {\"training\": {\"alpha\": 0.5}}",
            ));
        }

        Ok(Self { alpha })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_settings_from_lookup() {
        let settings = Settings::from_lookup(
            ExecutionMode::Remote,
            None,
            lookup(&[
                ("WORKSPACE_NAME", "mlops-ws"),
                ("EXPERIMENT_NAME", "diabetes"),
                ("BUILD_BUILDID", "123"),
                ("BUILDURI_BASE", "https://ci/build/"),
                ("DATASTORE_NAME", "blobstore"),
                ("TRAINFLOW_WORKSPACE_DIR", "/tmp/ws"),
                ("RESOURCE_GROUP", ""),
            ]),
        );

        assert_eq!(settings.mode, ExecutionMode::Remote);
        assert_eq!(settings.workspace_name, "mlops-ws");
        assert_eq!(settings.experiment_name, "diabetes");
        assert_eq!(settings.build_id.as_deref(), Some("123"));
        assert_eq!(settings.datastore_name.as_deref(), Some("blobstore"));
        assert_eq!(settings.workspace_dir, PathBuf::from("/tmp/ws"));
        // empty values count as unset
        assert!(settings.resource_group.is_none());

        let registration = settings.registration();
        assert_eq!(registration.area, "diabetes");
        assert_eq!(registration.build_uri_base.as_deref(), Some("https://ci/build/"));
    }

    #[test]
    fn test_explicit_workspace_dir_wins() {
        let settings = Settings::from_lookup(
            ExecutionMode::Local,
            Some(PathBuf::from("custom")),
            lookup(&[("TRAINFLOW_WORKSPACE_DIR", "/tmp/ws")]),
        );
        assert_eq!(settings.workspace_dir, PathBuf::from("custom"));
        assert_eq!(settings.workspace_name, "local");
        assert!(settings.build_id.is_none());
    }

    #[test]
    fn test_alpha_defaults() {
        assert_eq!(TrainingConfig::from_json("{}").unwrap().alpha, 0.5);
        assert_eq!(
            TrainingConfig::from_json(r#"{"training": {}}"#).unwrap().alpha,
            0.5
        );
        assert_eq!(
            TrainingConfig::from_json(r#"{"training": {"alpha": 0.1}}"#)
                .unwrap()
                .alpha,
            0.1
        );
        assert_eq!(
            TrainingConfig::load(Path::new("does/not/exist.json")).unwrap(),
            TrainingConfig::default()
        );
    }

    #[test]
    fn test_negative_alpha_is_rejected() {
        let result = TrainingConfig::from_json(r#"{"training": {"alpha": -1}}"#);
        assert!(matches!(result, Err(TrainflowError::Configuration { .. })));
    }
}
