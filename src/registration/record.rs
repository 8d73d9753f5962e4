// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Registration records and their tag sets

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::OnceLock;

use crate::errors::{TrainflowError, TrainflowResult};

pub const TAG_AREA: &str = "area";
pub const TAG_TYPE: &str = "type";
pub const TAG_RUN_ID: &str = "runId";
pub const TAG_EXPERIMENT_NAME: &str = "experimentName";
pub const TAG_BUILD_ID: &str = "buildId";
pub const TAG_BUILD_URI: &str = "buildUri";

const REQUIRED_KEYS: [&str; 5] = [TAG_AREA, TAG_TYPE, TAG_RUN_ID, TAG_EXPERIMENT_NAME, TAG_BUILD_ID];

fn tag_key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_.\-]*$").expect("valid tag key regex"))
}

/// Identity of the run that produced a candidate artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunIdentity {
    /// Triggering build; absent for ad-hoc and local runs
    pub build_id: Option<String>,
    /// Run that produced the artifact
    pub run_id: String,
    /// Enclosing pipeline run
    pub parent_run_id: Option<String>,
}

impl RunIdentity {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            build_id: None,
            run_id: run_id.into(),
            parent_run_id: None,
        }
    }

    pub fn with_build_id(mut self, build_id: Option<String>) -> Self {
        self.build_id = build_id;
        self
    }

    pub fn with_parent(mut self, parent_run_id: Option<String>) -> Self {
        self.parent_run_id = parent_run_id;
        self
    }
}

/// Tags attached to a registered artifact
///
/// The required keys are fields; optional keys such as `buildUri` go into
/// the extension map, which may not shadow a required key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactTags {
    pub area: String,

    #[serde(rename = "type")]
    pub model_type: String,

    #[serde(rename = "runId")]
    pub run_id: String,

    #[serde(rename = "experimentName")]
    pub experiment_name: String,

    #[serde(rename = "buildId", default, skip_serializing_if = "Option::is_none")]
    pub build_id: Option<String>,

    #[serde(flatten)]
    extensions: BTreeMap<String, String>,
}

impl ArtifactTags {
    /// Build the required tag set; every value must be non-empty
    pub fn new(
        area: impl Into<String>,
        model_type: impl Into<String>,
        run_id: impl Into<String>,
        experiment_name: impl Into<String>,
    ) -> TrainflowResult<Self> {
        let tags = Self {
            area: area.into(),
            model_type: model_type.into(),
            run_id: run_id.into(),
            experiment_name: experiment_name.into(),
            build_id: None,
            extensions: BTreeMap::new(),
        };

        for (key, value) in [
            (TAG_AREA, &tags.area),
            (TAG_TYPE, &tags.model_type),
            (TAG_RUN_ID, &tags.run_id),
            (TAG_EXPERIMENT_NAME, &tags.experiment_name),
        ] {
            if value.trim().is_empty() {
                return Err(TrainflowError::InvalidTag {
                    key: key.to_string(),
                    reason: "value is empty".into(),
                });
            }
        }

        Ok(tags)
    }

    /// Attach the build id
    pub fn with_build_id(mut self, build_id: impl Into<String>) -> Self {
        self.build_id = Some(build_id.into());
        self
    }

    /// Add an optional tag
    pub fn insert(&mut self, key: &str, value: impl Into<String>) -> TrainflowResult<()> {
        if REQUIRED_KEYS.contains(&key) {
            return Err(TrainflowError::InvalidTag {
                key: key.to_string(),
                reason: "reserved for a required tag".into(),
            });
        }
        if !tag_key_pattern().is_match(key) {
            return Err(TrainflowError::InvalidTag {
                key: key.to_string(),
                reason: "keys must start with a letter and contain only letters, digits, '_', '.' or '-'".into(),
            });
        }

        self.extensions.insert(key.to_string(), value.into());
        Ok(())
    }

    /// Look up any tag by key
    pub fn get(&self, key: &str) -> Option<&str> {
        match key {
            TAG_AREA => Some(&self.area),
            TAG_TYPE => Some(&self.model_type),
            TAG_RUN_ID => Some(&self.run_id),
            TAG_EXPERIMENT_NAME => Some(&self.experiment_name),
            TAG_BUILD_ID => self.build_id.as_deref(),
            other => self.extensions.get(other).map(String::as_str),
        }
    }

    /// Build URI, when one was attached
    pub fn build_uri(&self) -> Option<&str> {
        self.get(TAG_BUILD_URI)
    }

    /// Flatten into a plain key/value map
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map = self.extensions.clone();
        map.insert(TAG_AREA.into(), self.area.clone());
        map.insert(TAG_TYPE.into(), self.model_type.clone());
        map.insert(TAG_RUN_ID.into(), self.run_id.clone());
        map.insert(TAG_EXPERIMENT_NAME.into(), self.experiment_name.clone());
        if let Some(ref build_id) = self.build_id {
            map.insert(TAG_BUILD_ID.into(), build_id.clone());
        }
        map
    }
}

/// A registered artifact; immutable once created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationRecord {
    pub artifact_name: String,
    pub version: u32,
    pub run_id: String,
    pub artifact_location: PathBuf,
    pub tags: ArtifactTags,
    pub created_at: DateTime<Utc>,
}
