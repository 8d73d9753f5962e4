// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 trainflow contributors

//! Error recovery suggestions
//!
//! Provides actionable suggestions for recovering from errors.

/// A recovery suggestion with concrete steps
#[derive(Debug, Clone)]
pub struct RecoverySuggestion {
    /// Brief description of what to do
    pub action: String,
    /// Detailed steps
    pub steps: Vec<String>,
    /// Commands to run
    pub commands: Vec<String>,
    /// Whether this is an automated fix
    pub auto_fixable: bool,
}

impl RecoverySuggestion {
    /// Suggest installing the trainer program
    pub fn install_trainer(program: &str) -> Self {
        Self {
            action: format!("Install {}", program),
            steps: vec![
                "The train step delegates model fitting to an external program".into(),
                format!("Install '{}' and ensure it's in your PATH", program),
            ],
            commands: vec![
                "# Or point at it explicitly:".into(),
                format!("trainflow train --trainer /path/to/{} ...", program),
            ],
            auto_fixable: false,
        }
    }

    /// Suggest fixing a circular dependency
    pub fn fix_circular_dependency(steps: &[String]) -> Self {
        Self {
            action: "Remove circular dependency".into(),
            steps: vec![
                format!("Detected cycle: {}", steps.join(" → ")),
                "Review your step dependencies".into(),
                "Ensure steps form a directed acyclic graph (DAG)".into(),
            ],
            commands: vec![
                "# Visualize your pipeline:".into(),
                "trainflow graph --format mermaid".into(),
            ],
            auto_fixable: false,
        }
    }

    /// Suggest fixing a reference to an undeclared step
    pub fn fix_dangling_dependency(step: &str, dependency: &str) -> Self {
        Self {
            action: format!("Declare step '{}' or drop the reference", dependency),
            steps: vec![
                format!("Step '{}' lists '{}' in depends_on", step, dependency),
                "Step names are case sensitive".into(),
            ],
            commands: vec![
                "# List declared steps:".into(),
                "trainflow graph --format text".into(),
            ],
            auto_fixable: false,
        }
    }

    /// Explain what to do after a duplicate registration was refused
    pub fn already_registered(artifact: &str, build_id: &str) -> Self {
        Self {
            action: format!("Keep the existing registration of '{}'", artifact),
            steps: vec![
                format!("Build {} already produced a registered '{}'", build_id, artifact),
                "Retrying with the same build id will be refused again".into(),
                "Trigger a new build to register a new version".into(),
            ],
            commands: vec![],
            auto_fixable: false,
        }
    }
}

impl std::fmt::Display for RecoverySuggestion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "→ {}", self.action)?;

        for step in &self.steps {
            writeln!(f, "  {}", step)?;
        }

        if !self.commands.is_empty() {
            writeln!(f)?;
            for cmd in &self.commands {
                writeln!(f, "  {}", cmd)?;
            }
        }

        Ok(())
    }
}
