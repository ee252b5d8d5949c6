//! Configuration for loop runs.
//!
//! Persistent settings live in `.stoker/config.toml`; CLI flags override
//! them into an immutable [`RunConfig`] for the duration of one invocation.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

/// Model aliases accepted by the agent CLI.
pub const KNOWN_MODELS: &[&str] = &["sonnet", "opus", "haiku"];

/// Configuration for the execute loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopSection {
    /// Max agent invocations per execute run.
    #[serde(default = "default_loop_max")]
    pub max_iterations: u32,
    /// Default model alias.
    #[serde(default = "default_model")]
    pub model: String,
}

fn default_loop_max() -> u32 {
    6
}

fn default_model() -> String {
    "sonnet".to_string()
}

impl Default for LoopSection {
    fn default() -> Self {
        Self {
            max_iterations: default_loop_max(),
            model: default_model(),
        }
    }
}

/// Configuration for the planning loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSection {
    /// Max agent invocations per planning run.
    #[serde(default = "default_plan_max")]
    pub max_iterations: u32,
    /// Every Nth planning iteration runs the compaction prompt instead.
    /// 0 disables the cleanup pass.
    #[serde(default = "default_cleanup_every")]
    pub cleanup_every: u32,
}

fn default_plan_max() -> u32 {
    10
}

fn default_cleanup_every() -> u32 {
    5
}

impl Default for PlanSection {
    fn default() -> Self {
        Self {
            max_iterations: default_plan_max(),
            cleanup_every: default_cleanup_every(),
        }
    }
}

/// Configuration for the agent process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSection {
    /// Agent CLI command.
    #[serde(default = "default_agent_command")]
    pub command: String,
    /// Marker line that signals completion. Matched against whole trimmed
    /// lines only.
    #[serde(default = "default_completion_marker")]
    pub completion_marker: String,
    /// Wall-clock limit for a single invocation, in seconds.
    #[serde(default = "default_total_timeout")]
    pub total_timeout_secs: u64,
    /// Output substrings that mark a failed invocation as fatal.
    #[serde(default = "default_fatal_patterns")]
    pub fatal_patterns: Vec<String>,
    /// Exit codes that mark a failed invocation as fatal.
    #[serde(default)]
    pub fatal_exit_codes: Vec<i32>,
}

fn default_agent_command() -> String {
    "claude".to_string()
}

fn default_completion_marker() -> String {
    "LOOP_COMPLETE".to_string()
}

fn default_total_timeout() -> u64 {
    1800 // 30 minutes per invocation
}

fn default_fatal_patterns() -> Vec<String> {
    vec![
        "workspace corrupted".to_string(),
        "unrecoverable error".to_string(),
        "repository is in a broken state".to_string(),
    ]
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            command: default_agent_command(),
            completion_marker: default_completion_marker(),
            total_timeout_secs: default_total_timeout(),
            fatal_patterns: default_fatal_patterns(),
            fatal_exit_codes: Vec::new(),
        }
    }
}

impl AgentSection {
    /// Returns the total timeout as a Duration.
    pub fn total_timeout(&self) -> Duration {
        Duration::from_secs(self.total_timeout_secs)
    }
}

/// Configuration for git integration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitSection {
    /// Target branch for pull requests.
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    /// Commit locally, skip branch/push/PR creation.
    #[serde(default)]
    pub local: bool,
}

fn default_base_branch() -> String {
    "main".to_string()
}

impl Default for GitSection {
    fn default() -> Self {
        Self {
            base_branch: default_base_branch(),
            local: false,
        }
    }
}

/// Configuration for the Docker sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSection {
    /// Docker image used by `start`, `sandbox`, and `burn --sandbox`.
    #[serde(default = "default_sandbox_image")]
    pub image: String,
}

fn default_sandbox_image() -> String {
    "stoker-dev".to_string()
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            image: default_sandbox_image(),
        }
    }
}

/// Top-level persistent configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StokerConfig {
    /// Execute-loop configuration.
    #[serde(rename = "loop", default)]
    pub exec: LoopSection,
    /// Planning-loop configuration.
    #[serde(default)]
    pub plan: PlanSection,
    /// Agent process configuration.
    #[serde(default)]
    pub agent: AgentSection,
    /// Git integration configuration.
    #[serde(default)]
    pub git: GitSection,
    /// Docker sandbox configuration.
    #[serde(default)]
    pub sandbox: SandboxSection,
}

impl StokerConfig {
    /// Loads configuration from a TOML file, falling back to defaults when
    /// the file is absent.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse {}: {}", path.display(), e)))
    }
}

/// Immutable configuration for a single run.
///
/// Built once from [`StokerConfig`] plus CLI overrides, then passed by
/// reference into the loop controller and phase orchestrator. Never mutated
/// mid-loop.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Model alias passed to the agent.
    pub model: String,
    /// Budget for the execute phase.
    pub exec_max: u32,
    /// Budget for the plan phase.
    pub plan_max: u32,
    /// Cleanup cadence during planning (0 = never).
    pub cleanup_every: u32,
    /// Commit locally, skip branch/push/PR creation.
    pub local: bool,
    /// Run inside the Docker sandbox.
    pub sandbox: bool,
}

impl RunConfig {
    /// Derives a run configuration from persistent settings.
    pub fn from_config(config: &StokerConfig) -> Self {
        Self {
            model: config.exec.model.clone(),
            exec_max: config.exec.max_iterations,
            plan_max: config.plan.max_iterations,
            cleanup_every: config.plan.cleanup_every,
            local: config.git.local,
            sandbox: false,
        }
    }

    /// Overrides the model.
    pub fn with_model(mut self, model: Option<String>) -> Self {
        if let Some(model) = model {
            self.model = model;
        }
        self
    }

    /// Overrides the execute budget.
    pub fn with_exec_max(mut self, max: Option<u32>) -> Self {
        if let Some(max) = max {
            self.exec_max = max;
        }
        self
    }

    /// Overrides the plan budget.
    pub fn with_plan_max(mut self, max: Option<u32>) -> Self {
        if let Some(max) = max {
            self.plan_max = max;
        }
        self
    }

    /// Sets local-commit-only mode.
    pub fn with_local(mut self, local: bool) -> Self {
        self.local = self.local || local;
        self
    }

    /// Sets sandbox mode.
    pub fn with_sandbox(mut self, sandbox: bool) -> Self {
        self.sandbox = sandbox;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_has_sensible_defaults() {
        let config = StokerConfig::default();

        assert_eq!(config.exec.max_iterations, 6);
        assert_eq!(config.exec.model, "sonnet");
        assert_eq!(config.plan.max_iterations, 10);
        assert_eq!(config.plan.cleanup_every, 5);
        assert_eq!(config.agent.command, "claude");
        assert_eq!(config.agent.completion_marker, "LOOP_COMPLETE");
        assert_eq!(config.agent.total_timeout_secs, 1800);
        assert_eq!(config.git.base_branch, "main");
        assert!(!config.git.local);
    }

    #[test]
    fn config_deserializes_from_toml() {
        let toml = r#"
            [loop]
            max_iterations = 12
            model = "opus"

            [plan]
            max_iterations = 20
            cleanup_every = 3

            [agent]
            completion_marker = "ALL_DONE"

            [git]
            local = true
        "#;

        let config: StokerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.exec.max_iterations, 12);
        assert_eq!(config.exec.model, "opus");
        assert_eq!(config.plan.max_iterations, 20);
        assert_eq!(config.plan.cleanup_every, 3);
        assert_eq!(config.agent.completion_marker, "ALL_DONE");
        assert!(config.git.local);
        // Unspecified sections keep defaults
        assert_eq!(config.agent.command, "claude");
        assert_eq!(config.sandbox.image, "stoker-dev");
    }

    #[test]
    fn load_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = StokerConfig::load(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config.exec.max_iterations, 6);
    }

    #[test]
    fn run_config_applies_overrides() {
        let config = StokerConfig::default();
        let run = RunConfig::from_config(&config)
            .with_model(Some("haiku".to_string()))
            .with_exec_max(Some(3))
            .with_plan_max(None)
            .with_local(true);

        assert_eq!(run.model, "haiku");
        assert_eq!(run.exec_max, 3);
        assert_eq!(run.plan_max, 10);
        assert!(run.local);
        assert!(!run.sandbox);
    }

    #[test]
    fn run_config_none_overrides_keep_config_values() {
        let config = StokerConfig::default();
        let run = RunConfig::from_config(&config)
            .with_model(None)
            .with_exec_max(None);

        assert_eq!(run.model, "sonnet");
        assert_eq!(run.exec_max, 6);
    }
}
