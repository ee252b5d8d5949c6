//! Error types for the stoker loop orchestrator.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for loop operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid configuration, including missing required input files.
    #[error("configuration error: {0}")]
    Config(String),

    /// The workspace has not been initialized.
    #[error("workspace not initialized at {0} (run `stoker init` first)")]
    Uninitialized(PathBuf),

    /// A task id was not found among pending tasks.
    #[error("task not found: {0}")]
    TaskNotFound(String),

    /// A task with the same id already exists in the store.
    #[error("task already exists: {0}")]
    TaskConflict(String),

    /// The agent failed in a way classified as unrecoverable.
    #[error("fatal agent failure: {0}")]
    AgentFatal(String),

    /// Failed to launch or wait on the agent process.
    #[error("failed to run agent: {0}")]
    AgentSpawn(String),

    /// Git operation failed.
    #[error("git operation failed: {0}")]
    Git(String),

    /// Sandbox operation failed.
    #[error("sandbox error: {0}")]
    Sandbox(String),

    /// IO error during workspace operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for loop operations.
pub type Result<T> = std::result::Result<T, Error>;
