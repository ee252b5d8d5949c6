//! Docker sandbox entry points.
//!
//! The sandbox mounts the project at `/work` and runs either an interactive
//! shell or a nested `stoker` command inside the container.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::Command;

use crate::error::{Error, Result};

/// Docker-backed sandbox for loop runs.
pub struct DockerSandbox {
    image: String,
    project_dir: PathBuf,
}

impl DockerSandbox {
    /// Creates a sandbox for the given project directory and image.
    pub fn new(project_dir: impl Into<PathBuf>, image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            project_dir: project_dir.into(),
        }
    }

    fn base_args(&self) -> Vec<String> {
        vec![
            "run".to_string(),
            "--rm".to_string(),
            "-v".to_string(),
            format!("{}:/work", self.project_dir.display()),
            "-w".to_string(),
            "/work".to_string(),
        ]
    }

    /// Opens an interactive shell inside the container.
    pub async fn interactive_shell(&self) -> Result<i32> {
        let mut args = self.base_args();
        args.insert(1, "-it".to_string());
        args.push(self.image.clone());
        args.push("bash".to_string());
        self.run_docker(&args).await
    }

    /// Runs a stoker command inside the container.
    pub async fn run_command(&self, stoker_args: &[String]) -> Result<i32> {
        let mut args = self.base_args();
        args.push(self.image.clone());
        args.push("stoker".to_string());
        args.extend_from_slice(stoker_args);
        self.run_docker(&args).await
    }

    async fn run_docker(&self, args: &[String]) -> Result<i32> {
        tracing::info!(image = %self.image, "starting docker sandbox");

        let status = Command::new("docker")
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .map_err(|e| Error::Sandbox(format!("failed to run docker: {}", e)))?;

        Ok(status.code().unwrap_or(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_args_mount_the_project() {
        let sandbox = DockerSandbox::new("/tmp/project", "stoker-dev");
        let args = sandbox.base_args();

        assert_eq!(args[0], "run");
        assert!(args.contains(&"/tmp/project:/work".to_string()));
        assert!(args.contains(&"-w".to_string()));
    }
}
