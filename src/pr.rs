//! Git commit and pull-request lifecycle around loop runs.
//!
//! Each run commits on its own branch; unless local mode is set, the branch
//! is pushed and a PR opened via the `gh` CLI when the loop stops.

use std::path::PathBuf;
use std::process::Command;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Information about a pull request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    /// PR number.
    pub number: u64,
    /// PR URL.
    pub url: String,
    /// PR title.
    pub title: String,
    /// Target branch.
    pub base_branch: String,
    /// Source branch.
    pub head_branch: String,
}

/// Manager for git commits and pull requests.
pub struct PRManager {
    /// Repository path.
    repo_path: PathBuf,
}

impl PRManager {
    /// Creates a new PR manager for the given repository.
    pub fn new(repo_path: PathBuf) -> Self {
        Self { repo_path }
    }

    fn git(&self, args: &[&str]) -> Result<std::process::Output> {
        Ok(Command::new("git")
            .current_dir(&self.repo_path)
            .args(args)
            .output()?)
    }

    /// Returns the currently checked-out branch name.
    pub fn current_branch(&self) -> Result<String> {
        let output = self.git(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        if !output.status.success() {
            return Err(Error::Git(format!(
                "failed to read current branch: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Creates and checks out a new branch.
    pub fn create_branch(&self, name: &str) -> Result<()> {
        let output = self.git(&["checkout", "-b", name])?;
        if !output.status.success() {
            return Err(Error::Git(format!(
                "failed to create branch {}: {}",
                name,
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(())
    }

    /// Commits any uncommitted changes.
    ///
    /// Returns the commit hash, or `None` when the tree was clean.
    pub fn commit_changes(&self, message: &str) -> Result<Option<String>> {
        let status = self.git(&["status", "--porcelain"])?;
        if String::from_utf8_lossy(&status.stdout).trim().is_empty() {
            return Ok(None);
        }

        let add = self.git(&["add", "-A"])?;
        if !add.status.success() {
            return Err(Error::Git(format!(
                "failed to stage changes: {}",
                String::from_utf8_lossy(&add.stderr)
            )));
        }

        let commit = self.git(&["commit", "-m", message])?;
        if !commit.status.success() {
            let stderr = String::from_utf8_lossy(&commit.stderr);
            if stderr.contains("nothing to commit") {
                return Ok(None);
            }
            return Err(Error::Git(format!("failed to commit: {}", stderr)));
        }

        let rev = self.git(&["rev-parse", "HEAD"])?;
        Ok(Some(
            String::from_utf8_lossy(&rev.stdout).trim().to_string(),
        ))
    }

    /// Pushes a branch to origin.
    pub fn push_branch(&self, branch_name: &str) -> Result<()> {
        let output = self.git(&["push", "-u", "origin", branch_name])?;
        if !output.status.success() {
            return Err(Error::Git(format!(
                "failed to push branch: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(())
    }

    /// Creates a pull request using the gh CLI.
    pub fn create_pr(
        &self,
        title: &str,
        body: &str,
        head_branch: &str,
        base_branch: &str,
    ) -> Result<PullRequest> {
        let output = Command::new("gh")
            .current_dir(&self.repo_path)
            .args([
                "pr",
                "create",
                "--title",
                title,
                "--body",
                body,
                "--head",
                head_branch,
                "--base",
                base_branch,
            ])
            .output()?;

        if !output.status.success() {
            return Err(Error::Git(format!(
                "failed to create PR: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        let url = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let number = url
            .split('/')
            .next_back()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);

        Ok(PullRequest {
            number,
            url,
            title: title.to_string(),
            base_branch: base_branch.to_string(),
            head_branch: head_branch.to_string(),
        })
    }

    /// Returns the most recently opened PR, if any.
    pub fn latest_open_pr(&self) -> Result<Option<PullRequest>> {
        let output = Command::new("gh")
            .current_dir(&self.repo_path)
            .args([
                "pr",
                "list",
                "--state",
                "open",
                "--limit",
                "1",
                "--json",
                "number,url,title,baseRefName,headRefName",
            ])
            .output()?;

        if !output.status.success() {
            return Err(Error::Git(format!(
                "failed to list PRs: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        #[derive(Deserialize)]
        struct GhPr {
            number: u64,
            url: String,
            title: String,
            #[serde(rename = "baseRefName")]
            base_ref_name: String,
            #[serde(rename = "headRefName")]
            head_ref_name: String,
        }

        let prs: Vec<GhPr> = serde_json::from_slice(&output.stdout)?;
        Ok(prs.into_iter().next().map(|pr| PullRequest {
            number: pr.number,
            url: pr.url,
            title: pr.title,
            base_branch: pr.base_ref_name,
            head_branch: pr.head_ref_name,
        }))
    }

    /// Merges a PR and deletes its branch.
    pub fn merge_pr(&self, number: u64) -> Result<()> {
        let output = Command::new("gh")
            .current_dir(&self.repo_path)
            .args([
                "pr",
                "merge",
                &number.to_string(),
                "--merge",
                "--delete-branch",
            ])
            .output()?;

        if !output.status.success() {
            return Err(Error::Git(format!(
                "failed to merge PR #{}: {}",
                number,
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        tracing::info!(pr_number = number, "merged PR");
        Ok(())
    }
}
