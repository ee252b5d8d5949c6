//! Workspace layout, initialization, and maintenance.
//!
//! A project is initialized with a `.stoker/` directory holding config and
//! prompt files, the task queue, the progress log, and per-run agent logs.

use std::fs;
use std::path::{Path, PathBuf};

use crate::controller::PhasePrompts;
use crate::error::{Error, Result};
use crate::progress::ProgressLog;
use crate::task_store::TaskStore;

/// Default execute-loop prompt, written by `init`.
const DEFAULT_PROMPT: &str = "\
# Loop Prompt

Work on the current task below. Make the smallest change that moves it
forward, run the project's tests, and commit your work.

When — and only when — the task's acceptance criteria are fully met, print
the completion marker on a line of its own.
";

/// Default planning prompt, written by `init`.
const DEFAULT_PLAN_PROMPT: &str = "\
# Planning Prompt

Read the vision below and break it into small, independently shippable
tasks. For each task, write one JSON file into .stoker/tasks/new/ named
after its id, containing `id`, `description`, and `status` fields.

When the vision is fully covered by queued tasks, print the completion
marker on a line of its own.
";

/// Default plan-cleanup prompt, written by `init`.
const DEFAULT_CLEANUP_PROMPT: &str = "\
# Plan Cleanup Prompt

Review the queued task files in .stoker/tasks/new/. Merge overlapping
tasks, split anything too large to land in one sitting, and tighten vague
descriptions. Do not delete completed work.
";

/// Default vision template, written by `init`.
const DEFAULT_VISION_TEMPLATE: &str = "\
# Vision

Describe what you want built: the user-facing behavior, the constraints,
and what is explicitly out of scope. The planning loop turns this document
into the task queue.
";

/// Filesystem layout of a stoker workspace.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Name of the workspace directory created under the project root.
    pub const DIR_NAME: &'static str = ".stoker";

    /// Creates a workspace handle rooted at the given project directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the project root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the `.stoker` directory.
    pub fn dir(&self) -> PathBuf {
        self.root.join(Self::DIR_NAME)
    }

    /// Returns true when the workspace has been initialized.
    pub fn exists(&self) -> bool {
        self.dir().is_dir()
    }

    /// Fails with [`Error::Uninitialized`] unless `init` has run here.
    pub fn require(&self) -> Result<()> {
        if self.exists() {
            Ok(())
        } else {
            Err(Error::Uninitialized(self.root.clone()))
        }
    }

    /// Persistent configuration file.
    pub fn config_file(&self) -> PathBuf {
        self.dir().join("config.toml")
    }

    /// Execute-loop prompt.
    pub fn prompt_file(&self) -> PathBuf {
        self.dir().join("config").join("prompt.md")
    }

    /// Vision document consumed by the planning loop.
    pub fn vision_file(&self) -> PathBuf {
        self.dir().join("config").join("vision.md")
    }

    /// Planning prompt.
    pub fn plan_prompt_file(&self) -> PathBuf {
        self.dir().join("config").join("plan-prompt.md")
    }

    /// Plan-cleanup (compaction) prompt.
    pub fn plan_cleanup_prompt_file(&self) -> PathBuf {
        self.dir().join("config").join("plan-cleanup-prompt.md")
    }

    /// Directory of pending task files.
    pub fn new_tasks_dir(&self) -> PathBuf {
        self.dir().join("tasks").join("new")
    }

    /// Directory of completed task files.
    pub fn done_tasks_dir(&self) -> PathBuf {
        self.dir().join("tasks").join("done")
    }

    /// Archive directory for completed features.
    pub fn archive_dir(&self) -> PathBuf {
        self.dir().join("archive")
    }

    /// Append-only progress log.
    pub fn progress_file(&self) -> PathBuf {
        self.dir().join("tasks").join("progress.txt")
    }

    /// Per-run agent output logs.
    pub fn logs_dir(&self) -> PathBuf {
        self.dir().join("logs")
    }

    /// Opens the task store for this workspace.
    pub fn task_store(&self) -> Result<TaskStore> {
        TaskStore::open(self.new_tasks_dir(), self.done_tasks_dir())
    }

    /// Opens the progress log for this workspace.
    pub fn progress_log(&self) -> ProgressLog {
        ProgressLog::new(self.progress_file())
    }
}

/// Initializes the workspace directory structure and default templates.
///
/// Existing prompt and vision files are kept unless `force` is set; the task
/// queue and progress log are never overwritten.
pub fn init(workspace: &Workspace, force: bool) -> Result<()> {
    let config_dir = workspace.dir().join("config");
    fs::create_dir_all(&config_dir)?;
    fs::create_dir_all(workspace.new_tasks_dir())?;
    fs::create_dir_all(workspace.done_tasks_dir())?;
    fs::create_dir_all(workspace.archive_dir())?;
    fs::create_dir_all(workspace.logs_dir())?;

    write_template(&workspace.prompt_file(), DEFAULT_PROMPT, force)?;
    write_template(&workspace.plan_prompt_file(), DEFAULT_PLAN_PROMPT, force)?;
    write_template(
        &workspace.plan_cleanup_prompt_file(),
        DEFAULT_CLEANUP_PROMPT,
        force,
    )?;
    write_template(&workspace.vision_file(), DEFAULT_VISION_TEMPLATE, force)?;

    let progress = workspace.progress_file();
    if !progress.exists() {
        fs::write(&progress, "")?;
    }

    tracing::info!(root = ?workspace.root(), "workspace initialized");
    Ok(())
}

fn write_template(path: &Path, content: &str, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Ok(());
    }
    fs::write(path, content)?;
    Ok(())
}

/// Loads the execute-phase prompts.
pub fn load_exec_prompts(workspace: &Workspace) -> Result<PhasePrompts> {
    let path = workspace.prompt_file();
    let base = fs::read_to_string(&path).map_err(|_| {
        Error::Config(format!(
            "prompt file not found at {} (run `stoker init`)",
            path.display()
        ))
    })?;
    Ok(PhasePrompts::new(base))
}

/// Loads the plan-phase prompts, embedding the vision document.
///
/// The vision document is a hard precondition for planning: its absence is a
/// configuration error surfaced before any iteration runs.
pub fn load_plan_prompts(workspace: &Workspace) -> Result<PhasePrompts> {
    let vision_path = workspace.vision_file();
    let vision = fs::read_to_string(&vision_path).map_err(|_| {
        Error::Config(format!(
            "vision file not found at {} — write your vision there before planning",
            vision_path.display()
        ))
    })?;

    let plan_path = workspace.plan_prompt_file();
    let plan = fs::read_to_string(&plan_path).map_err(|_| {
        Error::Config(format!(
            "plan prompt not found at {} (run `stoker init`)",
            plan_path.display()
        ))
    })?;

    let base = format!("{plan}\n\n## Vision\n\n{vision}");

    let mut prompts = PhasePrompts::new(base);
    if let Ok(cleanup) = fs::read_to_string(workspace.plan_cleanup_prompt_file()) {
        prompts = prompts.with_cleanup(cleanup);
    }
    Ok(prompts)
}

/// Task queue summary for the `status` command.
#[derive(Debug, Clone)]
pub struct StatusReport {
    /// Pending task count.
    pub pending: usize,
    /// Completed task count.
    pub done: usize,
    /// Id of the next task the loop would pick up.
    pub next: Option<String>,
}

/// Summarizes the task queue.
pub fn status(workspace: &Workspace) -> Result<StatusReport> {
    let store = workspace.task_store()?;
    let pending = store.list_pending()?;
    Ok(StatusReport {
        next: pending.first().map(|t| t.id.clone()),
        pending: pending.len(),
        done: store.list_done()?.len(),
    })
}

/// Clears run logs and truncates the progress log.
///
/// The task store is preserved: clearing history must never lose queued or
/// completed work.
pub fn clear(workspace: &Workspace) -> Result<()> {
    workspace.progress_log().clear()?;

    let logs = workspace.logs_dir();
    if logs.is_dir() {
        for entry in fs::read_dir(&logs)? {
            let path = entry?.path();
            if path.is_dir() {
                fs::remove_dir_all(&path)?;
            } else {
                fs::remove_file(&path)?;
            }
        }
    }
    Ok(())
}

/// Archives completed tasks under `archive/<name>/`.
///
/// Defaults the archive name to a UTC date stamp when no feature name is
/// given. Returns the archive directory and the number of tasks moved.
pub fn archive(workspace: &Workspace, feature: Option<&str>) -> Result<(PathBuf, usize)> {
    let name = match feature {
        Some(name) => name.to_string(),
        None => chrono::Utc::now().format("%Y-%m-%d-%H%M%S").to_string(),
    };
    let dest = workspace.archive_dir().join(name);
    let moved = workspace.task_store()?.archive_done(&dest)?;
    Ok((dest, moved))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task_store::Task;
    use tempfile::TempDir;

    fn init_workspace() -> (TempDir, Workspace) {
        let dir = TempDir::new().unwrap();
        let workspace = Workspace::new(dir.path());
        init(&workspace, false).unwrap();
        (dir, workspace)
    }

    #[test]
    fn init_creates_layout_and_templates() {
        let (_dir, ws) = init_workspace();

        assert!(ws.exists());
        assert!(ws.new_tasks_dir().is_dir());
        assert!(ws.done_tasks_dir().is_dir());
        assert!(ws.prompt_file().is_file());
        assert!(ws.plan_prompt_file().is_file());
        assert!(ws.plan_cleanup_prompt_file().is_file());
        assert!(ws.vision_file().is_file());
        assert!(ws.progress_file().is_file());
        assert!(ws.require().is_ok());
    }

    #[test]
    fn init_keeps_existing_files_unless_forced() {
        let (_dir, ws) = init_workspace();
        fs::write(ws.vision_file(), "my real vision").unwrap();

        init(&ws, false).unwrap();
        assert_eq!(fs::read_to_string(ws.vision_file()).unwrap(), "my real vision");

        init(&ws, true).unwrap();
        assert!(fs::read_to_string(ws.vision_file())
            .unwrap()
            .starts_with("# Vision"));
    }

    #[test]
    fn require_fails_before_init() {
        let dir = TempDir::new().unwrap();
        let ws = Workspace::new(dir.path());
        assert!(matches!(ws.require(), Err(Error::Uninitialized(_))));
    }

    #[test]
    fn plan_prompts_embed_the_vision() {
        let (_dir, ws) = init_workspace();
        fs::write(ws.vision_file(), "Build a tiny web server.").unwrap();

        let prompts = load_plan_prompts(&ws).unwrap();
        assert!(prompts.base.contains("Build a tiny web server."));
        assert!(prompts.cleanup.is_some());
    }

    #[test]
    fn missing_vision_is_a_config_error() {
        let (_dir, ws) = init_workspace();
        fs::remove_file(ws.vision_file()).unwrap();

        let err = load_plan_prompts(&ws).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("vision"));
    }

    #[test]
    fn status_counts_tasks() {
        let (_dir, ws) = init_workspace();
        let store = ws.task_store().unwrap();
        store.enqueue(Task::new("TASK-1", "first")).unwrap();
        store.enqueue(Task::new("TASK-2", "second")).unwrap();
        store.mark_done("TASK-1").unwrap();

        let report = status(&ws).unwrap();
        assert_eq!(report.pending, 1);
        assert_eq!(report.done, 1);
        assert_eq!(report.next.as_deref(), Some("TASK-2"));
    }

    #[test]
    fn clear_truncates_logs_but_keeps_tasks() {
        let (_dir, ws) = init_workspace();
        let store = ws.task_store().unwrap();
        store.enqueue(Task::new("TASK-1", "keep me")).unwrap();
        ws.progress_log().append("some history").unwrap();
        fs::create_dir_all(ws.logs_dir().join("run-1")).unwrap();
        fs::write(ws.logs_dir().join("run-1").join("iter-001.log"), "out").unwrap();

        clear(&ws).unwrap();

        assert!(fs::read_to_string(ws.progress_file()).unwrap().is_empty());
        assert!(!ws.logs_dir().join("run-1").exists());
        assert_eq!(store.list_pending().unwrap().len(), 1);
    }

    #[test]
    fn archive_moves_done_tasks_under_feature_name() {
        let (_dir, ws) = init_workspace();
        let store = ws.task_store().unwrap();
        store.enqueue(Task::new("TASK-1", "done work")).unwrap();
        store.mark_done("TASK-1").unwrap();

        let (dest, moved) = archive(&ws, Some("auth")).unwrap();
        assert_eq!(moved, 1);
        assert!(dest.ends_with("auth"));
        assert!(dest.join("TASK-1.json").exists());
        assert!(store.list_done().unwrap().is_empty());
    }
}
