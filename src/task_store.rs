//! Durable task queue backed by per-task JSON files.
//!
//! Pending tasks live in `tasks/new/`, completed tasks in `tasks/done/`, one
//! file per task. Every mutation hits disk before returning, so a run killed
//! between iterations resumes from persisted state. Listings re-read the
//! directory on every call; nothing is cached across iterations, which also
//! tolerates tasks being added or edited by hand between runs.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Status of a tracked task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in the queue.
    #[default]
    New,
    /// Currently being worked by the agent. Never persisted: an interrupted
    /// run leaves the task in `new/`, so it resumes as pending work.
    InProgress,
    /// Completed and relocated to `done/`.
    Done,
}

/// A unit of work tracked by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique id within the store (e.g., "TASK-0001").
    pub id: String,
    /// Insertion order, assigned by the store on enqueue.
    #[serde(default)]
    pub seq: u64,
    /// Free-text description or feature spec.
    pub description: String,
    /// Current status.
    #[serde(default)]
    pub status: TaskStatus,
    /// RFC 3339 creation timestamp.
    #[serde(default)]
    pub created_at: Option<String>,
}

impl Task {
    /// Creates a new pending task.
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            seq: 0,
            description: description.into(),
            status: TaskStatus::New,
            created_at: None,
        }
    }
}

/// File-backed task queue.
pub struct TaskStore {
    new_dir: PathBuf,
    done_dir: PathBuf,
}

impl TaskStore {
    /// Opens a store rooted at the given directories, creating them if
    /// needed.
    pub fn open(new_dir: impl Into<PathBuf>, done_dir: impl Into<PathBuf>) -> Result<Self> {
        let store = Self {
            new_dir: new_dir.into(),
            done_dir: done_dir.into(),
        };
        fs::create_dir_all(&store.new_dir)?;
        fs::create_dir_all(&store.done_dir)?;
        Ok(store)
    }

    /// Enqueues a task at the back of the pending queue.
    ///
    /// Assigns the next sequence number and persists immediately. Fails with
    /// [`Error::TaskConflict`] when the id already exists anywhere in the
    /// store; ids are unique across pending and done tasks.
    pub fn enqueue(&self, mut task: Task) -> Result<Task> {
        validate_id(&task.id)?;

        if self.task_file(&self.new_dir, &task.id).exists()
            || self.task_file(&self.done_dir, &task.id).exists()
        {
            return Err(Error::TaskConflict(task.id));
        }

        task.seq = self.next_seq()?;
        task.status = TaskStatus::New;
        task.created_at = Some(chrono::Utc::now().to_rfc3339());

        self.write_task(&self.new_dir, &task)?;
        tracing::debug!(id = %task.id, seq = task.seq, "enqueued task");
        Ok(task)
    }

    /// Returns pending tasks in insertion order.
    pub fn list_pending(&self) -> Result<Vec<Task>> {
        self.read_tasks(&self.new_dir)
    }

    /// Returns completed tasks in insertion order.
    pub fn list_done(&self) -> Result<Vec<Task>> {
        self.read_tasks(&self.done_dir)
    }

    /// Returns true when no pending work remains.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.list_pending()?.is_empty())
    }

    /// Returns the front of the pending queue, if any.
    pub fn next_pending(&self) -> Result<Option<Task>> {
        Ok(self.list_pending()?.into_iter().next())
    }

    /// Relocates a pending task to the done collection.
    ///
    /// Fails with [`Error::TaskNotFound`] when the id is not pending —
    /// including when it was already marked done, so a second call on the
    /// same id is rejected rather than duplicating the done entry.
    pub fn mark_done(&self, id: &str) -> Result<()> {
        let source = self.task_file(&self.new_dir, id);
        if !source.exists() {
            return Err(Error::TaskNotFound(id.to_string()));
        }

        let mut task = read_task(&source)?;
        task.status = TaskStatus::Done;
        self.write_task(&self.done_dir, &task)?;
        fs::remove_file(&source)?;
        tracing::debug!(id = %id, "task marked done");
        Ok(())
    }

    /// Moves all done tasks into `dest`, returning how many were moved.
    pub fn archive_done(&self, dest: &Path) -> Result<usize> {
        fs::create_dir_all(dest)?;
        let mut moved = 0;
        for task in self.list_done()? {
            let source = self.task_file(&self.done_dir, &task.id);
            fs::rename(&source, dest.join(format!("{}.json", task.id)))?;
            moved += 1;
        }
        Ok(moved)
    }

    fn next_seq(&self) -> Result<u64> {
        let mut max = 0;
        for task in self
            .read_tasks(&self.new_dir)?
            .into_iter()
            .chain(self.read_tasks(&self.done_dir)?)
        {
            max = max.max(task.seq);
        }
        Ok(max + 1)
    }

    fn task_file(&self, dir: &Path, id: &str) -> PathBuf {
        dir.join(format!("{id}.json"))
    }

    /// Writes a task durably: temp file, fsync, then rename into place.
    fn write_task(&self, dir: &Path, task: &Task) -> Result<()> {
        let target = self.task_file(dir, &task.id);
        let tmp = dir.join(format!("{}.json.tmp", task.id));

        let json = serde_json::to_string_pretty(task)?;
        fs::write(&tmp, json)?;
        fs::File::open(&tmp)?.sync_all()?;
        fs::rename(&tmp, &target)?;
        Ok(())
    }

    fn read_tasks(&self, dir: &Path) -> Result<Vec<Task>> {
        let mut tasks = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            tasks.push(read_task(&path)?);
        }
        tasks.sort_by(|a, b| a.seq.cmp(&b.seq).then_with(|| a.id.cmp(&b.id)));
        Ok(tasks)
    }
}

fn read_task(path: &Path) -> Result<Task> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id.contains(['/', '\\']) || id.contains("..") {
        return Err(Error::Config(format!("invalid task id: {id:?}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> TaskStore {
        TaskStore::open(dir.path().join("new"), dir.path().join("done")).unwrap()
    }

    #[test]
    fn enqueue_and_list_preserves_fifo_order() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.enqueue(Task::new("TASK-b", "second")).unwrap();
        store.enqueue(Task::new("TASK-a", "first")).unwrap();
        store.enqueue(Task::new("TASK-c", "third")).unwrap();

        let ids: Vec<String> = store
            .list_pending()
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec!["TASK-b", "TASK-a", "TASK-c"]);
    }

    #[test]
    fn enqueue_duplicate_id_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.enqueue(Task::new("TASK-1", "work")).unwrap();
        let err = store.enqueue(Task::new("TASK-1", "again")).unwrap_err();
        assert!(matches!(err, Error::TaskConflict(id) if id == "TASK-1"));
    }

    #[test]
    fn enqueue_rejects_done_id_too() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.enqueue(Task::new("TASK-1", "work")).unwrap();
        store.mark_done("TASK-1").unwrap();

        let err = store.enqueue(Task::new("TASK-1", "again")).unwrap_err();
        assert!(matches!(err, Error::TaskConflict(_)));
    }

    #[test]
    fn mark_done_relocates_without_deleting() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.enqueue(Task::new("TASK-1", "work")).unwrap();
        store.mark_done("TASK-1").unwrap();

        assert!(store.is_empty().unwrap());
        let done = store.list_done().unwrap();
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].id, "TASK-1");
        assert_eq!(done[0].status, TaskStatus::Done);
    }

    #[test]
    fn mark_done_unknown_id_fails() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let err = store.mark_done("TASK-missing").unwrap_err();
        assert!(matches!(err, Error::TaskNotFound(_)));
    }

    #[test]
    fn mark_done_twice_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.enqueue(Task::new("TASK-1", "work")).unwrap();
        store.mark_done("TASK-1").unwrap();

        let err = store.mark_done("TASK-1").unwrap_err();
        assert!(matches!(err, Error::TaskNotFound(_)));
        assert_eq!(store.list_done().unwrap().len(), 1);
    }

    #[test]
    fn reload_round_trips_pending_set_and_order() {
        let dir = TempDir::new().unwrap();
        {
            let store = open_store(&dir);
            store.enqueue(Task::new("TASK-1", "first")).unwrap();
            store.enqueue(Task::new("TASK-2", "second")).unwrap();
            store.enqueue(Task::new("TASK-3", "third")).unwrap();
            store.mark_done("TASK-2").unwrap();
        }

        // Fresh store over the same directories, simulating a restart.
        let store = open_store(&dir);
        let ids: Vec<String> = store
            .list_pending()
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec!["TASK-1", "TASK-3"]);
        assert_eq!(store.list_done().unwrap().len(), 1);
    }

    #[test]
    fn external_edits_are_picked_up_between_reads() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store.enqueue(Task::new("TASK-1", "work")).unwrap();
        assert!(!store.is_empty().unwrap());

        // A human removes the task file by hand between iterations.
        fs::remove_file(dir.path().join("new").join("TASK-1.json")).unwrap();
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn seq_survives_done_tasks() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.enqueue(Task::new("TASK-1", "first")).unwrap();
        store.mark_done("TASK-1").unwrap();
        let task = store.enqueue(Task::new("TASK-2", "second")).unwrap();

        // Sequence numbers keep increasing past completed tasks.
        assert_eq!(task.seq, 2);
    }

    #[test]
    fn archive_moves_done_tasks() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.enqueue(Task::new("TASK-1", "work")).unwrap();
        store.mark_done("TASK-1").unwrap();

        let archive = dir.path().join("archive");
        let moved = store.archive_done(&archive).unwrap();
        assert_eq!(moved, 1);
        assert!(archive.join("TASK-1.json").exists());
        assert!(store.list_done().unwrap().is_empty());
    }

    #[test]
    fn invalid_task_ids_are_rejected() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        for id in ["", "a/b", "..", "a\\b"] {
            let err = store.enqueue(Task::new(id, "bad")).unwrap_err();
            assert!(matches!(err, Error::Config(_)), "id {id:?} was accepted");
        }
    }
}
