//! Append-only progress log.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Append-only, timestamped progress log.
///
/// One line per iteration outcome or phase transition. The loop only ever
/// writes to it; `stoker clear` truncates it while leaving the task store
/// untouched.
pub struct ProgressLog {
    path: PathBuf,
}

impl ProgressLog {
    /// Creates a log handle for the given file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the log file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one timestamped entry.
    pub fn append(&self, entry: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{} {}", chrono::Utc::now().to_rfc3339(), entry)?;
        file.sync_data()?;
        Ok(())
    }

    /// Truncates the log.
    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            File::create(&self.path)?;
        }
        Ok(())
    }
}
