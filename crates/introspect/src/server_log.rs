//! PostgreSQL server log
//!
//! With `log_lock_waits = on` the server logs every lock wait longer than
//! `deadlock_timeout`, prefixed by the waiting backend's pid in brackets
//! (`log_line_prefix` containing `[%p]`). The log is re-read on every call
//! because the server keeps appending to it.

use lockscope_core::{HarnessConfig, HarnessError, HarnessResult};
use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Handle on a server log file
#[derive(Debug, Clone)]
pub struct ServerLog {
    path: PathBuf,
}

impl ServerLog {
    /// Open the log at `path`; fails if it does not exist
    pub fn open(path: impl AsRef<Path>) -> HarnessResult<Self> {
        let path = path.as_ref();
        if !fs::metadata(path)?.is_file() {
            return Err(HarnessError::config(format!(
                "server log {} is not a file",
                path.display()
            )));
        }
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// The configured `postgres_log`, if any
    pub fn from_config(config: &HarnessConfig) -> HarnessResult<Option<Self>> {
        config.postgres_log.as_deref().map(Self::open).transpose()
    }

    /// Path of the log
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lines mentioning `[pid]`, trailing whitespace removed, in file order
    pub fn lines_for_pid(&self, pid: i64) -> HarnessResult<Vec<String>> {
        let content = fs::read(&self.path)?;
        let content = String::from_utf8_lossy(&content);
        let marker = format!("[{}]", pid);
        let lines: Vec<String> = content
            .lines()
            .filter(|line| line.contains(&marker))
            .map(|line| line.trim_end().to_string())
            .collect();
        debug!(target: "lockscope::introspect", pid, lines = lines.len(), "server log lines");
        Ok(lines)
    }
}

/// Right-justify a pid to width 5, the width it takes in a rendered table
///
/// Expected tables that mention a backend pid are built with this so they
/// line up with the formatter's right-aligned integer cells.
pub fn pid_cell(pid: impl Display) -> String {
    format!("{:>5}", pid)
}
