//! Host OS primitives.
//!
//! Everything the streams know about the outside world goes through the
//! [`Host`] trait: command execution, file stats and reads, and removal.
//! There are no exit or filesystem-change notifications here; callers poll.

mod shell;

#[cfg(test)]
pub(crate) mod scripted;

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

pub use shell::ShellHost;

/// How a command is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// Wait for the command and capture its output.
    Foreground,
    /// Return as soon as the command is launched.
    Background,
}

/// Result of [`Host::execute`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Pid of the launched shell.
    pub pid: u32,
    /// Captured stdout (empty for background commands).
    pub stdout: String,
    /// Captured stderr (empty for background commands).
    pub stderr: String,
}

/// Filesystem entry metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub is_file: bool,
    pub size: u64,
}

/// Host capabilities consumed by processes, downloads and extraction.
#[async_trait]
pub trait Host: Send + Sync + 'static {
    /// Run a shell command line.
    async fn execute(&self, command: &str, mode: ExecMode) -> io::Result<ExecOutput>;

    /// Stat a path, resolving `None` when it does not exist.
    async fn stat(&self, path: &Path) -> io::Result<Option<Stat>>;

    /// Read a whole file.
    async fn read_file(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Remove a file.
    async fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Working directory that relative paths resolve against.
    fn current_dir(&self) -> io::Result<PathBuf>;

    /// Directory for temporary output files.
    fn temp_dir(&self) -> PathBuf;
}
