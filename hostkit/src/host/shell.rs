//! [`Host`] implementation backed by `sh` and `tokio::fs`.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, trace};

use super::{ExecMode, ExecOutput, Host, Stat};

/// Host that runs commands through `sh -c`.
#[derive(Debug, Clone, Default)]
pub struct ShellHost {
    temp_dir: Option<PathBuf>,
}

impl ShellHost {
    pub const fn new() -> Self {
        Self { temp_dir: None }
    }

    /// Use a specific directory for temporary output files.
    pub fn with_temp_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            temp_dir: Some(dir.into()),
        }
    }
}

#[async_trait]
impl Host for ShellHost {
    async fn execute(&self, command: &str, mode: ExecMode) -> io::Result<ExecOutput> {
        match mode {
            ExecMode::Foreground => {
                trace!(%command, "executing");

                let child = Command::new("sh")
                    .arg("-c")
                    .arg(command)
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .spawn()?;
                let pid = child.id().unwrap_or_default();
                let output = child.wait_with_output().await?;

                Ok(ExecOutput {
                    pid,
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                })
            }
            ExecMode::Background => {
                // The launcher shell keeps the real command as its child
                // until it exits, so the child lookup always has a target.
                let wrapped = format!("{command} & wait");

                let mut child = Command::new("sh")
                    .arg("-c")
                    .arg(&wrapped)
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::null())
                    .spawn()?;
                let pid = child.id().unwrap_or_default();
                debug!(pid, %command, "launched background command");

                // Reap the launcher so it never lingers as a zombie.
                tokio::spawn(async move {
                    let _ = child.wait().await;
                });

                Ok(ExecOutput {
                    pid,
                    ..ExecOutput::default()
                })
            }
        }
    }

    async fn stat(&self, path: &Path) -> io::Result<Option<Stat>> {
        match tokio::fs::metadata(path).await {
            Ok(meta) => Ok(Some(Stat {
                is_file: meta.is_file(),
                size: meta.len(),
            })),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn read_file(&self, path: &Path) -> io::Result<Vec<u8>> {
        tokio::fs::read(path).await
    }

    async fn remove_file(&self, path: &Path) -> io::Result<()> {
        tokio::fs::remove_file(path).await
    }

    fn current_dir(&self) -> io::Result<PathBuf> {
        std::env::current_dir()
    }

    fn temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}
