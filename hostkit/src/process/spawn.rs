//! Background spawn protocol.
//!
//! Running a command in the background:
//! - Prefix `KEY="value"` assignments and, when given, `cd "<cwd>" &&`
//! - Redirect stdout and stderr into a uniquely named temp file
//! - Launch it; the returned pid belongs to the launcher shell
//! - Poll for the launcher's child until one appears and track that pid
//!
//! The child lookup has no timeout. It only gives up waiting when the
//! launcher itself is gone, in which case the launcher pid is tracked.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::Rng;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::host::{ExecMode, Host};
use crate::shell;
use crate::ticker::Ticker;

/// Default delay between child lookups.
pub const DEFAULT_CHILD_INTERVAL: Duration = Duration::from_millis(50);

/// Options for launching a background command.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Environment variables prefixed to the command.
    pub env: BTreeMap<String, String>,

    /// Working directory for the command.
    pub cwd: Option<PathBuf>,

    /// Delay between child lookups.
    pub child_interval: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl RunOptions {
    pub const fn new() -> Self {
        Self {
            env: BTreeMap::new(),
            cwd: None,
            child_interval: DEFAULT_CHILD_INTERVAL,
        }
    }

    /// Set an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set multiple environment variables.
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in vars {
            self.env.insert(k.into(), v.into());
        }
        self
    }

    /// Set the working directory.
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Set the child lookup delay.
    pub const fn child_interval(mut self, interval: Duration) -> Self {
        self.child_interval = interval;
        self
    }
}

/// A launched background command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launched {
    /// Pid used for liveness checks and kills.
    pub pid: u32,

    /// Pid returned by the launch itself.
    pub launcher_pid: u32,

    /// Temp file receiving stdout and stderr.
    pub output_file: PathBuf,

    /// Full command line handed to the host.
    pub command: String,
}

/// Pick a fresh temp output path.
pub fn temp_output_path(dir: &Path) -> PathBuf {
    let id: u32 = rand::rng().random_range(10_000..100_000);
    dir.join(format!("{id}.tmp"))
}

/// Build the command line actually handed to the host.
pub fn build_command(command: &str, output_file: &Path, options: &RunOptions) -> String {
    let mut line = command.to_string();

    // Prefixing in reverse keeps the assignments in key order.
    for (key, value) in options.env.iter().rev() {
        line = format!("{key}={} {line}", shell::quote(value));
    }

    line = format!("{line} > {} 2>&1", shell::quote_path(output_file));

    if let Some(ref cwd) = options.cwd {
        line = format!("cd {} && {line}", shell::quote_path(cwd));
    }

    line
}

/// Launch `command` in the background and resolve the pid to track.
pub async fn launch(
    host: &dyn Host,
    ticker: &dyn Ticker,
    command: &str,
    options: &RunOptions,
) -> Result<Launched> {
    let output_file = temp_output_path(&host.temp_dir());
    let line = build_command(command, &output_file, options);

    let launcher_pid = host
        .execute(&line, ExecMode::Background)
        .await
        .map_err(|source| Error::Spawn {
            command: line.clone(),
            source,
        })?
        .pid;

    debug!(launcher_pid, command = %line, "waiting for child process");

    let pid = loop {
        ticker.sleep(options.child_interval).await;

        if let Some(child) = find_child(host, launcher_pid).await {
            break child;
        }

        // A launcher that already exited will never gain a child.
        if matches!(is_running(host, launcher_pid).await, Ok(false)) {
            debug!(launcher_pid, "launcher exited before a child was seen");
            break launcher_pid;
        }
    };

    info!(
        pid,
        launcher_pid,
        command = %line,
        cwd = ?options.cwd,
        "running background command"
    );

    Ok(Launched {
        pid,
        launcher_pid,
        output_file,
        command: line,
    })
}

/// First child pid of `parent`, if any.
async fn find_child(host: &dyn Host, parent: u32) -> Option<u32> {
    let output = host
        .execute(&format!("pgrep -P {parent}"), ExecMode::Foreground)
        .await
        .ok()?;

    output
        .stdout
        .lines()
        .next()
        .and_then(|line| line.trim().parse().ok())
}

/// Whether `pid` is listed in the process table and not a zombie.
///
/// This never fires any finish callback.
pub async fn is_running(host: &dyn Host, pid: u32) -> io::Result<bool> {
    let output = host
        .execute(&format!("ps -p {pid} -o pid=,stat="), ExecMode::Foreground)
        .await?;
    Ok(parse_process_table(&output.stdout, pid))
}

/// Scan a `ps` snapshot for a live (non-zombie) entry of `pid`.
pub fn parse_process_table(snapshot: &str, pid: u32) -> bool {
    snapshot.lines().any(|line| {
        let mut fields = line.split_whitespace();
        let listed = fields.next().and_then(|field| field.parse::<u32>().ok());
        let state = fields.next().unwrap_or_default();
        listed == Some(pid) && !state.starts_with('Z')
    })
}

/// Send SIGTERM, or SIGKILL when `forced`, to `pid`.
pub async fn kill_pid(host: &dyn Host, pid: u32, forced: bool) -> io::Result<()> {
    let signal = if forced { "-9" } else { "-15" };
    host.execute(&format!("kill {signal} {pid}"), ExecMode::Foreground)
        .await?;
    Ok(())
}
