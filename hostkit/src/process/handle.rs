//! Handle to one background process.
//!
//! Two independent polling loops watch the process:
//! - liveness: query the process table for the tracked pid; the first
//!   negative answer marks the handle finished and fires `finish` once
//! - output: re-read the temp output file, deliver the unseen suffix, and
//!   after the process finished do one last read and delete the file

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, ReentrantMutex};
use tracing::{debug, warn};

use super::spawn::{is_running, kill_pid, launch, RunOptions};
use crate::config::ProcessConfig;
use crate::error::Result;
use crate::events::{Events, Lifecycle};
use crate::host::Host;
use crate::ticker::Ticker;

type OutputCallback = Box<dyn FnMut(&str) + Send>;

#[derive(Default)]
struct OutputState {
    /// Bytes of the output file already delivered.
    offset: usize,
    /// Everything delivered so far, replayed to late subscribers.
    captured: String,
    subscribers: Vec<OutputCallback>,
}

struct Inner {
    host: Arc<dyn Host>,
    pid: u32,
    output_file: Option<PathBuf>,
    running_interval: Option<Duration>,
    output: Mutex<OutputState>,
    /// Serializes deliveries with subscriber registration. Reentrant so
    /// callbacks may register further subscribers.
    delivery: ReentrantMutex<()>,
    events: Events,
}

/// A running (or finished) background process.
///
/// Cloning is cheap; every clone observes the same process.
#[derive(Clone)]
pub struct ProcessHandle {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.inner.pid)
            .field("output_file", &self.inner.output_file)
            .field("state", &self.inner.events.state())
            .finish()
    }
}

impl ProcessHandle {
    /// Run a shell command in the background and start watching it.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use std::sync::Arc;
    /// use hostkit::config::ProcessConfig;
    /// use hostkit::host::ShellHost;
    /// use hostkit::process::{ProcessHandle, RunOptions};
    /// use hostkit::ticker::TokioTicker;
    ///
    /// #[tokio::main]
    /// async fn main() -> anyhow::Result<()> {
    ///     let process = ProcessHandle::run(
    ///         Arc::new(ShellHost::new()),
    ///         Arc::new(TokioTicker),
    ///         "ls -la",
    ///         RunOptions::new().cwd("/tmp"),
    ///         &ProcessConfig::default(),
    ///     )
    ///     .await?;
    ///
    ///     process.output(|chunk| print!("{chunk}"));
    ///     process.wait().await;
    ///     Ok(())
    /// }
    /// ```
    pub async fn run(
        host: Arc<dyn Host>,
        ticker: Arc<dyn Ticker>,
        command: &str,
        options: RunOptions,
        config: &ProcessConfig,
    ) -> Result<Self> {
        let options = options.child_interval(config.child_interval());
        let launched = launch(&*host, &*ticker, command, &options).await?;

        Ok(Self::attach(
            host,
            ticker,
            launched.pid,
            Some(launched.output_file),
            config,
        ))
    }

    /// Watch an already running pid, optionally capturing an output file.
    pub fn attach(
        host: Arc<dyn Host>,
        ticker: Arc<dyn Ticker>,
        pid: u32,
        output_file: Option<PathBuf>,
        config: &ProcessConfig,
    ) -> Self {
        let inner = Arc::new(Inner {
            host,
            pid,
            output_file,
            running_interval: config.running_interval(),
            output: Mutex::new(OutputState::default()),
            delivery: ReentrantMutex::new(()),
            events: Events::new(),
        });
        inner.events.start();
        debug!(pid, "opened process stream");

        if let Some(interval) = inner.running_interval {
            tokio::spawn(watch_liveness(
                Arc::clone(&inner),
                Arc::clone(&ticker),
                interval,
            ));
        }

        if let (Some(path), Some(interval)) = (inner.output_file.clone(), config.output_interval())
        {
            tokio::spawn(watch_output(Arc::clone(&inner), ticker, path, interval));
        }

        Self { inner }
    }

    /// Tracked pid.
    pub fn pid(&self) -> u32 {
        self.inner.pid
    }

    /// Temp file receiving the process output.
    pub fn output_file(&self) -> Option<&Path> {
        self.inner.output_file.as_deref()
    }

    /// Whether the process was seen to stop.
    pub fn is_finished(&self) -> bool {
        self.inner.events.state() == Lifecycle::Finished
    }

    /// Register a finish callback.
    ///
    /// Fires immediately if the process already finished. With liveness
    /// polling disabled, registering triggers a one-off liveness probe.
    pub fn finish(&self, callback: impl FnOnce() + Send + 'static) {
        self.inner.events.on_finish(callback);

        if self.inner.running_interval.is_none() && !self.is_finished() {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                if let Ok(false) = is_running(&*inner.host, inner.pid).await {
                    inner.mark_finished();
                }
            });
        }
    }

    /// Register an output callback. Output captured before the call is
    /// delivered right away as one chunk.
    pub fn output(&self, mut callback: impl FnMut(&str) + Send + 'static) {
        let _delivery = self.inner.delivery.lock();
        let captured = self.inner.output.lock().captured.clone();
        if !captured.is_empty() {
            callback(&captured);
        }
        self.inner.output.lock().subscribers.push(Box::new(callback));
    }

    /// Query the process table now. Does not fire `finish`.
    pub async fn running(&self) -> io::Result<bool> {
        is_running(&*self.inner.host, self.inner.pid).await
    }

    /// Wait until the process is seen to stop.
    pub async fn wait(&self) {
        self.inner.events.settled().await;
    }

    /// Signal the process and drop its output file.
    pub async fn kill(&self, forced: bool) -> io::Result<()> {
        if let Some(ref path) = self.inner.output_file {
            let _ = self.inner.host.remove_file(path).await;
        }
        kill_pid(&*self.inner.host, self.inner.pid, forced).await
    }

    /// Signal an arbitrary pid.
    pub async fn kill_pid(host: &dyn Host, pid: u32, forced: bool) -> io::Result<()> {
        kill_pid(host, pid, forced).await
    }
}

impl Inner {
    fn mark_finished(&self) {
        if self.events.finish() {
            debug!(pid = self.pid, "process stopped");
        }
    }

    fn is_finished(&self) -> bool {
        self.events.state() == Lifecycle::Finished
    }

    /// Deliver whatever lies beyond the last seen offset.
    ///
    /// A character cut off at the end of `content` stays unread until more
    /// output arrives, or is flushed lossily on the `last` read.
    fn deliver(&self, content: &[u8], last: bool) {
        let _delivery = self.delivery.lock();
        let (chunk, mut subscribers) = {
            let mut output = self.output.lock();
            let Some(pending) = content.get(output.offset..) else {
                return;
            };
            let complete = complete_prefix(pending, last);
            if complete == 0 {
                return;
            }
            let chunk = String::from_utf8_lossy(&pending[..complete]).into_owned();
            output.offset += complete;
            output.captured.push_str(&chunk);
            (chunk, std::mem::take(&mut output.subscribers))
        };

        for callback in &mut subscribers {
            callback(&chunk);
        }

        let mut output = self.output.lock();
        subscribers.append(&mut output.subscribers);
        output.subscribers = subscribers;
    }
}

/// Length of `bytes` without a trailing incomplete UTF-8 sequence.
fn complete_prefix(bytes: &[u8], last: bool) -> usize {
    if last {
        return bytes.len();
    }
    let lead = (bytes.len().saturating_sub(4)..bytes.len())
        .rev()
        .find(|&index| bytes[index] & 0xC0 != 0x80);
    match lead {
        Some(lead) => match std::str::from_utf8(&bytes[lead..]) {
            Err(err) if err.error_len().is_none() => lead,
            _ => bytes.len(),
        },
        None => bytes.len(),
    }
}

async fn watch_liveness(inner: Arc<Inner>, ticker: Arc<dyn Ticker>, interval: Duration) {
    loop {
        ticker.sleep(interval).await;

        if inner.is_finished() {
            break;
        }

        match is_running(&*inner.host, inner.pid).await {
            Ok(true) => {}
            Ok(false) => {
                inner.mark_finished();
                break;
            }
            Err(err) => warn!(pid = inner.pid, error = %err, "liveness probe failed"),
        }
    }
}

async fn watch_output(inner: Arc<Inner>, ticker: Arc<dyn Ticker>, path: PathBuf, interval: Duration) {
    loop {
        ticker.sleep(interval).await;

        // Sampled before reading so the read after finishing is complete.
        let finished = inner.is_finished();

        match inner.host.read_file(&path).await {
            Ok(content) => {
                inner.deliver(&content, finished);
                if finished {
                    let _ = inner.host.remove_file(&path).await;
                    break;
                }
            }
            Err(_) if finished => break,
            Err(_) => {}
        }
    }
}
