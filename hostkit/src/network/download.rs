//! Resumable downloads driven by an external transfer process.
//!
//! The transfer runs as `curl` in the background. Progress is observed
//! purely by polling the destination file's size; completion is the size
//! reaching the expected total. Exit codes are not observed: if the total
//! is unknown, or the transfer dies early, the stream never finishes on its
//! own and the caller has to decide when to give up.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::fetch::fetch;
use crate::config::DownloadConfig;
use crate::error::{Result, StreamError};
use crate::events::{Events, Lifecycle, Progress};
use crate::host::Host;
use crate::process::{kill_pid, launch, Launched, RunOptions};
use crate::registry::Registry;
use crate::shell;
use crate::ticker::Ticker;

/// File name used when the URL has no usable path segment.
pub const DEFAULT_FILE_NAME: &str = "index.html";

/// Derive a local file name from a URL.
pub fn file_from_uri(uri: &str) -> String {
    let last = uri.rsplit('/').next().unwrap_or_default();
    let file = last.split('#').next().unwrap_or_default();
    let file = file.split('?').next().unwrap_or_default();

    if file.is_empty() || uri == format!("https://{file}") || uri == format!("http://{file}") {
        DEFAULT_FILE_NAME.to_string()
    } else {
        file.to_string()
    }
}

/// Range-aware, redirect-following transfer command.
pub fn transfer_command(uri: &str, output: &Path) -> String {
    format!(
        "curl -s -L -N -C - -o {} {}",
        shell::quote_path(output),
        shell::quote(uri)
    )
}

#[derive(Debug, Default)]
struct Session {
    /// Size seen at the previous sample.
    watermark: u64,
    paused: bool,
    closed: bool,
    /// Bumped by every pause, resume and close. A launch only becomes the
    /// tracked transfer if no such call happened while it was resolving.
    generation: u64,
    transfer: Option<Launched>,
}

struct Inner {
    host: Arc<dyn Host>,
    ticker: Arc<dyn Ticker>,
    config: DownloadConfig,
    uri: String,
    output: PathBuf,
    total: Option<u64>,
    session: Mutex<Session>,
    events: Events,
}

/// One download in progress.
///
/// Cloning is cheap; every clone drives the same transfer.
#[derive(Clone)]
pub struct DownloadStream {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for DownloadStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadStream")
            .field("uri", &self.inner.uri)
            .field("output", &self.inner.output)
            .field("total", &self.inner.total)
            .field("state", &self.inner.events.state())
            .finish_non_exhaustive()
    }
}

impl DownloadStream {
    /// Start transferring `uri` into `output`.
    ///
    /// `total` is the expected size; without it the stream reports
    /// progress but never finishes by itself.
    pub fn open(
        host: Arc<dyn Host>,
        ticker: Arc<dyn Ticker>,
        config: DownloadConfig,
        uri: impl Into<String>,
        output: impl Into<PathBuf>,
        total: Option<u64>,
    ) -> Self {
        let inner = Arc::new(Inner {
            host,
            ticker,
            config,
            uri: uri.into(),
            output: output.into(),
            total,
            session: Mutex::new(Session::default()),
            events: Events::new(),
        });

        info!(uri = %inner.uri, output = %inner.output.display(), total, "download started");
        inner.events.start();

        if total.is_none() {
            warn!(uri = %inner.uri, "content length unknown, download will not finish on its own");
        }

        let stream = Self { inner };
        let driver = stream.clone();
        tokio::spawn(async move {
            if let Err(err) = driver.relaunch(0).await {
                warn!(uri = %driver.inner.uri, error = %err, "failed to launch transfer");
                driver.inner.events.fail(StreamError::Launch(err.to_string()));
                return;
            }
            driver.inner.poll().await;
        });

        stream
    }

    pub fn uri(&self) -> &str {
        &self.inner.uri
    }

    /// Destination path.
    pub fn output(&self) -> &Path {
        &self.inner.output
    }

    /// Expected size, when the server reported one.
    pub fn total(&self) -> Option<u64> {
        self.inner.total
    }

    /// Tracked pid of the current transfer process.
    pub fn pid(&self) -> Option<u32> {
        self.inner.session.lock().transfer.as_ref().map(|t| t.pid)
    }

    pub fn is_paused(&self) -> bool {
        self.inner.session.lock().paused
    }

    pub fn is_finished(&self) -> bool {
        self.inner.events.state() == Lifecycle::Finished
    }

    pub fn state(&self) -> Lifecycle {
        self.inner.events.state()
    }

    /// Why the stream failed, if it did.
    pub fn error_reason(&self) -> Option<StreamError> {
        self.inner.events.error()
    }

    /// Called once the download has started (replayed if it already has).
    pub fn start(&self, callback: impl FnOnce() + Send + 'static) {
        self.inner.events.on_start(callback);
    }

    /// Called on every size sample while transferring.
    pub fn progress(&self, callback: impl FnMut(Progress) + Send + 'static) {
        self.inner.events.on_progress(callback);
    }

    /// Called once the file reached its expected size (replayed).
    pub fn finish(&self, callback: impl FnOnce() + Send + 'static) {
        self.inner.events.on_finish(callback);
    }

    /// Called if the transfer process could not be launched (replayed).
    pub fn error(&self, callback: impl FnOnce(&StreamError) + Send + 'static) {
        self.inner.events.on_error(callback);
    }

    /// Wait until the download finished or failed.
    ///
    /// Also returns once the stream is closed; the state is then still
    /// [`Lifecycle::Started`].
    pub async fn wait(&self) -> Lifecycle {
        self.inner.events.settled().await
    }

    /// Stop the transfer process, keeping the partial file.
    pub async fn pause(&self) {
        let transfer = {
            let mut session = self.inner.session.lock();
            if session.paused {
                return;
            }
            session.paused = true;
            session.generation += 1;
            session.transfer.take()
        };

        debug!(uri = %self.inner.uri, "download paused");
        if let Some(transfer) = transfer {
            self.inner.stop_transfer(&transfer, true).await;
        }
    }

    /// Relaunch the transfer; `curl -C -` continues from the current size.
    pub async fn resume(&self) -> Result<()> {
        let generation = {
            let mut session = self.inner.session.lock();
            if !session.paused || session.closed {
                return Ok(());
            }
            session.paused = false;
            session.generation += 1;
            session.generation
        };

        if let Err(err) = self.relaunch(generation).await {
            let mut session = self.inner.session.lock();
            if session.generation == generation {
                session.paused = true;
            }
            return Err(err);
        }
        Ok(())
    }

    async fn relaunch(&self, generation: u64) -> Result<()> {
        let command = transfer_command(&self.inner.uri, &self.inner.output);
        let options = RunOptions::new().child_interval(self.inner.config.child_interval());
        let launched = launch(&*self.inner.host, &*self.inner.ticker, &command, &options).await?;

        // Paused, resumed or closed while the launch was resolving its pid.
        let current = {
            let mut session = self.inner.session.lock();
            let current = session.generation == generation && !session.paused && !session.closed;
            if current {
                session.transfer = Some(launched.clone());
            }
            current
        };

        if current {
            debug!(uri = %self.inner.uri, pid = launched.pid, "transfer running");
        } else {
            debug!(uri = %self.inner.uri, pid = launched.pid, "dropping superseded transfer");
            self.inner.stop_transfer(&launched, true).await;
        }
        Ok(())
    }

    /// Kill the transfer, stop polling and release [`wait`](Self::wait)ers.
    pub async fn close(&self, forced: bool) {
        let transfer = {
            let mut session = self.inner.session.lock();
            session.closed = true;
            session.generation += 1;
            session.transfer.take()
        };

        debug!(uri = %self.inner.uri, forced, "download closed");
        if let Some(transfer) = transfer {
            self.inner.stop_transfer(&transfer, forced).await;
        }
        self.inner.events.close();
    }
}

impl Inner {
    async fn stop_transfer(&self, transfer: &Launched, forced: bool) {
        if let Err(err) = kill_pid(&*self.host, transfer.pid, forced).await {
            warn!(pid = transfer.pid, error = %err, "failed to stop transfer");
        }
        let _ = self.host.remove_file(&transfer.output_file).await;
    }

    async fn poll(&self) {
        let mut delay = self.config.progress_interval();

        loop {
            self.ticker.sleep(delay).await;

            let (paused, closed) = {
                let session = self.session.lock();
                (session.paused, session.closed)
            };
            if closed {
                break;
            }
            if paused {
                delay = self.config.pause_interval();
                continue;
            }
            delay = self.config.progress_interval();

            // Not created yet or briefly unreadable: try again next tick.
            let Ok(Some(stat)) = self.host.stat(&self.output).await else {
                continue;
            };

            let delta = {
                let mut session = self.session.lock();
                let delta = stat.size.saturating_sub(session.watermark);
                session.watermark = stat.size;
                delta
            };
            self.events
                .progress(Progress::new(stat.size, self.total, delta));

            if self.total.is_some_and(|total| stat.size >= total) {
                if self.events.finish() {
                    info!(uri = %self.uri, size = stat.size, "download finished");
                }
                let transfer = self.session.lock().transfer.clone();
                if let Some(transfer) = transfer {
                    let _ = self.host.remove_file(&transfer.output_file).await;
                }
                break;
            }
        }
    }
}

/// Opens downloads and keeps track of the ones still alive.
pub struct Downloader {
    host: Arc<dyn Host>,
    ticker: Arc<dyn Ticker>,
    config: DownloadConfig,
    streams: Registry<Inner>,
}

impl Downloader {
    pub fn new(host: Arc<dyn Host>, ticker: Arc<dyn Ticker>, config: DownloadConfig) -> Self {
        Self {
            host,
            ticker,
            config,
            streams: Registry::default(),
        }
    }

    /// Probe `uri` for its size and start downloading it.
    ///
    /// Without `output` the file name is derived from the URL.
    pub async fn download(&self, uri: &str, output: Option<PathBuf>) -> DownloadStream {
        let response = fetch(uri, None).await;
        let output = output.unwrap_or_else(|| PathBuf::from(file_from_uri(uri)));
        self.download_with_total(uri, output, response.length)
    }

    /// Start downloading with an already known (or unknown) size.
    pub fn download_with_total(
        &self,
        uri: &str,
        output: impl Into<PathBuf>,
        total: Option<u64>,
    ) -> DownloadStream {
        let stream = DownloadStream::open(
            Arc::clone(&self.host),
            Arc::clone(&self.ticker),
            self.config.clone(),
            uri,
            output,
            total,
        );
        self.streams.register(&stream.inner);
        stream
    }

    /// Number of streams still referenced somewhere.
    pub fn open_streams(&self) -> usize {
        self.streams.live().len()
    }

    /// Close every stream still alive.
    pub async fn close_streams(&self, forced: bool) {
        for inner in self.streams.live() {
            DownloadStream { inner }.close(forced).await;
        }
    }
}
