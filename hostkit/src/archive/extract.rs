//! Archive extraction with manifest-driven progress.
//!
//! The extraction tool runs in the background and is never asked how far
//! it got. Instead every tick probes the manifest's still-pending files on
//! disk; each one that appeared adds its uncompressed size to the running
//! total. The stream finishes once that total reaches the manifest's.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::anyhow;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::kind::ArchiveKind;
use super::manifest::{entry_path, inspect, ArchiveManifest, ManifestEntry};
use crate::config::ExtractConfig;
use crate::error::{Result, StreamError};
use crate::events::{Events, Lifecycle, Progress};
use crate::fanin::{self, Work};
use crate::host::Host;
use crate::process::{kill_pid, launch, Launched, RunOptions};
use crate::registry::Registry;
use crate::ticker::Ticker;

#[derive(Debug, Default)]
struct Session {
    manifest: Option<Arc<ArchiveManifest>>,
    pending: Vec<ManifestEntry>,
    unpacked: u64,
    extraction: Option<Launched>,
    closed: bool,
}

struct Inner {
    host: Arc<dyn Host>,
    ticker: Arc<dyn Ticker>,
    config: ExtractConfig,
    archive: PathBuf,
    unpack_dir: Option<PathBuf>,
    session: Mutex<Session>,
    events: Events,
}

/// One extraction in progress.
///
/// Cloning is cheap; every clone observes the same extraction.
#[derive(Clone)]
pub struct ExtractionStream {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ExtractionStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionStream")
            .field("archive", &self.inner.archive)
            .field("unpack_dir", &self.inner.unpack_dir)
            .field("state", &self.inner.events.state())
            .finish_non_exhaustive()
    }
}

impl ExtractionStream {
    /// Inspect `archive` and extract it into `unpack_dir`, or the host's
    /// working directory.
    pub fn open(
        host: Arc<dyn Host>,
        ticker: Arc<dyn Ticker>,
        config: ExtractConfig,
        archive: impl Into<PathBuf>,
        unpack_dir: Option<PathBuf>,
    ) -> Self {
        let inner = Arc::new(Inner {
            host,
            ticker,
            config,
            archive: archive.into(),
            unpack_dir,
            session: Mutex::new(Session::default()),
            events: Events::new(),
        });
        inner.events.start();

        let stream = Self { inner };
        let driver = Arc::clone(&stream.inner);
        tokio::spawn(async move {
            let Some(manifest) = driver.load_manifest().await else {
                return;
            };
            let base = match driver.unpack_base() {
                Ok(base) => base,
                Err(err) => {
                    driver.events.fail(StreamError::Launch(err.to_string()));
                    return;
                }
            };

            // The launch resolves its pid while the tick loop already runs.
            tokio::spawn(Arc::clone(&driver).start_extraction(manifest.kind()));
            driver.poll(&base, manifest.total_uncompressed().unwrap_or(0)).await;
        });

        stream
    }

    pub fn archive(&self) -> &Path {
        &self.inner.archive
    }

    pub fn unpack_dir(&self) -> Option<&Path> {
        self.inner.unpack_dir.as_deref()
    }

    /// Tracked pid of the extraction process, once resolved.
    pub fn pid(&self) -> Option<u32> {
        self.inner.session.lock().extraction.as_ref().map(|e| e.pid)
    }

    /// Manifest the progress is measured against, once listed.
    pub fn manifest(&self) -> Option<Arc<ArchiveManifest>> {
        self.inner.session.lock().manifest.clone()
    }

    /// Uncompressed bytes of the files seen on disk so far.
    pub fn unpacked(&self) -> u64 {
        self.inner.session.lock().unpacked
    }

    pub fn is_finished(&self) -> bool {
        self.inner.events.state() == Lifecycle::Finished
    }

    pub fn state(&self) -> Lifecycle {
        self.inner.events.state()
    }

    pub fn error_reason(&self) -> Option<StreamError> {
        self.inner.events.error()
    }

    /// Called once extraction has started (replayed).
    pub fn start(&self, callback: impl FnOnce() + Send + 'static) {
        self.inner.events.on_start(callback);
    }

    /// Called once per tick, even when nothing new appeared.
    pub fn progress(&self, callback: impl FnMut(Progress) + Send + 'static) {
        self.inner.events.on_progress(callback);
    }

    /// Called once every listed file is on disk (replayed).
    pub fn finish(&self, callback: impl FnOnce() + Send + 'static) {
        self.inner.events.on_finish(callback);
    }

    /// Called if the archive could not be listed or launched (replayed).
    pub fn error(&self, callback: impl FnOnce(&StreamError) + Send + 'static) {
        self.inner.events.on_error(callback);
    }

    /// Wait until extraction finished or failed.
    ///
    /// Also returns once the stream is closed; the state is then still
    /// [`Lifecycle::Started`].
    pub async fn wait(&self) -> Lifecycle {
        self.inner.events.settled().await
    }

    /// Stop the extraction process and release [`wait`](Self::wait)ers.
    /// Partially written files are kept.
    pub async fn close(&self, forced: bool) {
        let extraction = {
            let mut session = self.inner.session.lock();
            session.closed = true;
            session.extraction.clone()
        };

        debug!(archive = %self.inner.archive.display(), forced, "extraction closed");
        if let Some(extraction) = extraction {
            self.inner.stop_extraction(&extraction, forced).await;
        }
        self.inner.events.close();
    }
}

impl Inner {
    async fn load_manifest(&self) -> Option<Arc<ArchiveManifest>> {
        let manifest = match inspect(&*self.host, &self.archive).await {
            Ok(Some(manifest)) => Arc::new(manifest),
            Ok(None) => {
                warn!(archive = %self.archive.display(), "unsupported archive type");
                self.events
                    .fail(StreamError::UnsupportedArchive(self.archive.clone()));
                return None;
            }
            Err(err) => {
                warn!(archive = %self.archive.display(), error = %err, "failed to list archive");
                self.events.fail(StreamError::ManifestUnavailable {
                    path: self.archive.clone(),
                    reason: err.to_string(),
                });
                return None;
            }
        };

        let mut session = self.session.lock();
        session.pending = manifest.files().to_vec();
        session.manifest = Some(Arc::clone(&manifest));
        Some(manifest)
    }

    fn unpack_base(&self) -> Result<PathBuf> {
        match self.unpack_dir {
            Some(ref dir) if dir.is_absolute() => Ok(dir.clone()),
            Some(ref dir) => Ok(self.host.current_dir()?.join(dir)),
            None => Ok(self.host.current_dir()?),
        }
    }

    async fn start_extraction(self: Arc<Self>, kind: ArchiveKind) {
        let command = kind.extract_command(&self.archive, self.unpack_dir.as_deref());
        let options = RunOptions::new().child_interval(self.config.child_interval());

        let extraction = match launch(&*self.host, &*self.ticker, &command, &options).await {
            Ok(extraction) => extraction,
            Err(err) => {
                warn!(archive = %self.archive.display(), error = %err, "failed to launch extraction");
                self.events.fail(StreamError::Launch(err.to_string()));
                return;
            }
        };

        info!(
            archive = %self.archive.display(),
            pid = extraction.pid,
            "extraction started"
        );

        let closed = {
            let mut session = self.session.lock();
            session.extraction = Some(extraction.clone());
            session.closed
        };
        if closed {
            self.stop_extraction(&extraction, true).await;
        }
    }

    async fn stop_extraction(&self, extraction: &Launched, forced: bool) {
        if let Err(err) = kill_pid(&*self.host, extraction.pid, forced).await {
            warn!(pid = extraction.pid, error = %err, "failed to stop extraction");
        }
        let _ = self.host.remove_file(&extraction.output_file).await;
    }

    async fn poll(&self, base: &Path, total: u64) {
        loop {
            self.ticker.sleep(self.config.progress_interval()).await;

            if self.session.lock().closed || self.events.state().is_terminal() {
                break;
            }

            let pending = self.session.lock().pending.clone();
            let probes = pending
                .iter()
                .map(|entry| {
                    let host = Arc::clone(&self.host);
                    let path = entry_path(base, entry);
                    Work::call(move || async move {
                        match host.stat(&path).await {
                            Ok(Some(_)) => Ok(()),
                            Ok(None) => Err(anyhow!("{} not extracted yet", path.display())),
                            Err(err) => Err(anyhow::Error::from(err)),
                        }
                    })
                })
                .collect();
            let found =
                fanin::parallel(probes, &*self.ticker, self.config.probe_interval()).await;

            let (unpacked, delta) = {
                let mut session = self.session.lock();
                let mut delta = 0;
                session.pending = pending
                    .into_iter()
                    .enumerate()
                    .filter_map(|(index, entry)| match found.get(&index) {
                        Some(Some(())) => {
                            delta += entry.uncompressed();
                            None
                        }
                        _ => Some(entry),
                    })
                    .collect();
                session.unpacked += delta;
                (session.unpacked, delta)
            };

            self.events.progress(Progress::new(unpacked, Some(total), delta));

            if unpacked >= total {
                if self.events.finish() {
                    info!(archive = %self.archive.display(), unpacked, "extraction finished");
                }
                let extraction = self.session.lock().extraction.clone();
                if let Some(extraction) = extraction {
                    let _ = self.host.remove_file(&extraction.output_file).await;
                }
                break;
            }
        }
    }
}

/// Inspects archives and keeps track of the extractions still alive.
pub struct Archives {
    host: Arc<dyn Host>,
    ticker: Arc<dyn Ticker>,
    config: ExtractConfig,
    streams: Registry<Inner>,
}

impl Archives {
    pub fn new(host: Arc<dyn Host>, ticker: Arc<dyn Ticker>, config: ExtractConfig) -> Self {
        Self {
            host,
            ticker,
            config,
            streams: Registry::default(),
        }
    }

    /// Archive format of `path`, if supported.
    pub fn kind(&self, path: &Path) -> Option<ArchiveKind> {
        ArchiveKind::from_path(path)
    }

    /// List and parse the archive. `None` for unsupported types.
    pub async fn info(&self, path: &Path) -> Result<Option<ArchiveManifest>> {
        inspect(&*self.host, path).await
    }

    /// Start extracting `archive`.
    pub fn extract(&self, archive: impl Into<PathBuf>, unpack_dir: Option<PathBuf>) -> ExtractionStream {
        let stream = ExtractionStream::open(
            Arc::clone(&self.host),
            Arc::clone(&self.ticker),
            self.config.clone(),
            archive,
            unpack_dir,
        );
        self.streams.register(&stream.inner);
        stream
    }

    /// Number of extractions still referenced somewhere.
    pub fn open_streams(&self) -> usize {
        self.streams.live().len()
    }

    /// Close every extraction still alive.
    pub async fn close_streams(&self, forced: bool) {
        for inner in self.streams.live() {
            ExtractionStream { inner }.close(forced).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::scripted::ScriptedHost;
    use crate::ticker::TokioTicker;
    use std::time::Duration;

    const LISTING: &str = "\
    1000  Defl:N      400  60% 2024-01-02 03:04 1a2b3c4d  a.txt
    2000  Defl:N      900  55% 2024-01-02 03:04 1a2b3c4e  docs/b.txt
";

    fn setup() -> (Arc<ScriptedHost>, Archives) {
        let host = Arc::new(ScriptedHost::new());
        host.respond("unzip -v", LISTING);
        let archives = Archives::new(host.clone(), Arc::new(TokioTicker), ExtractConfig::default());
        (host, archives)
    }

    fn record(stream: &ExtractionStream) -> Arc<Mutex<Vec<Progress>>> {
        let samples = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&samples);
        stream.progress(move |progress| sink.lock().push(progress));
        samples
    }

    fn count_finishes(stream: &ExtractionStream) -> Arc<Mutex<u32>> {
        let count = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&count);
        stream.finish(move || *counter.lock() += 1);
        count
    }

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_follows_files_on_disk() {
        let (host, archives) = setup();
        let stream = archives.extract("/dl/bundle.zip", Some(PathBuf::from("/out")));
        let samples = record(&stream);
        let finishes = count_finishes(&stream);

        host.set_size("/out/a.txt", 1000);
        advance(800).await;

        assert_eq!(*samples.lock(), vec![Progress::new(1000, Some(3000), 1000)]);
        assert!(!stream.is_finished());
        assert_eq!(*finishes.lock(), 0);

        host.set_size("/out/docs/b.txt", 2000);
        advance(800).await;

        assert_eq!(
            *samples.lock(),
            vec![
                Progress::new(1000, Some(3000), 1000),
                Progress::new(3000, Some(3000), 2000),
            ]
        );
        assert!(stream.is_finished());
        assert_eq!(stream.unpacked(), 3000);

        advance(2_000).await;
        assert_eq!(samples.lock().len(), 2);
        assert_eq!(*finishes.lock(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_reported_without_new_files() {
        let (_host, archives) = setup();
        let stream = archives.extract("/dl/bundle.zip", None);
        let samples = record(&stream);

        advance(2_200).await;

        let samples = samples.lock();
        assert_eq!(samples.len(), 3);
        assert!(samples.iter().all(|p| *p == Progress::new(0, Some(3000), 0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_extraction_command_and_pid() {
        let (host, archives) = setup();
        let stream = archives.extract("/dl/bundle.zip", Some(PathBuf::from("/out")));
        advance(100).await;

        let launched = host.launched();
        assert_eq!(launched.len(), 1);
        assert!(launched[0].starts_with(r#"mkdir -p "/out" && unzip -o "/dl/bundle.zip" -d "/out" > "#));

        let pid = stream.pid().unwrap();
        assert!(host.is_alive(pid));
        assert_eq!(stream.manifest().unwrap().total_uncompressed(), Some(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_relative_files_resolve_against_current_dir() {
        let (host, archives) = setup();
        let stream = archives.extract("bundle.zip", None);

        host.set_size("/work/a.txt", 1000);
        host.set_size("/work/docs/b.txt", 2000);

        assert_eq!(stream.wait().await, Lifecycle::Finished);
        assert_eq!(stream.unpacked(), 3000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsupported_archive_errors_once() {
        let (host, archives) = setup();
        let stream = archives.extract("/dl/bundle.rar", None);

        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        stream.error(move |err| sink.lock().push(err.clone()));

        assert_eq!(stream.wait().await, Lifecycle::Errored);
        advance(2_000).await;

        assert_eq!(
            *errors.lock(),
            vec![StreamError::UnsupportedArchive(PathBuf::from("/dl/bundle.rar"))]
        );
        assert!(host.commands().is_empty());

        // Late subscribers get the same error.
        let replayed = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&replayed);
        stream.error(move |err| *slot.lock() = Some(err.clone()));
        assert!(replayed.lock().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_manifest_finishes_on_first_tick() {
        let host = Arc::new(ScriptedHost::new());
        let archives = Archives::new(host.clone(), Arc::new(TokioTicker), ExtractConfig::default());
        let stream = archives.extract("/dl/empty.tar", None);
        let samples = record(&stream);

        assert_eq!(stream.wait().await, Lifecycle::Finished);
        assert_eq!(*samples.lock(), vec![Progress::new(0, Some(0), 0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_streams_kills_extraction() {
        let (host, archives) = setup();
        let stream = archives.extract("/dl/bundle.zip", None);
        let samples = record(&stream);
        advance(100).await;

        let pid = stream.pid().unwrap();
        archives.close_streams(true).await;

        assert!(!host.is_alive(pid));
        assert!(host.commands().contains(&format!("kill -9 {pid}")));

        // Only the temp output file goes; extracted files stay.
        let removed = host.removed();
        assert_eq!(removed.len(), 1);
        assert!(removed[0].starts_with("/tmp"));

        assert_eq!(stream.wait().await, Lifecycle::Started);
        advance(2_000).await;
        assert!(samples.lock().is_empty());
        assert!(!stream.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_directory_entries_count_once_created() {
        let host = Arc::new(ScriptedHost::new());
        host.respond(
            "tar -tvf",
            "drwxr-xr-x user/staff 0 2024-01-02 03:04 docs/\n\
             -rw-r--r-- user/staff 10 2024-01-02 03:04 docs/a.txt\n",
        );
        let archives = Archives::new(host.clone(), Arc::new(TokioTicker), ExtractConfig::default());
        let stream = archives.extract("/dl/docs.tar.gz", None);

        host.set_size("/work/docs/a.txt", 10);
        advance(800).await;
        assert_eq!(stream.unpacked(), 10);
        assert!(!stream.is_finished());

        host.make_dir("/work/docs/");
        assert_eq!(stream.wait().await, Lifecycle::Finished);
        assert_eq!(stream.manifest().unwrap().files().len(), 2);
    }

    #[test]
    fn test_kind() {
        let host = Arc::new(ScriptedHost::new());
        let archives = Archives::new(host, Arc::new(TokioTicker), ExtractConfig::default());
        assert_eq!(archives.kind(Path::new("x.zip")), Some(ArchiveKind::Zip));
        assert_eq!(archives.kind(Path::new("x.rar")), None);
    }
}
