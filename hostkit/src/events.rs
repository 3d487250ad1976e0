//! Replay-safe lifecycle events.
//!
//! A stream moves through `Pending -> Started -> Finished | Errored`.
//! Subscribing to an event that already happened invokes the callback
//! immediately with the known outcome, so callers never race the stream.
//!
//! Callbacks run outside the internal lock and may call back into the
//! stream, including subscribing again.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::StreamError;

/// Current phase of a stream or process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Pending,
    Started,
    Finished,
    Errored,
}

impl Lifecycle {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Started => "started",
            Self::Finished => "finished",
            Self::Errored => "errored",
        }
    }

    /// Whether no further transition can happen.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Errored)
    }
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One progress sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Bytes observed so far.
    pub current: u64,
    /// Expected total, when known.
    pub total: Option<u64>,
    /// Bytes gained since the previous sample.
    pub delta: u64,
}

impl Progress {
    pub const fn new(current: u64, total: Option<u64>, delta: u64) -> Self {
        Self {
            current,
            total,
            delta,
        }
    }

    /// Completed fraction in `0.0..=1.0`, when the total is known.
    #[allow(clippy::cast_precision_loss)]
    pub fn fraction(&self) -> Option<f64> {
        match self.total {
            Some(0) => Some(1.0),
            Some(total) => Some((self.current as f64 / total as f64).min(1.0)),
            None => None,
        }
    }
}

type OnceCallback = Box<dyn FnOnce() + Send>;
type ProgressCallback = Box<dyn FnMut(Progress) + Send>;
type ErrorCallback = Box<dyn FnOnce(&StreamError) + Send>;

struct Subscribers {
    state: Lifecycle,
    error: Option<StreamError>,
    start: Vec<OnceCallback>,
    progress: Vec<ProgressCallback>,
    finish: Vec<OnceCallback>,
    failure: Vec<ErrorCallback>,
}

/// Typed subscriber lists evaluated against the current lifecycle state.
pub struct Events {
    inner: Mutex<Subscribers>,
    watch: watch::Sender<Lifecycle>,
    /// Set once the owner stopped the stream without a terminal transition.
    closed: AtomicBool,
}

impl fmt::Debug for Events {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Events")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Default for Events {
    fn default() -> Self {
        Self::new()
    }
}

impl Events {
    pub fn new() -> Self {
        let (watch, _) = watch::channel(Lifecycle::Pending);
        Self {
            inner: Mutex::new(Subscribers {
                state: Lifecycle::Pending,
                error: None,
                start: Vec::new(),
                progress: Vec::new(),
                finish: Vec::new(),
                failure: Vec::new(),
            }),
            watch,
            closed: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> Lifecycle {
        self.inner.lock().state
    }

    pub fn error(&self) -> Option<StreamError> {
        self.inner.lock().error.clone()
    }

    /// Wait until the lifecycle reaches `Finished` or `Errored`, or the
    /// stream is closed. A closed stream resolves with its current state.
    pub async fn settled(&self) -> Lifecycle {
        let mut rx = self.watch.subscribe();
        let settled = rx
            .wait_for(|state| state.is_terminal() || self.closed.load(Ordering::SeqCst))
            .await
            .map(|state| *state);
        settled.unwrap_or_else(|_| self.state())
    }

    /// Release every `settled` waiter without changing the lifecycle.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.watch.send_modify(|_| {});
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn on_start(&self, callback: impl FnOnce() + Send + 'static) {
        {
            let mut inner = self.inner.lock();
            if inner.state == Lifecycle::Pending {
                inner.start.push(Box::new(callback));
                return;
            }
        }
        callback();
    }

    pub fn on_progress(&self, callback: impl FnMut(Progress) + Send + 'static) {
        self.inner.lock().progress.push(Box::new(callback));
    }

    pub fn on_finish(&self, callback: impl FnOnce() + Send + 'static) {
        {
            let mut inner = self.inner.lock();
            if inner.state != Lifecycle::Finished {
                inner.finish.push(Box::new(callback));
                return;
            }
        }
        callback();
    }

    pub fn on_error(&self, callback: impl FnOnce(&StreamError) + Send + 'static) {
        let error = {
            let mut inner = self.inner.lock();
            match (inner.state, inner.error.clone()) {
                (Lifecycle::Errored, Some(error)) => error,
                _ => {
                    inner.failure.push(Box::new(callback));
                    return;
                }
            }
        };
        callback(&error);
    }

    /// Transition `Pending -> Started`. Returns `false` if already started.
    pub fn start(&self) -> bool {
        let callbacks = {
            let mut inner = self.inner.lock();
            if inner.state != Lifecycle::Pending {
                return false;
            }
            inner.state = Lifecycle::Started;
            std::mem::take(&mut inner.start)
        };
        self.watch.send_replace(Lifecycle::Started);

        for callback in callbacks {
            callback();
        }
        true
    }

    /// Deliver a progress sample to every progress subscriber.
    pub fn progress(&self, progress: Progress) {
        let mut callbacks = std::mem::take(&mut self.inner.lock().progress);

        for callback in &mut callbacks {
            callback(progress);
        }

        // Keep subscriptions made while the callbacks were running.
        let mut inner = self.inner.lock();
        callbacks.append(&mut inner.progress);
        inner.progress = callbacks;
    }

    /// Transition to `Finished`. Fires finish subscribers exactly once;
    /// returns `false` on every later call or after an error.
    pub fn finish(&self) -> bool {
        let (start, finish) = {
            let mut inner = self.inner.lock();
            if inner.state.is_terminal() {
                return false;
            }
            inner.state = Lifecycle::Finished;
            inner.failure.clear();
            (
                std::mem::take(&mut inner.start),
                std::mem::take(&mut inner.finish),
            )
        };
        self.watch.send_replace(Lifecycle::Finished);

        for callback in start.into_iter().chain(finish) {
            callback();
        }
        true
    }

    /// Transition to `Errored`. Fires error subscribers exactly once.
    pub fn fail(&self, error: StreamError) -> bool {
        let (start, failure) = {
            let mut inner = self.inner.lock();
            if inner.state.is_terminal() {
                return false;
            }
            inner.state = Lifecycle::Errored;
            inner.error = Some(error.clone());
            inner.finish.clear();
            (
                std::mem::take(&mut inner.start),
                std::mem::take(&mut inner.failure),
            )
        };
        self.watch.send_replace(Lifecycle::Errored);

        for callback in start {
            callback();
        }
        for callback in failure {
            callback(&error);
        }
        true
    }
}
