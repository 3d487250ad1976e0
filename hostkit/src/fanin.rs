//! Fan-in over callables and futures.
//!
//! A unit of work is either a zero-argument callable producing a future or
//! an already constructed future. Batches run in one of two modes:
//!
//! - **Sequential**: one item at a time, each settling before the next is
//!   started. The result is the last item's value; the first error stops
//!   the batch and is returned.
//! - **Parallel**: every item is dispatched at once and a barrier re-checks
//!   every poll interval until all of them have settled. The result maps
//!   each item's original index to its value. An item that fails (or
//!   panics) still counts as settled, but its error is swallowed and its
//!   slot holds `None`; nothing is re-raised to the caller.

use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tracing::debug;

use crate::ticker::Ticker;

/// Default barrier poll for parallel batches.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

type WorkFuture<T> = BoxFuture<'static, Result<T>>;

/// A single unit of work.
pub enum Work<T> {
    /// Invoked when the batch reaches it.
    Call(Box<dyn FnOnce() -> WorkFuture<T> + Send>),
    /// Awaited when the batch reaches it.
    Await(WorkFuture<T>),
}

impl<T: Send + 'static> Work<T> {
    /// Wrap a callable.
    pub fn call<F, Fut>(f: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self::Call(Box::new(move || f().boxed()))
    }

    /// Wrap a future.
    pub fn future<Fut>(future: Fut) -> Self
    where
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self::Await(future.boxed())
    }

    /// Start the work, yielding the future to drive.
    fn dispatch(self) -> WorkFuture<T> {
        match self {
            Self::Call(f) => f(),
            Self::Await(future) => future,
        }
    }

    /// Run this single item to completion.
    pub async fn run(self) -> Result<T> {
        self.dispatch().await
    }
}

/// Execution mode of a [`Batch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Sequential,
    Parallel { poll_interval: Duration },
}

impl Mode {
    /// Parallel mode with the default barrier poll.
    pub const fn parallel() -> Self {
        Self::Parallel {
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// A collection of work items and how to run them.
pub struct Batch<T> {
    pub items: Vec<Work<T>>,
    pub mode: Mode,
}

/// Anything [`fan_in`] accepts.
pub enum Input<T> {
    Single(Work<T>),
    Batch(Batch<T>),
}

/// What [`fan_in`] resolves with.
#[derive(Debug, PartialEq, Eq)]
pub enum Output<T> {
    /// Value of a single item.
    Value(T),
    /// Last value of a sequential batch (`None` when empty).
    Last(Option<T>),
    /// Per-index outcome of a parallel batch.
    Indexed(BTreeMap<usize, Option<T>>),
}

/// Run any supported input.
pub async fn fan_in<T: Send + 'static>(input: Input<T>, ticker: &dyn Ticker) -> Result<Output<T>> {
    match input {
        Input::Single(work) => work.run().await.map(Output::Value),
        Input::Batch(Batch {
            items,
            mode: Mode::Sequential,
        }) => sequential(items).await.map(Output::Last),
        Input::Batch(Batch {
            items,
            mode: Mode::Parallel { poll_interval },
        }) => Ok(Output::Indexed(parallel(items, ticker, poll_interval).await)),
    }
}

/// Run items strictly one after another.
pub async fn sequential<T: Send + 'static>(items: Vec<Work<T>>) -> Result<Option<T>> {
    let mut last = None;
    for work in items {
        last = Some(work.run().await?);
    }
    Ok(last)
}

/// Dispatch every item at once and wait on a polled barrier.
///
/// The returned map always has one key per item, `0..items.len()`.
pub async fn parallel<T: Send + 'static>(
    items: Vec<Work<T>>,
    ticker: &dyn Ticker,
    poll_interval: Duration,
) -> BTreeMap<usize, Option<T>> {
    let total = items.len();
    let settled = Arc::new(AtomicUsize::new(0));
    let outputs = Arc::new(Mutex::new(BTreeMap::new()));

    for (index, work) in items.into_iter().enumerate() {
        let future = AssertUnwindSafe(work.dispatch()).catch_unwind();
        let settled = Arc::clone(&settled);
        let outputs = Arc::clone(&outputs);

        tokio::spawn(async move {
            let value = match future.await {
                Ok(Ok(value)) => Some(value),
                Ok(Err(err)) => {
                    debug!(index, error = %err, "fan-in item failed");
                    None
                }
                Err(_) => {
                    debug!(index, "fan-in item panicked");
                    None
                }
            };
            outputs.lock().insert(index, value);
            settled.fetch_add(1, Ordering::SeqCst);
        });
    }

    while settled.load(Ordering::SeqCst) < total {
        ticker.sleep(poll_interval).await;
    }

    let outputs = std::mem::take(&mut *outputs.lock());
    outputs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ticker::TokioTicker;
    use anyhow::bail;

    fn delayed(ms: u64, value: u32) -> Work<u32> {
        Work::call(move || async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(value)
        })
    }

    #[tokio::test]
    async fn test_single_callable() {
        let output = fan_in(Input::Single(Work::call(|| async { Ok(7) })), &TokioTicker)
            .await
            .unwrap();
        assert_eq!(output, Output::Value(7));
    }

    #[tokio::test]
    async fn test_single_future() {
        let output = fan_in(Input::Single(Work::future(async { Ok("done") })), &TokioTicker)
            .await
            .unwrap();
        assert_eq!(output, Output::Value("done"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_returns_last_and_preserves_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let step = |name: &'static str, ms: u64| {
            let log = Arc::clone(&log);
            Work::call(move || async move {
                log.lock().push(format!("{name} start"));
                tokio::time::sleep(Duration::from_millis(ms)).await;
                log.lock().push(format!("{name} end"));
                Ok(name)
            })
        };

        let last = sequential(vec![step("a", 300), step("b", 100), step("c", 10)])
            .await
            .unwrap();

        assert_eq!(last, Some("c"));
        assert_eq!(
            *log.lock(),
            vec!["a start", "a end", "b start", "b end", "c start", "c end"]
        );
    }

    #[tokio::test]
    async fn test_sequential_error_halts_remaining() {
        let ran = Arc::new(AtomicUsize::new(0));
        let tail = {
            let ran = Arc::clone(&ran);
            Work::call(move || async move {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(3)
            })
        };
        let failing = Work::call(|| async { bail!("boom") });

        let err = sequential(vec![Work::future(async { Ok(1) }), failing, tail])
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "boom");
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sequential_empty() {
        assert_eq!(sequential::<u32>(Vec::new()).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_keys_cover_every_index() {
        let items = vec![delayed(300, 0), delayed(10, 1), delayed(150, 2), delayed(0, 3)];
        let result = parallel(items, &TokioTicker, Duration::from_millis(50)).await;

        assert_eq!(result.keys().copied().collect::<Vec<_>>(), vec![0, 1, 2, 3]);
        assert_eq!(result[&0], Some(0));
        assert_eq!(result[&2], Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_runs_concurrently() {
        let start = tokio::time::Instant::now();
        let items = (0..5).map(|i| delayed(1_000, i)).collect();
        let result = parallel(items, &TokioTicker, DEFAULT_POLL_INTERVAL).await;

        assert_eq!(result.len(), 5);
        assert!(start.elapsed() < Duration::from_millis(1_500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_swallows_failures() {
        let items = vec![
            delayed(20, 10),
            Work::call(|| async { bail!("probe failed") }),
            Work::future(async { panic!("probe panicked") }),
        ];
        let result = parallel(items, &TokioTicker, Duration::from_millis(10)).await;

        assert_eq!(result.len(), 3);
        assert_eq!(result[&0], Some(10));
        assert_eq!(result[&1], None);
        assert_eq!(result[&2], None);
    }

    #[tokio::test]
    async fn test_parallel_empty_resolves_immediately() {
        let output = fan_in::<u32>(
            Input::Batch(Batch {
                items: Vec::new(),
                mode: Mode::parallel(),
            }),
            &TokioTicker,
        )
        .await
        .unwrap();

        assert_eq!(output, Output::Indexed(BTreeMap::new()));
    }
}
