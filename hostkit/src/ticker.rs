//! Timer abstraction behind every polling loop.
//!
//! Each loop suspends only through [`Ticker::sleep`]. Production code uses
//! [`TokioTicker`]; tests run the same ticker on tokio's paused clock.

use std::time::Duration;

use async_trait::async_trait;

/// Source of tick delays.
#[async_trait]
pub trait Ticker: Send + Sync + 'static {
    /// Suspend the calling task for `period`.
    async fn sleep(&self, period: Duration);
}

/// Ticker backed by `tokio::time`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioTicker;

#[async_trait]
impl Ticker for TokioTicker {
    async fn sleep(&self, period: Duration) {
        tokio::time::sleep(period).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_tokio_ticker_advances_clock() {
        let start = Instant::now();
        TokioTicker.sleep(Duration::from_millis(250)).await;
        assert!(start.elapsed() >= Duration::from_millis(250));
    }
}
