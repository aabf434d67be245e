//! Stream wrapper that reports how much of an upload body has been sent.

use bytes::Bytes;
use futures_util::Stream;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::time::{Duration, Instant};

/// Called with `(bytes_sent, total_bytes)`
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Default gap between two progress reports
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Counts bytes flowing through `inner` and reports them at most once per
/// interval, plus once when the stream ends.
pub struct ProgressStream<S> {
    inner: S,
    total: u64,
    sent: u64,
    last_report: Instant,
    report_interval: Duration,
    callback: ProgressCallback,
}

impl<S> ProgressStream<S>
where
    S: Stream<Item = Result<Bytes, std::io::Error>>,
{
    pub fn new(inner: S, total: u64, callback: ProgressCallback) -> Self {
        Self {
            inner,
            total,
            sent: 0,
            last_report: Instant::now(),
            report_interval: DEFAULT_REPORT_INTERVAL,
            callback,
        }
    }

    pub fn with_interval(mut self, report_interval: Duration) -> Self {
        self.report_interval = report_interval;
        self
    }

    pub fn bytes_sent(&self) -> u64 {
        self.sent
    }
}

impl<S> Stream for ProgressStream<S>
where
    S: Stream<Item = Result<Bytes, std::io::Error>> + Unpin,
{
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                self.sent += chunk.len() as u64;

                let now = Instant::now();
                if now.duration_since(self.last_report) >= self.report_interval {
                    (self.callback)(self.sent, self.total);
                    self.last_report = now;
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(None) => {
                (self.callback)(self.sent, self.total);
                Poll::Ready(None)
            }
            other => other,
        }
    }
}
