//! Frame source abstraction: fetch one still image per request.

use std::{
    collections::VecDeque,
    io::Cursor,
    sync::{Arc, Mutex},
    time::Instant,
};

use async_trait::async_trait;
use bytes::Bytes;
use camwatch_types::{CamwatchError, Result};
use chrono::{DateTime, Utc};
use image::{ImageBuffer, ImageOutputFormat, Rgba};
use tokio::time::{sleep, Duration};
use tracing::debug;
use url::Url;

mod http;

pub use http::HttpFrameSource;

/// Encoded image body returned by a source, not yet decoded.
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub body: Bytes,
    pub content_type: Option<String>,
    pub elapsed_ms: u64,
}

/// Aggregated source performance counters.
#[derive(Debug, Default, Clone)]
pub struct SourceMetrics {
    pub successful_fetches: u64,
    pub failed_fetches: u64,
    pub last_elapsed_ms: Option<u64>,
    pub last_success_at: Option<DateTime<Utc>>,
}

impl SourceMetrics {
    fn record_success(&mut self, elapsed_ms: u64) {
        self.successful_fetches += 1;
        self.last_elapsed_ms = Some(elapsed_ms);
        self.last_success_at = Some(Utc::now());
    }

    fn record_failure(&mut self) {
        self.failed_fetches += 1;
    }
}

#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Fetches a single still image from `url`. The URL already carries any
    /// cache-busting parameters.
    async fn fetch(&self, url: &Url) -> Result<FetchedImage>;
    fn metrics(&self) -> SourceMetrics;
}

#[async_trait]
impl<T: FrameSource + ?Sized> FrameSource for Arc<T> {
    async fn fetch(&self, url: &Url) -> Result<FetchedImage> {
        (**self).fetch(url).await
    }

    fn metrics(&self) -> SourceMetrics {
        (**self).metrics()
    }
}

#[derive(Default)]
struct MockState {
    requests: Vec<Url>,
    fail_next: u32,
    failing: bool,
    delays: VecDeque<Duration>,
    default_delay: Duration,
    metrics: SourceMetrics,
}

/// Synthetic source used for integration and testing.
///
/// Every request is recorded. Each successful fetch returns a small PNG whose
/// color encodes the request sequence number.
#[derive(Clone)]
pub struct MockFrameSource {
    width: u32,
    height: u32,
    state: Arc<Mutex<MockState>>,
}

impl MockFrameSource {
    pub fn new() -> Self {
        Self::with_size(8, 6)
    }

    pub fn with_size(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Fail the next `count` requests, then succeed again.
    pub fn fail_next(&self, count: u32) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_next += count;
        }
    }

    /// Fail every request until switched off.
    pub fn set_failing(&self, failing: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.failing = failing;
        }
    }

    /// Delay applied to the next request only; queued in order.
    pub fn push_delay(&self, delay: Duration) {
        if let Ok(mut state) = self.state.lock() {
            state.delays.push_back(delay);
        }
    }

    pub fn set_default_delay(&self, delay: Duration) {
        if let Ok(mut state) = self.state.lock() {
            state.default_delay = delay;
        }
    }

    pub fn requests(&self) -> Vec<Url> {
        self.state
            .lock()
            .map(|s| s.requests.clone())
            .unwrap_or_default()
    }

    pub fn request_count(&self) -> usize {
        self.state.lock().map(|s| s.requests.len()).unwrap_or(0)
    }

    fn render(&self, sequence: usize) -> Result<Bytes> {
        let pixel = Rgba([
            (sequence & 0xff) as u8,
            ((sequence >> 8) & 0xff) as u8,
            0x40,
            0xff,
        ]);
        let buffer = ImageBuffer::from_pixel(self.width, self.height, pixel);
        let mut out = Cursor::new(Vec::new());
        buffer
            .write_to(&mut out, ImageOutputFormat::Png)
            .map_err(|err| source_error(format!("mock frame encoding failed: {err}")))?;
        Ok(Bytes::from(out.into_inner()))
    }
}

impl Default for MockFrameSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FrameSource for MockFrameSource {
    async fn fetch(&self, url: &Url) -> Result<FetchedImage> {
        let start = Instant::now();
        let (sequence, delay, fail) = {
            let mut state = self
                .state
                .lock()
                .map_err(|_| source_error("failed to lock mock state"))?;
            state.requests.push(url.clone());
            let delay = state.delays.pop_front().unwrap_or(state.default_delay);
            let fail = if state.fail_next > 0 {
                state.fail_next -= 1;
                true
            } else {
                state.failing
            };
            (state.requests.len(), delay, fail)
        };

        debug!("Mock fetch #{} {}", sequence, url);
        if !delay.is_zero() {
            sleep(delay).await;
        }

        let result = if fail {
            Err(source_error(format!("mock source refused {url}")))
        } else {
            self.render(sequence)
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        let mut state = self
            .state
            .lock()
            .map_err(|_| source_error("failed to lock mock state"))?;
        match result {
            Ok(body) => {
                state.metrics.record_success(elapsed_ms);
                Ok(FetchedImage {
                    body,
                    content_type: Some("image/png".into()),
                    elapsed_ms,
                })
            }
            Err(err) => {
                state.metrics.record_failure();
                Err(err)
            }
        }
    }

    fn metrics(&self) -> SourceMetrics {
        self.state
            .lock()
            .map(|s| s.metrics.clone())
            .unwrap_or_default()
    }
}

/// Generate an error aligned with frame source semantics.
pub fn source_error(message: impl Into<String>) -> CamwatchError {
    CamwatchError::Source(message.into())
}
