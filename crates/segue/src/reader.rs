//! The byte-source contract media consumers program against.

use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::SegueError;

/// Per-open tuning supplied by the consumer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionHints {
    /// Overrides the configured segment duration estimate for prefetch timing
    pub estimated_segment_duration: Option<Duration>,
}

/// A sequential, possibly unbounded byte source.
///
/// Calls are made one at a time by a single consumer. After a read error the
/// consumer is expected to `close` and reopen.
#[async_trait]
pub trait SequentialReader: Send {
    /// Open `locator`, returning the declared length if there is one.
    async fn open(&mut self, locator: Url, hints: SessionHints)
    -> Result<Option<u64>, SegueError>;

    /// Fill `buf` with the next bytes. `Ok(0)` on a non-empty buffer means
    /// end of input.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, SegueError>;

    /// The location bytes are currently served from, `None` when closed.
    fn active_uri(&self) -> Option<Url>;

    /// Release everything. Safe to call in any state, any number of times.
    async fn close(&mut self);
}
