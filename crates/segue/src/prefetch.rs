//! Prefetch scheduling: at most one delayed look-ahead probe per session.
//!
//! After every segment open the stream arms a task that sleeps for the preload
//! delay, re-probes the base URI, and records a newly minted segment URI with
//! the continuity tracker. Arming again cancels the previous task.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span};
use url::Url;

use crate::{ContinuityTracker, resolver::RedirectResolver};

/// What a prefetch task needs to know about the segment just opened.
#[derive(Debug, Clone)]
pub struct PrefetchJob {
    pub base_uri: Url,
    /// The segment the stream is reading right now
    pub opened_uri: Url,
    pub delay: Duration,
    pub retry_interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrefetchOutcome {
    /// A new segment URI was recorded as pending
    Marked(Url),
    /// The next segment was already pending
    AlreadyPending(Url),
    /// Both probes returned the segment being read
    NoNewSegment,
    Cancelled,
}

/// Holds the session's single outstanding prefetch task.
#[derive(Debug, Default)]
pub struct PrefetchSlot {
    token: Option<CancellationToken>,
    handle: Option<JoinHandle<PrefetchOutcome>>,
}

impl PrefetchSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel any task in flight and start a new one for `job`.
    pub fn arm(
        &mut self,
        job: PrefetchJob,
        resolver: Arc<dyn RedirectResolver>,
        tracker: Arc<ContinuityTracker>,
    ) {
        self.cancel();

        debug!(opened = %job.opened_uri, delay_ms = job.delay.as_millis() as u64, "Arming prefetch");
        let token = CancellationToken::new();
        let span = debug_span!("prefetch", base = %job.base_uri);
        let handle = tokio::spawn(
            run_prefetch(job, resolver, tracker, token.clone()).instrument(span),
        );

        self.token = Some(token);
        self.handle = Some(handle);
    }

    /// Signal the current task to stop at its next wait boundary.
    pub fn cancel(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
    }

    /// Cancel and wait until the task can no longer touch the tracker.
    pub async fn shutdown(&mut self) {
        self.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    pub fn is_armed(&self) -> bool {
        self.token.is_some()
            && self
                .handle
                .as_ref()
                .is_some_and(|handle| !handle.is_finished())
    }

    /// Wait for the armed task to finish and take its outcome.
    pub async fn join(&mut self) -> Option<PrefetchOutcome> {
        let handle = self.handle.take()?;
        self.token = None;
        handle.await.ok()
    }
}

impl Drop for PrefetchSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}

pub(crate) async fn run_prefetch(
    job: PrefetchJob,
    resolver: Arc<dyn RedirectResolver>,
    tracker: Arc<ContinuityTracker>,
    token: CancellationToken,
) -> PrefetchOutcome {
    for (attempt, wait) in [job.delay, job.retry_interval].into_iter().enumerate() {
        tokio::select! {
            _ = token.cancelled() => return PrefetchOutcome::Cancelled,
            _ = tokio::time::sleep(wait) => {}
        }

        let resolved = tokio::select! {
            _ = token.cancelled() => return PrefetchOutcome::Cancelled,
            resolved = resolver.resolve(&job.base_uri) => resolved,
        };

        if token.is_cancelled() {
            return PrefetchOutcome::Cancelled;
        }

        // the base URI itself comes back when the probe failed soft
        if resolved == job.opened_uri || resolved == job.base_uri {
            debug!(attempt = attempt + 1, "Origin has not minted the next segment yet");
            continue;
        }

        return if tracker.mark_pending(resolved.clone()) {
            PrefetchOutcome::Marked(resolved)
        } else {
            PrefetchOutcome::AlreadyPending(resolved)
        };
    }

    debug!("No new segment found this cycle");
    PrefetchOutcome::NoNewSegment
}
