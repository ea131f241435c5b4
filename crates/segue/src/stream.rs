//! # Continuation Stream
//!
//! Presents a base URI that redirects to a fresh, short-lived segment on every
//! probe as one uninterrupted byte source.
//!
//! When the open segment runs dry the stream does not report end of input.
//! It closes the segment, probes the base URI again and keeps reading from
//! whatever new segment the origin points to. Only repeated non-advancing
//! probes, or running out of transition attempts, end the stream.
//!
//! ```text
//! Closed -> Opening -> Reading <-> Transitioning -> Reading | EndOfStream
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::{
    ContinuityTracker, SegmentDescriptor, SegueError, SessionStats, StreamSettings,
    prefetch::{PrefetchJob, PrefetchSlot},
    reader::{SequentialReader, SessionHints},
    resolver::{HttpRedirectResolver, RedirectResolver},
    transport::{HttpTransportFactory, SegmentTransport, TransportFactory},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Closed,
    Opening,
    Reading,
    Transitioning,
    EndOfStream,
}

/// Result of one transition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    /// A new segment is open and ready to read
    Advanced,
    /// The base URI kept pointing at the exhausted segment
    Stalled,
}

pub struct ContinuationStream {
    settings: Arc<StreamSettings>,
    resolver: Arc<dyn RedirectResolver>,
    transports: Arc<dyn TransportFactory>,
    tracker: Arc<ContinuityTracker>,

    state: StreamState,
    base_uri: Option<Url>,
    current_uri: Option<Url>,
    current_segment: Option<SegmentDescriptor>,
    transport: Option<Box<dyn SegmentTransport>>,
    /// `None` when the segment did not declare a length
    bytes_remaining: Option<u64>,
    segment_duration: Duration,

    prefetch: PrefetchSlot,
    completion: Option<JoinHandle<()>>,
    stats: SessionStats,
}

impl ContinuationStream {
    /// Build a stream on the reqwest-backed resolver and transport.
    pub fn new(settings: StreamSettings) -> Result<Self, SegueError> {
        let settings = settings.validate();
        let resolver = Arc::new(HttpRedirectResolver::new(&settings)?);
        let transports = Arc::new(HttpTransportFactory::new(&settings)?);
        let tracker = Arc::new(ContinuityTracker::new(&settings));
        Ok(Self::with_parts(settings, resolver, transports, tracker))
    }

    /// Build a stream from explicit collaborators.
    ///
    /// `tracker` should belong to this session alone; it is cleared on close.
    pub fn with_parts(
        settings: StreamSettings,
        resolver: Arc<dyn RedirectResolver>,
        transports: Arc<dyn TransportFactory>,
        tracker: Arc<ContinuityTracker>,
    ) -> Self {
        let settings = settings.validate();
        let segment_duration = settings.estimated_segment_duration();
        Self {
            settings: Arc::new(settings),
            resolver,
            transports,
            tracker,
            state: StreamState::Closed,
            base_uri: None,
            current_uri: None,
            current_segment: None,
            transport: None,
            bytes_remaining: None,
            segment_duration,
            prefetch: PrefetchSlot::new(),
            completion: None,
            stats: SessionStats::default(),
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn tracker(&self) -> &Arc<ContinuityTracker> {
        &self.tracker
    }

    pub fn base_uri(&self) -> Option<&Url> {
        self.base_uri.as_ref()
    }

    /// Bytes left in the current segment, `None` if its length is unknown.
    pub fn bytes_remaining(&self) -> Option<u64> {
        self.bytes_remaining
    }

    /// Open the session on `locator`.
    #[instrument(skip_all, fields(locator = %locator), level = "debug")]
    pub async fn open(
        &mut self,
        locator: Url,
        hints: SessionHints,
    ) -> Result<Option<u64>, SegueError> {
        if self.state != StreamState::Closed {
            let uri = self
                .current_uri
                .as_ref()
                .or(self.base_uri.as_ref())
                .map(|uri| uri.to_string())
                .unwrap_or_default();
            return Err(SegueError::AlreadyOpen { uri });
        }

        self.state = StreamState::Opening;
        self.stats = SessionStats::default();
        self.segment_duration = hints
            .estimated_segment_duration
            .unwrap_or_else(|| self.settings.estimated_segment_duration());

        let first = self.resolver.resolve(&locator).await;
        let transport = match self.transports.open(&first).await {
            Ok(transport) => transport,
            Err(e) => {
                warn!(segment = %first, error = %e, "Failed to open first segment");
                self.state = StreamState::Closed;
                return Err(e);
            }
        };

        self.base_uri = Some(locator);
        let length = transport.content_length();
        self.install_segment(first, transport);
        self.state = StreamState::Reading;

        info!(
            segment = ?self.current_uri.as_ref().map(Url::as_str),
            ?length,
            "Continuation stream opened"
        );
        Ok(length)
    }

    /// Read the next bytes, crossing segment boundaries transparently.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, SegueError> {
        match self.state {
            StreamState::Reading => {}
            StreamState::EndOfStream => return Ok(0),
            StreamState::Closed | StreamState::Opening | StreamState::Transitioning => {
                return Err(SegueError::NotOpen);
            }
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let mut attempts = 0u32;
        loop {
            if let Some(transport) = self.transport.as_mut() {
                let n = transport.read(buf).await?;
                if n > 0 {
                    self.record_bytes(n);
                    self.state = StreamState::Reading;
                    return Ok(n);
                }
            }

            if attempts >= self.settings.max_transition_attempts {
                warn!(attempts, "Transition attempts exhausted, ending stream");
                return Ok(self.end_of_stream());
            }
            attempts += 1;

            self.state = StreamState::Transitioning;
            match self.transition().await {
                Ok(Transition::Advanced) => self.state = StreamState::Reading,
                Ok(Transition::Stalled) => return Ok(self.end_of_stream()),
                Err(e) => {
                    self.stats.failed_transitions += 1;
                    warn!(attempt = attempts, error = %e, "Segment transition failed");
                }
            }
        }
    }

    /// Where bytes are currently served from.
    pub fn active_uri(&self) -> Option<Url> {
        self.transport.as_ref().map(|transport| transport.uri().clone())
    }

    /// Tear the session down. Idempotent.
    pub async fn close(&mut self) {
        // a late prefetch write would survive the clear below
        self.prefetch.shutdown().await;

        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
        if let Some(completion) = self.completion.take() {
            // the record is cheap; waiting keeps it from landing after clear()
            let _ = completion.await;
        }
        self.tracker.clear();

        if self.state != StreamState::Closed {
            info!(
                base = ?self.base_uri.as_ref().map(Url::as_str),
                bytes_read = self.stats.bytes_read,
                segments = self.stats.segments_opened,
                "Continuation stream closed"
            );
        }

        self.base_uri = None;
        self.current_uri = None;
        self.current_segment = None;
        self.bytes_remaining = None;
        self.state = StreamState::Closed;
    }

    /// Move from the exhausted segment to the next one.
    #[instrument(skip(self), level = "debug")]
    async fn transition(&mut self) -> Result<Transition, SegueError> {
        self.dispatch_completion();

        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
        self.bytes_remaining = None;

        let Some(base) = self.base_uri.clone() else {
            return Err(SegueError::NotOpen);
        };

        let mut candidate = self.resolver.resolve(&base).await;
        if !self.is_progress(&candidate, &base) {
            debug!(segment = %candidate, "Base URI did not advance, retrying once");
            tokio::time::sleep(self.settings.stall_retry_delay()).await;
            candidate = self.resolver.resolve(&base).await;

            if !self.is_progress(&candidate, &base) {
                self.stats.stalls += 1;
                info!(segment = %candidate, "No new segment available, treating as end of input");
                return Ok(Transition::Stalled);
            }
        }

        let transport = self.transports.open(&candidate).await?;
        info!(
            from = ?self.current_uri.as_ref().map(Url::as_str),
            to = %candidate,
            "Transitioned to next segment"
        );
        self.install_segment(candidate, transport);
        self.stats.transitions += 1;
        Ok(Transition::Advanced)
    }

    /// A probe made progress when it names a segment other than the one just
    /// read. Getting the base URI back means the probe failed soft or the
    /// origin stopped redirecting; neither is a new segment.
    fn is_progress(&self, candidate: &Url, base: &Url) -> bool {
        Some(candidate) != self.current_uri.as_ref() && candidate != base
    }

    /// Make `transport` the active segment and arm prefetch behind it.
    fn install_segment(&mut self, uri: Url, transport: Box<dyn SegmentTransport>) {
        let segment = self
            .tracker
            .take_pending(&uri)
            .unwrap_or_else(|| SegmentDescriptor::new(uri.clone()))
            .with_duration(self.segment_duration);

        self.bytes_remaining = transport.content_length();
        self.transport = Some(transport);
        self.current_segment = Some(segment);
        self.current_uri = Some(uri.clone());
        self.stats.segments_opened += 1;

        if let Some(base) = self.base_uri.clone() {
            let job = PrefetchJob {
                base_uri: base,
                opened_uri: uri,
                delay: self.tracker.calculate_preload_delay(self.segment_duration),
                retry_interval: self.settings.prefetch_retry_interval(),
            };
            self.prefetch
                .arm(job, self.resolver.clone(), self.tracker.clone());
            self.stats.prefetch_armed += 1;
        }
    }

    /// Hand the finished segment to the tracker off the read path.
    fn dispatch_completion(&mut self) {
        let Some(segment) = self.current_segment.take() else {
            return;
        };

        let tracker = self.tracker.clone();
        let previous = self.completion.take();
        self.completion = Some(tokio::spawn(async move {
            // keep records in completion order
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            tracker.complete(segment);
        }));
    }

    fn record_bytes(&mut self, n: usize) {
        let n = n as u64;
        self.stats.bytes_read += n;
        if let Some(remaining) = self.bytes_remaining.as_mut() {
            *remaining = remaining.saturating_sub(n);
        }
    }

    fn end_of_stream(&mut self) -> usize {
        self.prefetch.cancel();
        self.state = StreamState::EndOfStream;
        0
    }
}

#[async_trait]
impl SequentialReader for ContinuationStream {
    async fn open(
        &mut self,
        locator: Url,
        hints: SessionHints,
    ) -> Result<Option<u64>, SegueError> {
        ContinuationStream::open(self, locator, hints).await
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, SegueError> {
        ContinuationStream::read(self, buf).await
    }

    fn active_uri(&self) -> Option<Url> {
        ContinuationStream::active_uri(self)
    }

    async fn close(&mut self) {
        ContinuationStream::close(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn url(path: &str) -> Url {
        Url::parse("http://origin.example").unwrap().join(path).unwrap()
    }

    /// Hands out scripted targets, then repeats the last one forever.
    struct ScriptedResolver {
        targets: Mutex<VecDeque<Url>>,
        last: Mutex<Option<Url>>,
        calls: AtomicUsize,
    }

    impl ScriptedResolver {
        fn new(targets: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                targets: Mutex::new(targets.iter().map(|t| url(t)).collect()),
                last: Mutex::new(None),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RedirectResolver for ScriptedResolver {
        async fn resolve(&self, uri: &Url) -> Url {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut last = self.last.lock();
            if let Some(next) = self.targets.lock().pop_front() {
                *last = Some(next);
            }
            last.clone().unwrap_or_else(|| uri.clone())
        }
    }

    struct MemoryTransport {
        uri: Url,
        data: Vec<u8>,
        position: usize,
        chunk: usize,
        fail_after: Option<usize>,
    }

    #[async_trait]
    impl SegmentTransport for MemoryTransport {
        fn uri(&self) -> &Url {
            &self.uri
        }

        fn content_length(&self) -> Option<u64> {
            Some(self.data.len() as u64)
        }

        async fn read(&mut self, buf: &mut [u8]) -> Result<usize, SegueError> {
            if self.fail_after.is_some_and(|limit| self.position >= limit) {
                return Err(SegueError::timeout("scripted read failure"));
            }
            let n = buf
                .len()
                .min(self.chunk)
                .min(self.data.len() - self.position);
            buf[..n].copy_from_slice(&self.data[self.position..self.position + n]);
            self.position += n;
            Ok(n)
        }

        async fn close(&mut self) {}
    }

    #[derive(Default)]
    struct MemoryFactory {
        segments: HashMap<Url, Vec<u8>>,
        broken: Vec<Url>,
        fail_after: Option<usize>,
        opened: Mutex<Vec<Url>>,
    }

    impl MemoryFactory {
        fn with_segments(segments: &[(&str, &str)]) -> Self {
            Self {
                segments: segments
                    .iter()
                    .map(|(path, body)| (url(path), body.as_bytes().to_vec()))
                    .collect(),
                ..Default::default()
            }
        }

        fn opened(&self) -> Vec<String> {
            self.opened
                .lock()
                .iter()
                .map(|u| u.path().to_string())
                .collect()
        }
    }

    #[async_trait]
    impl TransportFactory for MemoryFactory {
        async fn open(&self, uri: &Url) -> Result<Box<dyn SegmentTransport>, SegueError> {
            if self.broken.contains(uri) {
                return Err(SegueError::http_status(
                    reqwest::StatusCode::NOT_FOUND,
                    uri.as_str(),
                    "segment open",
                ));
            }
            let data = self.segments.get(uri).cloned().ok_or_else(|| {
                SegueError::http_status(reqwest::StatusCode::NOT_FOUND, uri.as_str(), "segment open")
            })?;
            self.opened.lock().push(uri.clone());
            Ok(Box::new(MemoryTransport {
                uri: uri.clone(),
                data,
                position: 0,
                chunk: 4,
                fail_after: self.fail_after,
            }))
        }
    }

    fn settings() -> StreamSettings {
        StreamSettings {
            stall_retry_delay_ms: 1,
            // keep prefetch out of the way of the scripted resolver
            preload_min_delay_ms: 60_000,
            preload_max_delay_ms: 60_000,
            ..Default::default()
        }
    }

    fn stream(
        resolver: Arc<ScriptedResolver>,
        factory: Arc<MemoryFactory>,
    ) -> ContinuationStream {
        let settings = settings();
        let tracker = Arc::new(ContinuityTracker::new(&settings));
        ContinuationStream::with_parts(settings, resolver, factory, tracker)
    }

    async fn read_to_end(stream: &mut ContinuationStream) -> Vec<u8> {
        let mut out = Vec::new();
        let mut buf = [0u8; 16];
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                return out;
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    #[tokio::test]
    async fn reads_across_segments_as_one_stream() {
        let resolver = ScriptedResolver::new(&["/seg/1.ts", "/seg/2.ts", "/seg/3.ts"]);
        let factory = Arc::new(MemoryFactory::with_segments(&[
            ("/seg/1.ts", "first-"),
            ("/seg/2.ts", "second-"),
            ("/seg/3.ts", "third"),
        ]));
        let mut stream = stream(resolver, factory.clone());

        let length = stream.open(url("/live"), SessionHints::default()).await.unwrap();
        assert_eq!(length, Some(6));
        assert_eq!(stream.state(), StreamState::Reading);

        let bytes = read_to_end(&mut stream).await;
        assert_eq!(bytes, b"first-second-third");
        assert_eq!(stream.state(), StreamState::EndOfStream);
        assert_eq!(stream.stats().transitions, 2);
        assert_eq!(stream.stats().stalls, 1);
        assert_eq!(factory.opened(), vec!["/seg/1.ts", "/seg/2.ts", "/seg/3.ts"]);
    }

    #[tokio::test]
    async fn bytes_remaining_tracks_declared_length() {
        let resolver = ScriptedResolver::new(&["/seg/1.ts"]);
        let factory = Arc::new(MemoryFactory::with_segments(&[("/seg/1.ts", "0123456789")]));
        let mut stream = stream(resolver, factory);

        stream.open(url("/live"), SessionHints::default()).await.unwrap();
        let mut buf = [0u8; 3];
        assert_eq!(stream.read(&mut buf).await.unwrap(), 3);
        assert_eq!(stream.bytes_remaining(), Some(7));
    }

    #[tokio::test]
    async fn non_advancing_base_ends_after_one_stall() {
        let resolver = ScriptedResolver::new(&["/seg/1.ts"]);
        let factory = Arc::new(MemoryFactory::with_segments(&[("/seg/1.ts", "only")]));
        let mut stream = stream(resolver.clone(), factory.clone());

        stream.open(url("/live"), SessionHints::default()).await.unwrap();
        let bytes = read_to_end(&mut stream).await;

        assert_eq!(bytes, b"only");
        assert_eq!(stream.stats().stalls, 1);
        // open probe + stalled probe + one retry probe
        assert_eq!(resolver.calls(), 3);
        assert_eq!(factory.opened(), vec!["/seg/1.ts"]);

        // stays at end of input
        let mut buf = [0u8; 4];
        assert_eq!(stream.read(&mut buf).await.unwrap(), 0);
        assert_eq!(resolver.calls(), 3);
    }

    #[tokio::test]
    async fn failed_probes_count_as_no_progress() {
        // the resolver falls back to the base URI, as a timed out probe does
        let resolver = ScriptedResolver::new(&["/seg/1.ts", "/live", "/live"]);
        let factory = Arc::new(MemoryFactory::with_segments(&[
            ("/seg/1.ts", "aaaa"),
            ("/live", "must not be opened"),
        ]));
        let mut stream = stream(resolver, factory.clone());

        stream.open(url("/live"), SessionHints::default()).await.unwrap();
        let bytes = read_to_end(&mut stream).await;

        assert_eq!(bytes, b"aaaa");
        assert_eq!(stream.stats().stalls, 1);
        assert_eq!(factory.opened(), vec!["/seg/1.ts"]);
    }

    #[tokio::test]
    async fn late_segment_is_picked_up_on_retry_probe() {
        // the stalled probe still sees segment 1, the retry sees segment 2
        let resolver = ScriptedResolver::new(&["/seg/1.ts", "/seg/1.ts", "/seg/2.ts"]);
        let factory = Arc::new(MemoryFactory::with_segments(&[
            ("/seg/1.ts", "aaaa"),
            ("/seg/2.ts", "bbbb"),
        ]));
        let mut stream = stream(resolver, factory);

        stream.open(url("/live"), SessionHints::default()).await.unwrap();
        let bytes = read_to_end(&mut stream).await;
        assert_eq!(bytes, b"aaaabbbb");
        assert_eq!(stream.stats().transitions, 1);
    }

    #[tokio::test]
    async fn failed_transitions_count_against_the_budget() {
        let resolver = ScriptedResolver::new(&[
            "/seg/1.ts",
            "/seg/bad-1.ts",
            "/seg/bad-2.ts",
            "/seg/bad-3.ts",
            "/seg/2.ts",
        ]);
        let mut factory = MemoryFactory::with_segments(&[("/seg/1.ts", "aaaa"), ("/seg/2.ts", "bbbb")]);
        factory.broken = vec![url("/seg/bad-1.ts"), url("/seg/bad-2.ts"), url("/seg/bad-3.ts")];
        let factory = Arc::new(factory);
        let mut stream = stream(resolver, factory.clone());

        stream.open(url("/live"), SessionHints::default()).await.unwrap();
        let bytes = read_to_end(&mut stream).await;

        assert_eq!(bytes, b"aaaa");
        assert_eq!(stream.stats().failed_transitions, 3);
        assert_eq!(stream.state(), StreamState::EndOfStream);
        assert_eq!(factory.opened(), vec!["/seg/1.ts"]);
    }

    #[tokio::test]
    async fn recovers_after_a_failed_transition() {
        let resolver = ScriptedResolver::new(&["/seg/1.ts", "/seg/bad.ts", "/seg/2.ts"]);
        let mut factory = MemoryFactory::with_segments(&[("/seg/1.ts", "aaaa"), ("/seg/2.ts", "bbbb")]);
        factory.broken = vec![url("/seg/bad.ts")];
        let mut stream = stream(resolver, Arc::new(factory));

        stream.open(url("/live"), SessionHints::default()).await.unwrap();
        let bytes = read_to_end(&mut stream).await;

        assert_eq!(bytes, b"aaaabbbb");
        assert_eq!(stream.stats().failed_transitions, 1);
        assert_eq!(stream.stats().transitions, 1);
    }

    #[tokio::test]
    async fn empty_segments_use_up_the_attempt_budget() {
        let resolver = ScriptedResolver::new(&["/seg/1.ts", "/seg/2.ts", "/seg/3.ts", "/seg/4.ts", "/seg/5.ts"]);
        let factory = Arc::new(MemoryFactory::with_segments(&[
            ("/seg/1.ts", "aaaa"),
            ("/seg/2.ts", ""),
            ("/seg/3.ts", ""),
            ("/seg/4.ts", ""),
            ("/seg/5.ts", "never"),
        ]));
        let mut stream = stream(resolver, factory.clone());

        stream.open(url("/live"), SessionHints::default()).await.unwrap();
        let bytes = read_to_end(&mut stream).await;

        assert_eq!(bytes, b"aaaa");
        assert_eq!(
            factory.opened(),
            vec!["/seg/1.ts", "/seg/2.ts", "/seg/3.ts", "/seg/4.ts"]
        );
    }

    #[tokio::test]
    async fn open_failure_leaves_stream_closed() {
        let resolver = ScriptedResolver::new(&["/seg/missing.ts"]);
        let factory = Arc::new(MemoryFactory::default());
        let mut stream = stream(resolver, factory);

        let err = stream
            .open(url("/live"), SessionHints::default())
            .await
            .unwrap_err();

        assert!(matches!(err, SegueError::HttpStatus { .. }));
        assert_eq!(stream.state(), StreamState::Closed);
        assert!(stream.active_uri().is_none());
        assert!(matches!(
            stream.read(&mut [0u8; 4]).await,
            Err(SegueError::NotOpen)
        ));
    }

    #[tokio::test]
    async fn open_twice_is_rejected() {
        let resolver = ScriptedResolver::new(&["/seg/1.ts"]);
        let factory = Arc::new(MemoryFactory::with_segments(&[("/seg/1.ts", "aaaa")]));
        let mut stream = stream(resolver, factory);

        stream.open(url("/live"), SessionHints::default()).await.unwrap();
        let err = stream
            .open(url("/live"), SessionHints::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SegueError::AlreadyOpen { .. }));
        assert_eq!(stream.state(), StreamState::Reading);
    }

    #[tokio::test]
    async fn read_errors_propagate() {
        let resolver = ScriptedResolver::new(&["/seg/1.ts"]);
        let mut factory = MemoryFactory::with_segments(&[("/seg/1.ts", "aaaabbbb")]);
        factory.fail_after = Some(4);
        let mut stream = stream(resolver, Arc::new(factory));

        stream.open(url("/live"), SessionHints::default()).await.unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(stream.read(&mut buf).await.unwrap(), 4);
        assert!(matches!(
            stream.read(&mut buf).await,
            Err(SegueError::Timeout { .. })
        ));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_resets() {
        let resolver = ScriptedResolver::new(&["/seg/1.ts", "/seg/2.ts"]);
        let factory = Arc::new(MemoryFactory::with_segments(&[
            ("/seg/1.ts", "aaaa"),
            ("/seg/2.ts", "bbbb"),
        ]));
        let mut stream = stream(resolver, factory);

        stream.close().await;
        assert_eq!(stream.state(), StreamState::Closed);

        stream.open(url("/live"), SessionHints::default()).await.unwrap();
        assert_eq!(stream.active_uri(), Some(url("/seg/1.ts")));
        stream.tracker().mark_pending(url("/seg/9.ts"));

        stream.close().await;
        stream.close().await;

        assert_eq!(stream.state(), StreamState::Closed);
        assert!(stream.active_uri().is_none());
        assert!(stream.base_uri().is_none());
        assert_eq!(stream.bytes_remaining(), None);
        assert_eq!(stream.tracker().pending_count(), 0);

        // closed is re-enterable
        stream.open(url("/live"), SessionHints::default()).await.unwrap();
        assert_eq!(stream.active_uri(), Some(url("/seg/2.ts")));
    }

    #[tokio::test]
    async fn completed_segments_reach_the_tracker() {
        let resolver = ScriptedResolver::new(&["/seg/1.ts", "/seg/2.ts"]);
        let factory = Arc::new(MemoryFactory::with_segments(&[
            ("/seg/1.ts", "aaaa"),
            ("/seg/2.ts", "bbbb"),
        ]));
        let mut stream = stream(resolver, factory);

        stream.open(url("/live"), SessionHints::default()).await.unwrap();
        read_to_end(&mut stream).await;

        // wait for the background records to land
        if let Some(completion) = stream.completion.take() {
            completion.await.unwrap();
        }
        let history: Vec<_> = stream
            .tracker()
            .history()
            .into_iter()
            .map(|d| d.uri.path().to_string())
            .collect();
        assert_eq!(history, vec!["/seg/1.ts", "/seg/2.ts"]);
    }

    #[tokio::test]
    async fn prefetched_segment_is_claimed_on_open() {
        let resolver = ScriptedResolver::new(&["/seg/1.ts", "/seg/2.ts"]);
        let factory = Arc::new(MemoryFactory::with_segments(&[
            ("/seg/1.ts", "aaaa"),
            ("/seg/2.ts", "bbbb"),
        ]));
        let mut stream = stream(resolver, factory);

        stream.open(url("/live"), SessionHints::default()).await.unwrap();
        stream.tracker().mark_pending(url("/seg/2.ts"));

        let mut buf = [0u8; 8];
        assert_eq!(stream.read(&mut buf).await.unwrap(), 4);
        assert_eq!(stream.read(&mut buf).await.unwrap(), 4);
        assert_eq!(stream.active_uri(), Some(url("/seg/2.ts")));
        assert!(!stream.tracker().is_pending(&url("/seg/2.ts")));
        assert!(stream.current_segment.as_ref().unwrap().preloaded);
    }

    #[tokio::test]
    async fn zero_attempt_budget_is_clamped_to_one() {
        let resolver = ScriptedResolver::new(&["/seg/0.ts", "/seg/1.ts"]);
        let factory = Arc::new(MemoryFactory::with_segments(&[
            ("/seg/0.ts", "aaaa"),
            ("/seg/1.ts", "bbbb"),
        ]));
        let settings = StreamSettings {
            max_transition_attempts: 0,
            ..settings()
        };
        let tracker = Arc::new(ContinuityTracker::new(&settings));
        let mut stream = ContinuationStream::with_parts(settings, resolver, factory, tracker);

        stream.open(url("/live"), SessionHints::default()).await.unwrap();
        let bytes = read_to_end(&mut stream).await;

        assert_eq!(bytes, b"aaaabbbb");
        assert_eq!(stream.stats().transitions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn background_prefetch_feeds_the_next_transition() {
        let resolver = ScriptedResolver::new(&["/seg/1.ts", "/seg/2.ts"]);
        let factory = Arc::new(MemoryFactory::with_segments(&[
            ("/seg/1.ts", "aaaa"),
            ("/seg/2.ts", "bbbb"),
        ]));
        let settings = StreamSettings {
            stall_retry_delay_ms: 1,
            ..Default::default()
        };
        let tracker = Arc::new(ContinuityTracker::new(&settings));
        let mut stream = ContinuationStream::with_parts(settings, resolver, factory, tracker);
        let delay = stream
            .tracker()
            .calculate_preload_delay(Duration::from_millis(10_000));

        stream.open(url("/live"), SessionHints::default()).await.unwrap();
        // let the armed task start its timer
        tokio::task::yield_now().await;

        tokio::time::advance(delay - Duration::from_millis(1)).await;
        tokio::task::yield_now().await;
        assert!(stream.prefetch.is_armed());
        assert!(!stream.tracker().is_pending(&url("/seg/2.ts")));

        tokio::time::advance(Duration::from_millis(1)).await;
        let outcome = stream.prefetch.join().await;
        assert_eq!(outcome, Some(crate::PrefetchOutcome::Marked(url("/seg/2.ts"))));
        assert!(stream.tracker().is_pending(&url("/seg/2.ts")));

        let mut buf = [0u8; 8];
        assert_eq!(stream.read(&mut buf).await.unwrap(), 4);
        assert_eq!(stream.read(&mut buf).await.unwrap(), 4);
        assert_eq!(&buf[..4], b"bbbb");
        assert_eq!(stream.active_uri(), Some(url("/seg/2.ts")));
        assert!(!stream.tracker().is_pending(&url("/seg/2.ts")));
        assert!(stream.current_segment.as_ref().unwrap().preloaded);

        stream.close().await;
    }

    #[tokio::test]
    async fn prefetch_is_armed_on_every_segment() {
        let resolver = ScriptedResolver::new(&["/seg/1.ts", "/seg/2.ts"]);
        let factory = Arc::new(MemoryFactory::with_segments(&[
            ("/seg/1.ts", "aaaa"),
            ("/seg/2.ts", "bbbb"),
        ]));
        let mut stream = stream(resolver, factory);

        stream.open(url("/live"), SessionHints::default()).await.unwrap();
        assert!(stream.prefetch.is_armed());

        read_to_end(&mut stream).await;
        assert_eq!(stream.stats().prefetch_armed, 2);
        // end of input disarms it
        assert!(!stream.prefetch.is_armed());
    }
}
