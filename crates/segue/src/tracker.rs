//! Segment Continuity Tracker: bookkeeping for segments seen by one session.
//!
//! The tracker keeps two views of the segment sequence:
//! - `pending`: segments discovered by prefetch but not yet consumed, keyed by URI
//! - `history`: the most recently completed segments, in completion order
//!
//! `history` exists for the consecutive-pair continuity check. A failed check
//! is only reported; nothing is repaired here.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};
use url::Url;

use crate::StreamSettings;

/// Timestamp value meaning "not known".
pub const UNKNOWN_TIMESTAMP: i64 = 0;

/// Fraction of the segment duration to wait before probing for the next one.
const PRELOAD_FRACTION: f64 = 0.25;

/// Metadata for one physical segment.
///
/// Timestamps are presentation times in milliseconds; [`UNKNOWN_TIMESTAMP`]
/// marks a bound nobody has measured.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentDescriptor {
    pub uri: Url,
    pub start_timestamp: i64,
    pub end_timestamp: i64,
    pub duration: i64,
    /// Set once background prefetch work for this segment has finished
    pub preloaded: bool,
    pub observed_at: Instant,
}

impl SegmentDescriptor {
    pub fn new(uri: Url) -> Self {
        Self {
            uri,
            start_timestamp: UNKNOWN_TIMESTAMP,
            end_timestamp: UNKNOWN_TIMESTAMP,
            duration: UNKNOWN_TIMESTAMP,
            preloaded: false,
            observed_at: Instant::now(),
        }
    }

    pub fn with_timing(mut self, start_timestamp: i64, end_timestamp: i64) -> Self {
        self.start_timestamp = start_timestamp;
        self.end_timestamp = end_timestamp;
        self.duration = end_timestamp - start_timestamp;
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        self
    }

    pub fn age(&self) -> Duration {
        self.observed_at.elapsed()
    }
}

/// A timestamp gap between two consecutively completed segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discontinuity {
    pub previous_uri: Url,
    pub current_uri: Url,
    pub expected_start: i64,
    pub actual_start: i64,
    /// `actual_start - expected_start`
    pub diff: i64,
}

#[derive(Debug, Clone)]
struct TrackerLimits {
    max_pending: usize,
    pending_max_age: Duration,
    history_size: usize,
    tolerance: i64,
    preload_min_delay: Duration,
    preload_max_delay: Duration,
}

/// Per-session segment ledger.
///
/// Reads (`is_pending`, `get`) go straight to the concurrent map. Every
/// mutation of `pending` or `history` happens while holding the history lock,
/// so mutations are serialized per instance.
#[derive(Debug)]
pub struct ContinuityTracker {
    limits: TrackerLimits,
    pending: DashMap<Url, SegmentDescriptor>,
    history: Mutex<VecDeque<SegmentDescriptor>>,
}

impl Default for ContinuityTracker {
    fn default() -> Self {
        Self::new(&StreamSettings::default())
    }
}

impl ContinuityTracker {
    pub fn new(settings: &StreamSettings) -> Self {
        let limits = TrackerLimits {
            max_pending: settings.max_pending_segments.max(1),
            pending_max_age: settings.pending_max_age(),
            history_size: settings.history_size.max(2),
            tolerance: i64::try_from(settings.continuity_tolerance_ms).unwrap_or(i64::MAX),
            preload_min_delay: settings.preload_min_delay(),
            preload_max_delay: settings.preload_max_delay().max(settings.preload_min_delay()),
        };
        Self {
            pending: DashMap::with_capacity(limits.max_pending + 1),
            history: Mutex::new(VecDeque::with_capacity(limits.history_size + 1)),
            limits,
        }
    }

    pub fn is_pending(&self, uri: &Url) -> bool {
        self.pending.contains_key(uri)
    }

    pub fn get(&self, uri: &Url) -> Option<SegmentDescriptor> {
        self.pending.get(uri).map(|entry| entry.value().clone())
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn history_len(&self) -> usize {
        self.history.lock().len()
    }

    /// Completed segments, oldest first.
    pub fn history(&self) -> Vec<SegmentDescriptor> {
        self.history.lock().iter().cloned().collect()
    }

    /// Record `uri` as fetched ahead of need.
    ///
    /// Returns `false` when the URI was already pending.
    pub fn mark_pending(&self, uri: Url) -> bool {
        {
            let _guard = self.history.lock();
            if self.pending.contains_key(&uri) {
                debug!(uri = %uri, "Segment already pending, skipping");
                return false;
            }
            self.pending
                .insert(uri.clone(), SegmentDescriptor::new(uri.clone()));
        }

        // Prefetch only records the segment for now; inspecting its payload for
        // timing would happen here.
        {
            let _guard = self.history.lock();
            if let Some(mut entry) = self.pending.get_mut(&uri) {
                entry.preloaded = true;
            }
            self.evict_stale_locked();
        }

        debug!(uri = %uri, pending = self.pending.len(), "Segment marked pending");
        true
    }

    /// Remove and return the pending entry for `uri`, if any.
    ///
    /// Called when the stream starts reading a segment, so a pending URI is
    /// never the one being read.
    pub fn take_pending(&self, uri: &Url) -> Option<SegmentDescriptor> {
        let _guard = self.history.lock();
        self.pending.remove(uri).map(|(_, descriptor)| descriptor)
    }

    /// Record a consumed segment and check it against its predecessor.
    pub fn complete(&self, descriptor: SegmentDescriptor) -> Option<Discontinuity> {
        let mut history = self.history.lock();

        self.pending.remove(&descriptor.uri);
        history.push_back(descriptor);
        while history.len() > self.limits.history_size {
            history.pop_front();
        }

        let len = history.len();
        if len < 2 {
            return None;
        }
        let discontinuity = self.check_pair(&history[len - 2], &history[len - 1]);
        drop(history);

        if let Some(gap) = &discontinuity {
            warn!(
                previous = %gap.previous_uri,
                current = %gap.current_uri,
                expected_start = gap.expected_start,
                actual_start = gap.actual_start,
                diff_ms = gap.diff,
                "Timestamp discontinuity between segments"
            );
        }
        discontinuity
    }

    fn check_pair(
        &self,
        previous: &SegmentDescriptor,
        current: &SegmentDescriptor,
    ) -> Option<Discontinuity> {
        let expected_start = previous.end_timestamp;
        let actual_start = current.start_timestamp;
        if expected_start == UNKNOWN_TIMESTAMP || actual_start == UNKNOWN_TIMESTAMP {
            return None;
        }

        let diff = actual_start.saturating_sub(expected_start);
        (diff.unsigned_abs() > self.limits.tolerance.unsigned_abs()).then(|| Discontinuity {
            previous_uri: previous.uri.clone(),
            current_uri: current.uri.clone(),
            expected_start,
            actual_start,
            diff,
        })
    }

    /// Delay before probing for the segment after one of `segment_duration`.
    pub fn calculate_preload_delay(&self, segment_duration: Duration) -> Duration {
        segment_duration
            .mul_f64(PRELOAD_FRACTION)
            .clamp(self.limits.preload_min_delay, self.limits.preload_max_delay)
    }

    pub fn clear(&self) {
        let mut history = self.history.lock();
        self.pending.clear();
        history.clear();
        debug!("Continuity tracker cleared");
    }

    /// Drop the oldest stale entries while `pending` is over its cap.
    ///
    /// Caller holds the history lock.
    fn evict_stale_locked(&self) {
        let excess = self.pending.len().saturating_sub(self.limits.max_pending);
        if excess == 0 {
            return;
        }

        let mut stale: Vec<(Url, Instant)> = self
            .pending
            .iter()
            .filter(|entry| entry.age() > self.limits.pending_max_age)
            .map(|entry| (entry.key().clone(), entry.observed_at))
            .collect();
        stale.sort_by_key(|(_, observed_at)| *observed_at);

        for (uri, _) in stale.into_iter().take(excess) {
            debug!(uri = %uri, "Evicting stale pending segment");
            self.pending.remove(&uri);
        }
    }
}
