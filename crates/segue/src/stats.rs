use tracing::info;

/// Counters for one continuation session.
///
/// Owned by the stream and only touched from its read path, so plain integers
/// are enough.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Segments opened, including the first one
    pub segments_opened: u64,
    /// Transitions that reached a new segment
    pub transitions: u64,
    /// Transition attempts that could not open the next segment
    pub failed_transitions: u64,
    /// Transitions that found the base URI not advancing
    pub stalls: u64,
    pub bytes_read: u64,
    pub prefetch_armed: u64,
}

impl SessionStats {
    pub fn log_summary(&self) {
        info!(
            segments_opened = self.segments_opened,
            transitions = self.transitions,
            failed_transitions = self.failed_transitions,
            stalls = self.stalls,
            bytes_read = self.bytes_read,
            prefetch_armed = self.prefetch_armed,
            "Continuation session statistics"
        );
    }
}
