use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

/// Settings for one continuation session.
///
/// All durations are whole milliseconds, matching the unit used for segment
/// timestamps. Build one with [`Default`] or deserialize it, then pass it
/// through [`StreamSettings::validate`] before use.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    // --- Prefetch timing ---
    /// Lower bound for the delay before probing for the next segment
    pub preload_min_delay_ms: u64,
    /// Upper bound for the delay before probing for the next segment
    pub preload_max_delay_ms: u64,
    /// Assumed segment duration; no duration signal reaches this layer
    pub estimated_segment_duration_ms: u64,
    /// Pause before the second prefetch probe when the first one did not advance
    pub prefetch_retry_interval_ms: u64,

    // --- Continuity tracker sizing ---
    pub max_pending_segments: usize,
    /// Pending entries older than this become eligible for eviction
    pub pending_max_age_ms: u64,
    pub history_size: usize,
    /// Allowed gap between one segment's end and the next one's start
    pub continuity_tolerance_ms: u64,

    // --- Redirect resolution and transitions ---
    pub redirect_timeout_ms: u64,
    /// Transition attempts allowed for a single stalled read
    pub max_transition_attempts: u32,
    /// Pause before re-probing when the base URI did not advance
    pub stall_retry_delay_ms: u64,

    // --- HTTP transport ---
    pub user_agent: String,
    pub connect_timeout_ms: u64,
    /// Maximum time to wait for the next body chunk of a segment
    pub read_timeout_ms: u64,
    pub allow_cross_protocol_redirects: bool,
    /// Extra request headers sent with every request
    pub headers: Vec<(String, String)>,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            preload_min_delay_ms: 3_000,
            preload_max_delay_ms: 8_000,
            estimated_segment_duration_ms: 10_000,
            prefetch_retry_interval_ms: 1_000,
            max_pending_segments: 3,
            pending_max_age_ms: 30_000,
            history_size: 10,
            continuity_tolerance_ms: 1_000,
            redirect_timeout_ms: 5_000,
            max_transition_attempts: 3,
            stall_retry_delay_ms: 100,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            connect_timeout_ms: 10_000,
            read_timeout_ms: 30_000,
            allow_cross_protocol_redirects: true,
            headers: Vec::new(),
        }
    }
}

impl StreamSettings {
    const MIN_REDIRECT_TIMEOUT_MS: u64 = 100;
    const MAX_REDIRECT_TIMEOUT_MS: u64 = 60_000;
    const MAX_TRANSITION_ATTEMPTS: u32 = 10;
    const MAX_STALL_RETRY_DELAY_MS: u64 = 5_000;
    const MAX_PREFETCH_RETRY_INTERVAL_MS: u64 = 30_000;
    const MIN_NETWORK_TIMEOUT_MS: u64 = 100;

    /// Clamp every value into a usable range.
    ///
    /// Out-of-range values are corrected and logged instead of rejected, so a
    /// partially wrong config file still yields a working session.
    pub fn validate(mut self) -> Self {
        clamp_min("preload_min_delay_ms", &mut self.preload_min_delay_ms, 1);
        let preload_floor = self.preload_min_delay_ms;
        clamp_min(
            "preload_max_delay_ms",
            &mut self.preload_max_delay_ms,
            preload_floor,
        );
        clamp_min(
            "estimated_segment_duration_ms",
            &mut self.estimated_segment_duration_ms,
            1,
        );
        clamp_max(
            "prefetch_retry_interval_ms",
            &mut self.prefetch_retry_interval_ms,
            Self::MAX_PREFETCH_RETRY_INTERVAL_MS,
        );

        clamp_min("max_pending_segments", &mut self.max_pending_segments, 1);
        clamp_min("pending_max_age_ms", &mut self.pending_max_age_ms, 1);
        clamp_min("history_size", &mut self.history_size, 2);

        clamp_min(
            "redirect_timeout_ms",
            &mut self.redirect_timeout_ms,
            Self::MIN_REDIRECT_TIMEOUT_MS,
        );
        clamp_max(
            "redirect_timeout_ms",
            &mut self.redirect_timeout_ms,
            Self::MAX_REDIRECT_TIMEOUT_MS,
        );
        clamp_min("max_transition_attempts", &mut self.max_transition_attempts, 1);
        clamp_max(
            "max_transition_attempts",
            &mut self.max_transition_attempts,
            Self::MAX_TRANSITION_ATTEMPTS,
        );
        clamp_max(
            "stall_retry_delay_ms",
            &mut self.stall_retry_delay_ms,
            Self::MAX_STALL_RETRY_DELAY_MS,
        );

        clamp_min(
            "connect_timeout_ms",
            &mut self.connect_timeout_ms,
            Self::MIN_NETWORK_TIMEOUT_MS,
        );
        clamp_min(
            "read_timeout_ms",
            &mut self.read_timeout_ms,
            Self::MIN_NETWORK_TIMEOUT_MS,
        );

        if self.user_agent.trim().is_empty() {
            warn!("Empty user agent configured, falling back to the default");
            self.user_agent = DEFAULT_USER_AGENT.to_owned();
        }

        self
    }

    pub fn preload_min_delay(&self) -> Duration {
        Duration::from_millis(self.preload_min_delay_ms)
    }

    pub fn preload_max_delay(&self) -> Duration {
        Duration::from_millis(self.preload_max_delay_ms)
    }

    pub fn estimated_segment_duration(&self) -> Duration {
        Duration::from_millis(self.estimated_segment_duration_ms)
    }

    pub fn prefetch_retry_interval(&self) -> Duration {
        Duration::from_millis(self.prefetch_retry_interval_ms)
    }

    pub fn pending_max_age(&self) -> Duration {
        Duration::from_millis(self.pending_max_age_ms)
    }

    pub fn redirect_timeout(&self) -> Duration {
        Duration::from_millis(self.redirect_timeout_ms)
    }

    pub fn stall_retry_delay(&self) -> Duration {
        Duration::from_millis(self.stall_retry_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

fn clamp_min<T>(field: &'static str, value: &mut T, min: T)
where
    T: PartialOrd + Copy + std::fmt::Display,
{
    if *value < min {
        warn!(field, configured = %value, adjusted = %min, "Setting below minimum, clamping");
        *value = min;
    }
}

fn clamp_max<T>(field: &'static str, value: &mut T, max: T)
where
    T: PartialOrd + Copy + std::fmt::Display,
{
    if *value > max {
        warn!(field, configured = %value, adjusted = %max, "Setting above maximum, clamping");
        *value = max;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_survive_validation() {
        let settings = StreamSettings::default();
        assert_eq!(settings.clone().validate(), settings);
    }

    #[test]
    fn preload_max_never_below_min() {
        let settings = StreamSettings {
            preload_min_delay_ms: 6_000,
            preload_max_delay_ms: 2_000,
            ..Default::default()
        }
        .validate();

        assert_eq!(settings.preload_min_delay_ms, 6_000);
        assert_eq!(settings.preload_max_delay_ms, 6_000);
    }

    #[test]
    fn zero_sizes_are_raised() {
        let settings = StreamSettings {
            max_pending_segments: 0,
            history_size: 0,
            max_transition_attempts: 0,
            preload_min_delay_ms: 0,
            ..Default::default()
        }
        .validate();

        assert_eq!(settings.max_pending_segments, 1);
        assert_eq!(settings.history_size, 2);
        assert_eq!(settings.max_transition_attempts, 1);
        assert_eq!(settings.preload_min_delay_ms, 1);
    }

    #[test]
    fn oversized_values_are_capped() {
        let settings = StreamSettings {
            redirect_timeout_ms: 10 * 60 * 1000,
            max_transition_attempts: 500,
            stall_retry_delay_ms: 60_000,
            ..Default::default()
        }
        .validate();

        assert_eq!(settings.redirect_timeout(), Duration::from_secs(60));
        assert_eq!(settings.max_transition_attempts, 10);
        assert_eq!(settings.stall_retry_delay(), Duration::from_secs(5));
    }

    #[test]
    fn blank_user_agent_falls_back() {
        let settings = StreamSettings {
            user_agent: "   ".to_string(),
            ..Default::default()
        }
        .validate();
        assert_eq!(settings.user_agent, DEFAULT_USER_AGENT);
    }

    #[test]
    fn partial_documents_use_defaults() {
        let settings: StreamSettings = serde_json::from_str(
            r#"{ "estimated_segment_duration_ms": 20000, "headers": [["Referer", "https://example.com/"]] }"#,
        )
        .unwrap();

        assert_eq!(settings.estimated_segment_duration(), Duration::from_secs(20));
        assert_eq!(settings.preload_min_delay_ms, 3_000);
        assert_eq!(
            settings.headers,
            vec![("Referer".to_string(), "https://example.com/".to_string())]
        );
    }
}
