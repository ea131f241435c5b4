use std::path::Path;

use segue_engine::StreamSettings;
use tracing::debug;

use crate::{
    cli::Args,
    error::{AppError, Result},
};

/// Read settings from `path`, or start from defaults when there is none.
pub fn load_settings(path: Option<&Path>) -> Result<StreamSettings> {
    let Some(path) = path else {
        return Ok(StreamSettings::default());
    };

    let content = std::fs::read_to_string(path)?;
    let settings = toml::from_str(&content)
        .map_err(|e| AppError::Config(format!("{}: {e}", path.display())))?;
    debug!(path = %path.display(), "Loaded stream settings");
    Ok(settings)
}

/// Command-line flags win over the file.
pub fn apply_overrides(mut settings: StreamSettings, args: &Args) -> StreamSettings {
    if let Some(user_agent) = &args.user_agent {
        settings.user_agent = user_agent.clone();
    }
    if let Some(duration) = args.segment_duration_ms {
        settings.estimated_segment_duration_ms = duration;
    }
    settings
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::Write;

    #[test]
    fn missing_path_gives_defaults() {
        let settings = load_settings(None).unwrap();
        assert_eq!(settings.max_transition_attempts, 3);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "stall_retry_delay_ms = 250\nheaders = [[\"Referer\", \"http://origin.example/\"]]"
        )
        .unwrap();

        let settings = load_settings(Some(file.path())).unwrap();

        assert_eq!(settings.stall_retry_delay_ms, 250);
        assert_eq!(
            settings.headers,
            vec![("Referer".to_owned(), "http://origin.example/".to_owned())]
        );
        assert_eq!(settings.redirect_timeout_ms, 5_000);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "stall_retry_delay_ms = \"soon\"").unwrap();

        let err = load_settings(Some(file.path())).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn flags_override_file_values() {
        let args = Args::parse_from([
            "segue",
            "http://origin.example/live",
            "--user-agent",
            "probe/1.0",
            "--segment-duration-ms",
            "4000",
        ]);

        let settings = apply_overrides(StreamSettings::default(), &args);

        assert_eq!(settings.user_agent, "probe/1.0");
        assert_eq!(settings.estimated_segment_duration_ms, 4000);
    }
}
