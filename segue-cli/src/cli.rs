use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "segue",
    version,
    about = "Relay a redirect-chained live stream as one continuous byte stream"
)]
pub struct Args {
    /// Base URL that redirects to the live segment
    pub url: String,

    /// Output file, `-` or omitted for stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// TOML file with stream settings
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Override the User-Agent sent to the origin
    #[arg(long, value_name = "UA")]
    pub user_agent: Option<String>,

    /// Expected segment length, used to time look-ahead probes
    #[arg(long, value_name = "N")]
    pub segment_duration_ms: Option<u64>,

    /// Reopen the session this many times after it ends
    #[arg(long, value_name = "N", default_value_t = 0)]
    pub reopen: u32,

    /// Pause before each reopen
    #[arg(long, value_name = "N", default_value_t = 1000)]
    pub reopen_delay_ms: u64,

    /// Enable debug logging
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// `None` means stdout.
    pub fn output_path(&self) -> Option<&PathBuf> {
        self.output
            .as_ref()
            .filter(|path| path.as_os_str() != "-")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn dash_means_stdout() {
        let args = Args::parse_from(["segue", "http://origin.example/live", "-o", "-"]);
        assert!(args.output_path().is_none());

        let args = Args::parse_from(["segue", "http://origin.example/live", "-o", "out.ts"]);
        assert_eq!(args.output_path(), Some(&PathBuf::from("out.ts")));
    }

    #[test]
    fn defaults() {
        let args = Args::parse_from(["segue", "http://origin.example/live"]);
        assert_eq!(args.reopen, 0);
        assert_eq!(args.reopen_delay_ms, 1000);
        assert!(args.output_path().is_none());
        assert!(!args.verbose && !args.quiet);
    }

    #[test]
    fn verbose_and_quiet_conflict() {
        let result = Args::try_parse_from(["segue", "http://origin.example/live", "-v", "-q"]);
        assert!(result.is_err());
    }
}
