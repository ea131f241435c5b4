mod cli;
mod config;
mod error;

use std::{process, time::Duration};

use clap::Parser;
use segue_engine::{ContinuationStream, SessionHints, SessionStats};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{Level, error, info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};
use url::Url;

use crate::{
    cli::Args,
    config::{apply_overrides, load_settings},
    error::{AppError, Result},
};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    if let Err(e) = run(args).await {
        error!("Application error: {}", e);
        process::exit(1);
    }
}

/// Logs go to stderr; stdout may be carrying the stream.
fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_level(verbose),
        )
        .init();
}

async fn run(args: Args) -> Result<()> {
    let url = Url::parse(&args.url)
        .map_err(|e| AppError::InvalidInput(format!("`{}`: {e}", args.url)))?;
    let settings = apply_overrides(load_settings(args.config.as_deref())?, &args);
    let hints = SessionHints {
        estimated_segment_duration: args.segment_duration_ms.map(Duration::from_millis),
    };

    let mut output: Box<dyn AsyncWrite + Unpin + Send> = match args.output_path() {
        Some(path) => {
            info!(path = %path.display(), "Writing stream to file");
            Box::new(tokio::fs::File::create(path).await?)
        }
        None => Box::new(tokio::io::stdout()),
    };

    let mut stream = ContinuationStream::new(settings)?;
    let reopen_delay = Duration::from_millis(args.reopen_delay_ms);

    let outcome = tokio::select! {
        outcome = relay(&mut stream, &url, &hints, &mut output, args.reopen, reopen_delay) => Some(outcome),
        _ = tokio::signal::ctrl_c() => None,
    };
    if outcome.is_none() {
        info!("Interrupted, shutting down");
        stream.stats().log_summary();
    }
    stream.close().await;

    match output.flush().await {
        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
        other => other?,
    }
    outcome.unwrap_or(Ok(()))
}

/// Run sessions back to back until one ends and no reopens are left.
async fn relay(
    stream: &mut ContinuationStream,
    url: &Url,
    hints: &SessionHints,
    output: &mut (dyn AsyncWrite + Unpin + Send),
    reopens: u32,
    reopen_delay: Duration,
) -> Result<()> {
    let mut total = SessionStats::default();
    let mut reopens_left = reopens;

    loop {
        let result = copy_session(stream, url, hints, output).await;
        stream.stats().log_summary();
        accumulate(&mut total, stream.stats());
        stream.close().await;

        match result {
            Ok(bytes) => info!(bytes, "Session reached end of input"),
            Err(AppError::BrokenPipe) => {
                info!("Output closed by consumer, stopping");
                break;
            }
            Err(e) if e.is_retryable() => warn!(error = %e, "Session failed"),
            Err(e) => return Err(e),
        }

        if reopens_left == 0 {
            break;
        }
        reopens_left -= 1;
        info!(
            remaining = reopens_left,
            delay_ms = reopen_delay.as_millis() as u64,
            "Reopening session"
        );
        tokio::time::sleep(reopen_delay).await;
    }

    if reopens > 0 {
        info!(
            segments_opened = total.segments_opened,
            transitions = total.transitions,
            bytes_read = total.bytes_read,
            "Totals across sessions"
        );
    }
    Ok(())
}

async fn copy_session(
    stream: &mut ContinuationStream,
    url: &Url,
    hints: &SessionHints,
    output: &mut (dyn AsyncWrite + Unpin + Send),
) -> Result<u64> {
    stream.open(url.clone(), hints.clone()).await?;

    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut written = 0u64;
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(written);
        }
        output.write_all(&buf[..n]).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::BrokenPipe {
                AppError::BrokenPipe
            } else {
                AppError::Io(e)
            }
        })?;
        written += n as u64;
    }
}

fn accumulate(total: &mut SessionStats, session: &SessionStats) {
    total.segments_opened += session.segments_opened;
    total.transitions += session.transitions;
    total.failed_transitions += session.failed_transitions;
    total.stalls += session.stalls;
    total.bytes_read += session.bytes_read;
    total.prefetch_armed += session.prefetch_armed;
}
