//! CLI entry point for atomic-fetch.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use atomic_fetch::{Backoff, CommitOutcome, DownloadConfig, DownloadConfigBuilder, DownloadOutcome, Downloader};
use clap::Parser;
use tracing::{debug, info, warn};

mod cli;
mod progress_ui;

use cli::{Args, BackoffKind, parse_header};

/// Cap for exponential backoff delays.
const MAX_BACKOFF: Duration = Duration::from_secs(32);

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let bar = progress_ui::new_progress_bar(!args.quiet && !args.no_progress && !args.buffer);
    let progress_bar = bar.clone();

    let config = build_config(&args)?
        .on_progress(move |update| progress_ui::apply_update(&progress_bar, update))
        .build()
        .context("invalid download configuration")?;

    info!(url = %config.url(), attempts = config.max_attempts(), "starting download");

    let mut downloader = Downloader::new(config);
    let result = downloader.download().await;
    bar.finish_and_clear();

    match result? {
        DownloadOutcome::Saved(saved) => {
            if let CommitOutcome::CommittedWithCleanupWarning { temp_path, reason } = &saved.commit {
                warn!(
                    temp = %temp_path.display(),
                    %reason,
                    "download finished but could not be renamed to its final name"
                );
            }
            info!(
                path = %saved.path.display(),
                bytes = saved.bytes_written,
                attempts = downloader.state().attempts(),
                "Download complete"
            );
        }
        DownloadOutcome::Skipped => info!("Download skipped"),
    }

    Ok(())
}

/// Layers explicit CLI flags over an optional JSON config file.
fn build_config(args: &Args) -> Result<DownloadConfigBuilder> {
    let mut builder = match (&args.config, &args.url) {
        (Some(path), url) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            let record: serde_json::Value = serde_json::from_str(&raw)
                .with_context(|| format!("config file {} is not valid JSON", path.display()))?;
            let builder = DownloadConfig::builder_from_json(&record)
                .with_context(|| format!("config file {} rejected", path.display()))?;
            match url {
                Some(url) => builder.url(url),
                None => builder,
            }
        }
        (None, Some(url)) => DownloadConfig::builder(url),
        (None, None) => bail!("no URL given. Usage: atomic-fetch <URL> or atomic-fetch --config FILE"),
    };

    if let Some(directory) = &args.directory {
        builder = builder.directory(directory);
    }
    if let Some(file_name) = &args.file_name {
        builder = builder.file_name(file_name);
    }
    if args.no_clone {
        builder = builder.clone_files(false);
    }
    if let Some(timeout) = args.timeout {
        builder = builder.timeout(Duration::from_millis(timeout));
    }
    if let Some(max_attempts) = args.max_attempts {
        builder = builder.max_attempts(max_attempts);
    }
    if args.buffer {
        builder = builder.should_buffer_response(true);
    }
    if args.sync_names {
        builder = builder.use_synchronous_mode(true);
    }
    for raw in &args.headers {
        let Some((name, value)) = parse_header(raw) else {
            bail!("invalid header {raw:?}: expected \"Name: value\"");
        };
        builder = builder.header(name, value);
    }

    let base = Duration::from_millis(args.backoff_ms);
    builder = builder.backoff(match args.backoff {
        BackoffKind::None => Backoff::None,
        BackoffKind::Fixed => Backoff::Fixed(base),
        BackoffKind::Exponential => Backoff::exponential(base, MAX_BACKOFF),
    });

    Ok(builder)
}
