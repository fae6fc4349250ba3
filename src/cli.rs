//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Download one resource with bounded retry and crash-safe commit.
///
/// The file is written to `<name>.download` and only renamed to its final
/// name once every byte is on disk.
#[derive(Parser, Debug)]
#[command(name = "atomic-fetch")]
#[command(author, version, about)]
pub struct Args {
    /// URL to download (may instead come from --config)
    pub url: Option<String>,

    /// JSON config record (camelCase keys); flags given here override it
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Destination directory [default: .]
    #[arg(short = 'd', long)]
    pub directory: Option<PathBuf>,

    /// Destination file name (derived from the response when omitted)
    #[arg(short = 'o', long = "output", value_name = "NAME")]
    pub file_name: Option<String>,

    /// Overwrite an existing file instead of picking "name (1).ext"
    #[arg(long)]
    pub no_clone: bool,

    /// Request timeout in milliseconds [default: 6000]
    #[arg(short = 't', long, value_name = "MS")]
    pub timeout: Option<u64>,

    /// Maximum attempts including the first (1-100) [default: 1]
    #[arg(short = 'a', long, value_parser = clap::value_parser!(u32).range(1..=100))]
    pub max_attempts: Option<u32>,

    /// Read the whole body into memory before writing (no progress output)
    #[arg(long)]
    pub buffer: bool,

    /// Use blocking filesystem checks when resolving name collisions
    #[arg(long)]
    pub sync_names: bool,

    /// Extra request header, "Name: value" (repeatable)
    #[arg(short = 'H', long = "header", value_name = "HEADER")]
    pub headers: Vec<String>,

    /// Delay policy between attempts
    #[arg(long, value_enum, default_value_t = BackoffKind::None)]
    pub backoff: BackoffKind,

    /// Base delay for --backoff fixed/exponential, in milliseconds
    #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub backoff_ms: u64,

    /// Hide the progress bar
    #[arg(long)]
    pub no_progress: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

/// CLI spelling of the retry delay policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackoffKind {
    /// Retry immediately
    None,
    /// Wait --backoff-ms before every retry
    Fixed,
    /// Double from --backoff-ms, capped at 32s
    Exponential,
}

/// Splits a `Name: value` header argument.
pub fn parse_header(raw: &str) -> Option<(String, String)> {
    let (name, value) = raw.split_once(':')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default_args_parses_successfully() {
        let args = Args::try_parse_from(["atomic-fetch", "https://example.com/a.pdf"]).unwrap();
        assert_eq!(args.url.as_deref(), Some("https://example.com/a.pdf"));
        assert_eq!(args.verbose, 0);
        assert!(!args.quiet);
        assert!(!args.no_clone);
        assert!(!args.buffer);
        assert_eq!(args.max_attempts, None);
        assert_eq!(args.backoff, BackoffKind::None);
        assert_eq!(args.backoff_ms, 1000);
    }

    #[test]
    fn test_cli_url_is_optional_with_config() {
        let args = Args::try_parse_from(["atomic-fetch", "--config", "job.json"]).unwrap();
        assert!(args.url.is_none());
        assert_eq!(args.config, Some(PathBuf::from("job.json")));
    }

    #[test]
    fn test_cli_verbose_flag_increments_count() {
        let args = Args::try_parse_from(["atomic-fetch", "-vv", "https://x.test"]).unwrap();
        assert_eq!(args.verbose, 2);
    }

    #[test]
    fn test_cli_max_attempts_rejects_zero() {
        let result = Args::try_parse_from(["atomic-fetch", "-a", "0", "https://x.test"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_repeatable_headers_and_backoff() {
        let args = Args::try_parse_from([
            "atomic-fetch",
            "-H",
            "Authorization: Bearer t",
            "-H",
            "X-Trace: 1",
            "--backoff",
            "exponential",
            "https://x.test",
        ])
        .unwrap();
        assert_eq!(args.headers.len(), 2);
        assert_eq!(args.backoff, BackoffKind::Exponential);
    }

    #[test]
    fn test_cli_help_flag_shows_usage() {
        let err = Args::try_parse_from(["atomic-fetch", "--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
    }

    #[test]
    fn test_parse_header() {
        assert_eq!(
            parse_header("Authorization: Bearer a:b"),
            Some(("Authorization".to_string(), "Bearer a:b".to_string()))
        );
        assert_eq!(parse_header("no-colon"), None);
        assert_eq!(parse_header(": value"), None);
    }
}
