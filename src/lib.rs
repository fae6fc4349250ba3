//! Atomic single-resource downloader.
//!
//! Downloads one remote resource over HTTP(S) to local storage with bounded
//! retry, progress reporting, and a crash-safe temp-file commit.
//!
//! # Architecture
//!
//! - [`config`] - Config record validation, defaults, and construction
//! - [`download`] - Request execution, retry, persistence, and progress
//!
//! The entry point is [`Downloader`]: build a [`DownloadConfig`], then call
//! [`Downloader::download`].

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod download;
pub(crate) mod user_agent;

// Re-export commonly used types
pub use config::{CONFIG_SCHEMA, ConfigError, DownloadConfig, DownloadConfigBuilder, validate_config};
pub use download::{
    Backoff, CommitOutcome, DownloadError, DownloadOutcome, Downloader, Hook, ProgressUpdate,
    ResponseInfo, RetryPolicy, SavedFile,
};
