//! Single-resource download pipeline.
//!
//! This module fetches one URL and persists it with bounded retry, optional
//! progress reporting, and a temp-file-then-rename commit.
//!
//! # Features
//!
//! - Streamed (memory-efficient) or buffered persistence
//! - Filename from `Content-Disposition`, the URL, or an explicit name
//! - Collision-free names (`report (1).pdf`) when cloning is enabled
//! - `<final>.download` temp file; the final name never holds partial data
//! - Retry with no delay by default, fixed or exponential backoff on request
//!
//! # Example
//!
//! ```no_run
//! use atomic_fetch::download::Downloader;
//! use atomic_fetch::DownloadConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DownloadConfig::builder("https://example.com/paper.pdf")
//!     .directory("./downloads")
//!     .build()?;
//! let outcome = Downloader::new(config).download().await?;
//! if let Some(saved) = outcome.saved() {
//!     println!("Downloaded: {}", saved.path.display());
//! }
//! # Ok(())
//! # }
//! ```

mod client;
pub(crate) mod constants;
mod downloader;
mod error;
mod filename;
mod hooks;
mod persist;
mod progress;
mod retry;

pub use client::{FetchedResponse, HttpClient, ResponseBody, ResponseInfo, ResponseMode};
pub use constants::{DEFAULT_DIRECTORY, DEFAULT_MAX_ATTEMPTS, DEFAULT_TIMEOUT_MS, TEMP_FILE_SUFFIX};
pub use downloader::{DownloadOutcome, Downloader, SessionState};
pub use error::DownloadError;
pub use filename::{derive_file_name, ensure_directory, resolve_available_file_name};
pub use hooks::{ErrorHook, Hook, ProgressHook, ResponseHook};
pub(crate) use hooks::Hooks;
pub use persist::{CommitOutcome, SavedFile, commit, save_from_buffer, save_from_stream, temp_path_for};
pub use progress::{ProgressMeter, ProgressUpdate, metered, percentage_of};
pub use retry::{Backoff, RetryDecision, RetryPolicy, run_with_retry};
