//! Top-level download orchestration.
//!
//! A [`Downloader`] owns one validated [`DownloadConfig`] and the session
//! state of its most recent run. [`Downloader::download`] drives each attempt
//! through the same pipeline:
//!
//! ```text
//! request -> on_response gate -> resolve name -> write temp -> commit
//! ```
//!
//! and hands the attempt to [`run_with_retry`] so failures are retried up to
//! `max_attempts` times.
//!
//! # Example
//!
//! ```no_run
//! use atomic_fetch::{DownloadConfig, Downloader};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DownloadConfig::builder("https://example.com/report.pdf")
//!     .directory("./downloads")
//!     .max_attempts(3)
//!     .on_progress(|p| println!("{:?}%", p.percentage))
//!     .build()?;
//! let outcome = Downloader::new(config).download().await?;
//! println!("{outcome:?}");
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::client::{HttpClient, ResponseBody, ResponseInfo, ResponseMode, with_idle_timeout};
use super::error::DownloadError;
use super::filename::{derive_file_name, ensure_directory, resolve_available_file_name};
use super::hooks::{ErrorHook, Hook, ProgressHook, ResponseHook};
use super::persist::{SavedFile, save_from_buffer, save_from_stream};
use super::progress::{ProgressMeter, ProgressUpdate, metered};
use super::retry::run_with_retry;
use crate::config::{ConfigError, DownloadConfig};

/// Result of a successful [`Downloader::download`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// The body was persisted.
    Saved(SavedFile),
    /// The `on_response` hook declined the response; nothing was written.
    Skipped,
}

impl DownloadOutcome {
    /// The saved file, if any.
    #[must_use]
    pub fn saved(&self) -> Option<&SavedFile> {
        match self {
            Self::Saved(saved) => Some(saved),
            Self::Skipped => None,
        }
    }

    /// True when the response hook skipped persistence.
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped)
    }
}

/// What the downloader knows about its current or last run.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    response: Option<ResponseInfo>,
    file_size: Option<u64>,
    current_data_size: u64,
    percentage: Option<f64>,
    attempts: u32,
}

impl SessionState {
    /// Most recent response metadata.
    #[must_use]
    pub fn response(&self) -> Option<&ResponseInfo> {
        self.response.as_ref()
    }

    /// Expected size from `Content-Length`.
    #[must_use]
    pub fn file_size(&self) -> Option<u64> {
        self.file_size
    }

    /// Bytes counted by the progress meter in the latest attempt.
    #[must_use]
    pub fn current_data_size(&self) -> u64 {
        self.current_data_size
    }

    /// Last computed percentage.
    #[must_use]
    pub fn percentage(&self) -> Option<f64> {
        self.percentage
    }

    /// Attempts started in the latest run.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    fn begin_attempt(&mut self, attempt: u32) {
        self.attempts = attempt;
        self.current_data_size = 0;
        self.percentage = None;
    }

    fn record_response(&mut self, info: &ResponseInfo) {
        self.file_size = info.content_length;
        self.response = Some(info.clone());
    }

    fn record_progress(&mut self, meter: &ProgressMeter) {
        self.current_data_size = meter.current();
        self.percentage = meter.percentage();
    }
}

/// Downloads one resource according to a [`DownloadConfig`].
#[derive(Debug)]
pub struct Downloader {
    config: DownloadConfig,
    state: SessionState,
}

impl Downloader {
    /// Creates a downloader with empty session state.
    #[must_use]
    pub fn new(config: DownloadConfig) -> Self {
        Self {
            config,
            state: SessionState::default(),
        }
    }

    /// Validates an untyped config record and creates a downloader.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] before any network activity if the record is
    /// invalid.
    pub fn from_json(record: &Value) -> Result<Self, ConfigError> {
        DownloadConfig::from_json(record).map(Self::new)
    }

    /// Registers a hook, replacing any previous one of the same kind.
    pub fn on(&mut self, hook: Hook) -> &mut Self {
        self.config.hooks_mut().set(hook);
        self
    }

    /// Sets the response gate.
    #[must_use]
    pub fn with_on_response<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ResponseInfo) -> bool + Send + Sync + 'static,
    {
        self.on(Hook::Response(ResponseHook::new(hook)));
        self
    }

    /// Sets the error hook.
    #[must_use]
    pub fn with_on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&DownloadError, u32) + Send + Sync + 'static,
    {
        self.on(Hook::Error(ErrorHook::new(hook)));
        self
    }

    /// Sets the progress hook.
    #[must_use]
    pub fn with_on_progress<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ProgressUpdate<'_>) + Send + Sync + 'static,
    {
        self.on(Hook::Progress(ProgressHook::new(hook)));
        self
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Session state of the current or last run.
    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Runs the download, retrying failed attempts up to `max_attempts`.
    ///
    /// # Errors
    ///
    /// Returns the error of the last attempt once all attempts failed. No
    /// file exists under the final name in that case.
    #[instrument(skip(self), fields(url = %self.config.url()))]
    pub async fn download(&mut self) -> Result<DownloadOutcome, DownloadError> {
        let client = match self.config.http_client() {
            Some(client) => HttpClient::from_client(client.clone()),
            None => HttpClient::new().map_err(|e| DownloadError::network(self.config.url(), e))?,
        };
        let policy = self.config.retry_policy();
        let on_error = self.config.hooks().on_error.clone();
        let max_attempts = policy.max_attempts();

        let session = Mutex::new(std::mem::take(&mut self.state));
        let config = &self.config;
        let client = &client;
        let session_ref = &session;

        let result = run_with_retry(
            &policy,
            |error: &DownloadError, attempt| {
                warn!(attempt, max_attempts, error = %error, "download attempt failed");
                if let Some(hook) = &on_error {
                    hook.call(error, attempt);
                }
            },
            move |attempt| run_attempt(config, client, session_ref, attempt),
        )
        .await;

        self.state = session.into_inner().unwrap_or_else(PoisonError::into_inner);
        result
    }
}

fn lock(session: &Mutex<SessionState>) -> MutexGuard<'_, SessionState> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One request-then-persist cycle.
async fn run_attempt(
    config: &DownloadConfig,
    client: &HttpClient,
    session: &Mutex<SessionState>,
    attempt: u32,
) -> Result<DownloadOutcome, DownloadError> {
    debug!(attempt, "starting attempt");
    lock(session).begin_attempt(attempt);

    let mode = if config.should_buffer_response() {
        ResponseMode::Buffer
    } else {
        ResponseMode::Stream
    };
    let fetched = client
        .get(config.url(), config.headers(), config.timeout(), mode)
        .await?;
    lock(session).record_response(&fetched.info);

    if let Some(gate) = &config.hooks().on_response
        && !gate.call(&fetched.info)
    {
        info!(attempt, "response hook declined; skipping save");
        return Ok(DownloadOutcome::Skipped);
    }

    let final_path = resolve_final_path(config, &fetched.info).await;
    debug!(path = %final_path.display(), "resolved output path");

    let saved = match fetched.body {
        ResponseBody::Buffered(data) => save_from_buffer(&data, &final_path).await?,
        ResponseBody::Streamed(response) => {
            let mut meter = ProgressMeter::new(fetched.info.content_length);
            let on_progress = config.hooks().on_progress.as_ref();
            let body = with_idle_timeout(response.bytes_stream(), config.timeout(), config.url());
            let result = {
                let chunks = metered(body, &mut meter, |update| {
                    if let Some(hook) = on_progress {
                        hook.call(update);
                    }
                });
                save_from_stream(chunks, &final_path, std::convert::identity).await
            };
            lock(session).record_progress(&meter);
            result?
        }
    };

    info!(
        path = %saved.path.display(),
        bytes = saved.bytes_written,
        clean = saved.commit.is_clean(),
        attempt,
        "download complete"
    );
    Ok(DownloadOutcome::Saved(saved))
}

/// Picks the destination path for this attempt and makes sure its directory exists.
async fn resolve_final_path(config: &DownloadConfig, info: &ResponseInfo) -> PathBuf {
    let candidate = match config.file_name() {
        Some(name) => name.to_string(),
        None => derive_file_name(&info.url, &info.headers),
    };

    let dir = config.directory();
    ensure_directory(dir).await;

    let name = if config.clone_files() {
        resolve_available_file_name(dir, &candidate, config.use_synchronous_mode()).await
    } else {
        candidate
    };
    dir.join(name)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_from_json_missing_url_fails_before_network() {
        let err = Downloader::from_json(&json!({ "directory": "/tmp" })).unwrap_err();
        assert!(matches!(err, ConfigError::MissingField { field: "url" }));
    }

    #[test]
    fn test_new_downloader_starts_with_empty_state() {
        let config = DownloadConfig::builder("https://example.com/x").build().unwrap();
        let downloader = Downloader::new(config);
        let state = downloader.state();
        assert!(state.response().is_none());
        assert_eq!(state.file_size(), None);
        assert_eq!(state.current_data_size(), 0);
        assert_eq!(state.attempts(), 0);
    }

    #[test]
    fn test_on_registers_hooks_by_kind() {
        let config = DownloadConfig::builder("https://example.com/x").build().unwrap();
        let mut downloader = Downloader::new(config);
        downloader
            .on(Hook::Error(ErrorHook::new(|_, _| {})))
            .on(Hook::Progress(ProgressHook::new(|_| {})));

        let hooks = downloader.config().hooks();
        assert!(hooks.on_error.is_some());
        assert!(hooks.on_progress.is_some());
        assert!(hooks.on_response.is_none());
    }

    #[tokio::test]
    async fn test_download_records_session_state() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/state.bin"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 400]))
            .mount(&server)
            .await;
        let temp_dir = TempDir::new().unwrap();

        let config = DownloadConfig::builder(format!("{}/state.bin", server.uri()))
            .directory(temp_dir.path())
            .build()
            .unwrap();
        let mut downloader = Downloader::new(config);
        downloader.download().await.unwrap();

        let state = downloader.state();
        assert_eq!(state.attempts(), 1);
        assert_eq!(state.file_size(), Some(400));
        assert_eq!(state.current_data_size(), 400);
        assert_eq!(state.percentage(), Some(100.0));
        assert_eq!(state.response().unwrap().status, 200);
    }

    #[tokio::test]
    async fn test_progress_resets_between_attempts() {
        let server = MockServer::start().await;
        let temp_dir = TempDir::new().unwrap();
        // A file where the directory should be makes every write fail.
        let blocked = temp_dir.path().join("blocked");
        std::fs::write(&blocked, b"not a dir").unwrap();

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8; 100]))
            .mount(&server)
            .await;

        let errors = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&errors);
        let config = DownloadConfig::builder(format!("{}/f.bin", server.uri()))
            .directory(&blocked)
            .max_attempts(2)
            .on_error(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap();
        let mut downloader = Downloader::new(config);

        let result = downloader.download().await;

        assert!(matches!(result, Err(DownloadError::Io { .. })));
        assert_eq!(errors.load(Ordering::SeqCst), 2);
        assert_eq!(downloader.state().attempts(), 2);
        assert_eq!(downloader.state().current_data_size(), 0);
    }
}
