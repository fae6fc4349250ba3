//! Caller callbacks invoked during a download.

use std::fmt;
use std::sync::Arc;

use super::DownloadError;
use super::client::ResponseInfo;
use super::progress::ProgressUpdate;

/// Gate run after headers arrive; `false` skips saving for this attempt.
#[derive(Clone)]
pub struct ResponseHook(Arc<dyn Fn(&ResponseInfo) -> bool + Send + Sync>);

/// Called with every failed attempt's error and its 1-indexed number.
#[derive(Clone)]
pub struct ErrorHook(Arc<dyn Fn(&DownloadError, u32) + Send + Sync>);

/// Called for every chunk observed during streamed persistence.
#[derive(Clone)]
pub struct ProgressHook(Arc<dyn Fn(&ProgressUpdate<'_>) + Send + Sync>);

impl ResponseHook {
    #[must_use]
    pub fn new<F>(hook: F) -> Self
    where
        F: Fn(&ResponseInfo) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(hook))
    }

    pub(crate) fn call(&self, response: &ResponseInfo) -> bool {
        (self.0)(response)
    }
}

impl ErrorHook {
    #[must_use]
    pub fn new<F>(hook: F) -> Self
    where
        F: Fn(&DownloadError, u32) + Send + Sync + 'static,
    {
        Self(Arc::new(hook))
    }

    pub(crate) fn call(&self, error: &DownloadError, attempt: u32) {
        (self.0)(error, attempt);
    }
}

impl ProgressHook {
    #[must_use]
    pub fn new<F>(hook: F) -> Self
    where
        F: Fn(&ProgressUpdate<'_>) + Send + Sync + 'static,
    {
        Self(Arc::new(hook))
    }

    pub(crate) fn call(&self, update: &ProgressUpdate<'_>) {
        (self.0)(update);
    }
}

/// The fixed set of hooks a [`Downloader`](super::Downloader) understands.
///
/// `Downloader::on(Hook::Progress(..))` is equivalent to configuring
/// `on_progress` up front.
#[derive(Clone)]
pub enum Hook {
    /// Replaces the response gate.
    Response(ResponseHook),
    /// Replaces the error hook.
    Error(ErrorHook),
    /// Replaces the progress hook.
    Progress(ProgressHook),
}

/// Hooks attached to a config.
#[derive(Clone, Default)]
pub(crate) struct Hooks {
    pub(crate) on_response: Option<ResponseHook>,
    pub(crate) on_error: Option<ErrorHook>,
    pub(crate) on_progress: Option<ProgressHook>,
}

impl Hooks {
    pub(crate) fn set(&mut self, hook: Hook) {
        match hook {
            Hook::Response(h) => self.on_response = Some(h),
            Hook::Error(h) => self.on_error = Some(h),
            Hook::Progress(h) => self.on_progress = Some(h),
        }
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("on_response", &self.on_response.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_progress", &self.on_progress.is_some())
            .finish()
    }
}
