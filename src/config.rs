//! Download configuration: schema validation, defaults, and construction.
//!
//! A [`DownloadConfig`] can be built two ways:
//! - [`DownloadConfig::builder`] for typed construction from Rust code
//! - [`DownloadConfig::from_json`] for untyped records (config files, FFI,
//!   CLI `--config`), which are checked against [`CONFIG_SCHEMA`] first
//!
//! Both paths end in the same semantic checks, so an invalid config never
//! reaches the [`Downloader`](crate::download::Downloader).

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::download::constants::{DEFAULT_DIRECTORY, DEFAULT_MAX_ATTEMPTS, DEFAULT_TIMEOUT_MS};
use crate::download::{
    Backoff, DownloadError, ErrorHook, Hooks, ProgressHook, ProgressUpdate, ResponseHook,
    ResponseInfo, RetryPolicy,
};

/// Errors raised while validating or constructing a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The record is missing or is not a key/value object.
    #[error("must provide a valid config object")]
    NotAnObject,

    /// A mandatory field is absent, null, or empty.
    #[error("must supply a config.{field}")]
    MissingField {
        /// Name of the missing field.
        field: &'static str,
    },

    /// A present field has the wrong runtime type.
    #[error("config.{field} must be of type {expected}")]
    TypeMismatch {
        /// Name of the offending field.
        field: &'static str,
        /// The type declared in the schema.
        expected: FieldType,
    },

    /// A field has the right type but an unusable value.
    #[error("config.{field} is invalid: {reason}")]
    InvalidValue {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// The record passed schema checks but could not be deserialized.
    #[error("invalid config record: {0}")]
    Json(#[from] serde_json::Error),
}

/// Runtime type of a config field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// JSON string.
    String,
    /// JSON boolean.
    Boolean,
    /// JSON number.
    Number,
    /// JSON object.
    Object,
}

impl FieldType {
    fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Boolean => value.is_boolean(),
            Self::Number => value.is_number(),
            Self::Object => value.is_object(),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Number => "number",
            Self::Object => "object",
        };
        f.write_str(name)
    }
}

/// Declared type and presence requirement of one field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Expected runtime type.
    pub field_type: FieldType,
    /// Whether the field must be present and non-empty.
    pub mandatory: bool,
}

impl FieldSpec {
    const fn required(field_type: FieldType) -> Self {
        Self {
            field_type,
            mandatory: true,
        }
    }

    const fn optional(field_type: FieldType) -> Self {
        Self {
            field_type,
            mandatory: false,
        }
    }
}

/// A list of `(field name, spec)` pairs.
pub type ConfigSchema = [(&'static str, FieldSpec)];

/// Schema for download config records (camelCase keys).
pub const CONFIG_SCHEMA: &ConfigSchema = &[
    ("url", FieldSpec::required(FieldType::String)),
    ("directory", FieldSpec::optional(FieldType::String)),
    ("fileName", FieldSpec::optional(FieldType::String)),
    ("cloneFiles", FieldSpec::optional(FieldType::Boolean)),
    ("timeout", FieldSpec::optional(FieldType::Number)),
    ("maxAttempts", FieldSpec::optional(FieldType::Number)),
    ("headers", FieldSpec::optional(FieldType::Object)),
    ("shouldBufferResponse", FieldSpec::optional(FieldType::Boolean)),
    ("useSynchronousMode", FieldSpec::optional(FieldType::Boolean)),
];

/// Checks a config record against a schema.
///
/// Mandatory fields must be present, non-null and (for strings) non-empty.
/// Every present field must match its declared type. Fields the schema does
/// not name are ignored.
///
/// # Errors
///
/// Returns [`ConfigError::NotAnObject`], [`ConfigError::MissingField`] or
/// [`ConfigError::TypeMismatch`].
pub fn validate_config(record: &Value, schema: &ConfigSchema) -> Result<(), ConfigError> {
    let Value::Object(map) = record else {
        return Err(ConfigError::NotAnObject);
    };

    for &(field, spec) in schema {
        let value = map.get(field);
        if spec.mandatory && value.is_none_or(is_blank) {
            return Err(ConfigError::MissingField { field });
        }
        if let Some(value) = value
            && !spec.field_type.matches(value)
        {
            return Err(ConfigError::TypeMismatch {
                field,
                expected: spec.field_type,
            });
        }
    }
    Ok(())
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Returns a copy of `record` with `filename` folded into `fileName`.
fn fold_file_name_alias(record: &Value) -> Result<Value, ConfigError> {
    let Value::Object(map) = record else {
        return Err(ConfigError::NotAnObject);
    };
    let mut fields = map.clone();
    match fields.remove("filename") {
        Some(Value::String(name)) if !name.is_empty() => {
            fields.insert("fileName".to_string(), Value::String(name));
        }
        None | Some(Value::Null | Value::String(_)) => {}
        Some(_) => {
            return Err(ConfigError::TypeMismatch {
                field: "filename",
                expected: FieldType::String,
            });
        }
    }
    Ok(Value::Object(fields))
}

/// Untyped record shape accepted by [`DownloadConfig::from_json`].
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigRecord {
    url: String,
    directory: Option<PathBuf>,
    file_name: Option<String>,
    clone_files: Option<bool>,
    timeout: Option<u64>,
    max_attempts: Option<u32>,
    headers: Option<BTreeMap<String, String>>,
    should_buffer_response: Option<bool>,
    use_synchronous_mode: Option<bool>,
}

/// Immutable configuration for one download.
#[derive(Clone)]
pub struct DownloadConfig {
    url: String,
    directory: PathBuf,
    file_name: Option<String>,
    clone_files: bool,
    timeout: Duration,
    max_attempts: u32,
    headers: Option<HeaderMap>,
    http_client: Option<reqwest::Client>,
    should_buffer_response: bool,
    use_synchronous_mode: bool,
    backoff: Backoff,
    hooks: Hooks,
}

impl fmt::Debug for DownloadConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadConfig")
            .field("url", &self.url)
            .field("directory", &self.directory)
            .field("file_name", &self.file_name)
            .field("clone_files", &self.clone_files)
            .field("timeout", &self.timeout)
            .field("max_attempts", &self.max_attempts)
            .field("headers", &self.headers)
            .field("http_client", &self.http_client.is_some())
            .field("should_buffer_response", &self.should_buffer_response)
            .field("use_synchronous_mode", &self.use_synchronous_mode)
            .field("backoff", &self.backoff)
            .field("hooks", &self.hooks)
            .finish()
    }
}

impl DownloadConfig {
    /// Starts a builder for `url` with every other field at its default.
    #[must_use]
    pub fn builder(url: impl Into<String>) -> DownloadConfigBuilder {
        DownloadConfigBuilder::new(url)
    }

    /// Validates an untyped record against [`CONFIG_SCHEMA`] and merges it
    /// over the defaults.
    ///
    /// `filename` is accepted as an alias of `fileName`. When both are
    /// present a non-empty `filename` wins.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the record fails schema validation,
    /// deserialization, or the semantic checks of
    /// [`DownloadConfigBuilder::build`].
    pub fn from_json(record: &Value) -> Result<Self, ConfigError> {
        Self::builder_from_json(record)?.build()
    }

    /// Like [`from_json`](Self::from_json) but returns the builder so callers
    /// can layer overrides or hooks before building.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] on schema or deserialization failure.
    pub fn builder_from_json(record: &Value) -> Result<DownloadConfigBuilder, ConfigError> {
        validate_config(record, CONFIG_SCHEMA)?;
        let record: ConfigRecord = serde_json::from_value(fold_file_name_alias(record)?)?;

        let mut builder = Self::builder(record.url);
        if let Some(directory) = record.directory {
            builder = builder.directory(directory);
        }
        if let Some(file_name) = record.file_name {
            builder = builder.file_name(file_name);
        }
        if let Some(clone_files) = record.clone_files {
            builder = builder.clone_files(clone_files);
        }
        if let Some(timeout) = record.timeout {
            builder = builder.timeout(Duration::from_millis(timeout));
        }
        if let Some(max_attempts) = record.max_attempts {
            builder = builder.max_attempts(max_attempts);
        }
        for (name, value) in record.headers.unwrap_or_default() {
            builder = builder.header(name, value);
        }
        if let Some(buffer) = record.should_buffer_response {
            builder = builder.should_buffer_response(buffer);
        }
        if let Some(synchronous) = record.use_synchronous_mode {
            builder = builder.use_synchronous_mode(synchronous);
        }
        Ok(builder)
    }

    /// The resource URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Destination directory.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Explicit destination file name, if any.
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    /// Whether an existing destination file is preserved by picking a new name.
    #[must_use]
    pub fn clone_files(&self) -> bool {
        self.clone_files
    }

    /// Request timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Attempt ceiling (always at least 1).
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Extra request headers.
    #[must_use]
    pub fn headers(&self) -> Option<&HeaderMap> {
        self.headers.as_ref()
    }

    /// Caller-supplied transport, used instead of building one.
    #[must_use]
    pub fn http_client(&self) -> Option<&reqwest::Client> {
        self.http_client.as_ref()
    }

    /// Buffered (`true`) or streamed (`false`) persistence.
    #[must_use]
    pub fn should_buffer_response(&self) -> bool {
        self.should_buffer_response
    }

    /// Whether collision checks use blocking filesystem calls.
    #[must_use]
    pub fn use_synchronous_mode(&self) -> bool {
        self.use_synchronous_mode
    }

    /// Delay policy between attempts.
    #[must_use]
    pub fn backoff(&self) -> Backoff {
        self.backoff
    }

    /// Retry policy derived from `max_attempts` and `backoff`.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.backoff)
    }

    pub(crate) fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    pub(crate) fn hooks_mut(&mut self) -> &mut Hooks {
        &mut self.hooks
    }
}

/// Builder for [`DownloadConfig`].
#[derive(Clone)]
pub struct DownloadConfigBuilder {
    url: String,
    directory: PathBuf,
    file_name: Option<String>,
    clone_files: bool,
    timeout: Duration,
    max_attempts: u32,
    headers: Vec<(String, String)>,
    http_client: Option<reqwest::Client>,
    should_buffer_response: bool,
    use_synchronous_mode: bool,
    backoff: Backoff,
    hooks: Hooks,
}

impl DownloadConfigBuilder {
    fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            directory: PathBuf::from(DEFAULT_DIRECTORY),
            file_name: None,
            clone_files: true,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            headers: Vec::new(),
            http_client: None,
            should_buffer_response: false,
            use_synchronous_mode: false,
            backoff: Backoff::None,
            hooks: Hooks::default(),
        }
    }

    /// Replaces the resource URL.
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Sets the destination directory.
    #[must_use]
    pub fn directory(mut self, directory: impl Into<PathBuf>) -> Self {
        self.directory = directory.into();
        self
    }

    /// Sets an explicit destination file name.
    #[must_use]
    pub fn file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    /// Enables or disables destination-name disambiguation.
    #[must_use]
    pub fn clone_files(mut self, clone_files: bool) -> Self {
        self.clone_files = clone_files;
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the attempt ceiling. Zero is rejected by [`build`](Self::build).
    #[must_use]
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Adds a request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Uses a pre-configured client (proxy, TLS roots, connection pool).
    #[must_use]
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Selects buffered persistence.
    #[must_use]
    pub fn should_buffer_response(mut self, buffer: bool) -> Self {
        self.should_buffer_response = buffer;
        self
    }

    /// Selects blocking filesystem checks for collision resolution.
    #[must_use]
    pub fn use_synchronous_mode(mut self, synchronous: bool) -> Self {
        self.use_synchronous_mode = synchronous;
        self
    }

    /// Sets the delay policy between attempts.
    #[must_use]
    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Registers the response gate. Returning `false` skips saving.
    #[must_use]
    pub fn on_response<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ResponseInfo) -> bool + Send + Sync + 'static,
    {
        self.hooks.on_response = Some(ResponseHook::new(hook));
        self
    }

    /// Registers the per-failed-attempt error hook.
    #[must_use]
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&DownloadError, u32) + Send + Sync + 'static,
    {
        self.hooks.on_error = Some(ErrorHook::new(hook));
        self
    }

    /// Registers the progress hook for streamed persistence.
    #[must_use]
    pub fn on_progress<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ProgressUpdate<'_>) + Send + Sync + 'static,
    {
        self.hooks.on_progress = Some(ProgressHook::new(hook));
        self
    }

    /// Finishes construction.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::MissingField`] if the URL is empty
    /// - [`ConfigError::InvalidValue`] if `max_attempts` is zero, the explicit
    ///   file name is empty, or a header name/value is not valid HTTP
    pub fn build(self) -> Result<DownloadConfig, ConfigError> {
        let url = self.url.trim().to_string();
        if url.is_empty() {
            return Err(ConfigError::MissingField { field: "url" });
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "maxAttempts",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.file_name.as_deref().is_some_and(str::is_empty) {
            return Err(ConfigError::InvalidValue {
                field: "fileName",
                reason: "must not be empty".to_string(),
            });
        }

        Ok(DownloadConfig {
            url,
            directory: self.directory,
            file_name: self.file_name,
            clone_files: self.clone_files,
            timeout: self.timeout,
            max_attempts: self.max_attempts,
            headers: build_header_map(&self.headers)?,
            http_client: self.http_client,
            should_buffer_response: self.should_buffer_response,
            use_synchronous_mode: self.use_synchronous_mode,
            backoff: self.backoff,
            hooks: self.hooks,
        })
    }
}

fn build_header_map(headers: &[(String, String)]) -> Result<Option<HeaderMap>, ConfigError> {
    if headers.is_empty() {
        return Ok(None);
    }
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
            ConfigError::InvalidValue {
                field: "headers",
                reason: format!("bad header name {name:?}: {e}"),
            }
        })?;
        let value = HeaderValue::from_str(value).map_err(|e| ConfigError::InvalidValue {
            field: "headers",
            reason: format!("bad value for {name}: {e}"),
        })?;
        map.append(name, value);
    }
    Ok(Some(map))
}
