//! Constants for the download module (defaults, temp-file naming).

use std::time::Duration;

/// Default request timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 6000;

/// Default number of attempts (the initial attempt only, no retries).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 1;

/// Default destination directory (the current directory).
pub const DEFAULT_DIRECTORY: &str = ".";

/// Suffix appended to the final path while a write is in progress.
pub const TEMP_FILE_SUFFIX: &str = ".download";

/// Maximum jitter added to exponential backoff delays.
pub(crate) const MAX_JITTER: Duration = Duration::from_millis(500);

/// Upper bound on numbered candidates tried by collision resolution.
pub(crate) const MAX_CLONE_CANDIDATES: usize = 10_000;
