//! Temp-file-then-rename persistence.
//!
//! Both strategies write to `<final>.download` and only rename onto the final
//! path after the last byte is flushed, so the final name never names a
//! partial file. A failed write deletes the temp file (best effort) and
//! returns the error. A failed rename is not an error: it is reported as
//! [`CommitOutcome::CommittedWithCleanupWarning`] and logged.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use futures_util::{Stream, StreamExt};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, warn};

use super::constants::TEMP_FILE_SUFFIX;
use super::error::DownloadError;

/// How the temp-to-final rename went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The file is now visible under its final name.
    Committed,
    /// The rename failed; the data is still in the temp file.
    CommittedWithCleanupWarning {
        /// Where the data was left.
        temp_path: PathBuf,
        /// Rename error message.
        reason: String,
    },
}

impl CommitOutcome {
    /// True when no cleanup warning was raised.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Committed)
    }
}

/// A persisted download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedFile {
    /// Final destination path.
    pub path: PathBuf,
    /// Bytes written to disk.
    pub bytes_written: u64,
    /// Rename result.
    pub commit: CommitOutcome,
}

/// Returns `final_path` with the in-progress suffix appended.
#[must_use]
pub fn temp_path_for(final_path: &Path) -> PathBuf {
    let mut os: OsString = final_path.as_os_str().to_owned();
    os.push(TEMP_FILE_SUFFIX);
    PathBuf::from(os)
}

/// Drains `stream` into the temp file, then commits it to `final_path`.
///
/// # Errors
///
/// Returns the first stream error (as produced by `map_chunk_err`) or a
/// [`DownloadError::Io`] for temp-file failures. The temp file is removed
/// before returning an error.
pub async fn save_from_stream<S, B, E, M>(
    stream: S,
    final_path: &Path,
    map_chunk_err: M,
) -> Result<SavedFile, DownloadError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    M: Fn(E) -> DownloadError,
{
    let temp_path = temp_path_for(final_path);
    let written = match stream_to_file(stream, &temp_path, map_chunk_err).await {
        Ok(written) => written,
        Err(error) => {
            remove_failed_file(&temp_path).await;
            return Err(error);
        }
    };
    let commit = commit(&temp_path, final_path).await;
    Ok(SavedFile {
        path: final_path.to_path_buf(),
        bytes_written: written,
        commit,
    })
}

/// Writes `data` to the temp file in one operation, then commits it.
///
/// # Errors
///
/// Returns [`DownloadError::Io`] if the write fails; the temp file is
/// removed first.
pub async fn save_from_buffer(data: &[u8], final_path: &Path) -> Result<SavedFile, DownloadError> {
    let temp_path = temp_path_for(final_path);
    if let Err(e) = tokio::fs::write(&temp_path, data).await {
        remove_failed_file(&temp_path).await;
        return Err(DownloadError::io(temp_path, e));
    }
    let commit = commit(&temp_path, final_path).await;
    Ok(SavedFile {
        path: final_path.to_path_buf(),
        bytes_written: data.len() as u64,
        commit,
    })
}

async fn stream_to_file<S, B, E, M>(
    stream: S,
    temp_path: &Path,
    map_chunk_err: M,
) -> Result<u64, DownloadError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    M: Fn(E) -> DownloadError,
{
    let file = File::create(temp_path)
        .await
        .map_err(|e| DownloadError::io(temp_path, e))?;
    let mut writer = BufWriter::new(file);
    let mut bytes_written: u64 = 0;

    let mut stream = std::pin::pin!(stream);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(&map_chunk_err)?;
        let bytes = chunk.as_ref();
        writer
            .write_all(bytes)
            .await
            .map_err(|e| DownloadError::io(temp_path, e))?;
        bytes_written += bytes.len() as u64;
    }

    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(temp_path, e))?;

    Ok(bytes_written)
}

/// Renames the temp file onto the final path.
pub async fn commit(temp_path: &Path, final_path: &Path) -> CommitOutcome {
    match tokio::fs::rename(temp_path, final_path).await {
        Ok(()) => {
            debug!(path = %final_path.display(), "committed temp file");
            CommitOutcome::Committed
        }
        Err(e) => {
            warn!(
                temp = %temp_path.display(),
                path = %final_path.display(),
                error = %e,
                "rename to final name failed; data left in temp file"
            );
            CommitOutcome::CommittedWithCleanupWarning {
                temp_path: temp_path.to_path_buf(),
                reason: e.to_string(),
            }
        }
    }
}

async fn remove_failed_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "removed partial temp file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "could not remove partial temp file"),
    }
}
