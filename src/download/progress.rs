//! Byte-counting pass-through stage for streamed downloads.

use futures_util::{Stream, StreamExt};

/// One progress observation, handed to the `on_progress` hook.
#[derive(Debug, Clone, Copy)]
pub struct ProgressUpdate<'a> {
    /// Cumulative percentage rounded to 2 decimals; `None` when the total
    /// size is unknown.
    pub percentage: Option<f64>,
    /// Bytes observed so far in this attempt.
    pub bytes_downloaded: u64,
    /// Expected total from `Content-Length`, if the server sent one.
    pub total_bytes: Option<u64>,
    /// The chunk that was just observed.
    pub chunk: &'a [u8],
}

/// Running byte count for one attempt.
#[derive(Debug, Clone, Default)]
pub struct ProgressMeter {
    total: Option<u64>,
    current: u64,
    percentage: Option<f64>,
}

impl ProgressMeter {
    /// Creates a meter for a body of `total` bytes (`None` if unknown).
    #[must_use]
    pub fn new(total: Option<u64>) -> Self {
        Self {
            total,
            current: 0,
            percentage: None,
        }
    }

    /// Counts a chunk and returns the updated percentage.
    pub fn observe(&mut self, chunk_len: usize) -> Option<f64> {
        self.current = self.current.saturating_add(chunk_len as u64);
        self.percentage = percentage_of(self.current, self.total);
        self.percentage
    }

    /// Bytes observed so far.
    #[must_use]
    pub fn current(&self) -> u64 {
        self.current
    }

    /// Expected total, if known.
    #[must_use]
    pub fn total(&self) -> Option<u64> {
        self.total
    }

    /// Last computed percentage.
    #[must_use]
    pub fn percentage(&self) -> Option<f64> {
        self.percentage
    }
}

/// `current / total * 100` rounded to 2 decimal places.
///
/// An unknown or zero total yields `None`.
#[must_use]
pub fn percentage_of(current: u64, total: Option<u64>) -> Option<f64> {
    let total = total.filter(|&t| t > 0)?;
    let raw = current as f64 / total as f64 * 100.0;
    Some((raw * 100.0).round() / 100.0)
}

/// Wraps a chunk stream so every successful chunk is counted by `meter` and
/// reported to `report` before being forwarded unchanged.
///
/// Errors pass through untouched and are not counted. Chunk order is
/// preserved.
pub fn metered<'m, S, B, E, F>(
    stream: S,
    meter: &'m mut ProgressMeter,
    mut report: F,
) -> impl Stream<Item = Result<B, E>> + 'm
where
    S: Stream<Item = Result<B, E>> + 'm,
    B: AsRef<[u8]> + 'm,
    E: 'm,
    F: FnMut(&ProgressUpdate<'_>) + 'm,
{
    stream.map(move |item| {
        if let Ok(chunk) = &item {
            let bytes = chunk.as_ref();
            let percentage = meter.observe(bytes.len());
            report(&ProgressUpdate {
                percentage,
                bytes_downloaded: meter.current(),
                total_bytes: meter.total(),
                chunk: bytes,
            });
        }
        item
    })
}
