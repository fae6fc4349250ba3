//! Progress bar rendering for the CLI.

use indicatif::{ProgressBar, ProgressStyle};

use atomic_fetch::ProgressUpdate;

const BAR_TEMPLATE: &str = "{bar:40.cyan/blue} {bytes}/{total_bytes} ({percent}%) {bytes_per_sec}";
const SPINNER_TEMPLATE: &str = "{spinner} {bytes} downloaded {bytes_per_sec}";

/// Creates the bar; hidden when `visible` is false.
pub(crate) fn new_progress_bar(visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template(SPINNER_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar
}

/// Applies one progress update to `bar`.
///
/// A known total switches to the bar style; an unknown one keeps the spinner.
pub(crate) fn apply_update(bar: &ProgressBar, update: &ProgressUpdate<'_>) {
    if let Some(total) = update.total_bytes
        && bar.length() != Some(total)
    {
        bar.set_length(total);
        bar.set_style(
            ProgressStyle::with_template(BAR_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
    }
    bar.set_position(update.bytes_downloaded);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_update_tracks_position_and_length() {
        let bar = ProgressBar::hidden();
        let chunk = [0u8; 250];
        apply_update(
            &bar,
            &ProgressUpdate {
                percentage: Some(25.0),
                bytes_downloaded: 250,
                total_bytes: Some(1000),
                chunk: &chunk,
            },
        );
        assert_eq!(bar.length(), Some(1000));
        assert_eq!(bar.position(), 250);
    }

    #[test]
    fn test_apply_update_unknown_total_only_moves_position() {
        let bar = new_progress_bar(false);
        apply_update(
            &bar,
            &ProgressUpdate {
                percentage: None,
                bytes_downloaded: 42,
                total_bytes: None,
                chunk: &[],
            },
        );
        assert_eq!(bar.position(), 42);
    }
}
