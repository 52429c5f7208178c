//! Terminal progress output.

use synthlift_uploader::UploadState;
use tokio::sync::watch;

/// Formats one progress line: percentage, status, then the estimate if any.
pub fn progress_line(state: &UploadState) -> String {
    let mut line = format!("[{:>3.0}%] {}", state.progress_percentage, state.status);
    if !state.estimated_remaining.is_empty() {
        line.push_str(" | ");
        line.push_str(&state.estimated_remaining);
    }
    line
}

/// Prints a line to stderr whenever the visible progress changes.
///
/// Returns once the uploader publishing `rx` is dropped.
pub async fn render(mut rx: watch::Receiver<UploadState>) {
    let mut last = String::new();
    while rx.changed().await.is_ok() {
        let line = progress_line(&rx.borrow_and_update());
        if line != last {
            eprintln!("{line}");
            last = line;
        }
    }
}
