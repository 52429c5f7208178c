//! Upload error types.

use synthlift_transfer::TransferError;

/// Errors produced by upload sessions and the metadata client.
///
/// A chunk that fails to upload is not an error: it ends up in the
/// failure set and the session still completes with a summary.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("an upload is already in progress")]
    AlreadyInProgress,

    #[error("no files to upload")]
    NoChunks,

    #[error("a title is required")]
    MissingTitle,

    #[error("API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("metadata error: {0}")]
    Metadata(String),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl UploadError {
    /// Returns `true` for misuse that is rejected before a session starts.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            UploadError::AlreadyInProgress | UploadError::NoChunks | UploadError::MissingTitle
        )
    }
}
