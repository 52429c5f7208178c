use std::path::Path;

use reqwest::Url;

use crate::TransferError;

/// Validates that a destination is an absolute `http`/`https` URI with a host.
///
/// Rejects:
/// - Empty or unparseable strings
/// - Relative references
/// - Schemes other than `http` and `https`
pub fn validate_destination(uri: &str) -> Result<Url, TransferError> {
    if uri.is_empty() {
        return Err(TransferError::InvalidUri("empty URI".into()));
    }

    let url = Url::parse(uri).map_err(|e| TransferError::InvalidUri(format!("{uri}: {e}")))?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(TransferError::InvalidUri(format!(
                "unsupported scheme {other}: {uri}"
            )));
        }
    }

    if url.host_str().is_none_or(str::is_empty) {
        return Err(TransferError::InvalidUri(format!("missing host: {uri}")));
    }

    Ok(url)
}

/// Validates that a source path names a readable regular file and returns its size.
pub fn validate_source(path: &Path) -> Result<u64, TransferError> {
    if path.as_os_str().is_empty() {
        return Err(TransferError::InvalidSource("empty path".into()));
    }

    let meta = std::fs::metadata(path).map_err(|e| {
        TransferError::InvalidSource(format!("{}: {e}", path.display()))
    })?;

    if !meta.is_file() {
        return Err(TransferError::InvalidSource(format!(
            "not a regular file: {}",
            path.display()
        )));
    }

    Ok(meta.len())
}
