//! Single-file HTTP upload transport and progress estimation.
//!
//! Each [`Chunk`] is one whole local file streamed to a pre-authorized
//! destination URI. The [`ChunkTransport`] trait performs one attempt and
//! reports cumulative bytes sent; [`ProgressEstimator`] turns those byte
//! counts into a percentage and a human-readable time estimate.

use std::time::Duration;

mod credentials;
mod progress;
mod transport;
mod types;
mod validation;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use credentials::{Credentials, DEFAULT_API_VERSION};
pub use progress::{
    Estimate, ProgressEstimator, average_speed_message, format_duration, format_mbps,
    megabits_per_second,
};
pub use transport::{BytesSentCallback, ChunkSource, ChunkTransport, HttpTransport};
pub use types::{Chunk, ChunkSummary};
pub use validation::{validate_destination, validate_source};

/// Size of each buffered write to the request body: 16 KiB.
pub const UPLOAD_BUFFER_SIZE: usize = 16 * 1024;

/// Time allowed to establish a connection to an upload endpoint.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest an upload may go without sending body bytes or receiving a
/// response before the attempt is abandoned.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(100);

/// Bytes that must be sent before a remaining-time estimate is produced: 10 MiB.
///
/// Throughput measured over fewer bytes swings too much to be useful.
pub const MIN_ESTIMATE_BYTES: u64 = 10 * 1024 * 1024;

/// Errors produced by the transfer crate.
///
/// Per-chunk upload failures are not errors: [`ChunkTransport::upload`]
/// reports them as `false`. These variants cover setup problems only.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid destination URI: {0}")]
    InvalidUri(String),

    #[error("invalid source: {0}")]
    InvalidSource(String),

    #[error("invalid credentials")]
    InvalidCredentials,
}
