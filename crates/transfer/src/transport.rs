//! Single-attempt chunk upload over HTTP.
//!
//! A failed upload is a normal outcome here: every transport-level
//! problem, non-OK status, or cancellation is reported as `false`.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_util::Stream;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, HeaderValue};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{CONNECT_TIMEOUT, Credentials, IDLE_TIMEOUT, TransferError, UPLOAD_BUFFER_SIZE};

/// Callback invoked with the cumulative number of bytes sent so far.
///
/// For [`HttpTransport`] a buffer counts as sent once it is handed to the
/// HTTP client, which may still be flushing it to the socket.
pub type BytesSentCallback = Box<dyn Fn(u64) + Send + Sync>;

/// Readable bytes for one chunk plus their declared length.
pub struct ChunkSource {
    reader: Box<dyn AsyncRead + Send + Sync + Unpin>,
    len: u64,
}

impl ChunkSource {
    /// Wraps any async reader of exactly `len` bytes.
    pub fn new(reader: impl AsyncRead + Send + Sync + Unpin + 'static, len: u64) -> Self {
        Self {
            reader: Box::new(reader),
            len,
        }
    }

    /// Opens a local file for streaming.
    pub async fn open(path: &Path) -> Result<Self, TransferError> {
        let file = tokio::fs::File::open(path).await?;
        let len = file.metadata().await?.len();
        Ok(Self::new(file, len))
    }

    /// In-memory source, mostly useful in tests.
    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        let len = data.len() as u64;
        Self::new(std::io::Cursor::new(data), len)
    }

    /// Number of bytes the source will yield.
    pub fn content_length(&self) -> u64 {
        self.len
    }

    /// Hands the underlying reader to a custom transport.
    pub fn into_reader(self) -> Box<dyn AsyncRead + Send + Sync + Unpin> {
        self.reader
    }
}

impl std::fmt::Debug for ChunkSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkSource").field("len", &self.len).finish()
    }
}

/// Uploads one chunk to its destination.
///
/// Implementations stream `source` to `destination_uri`, call
/// `on_bytes_sent` after each buffered write, stop early when `cancel`
/// fires, and resolve to `true` only when the remote end accepted the
/// whole upload. Two calls for the same chunk are two independent attempts.
pub trait ChunkTransport: Send + Sync {
    fn upload<'a>(
        &'a self,
        destination_uri: &'a str,
        source: ChunkSource,
        cancel: &'a CancellationToken,
        on_bytes_sent: BytesSentCallback,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>>;
}

/// [`ChunkTransport`] that `POST`s the chunk with bearer authentication.
///
/// An attempt that neither sends body bytes nor receives a response for
/// the idle timeout fails, so a stalled endpoint cannot hold a lane.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    authorization: HeaderValue,
    idle_timeout: Duration,
}

impl HttpTransport {
    /// Creates a transport with a default HTTP client and [`IDLE_TIMEOUT`].
    pub fn new(credentials: &Credentials) -> Result<Self, TransferError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Self::with_client(http, credentials)
    }

    /// Creates a transport on top of an existing client.
    pub fn with_client(
        http: reqwest::Client,
        credentials: &Credentials,
    ) -> Result<Self, TransferError> {
        Ok(Self {
            http,
            authorization: credentials.authorization_header()?,
            idle_timeout: IDLE_TIMEOUT,
        })
    }

    /// Overrides how long an attempt may stall before it is abandoned.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    async fn send(
        &self,
        destination_uri: &str,
        source: ChunkSource,
        cancel: &CancellationToken,
        on_bytes_sent: BytesSentCallback,
    ) -> bool {
        let len = source.len;
        let activity = Arc::new(Activity::new());
        let on_bytes_sent: BytesSentCallback = {
            let activity = Arc::clone(&activity);
            Box::new(move |sent| {
                activity.touch();
                on_bytes_sent(sent);
            })
        };
        let body = reqwest::Body::wrap_stream(body_stream(
            source.reader,
            cancel.clone(),
            on_bytes_sent,
        ));

        let request = self
            .http
            .post(destination_uri)
            .header(AUTHORIZATION, self.authorization.clone())
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_LENGTH, len)
            .body(body)
            .send();
        tokio::pin!(request);

        let result = loop {
            let wait = self.idle_timeout.saturating_sub(activity.idle_for());
            tokio::select! {
                result = &mut request => break result,
                // A cancelled attempt fails whatever the server answers.
                _ = cancel.cancelled() => {
                    debug!(uri = destination_uri, "chunk upload cancelled");
                    return false;
                }
                _ = tokio::time::sleep(wait) => {
                    if activity.idle_for() >= self.idle_timeout {
                        warn!(
                            uri = destination_uri,
                            timeout_ms = self.idle_timeout.as_millis() as u64,
                            "chunk upload stalled"
                        );
                        return false;
                    }
                }
            }
        };

        if cancel.is_cancelled() {
            debug!(uri = destination_uri, "chunk upload cancelled");
            return false;
        }

        match result {
            Ok(resp) if resp.status() == StatusCode::OK => {
                debug!(uri = destination_uri, bytes = len, "chunk uploaded");
                true
            }
            Ok(resp) => {
                warn!(
                    uri = destination_uri,
                    status = resp.status().as_u16(),
                    "chunk rejected by server"
                );
                false
            }
            Err(e) => {
                warn!(uri = destination_uri, error = %e, "chunk upload failed");
                false
            }
        }
    }
}

impl ChunkTransport for HttpTransport {
    fn upload<'a>(
        &'a self,
        destination_uri: &'a str,
        source: ChunkSource,
        cancel: &'a CancellationToken,
        on_bytes_sent: BytesSentCallback,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(self.send(destination_uri, source, cancel, on_bytes_sent))
    }
}

/// Time of the last body progress, for the idle watchdog.
struct Activity {
    started: Instant,
    last_ms: AtomicU64,
}

impl Activity {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let now = self.started.elapsed().as_millis() as u64;
        self.last_ms.fetch_max(now, Ordering::AcqRel);
    }

    fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_ms.load(Ordering::Acquire));
        self.started.elapsed().saturating_sub(last)
    }
}

struct BodyState {
    reader: Box<dyn AsyncRead + Send + Sync + Unpin>,
    cancel: CancellationToken,
    on_bytes_sent: BytesSentCallback,
    sent: u64,
    done: bool,
}

/// Reads the source in [`UPLOAD_BUFFER_SIZE`] pieces, reporting the running
/// total after each one and ending early once cancellation is observed.
fn body_stream(
    reader: Box<dyn AsyncRead + Send + Sync + Unpin>,
    cancel: CancellationToken,
    on_bytes_sent: BytesSentCallback,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static {
    let state = BodyState {
        reader,
        cancel,
        on_bytes_sent,
        sent: 0,
        done: false,
    };

    futures_util::stream::unfold(state, |mut st| async move {
        if st.done || st.cancel.is_cancelled() {
            return None;
        }

        let mut buf = vec![0u8; UPLOAD_BUFFER_SIZE];
        match st.reader.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                st.sent += n as u64;
                (st.on_bytes_sent)(st.sent);
                Some((Ok(Bytes::from(buf)), st))
            }
            Err(e) => {
                st.done = true;
                Some((Err(e), st))
            }
        }
    })
}
