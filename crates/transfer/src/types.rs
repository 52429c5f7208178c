use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::TransferError;
use crate::validation::{validate_destination, validate_source};

/// One local file uploaded as a single unit.
///
/// `bytes_sent` is written only by the lane that owns the chunk during a
/// session and read by progress estimation, so it is a plain atomic
/// counter. Reads while an upload is in flight are best-effort snapshots.
/// Completion is a separate flag: a zero-byte file has `bytes_sent ==
/// total_bytes` before it was ever acknowledged.
#[derive(Debug)]
pub struct Chunk {
    destination_uri: String,
    source_path: PathBuf,
    total_bytes: u64,
    bytes_sent: AtomicU64,
    completed: AtomicBool,
}

impl Chunk {
    /// Creates a chunk with a known size. No validation is performed.
    pub fn new(
        destination_uri: impl Into<String>,
        source_path: impl Into<PathBuf>,
        total_bytes: u64,
    ) -> Self {
        Self {
            destination_uri: destination_uri.into(),
            source_path: source_path.into(),
            total_bytes,
            bytes_sent: AtomicU64::new(0),
            completed: AtomicBool::new(false),
        }
    }

    /// Creates a chunk for an existing local file, taking its size from disk.
    ///
    /// The destination must be an absolute `http`/`https` URI and the source
    /// must be a regular file.
    pub fn from_file(destination_uri: &str, source_path: &Path) -> Result<Self, TransferError> {
        validate_destination(destination_uri)?;
        let total_bytes = validate_source(source_path)?;
        Ok(Self::new(destination_uri, source_path, total_bytes))
    }

    pub fn destination_uri(&self) -> &str {
        &self.destination_uri
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Returns the cumulative bytes sent in the current (or last) attempt.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Acquire)
    }

    /// Resets the counter and completion flag at the start of an attempt.
    pub fn begin_attempt(&self) {
        self.completed.store(false, Ordering::Release);
        self.bytes_sent.store(0, Ordering::Release);
    }

    /// Records cumulative bytes written by the transport.
    ///
    /// The full size is only recorded by [`mark_complete`](Self::mark_complete),
    /// after the remote end acknowledged the upload, so a streamed count is
    /// held one byte short of `total_bytes`.
    pub fn record_sent(&self, cumulative: u64) {
        let cap = self.total_bytes.saturating_sub(1);
        self.bytes_sent
            .fetch_max(cumulative.min(cap), Ordering::AcqRel);
    }

    /// Marks the chunk as fully uploaded.
    pub fn mark_complete(&self) {
        self.bytes_sent.store(self.total_bytes, Ordering::Release);
        self.completed.store(true, Ordering::Release);
    }

    /// Returns `true` once the remote end acknowledged the current attempt.
    pub fn is_complete(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Returns a plain-data snapshot for observers.
    pub fn summary(&self) -> ChunkSummary {
        ChunkSummary {
            destination_uri: self.destination_uri.clone(),
            source_path: self.source_path.clone(),
            total_bytes: self.total_bytes,
            bytes_sent: self.bytes_sent(),
            completed: self.is_complete(),
        }
    }
}

/// Point-in-time view of a [`Chunk`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ChunkSummary {
    pub destination_uri: String,
    pub source_path: PathBuf,
    pub total_bytes: u64,
    pub bytes_sent: u64,
    /// Whether the last attempt was acknowledged.
    pub completed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_chunk_starts_at_zero() {
        let c = Chunk::new("https://up.example.com/1", "/photos/a.jpg", 2048);
        assert_eq!(c.bytes_sent(), 0);
        assert_eq!(c.total_bytes(), 2048);
        assert!(!c.is_complete());
    }

    #[test]
    fn record_sent_is_monotonic_within_attempt() {
        let c = Chunk::new("https://up.example.com/1", "a.jpg", 100);
        c.record_sent(40);
        c.record_sent(20);
        assert_eq!(c.bytes_sent(), 40);
    }

    #[test]
    fn streamed_bytes_never_claim_completion() {
        let c = Chunk::new("https://up.example.com/1", "a.jpg", 100);
        c.record_sent(100);
        assert_eq!(c.bytes_sent(), 99);
        assert!(!c.is_complete());

        c.record_sent(5000);
        assert!(c.bytes_sent() <= c.total_bytes());
    }

    #[test]
    fn mark_complete_and_reset() {
        let c = Chunk::new("https://up.example.com/1", "a.jpg", 100);
        c.record_sent(60);
        c.mark_complete();
        assert!(c.is_complete());

        c.begin_attempt();
        assert_eq!(c.bytes_sent(), 0);
        assert!(!c.is_complete());
    }

    #[test]
    fn from_file_reads_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.jpg");
        std::fs::write(&path, vec![7u8; 1500]).unwrap();

        let c = Chunk::from_file("https://up.example.com/1", &path).unwrap();
        assert_eq!(c.total_bytes(), 1500);
        assert_eq!(c.source_path(), path.as_path());
    }

    #[test]
    fn from_file_rejects_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let err = Chunk::from_file("https://up.example.com/1", &dir.path().join("nope.jpg"));
        assert!(err.is_err());
    }

    #[test]
    fn from_file_rejects_bad_uri() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.jpg");
        std::fs::write(&path, b"x").unwrap();
        assert!(matches!(
            Chunk::from_file("ftp://up.example.com/1", &path),
            Err(TransferError::InvalidUri(_))
        ));
    }

    #[test]
    fn summary_snapshot() {
        let c = Chunk::new("https://up.example.com/1", "a.jpg", 10);
        c.record_sent(3);
        let s = c.summary();
        assert_eq!(s.bytes_sent, 3);
        assert_eq!(s.destination_uri, "https://up.example.com/1");
        assert!(!s.completed);

        c.mark_complete();
        assert!(c.summary().completed);
    }

    #[test]
    fn empty_file_is_not_complete_until_acknowledged() {
        let c = Chunk::new("https://up.example.com/1", "empty.jpg", 0);
        c.begin_attempt();
        c.record_sent(0);
        assert_eq!(c.bytes_sent(), c.total_bytes());
        assert!(!c.is_complete());
        assert!(!c.summary().completed);

        c.mark_complete();
        assert!(c.is_complete());

        c.begin_attempt();
        assert!(!c.is_complete());
    }
}
