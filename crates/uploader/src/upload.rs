//! Upload orchestrator: one session at a time, chunks spread over parallel lanes.
//!
//! A session splits its chunks into contiguous slices, one per lane. Each
//! lane uploads its slice in order through the [`ChunkTransport`], feeding
//! byte counts into a shared progress publisher. Chunks start out in the
//! session's failure set and leave it only when the transport reports
//! success, so whatever is left when every lane has finished is exactly
//! what [`Uploader::resume`] retries.

use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use synthlift_transfer::{
    BytesSentCallback, Chunk, ChunkSource, ChunkTransport, Estimate, MIN_ESTIMATE_BYTES,
    ProgressEstimator, average_speed_message,
};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::api::MediaApi;
use crate::error::UploadError;
use crate::partition::partition;
use crate::types::{
    AddFileRequest, AddFileResponse, AddFilesRequest, CollectionUpload, CreateCollectionRequest,
    EditCollectionRequest, UploadOutcome, UploadState, UploadType,
};

/// Number of lanes used when the caller has no preference.
pub const DEFAULT_PARALLELISM: usize = 2;

/// Progress reserved for the metadata steps of a full collection upload.
const COLLECTION_BASELINE: f64 = 3.0;

const IDLE: u8 = 0;
const UPLOADING: u8 = 1;

/// Whether an uploader currently owns a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Uploading,
}

/// Drives upload sessions and keeps the failure set between them.
pub struct Uploader {
    transport: Arc<dyn ChunkTransport>,
    phase: AtomicU8,
    state: Arc<watch::Sender<UploadState>>,
    failed: Mutex<Vec<Arc<Chunk>>>,
    min_sample_bytes: u64,
}

impl Uploader {
    /// Creates an idle uploader on top of a chunk transport.
    pub fn new(transport: Arc<dyn ChunkTransport>) -> Self {
        let (state, _) = watch::channel(UploadState::default());
        Self {
            transport,
            phase: AtomicU8::new(IDLE),
            state: Arc::new(state),
            failed: Mutex::new(Vec::new()),
            min_sample_bytes: MIN_ESTIMATE_BYTES,
        }
    }

    /// Overrides how many bytes must be sent before estimating remaining time.
    pub fn with_min_sample_bytes(mut self, bytes: u64) -> Self {
        self.min_sample_bytes = bytes;
        self
    }

    /// Subscribes to state snapshots. Every change is published.
    pub fn subscribe(&self) -> watch::Receiver<UploadState> {
        self.state.subscribe()
    }

    /// Returns the current state snapshot.
    pub fn state(&self) -> UploadState {
        self.state.borrow().clone()
    }

    pub fn phase(&self) -> Phase {
        match self.phase.load(Ordering::Acquire) {
            UPLOADING => Phase::Uploading,
            _ => Phase::Idle,
        }
    }

    pub fn is_uploading(&self) -> bool {
        self.phase() == Phase::Uploading
    }

    /// Returns the chunks that failed in the most recent session.
    pub fn failed_chunks(&self) -> Vec<Arc<Chunk>> {
        self.failed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Uploads a fresh set of chunks.
    ///
    /// Returns once every lane has finished. Chunks that fail stay in the
    /// failure set for [`resume`](Self::resume); they are reported through
    /// [`UploadOutcome::Failed`], not as an error.
    pub async fn start_upload(
        &self,
        chunks: Vec<Chunk>,
        cancel: CancellationToken,
        parallelism: usize,
    ) -> Result<UploadOutcome, UploadError> {
        if self.is_uploading() {
            return Err(UploadError::AlreadyInProgress);
        }
        if chunks.is_empty() {
            return Err(UploadError::NoChunks);
        }

        let _session = self.begin()?;
        self.reset_for_upload();

        let chunks = chunks.into_iter().map(Arc::new).collect();
        Ok(self.run_session(chunks, 0.0, cancel, parallelism).await)
    }

    /// Retries exactly the chunks that failed in the previous session.
    ///
    /// With nothing to retry this returns immediately without touching state.
    /// Each resume is its own estimation window: totals, the stopwatch and
    /// the minimum-sample threshold cover only the retried chunks.
    pub async fn resume(
        &self,
        cancel: CancellationToken,
        parallelism: usize,
    ) -> Result<UploadOutcome, UploadError> {
        if self.is_uploading() {
            return Err(UploadError::AlreadyInProgress);
        }
        if self.failed_chunks().is_empty() {
            return Ok(UploadOutcome::Succeeded { uploaded: 0 });
        }

        let _session = self.begin()?;
        let pending = self.failed_chunks();
        if pending.is_empty() {
            return Ok(UploadOutcome::Succeeded { uploaded: 0 });
        }

        info!(chunks = pending.len(), "resuming upload");
        self.state.send_modify(|s| {
            s.progress_percentage = 0.0;
            s.estimated_remaining.clear();
        });

        Ok(self.run_session(pending, 0.0, cancel, parallelism).await)
    }

    /// Creates a collection, registers its photos, commits its properties,
    /// then uploads the photos.
    ///
    /// Progress 0–3 covers the metadata calls; the upload itself maps onto
    /// 3–93 and the session ends at 100. A metadata failure ends the
    /// session with an `Error: …` status and is returned to the caller.
    pub async fn upload_collection(
        &self,
        api: &dyn MediaApi,
        upload: &CollectionUpload,
        cancel: CancellationToken,
        parallelism: usize,
    ) -> Result<UploadOutcome, UploadError> {
        if self.is_uploading() {
            return Err(UploadError::AlreadyInProgress);
        }
        if upload.title.trim().is_empty() {
            return Err(UploadError::MissingTitle);
        }
        if upload.photo_paths.is_empty() {
            return Err(UploadError::NoChunks);
        }

        let _session = self.begin()?;
        self.reset_for_upload();

        match self.prepare_collection(api, upload).await {
            Ok(chunks) if chunks.is_empty() => {
                let err = UploadError::Metadata("service returned no upload targets".into());
                self.fail_session(&err);
                Err(err)
            }
            Ok(chunks) => Ok(self
                .run_session(chunks, COLLECTION_BASELINE, cancel, parallelism)
                .await),
            Err(e) => {
                self.fail_session(&e);
                Err(e)
            }
        }
    }

    /// Runs the three metadata steps and returns the chunks to upload.
    async fn prepare_collection(
        &self,
        api: &dyn MediaApi,
        upload: &CollectionUpload,
    ) -> Result<Vec<Arc<Chunk>>, UploadError> {
        self.set_status("Creating collection...");
        let created = api
            .create_collection(&CreateCollectionRequest {
                upload_type: UploadType::SynthPacketFromRawImages,
            })
            .await?;
        let collection_id = created.id;
        self.state.send_modify(|s| {
            s.collection_id = Some(collection_id);
            s.progress_percentage = 1.0;
        });
        info!(%collection_id, "collection created");

        self.set_status("Adding images to collection...");
        let request = AddFilesRequest {
            files: (0..upload.photo_paths.len())
                .map(|i| AddFileRequest {
                    id: i.to_string(),
                    extension: "jpg".into(),
                    order: format!("{i:03}"),
                    chunk_count: 1,
                })
                .collect(),
        };
        let registered = api.add_files(collection_id, &request).await?;
        self.set_progress(2.0);

        let chunks = join_upload_targets(collection_id, upload, registered.files)?;

        self.set_status("Setting properties for the collection...");
        api.edit_collection(collection_id, &EditCollectionRequest::commit(upload))
            .await?;
        self.set_progress(COLLECTION_BASELINE);

        Ok(chunks)
    }

    /// Uploads `chunks` across lanes and records the failures.
    async fn run_session(
        &self,
        chunks: Vec<Arc<Chunk>>,
        baseline: f64,
        cancel: CancellationToken,
        parallelism: usize,
    ) -> UploadOutcome {
        let total = chunks.len();
        let total_bytes: u64 = chunks.iter().map(|c| c.total_bytes()).sum();
        let estimator = ProgressEstimator::new(baseline, total_bytes)
            .with_min_sample_bytes(self.min_sample_bytes);

        // Counters restart before any lane runs so the aggregate only grows.
        for chunk in &chunks {
            chunk.begin_attempt();
        }

        self.state.send_modify(|s| {
            s.status = "Uploading files...".into();
            if total_bytes > self.min_sample_bytes {
                s.estimated_remaining = Estimate::Estimating.to_string();
            }
        });

        let ranges = partition(total, parallelism);
        info!(
            chunks = total,
            bytes = estimator.total_bytes(),
            baseline = estimator.baseline(),
            lanes = ranges.len(),
            "upload session started"
        );

        let chunks: Arc<[Arc<Chunk>]> = chunks.into();
        let failed: Arc<Mutex<BTreeMap<usize, Arc<Chunk>>>> = Arc::new(Mutex::new(
            chunks.iter().cloned().enumerate().collect(),
        ));
        let progress = Arc::new(SessionProgress {
            chunks: Arc::clone(&chunks),
            estimator,
            started: Instant::now(),
            state: Arc::clone(&self.state),
        });

        let mut lanes = JoinSet::new();
        for (lane, range) in ranges.into_iter().enumerate() {
            lanes.spawn(run_lane(
                lane,
                range,
                Lane {
                    transport: Arc::clone(&self.transport),
                    chunks: Arc::clone(&chunks),
                    failed: Arc::clone(&failed),
                    progress: Arc::clone(&progress),
                    cancel: cancel.clone(),
                },
            ));
        }
        while let Some(joined) = lanes.join_next().await {
            if let Err(e) = joined {
                // The lane's unfinished chunks are still in the failure set.
                error!(error = %e, "upload lane aborted");
            }
        }

        let elapsed = progress.started.elapsed();
        let remaining: Vec<Arc<Chunk>> = failed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let outcome = if remaining.is_empty() {
            UploadOutcome::Succeeded { uploaded: total }
        } else {
            UploadOutcome::Failed {
                failed: remaining.len(),
                total,
            }
        };

        let summaries = remaining.iter().map(|c| c.summary()).collect();
        *self.failed.lock().unwrap_or_else(PoisonError::into_inner) = remaining;

        let average = estimator.average_mbps(elapsed);
        self.state.send_modify(|s| {
            s.progress_percentage = 100.0;
            s.estimated_remaining = average_speed_message(average);
            s.failed_chunks = summaries;
            s.status = outcome.to_string();
        });

        info!(
            %outcome,
            elapsed_ms = elapsed.as_millis() as u64,
            mbps = average,
            "upload session finished"
        );
        outcome
    }

    /// Enters the `Uploading` phase, or fails if another session holds it.
    fn begin(&self) -> Result<SessionGuard<'_>, UploadError> {
        self.phase
            .compare_exchange(IDLE, UPLOADING, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| UploadError::AlreadyInProgress)?;
        self.state.send_modify(|s| s.is_uploading = true);
        Ok(SessionGuard { uploader: self })
    }

    fn reset_for_upload(&self) {
        self.failed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.state.send_modify(|s| {
            s.collection_id = None;
            s.progress_percentage = 0.0;
            s.estimated_remaining.clear();
            s.failed_chunks.clear();
        });
    }

    fn fail_session(&self, err: &UploadError) {
        error!(error = %err, "upload session failed");
        self.set_status(&format!("Error: {err}"));
    }

    fn set_status(&self, status: &str) {
        self.state.send_modify(|s| s.status = status.to_string());
    }

    fn set_progress(&self, percentage: f64) {
        self.state.send_modify(|s| s.progress_percentage = percentage);
    }
}

/// Returns the uploader to `Idle` when a session ends, however it ends.
struct SessionGuard<'a> {
    uploader: &'a Uploader,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.uploader.state.send_modify(|s| s.is_uploading = false);
        self.uploader.phase.store(IDLE, Ordering::Release);
    }
}

/// Matches registered files back to local photos by client id, in photo order.
fn join_upload_targets(
    collection_id: Uuid,
    upload: &CollectionUpload,
    files: Vec<AddFileResponse>,
) -> Result<Vec<Arc<Chunk>>, UploadError> {
    let mut by_client_id: HashMap<String, AddFileResponse> = files
        .into_iter()
        .map(|f| (f.client_id.clone(), f))
        .collect();

    let mut chunks = Vec::with_capacity(upload.photo_paths.len());
    for (i, path) in upload.photo_paths.iter().enumerate() {
        let Some(file) = by_client_id.remove(&i.to_string()) else {
            warn!(%collection_id, path = %path.display(), "photo was not registered");
            continue;
        };
        let target = file.chunks.first().ok_or_else(|| {
            UploadError::Metadata(format!("no upload URI for file {}", file.client_id))
        })?;
        chunks.push(Arc::new(Chunk::from_file(&target.upload_uri, path)?));
    }
    Ok(chunks)
}

/// Publishes aggregate progress for one session.
struct SessionProgress {
    chunks: Arc<[Arc<Chunk>]>,
    estimator: ProgressEstimator,
    started: Instant,
    state: Arc<watch::Sender<UploadState>>,
}

impl SessionProgress {
    /// Recomputes percentage and estimate from the chunk counters.
    ///
    /// Runs inside the watch lock, so concurrent lanes publish one at a
    /// time and the percentage never moves backwards.
    fn publish(&self) {
        self.state.send_modify(|s| {
            let sent: u64 = self.chunks.iter().map(|c| c.bytes_sent()).sum();
            let percentage = self.estimator.percentage(sent);
            if percentage > s.progress_percentage {
                s.progress_percentage = percentage;
            }
            let estimate = self.estimator.estimate(sent, self.started.elapsed());
            if matches!(estimate, Estimate::Remaining { .. }) {
                s.estimated_remaining = estimate.to_string();
            }
        });
    }
}

/// Everything one lane needs, owned so it can run on its own task.
struct Lane {
    transport: Arc<dyn ChunkTransport>,
    chunks: Arc<[Arc<Chunk>]>,
    failed: Arc<Mutex<BTreeMap<usize, Arc<Chunk>>>>,
    progress: Arc<SessionProgress>,
    cancel: CancellationToken,
}

/// Uploads the chunks in `range` one after another.
///
/// Cancellation is checked before each chunk; an attempt already under
/// way is left to observe the token on its own.
async fn run_lane(lane: usize, range: Range<usize>, ctx: Lane) {
    debug!(lane, start = range.start, end = range.end, "lane started");

    for index in range {
        if ctx.cancel.is_cancelled() {
            debug!(lane, index, "cancellation observed, lane stopping");
            break;
        }

        let chunk = &ctx.chunks[index];
        let uploaded = match ChunkSource::open(chunk.source_path()).await {
            Ok(source) if source.content_length() != chunk.total_bytes() => {
                warn!(
                    lane,
                    path = %chunk.source_path().display(),
                    expected = chunk.total_bytes(),
                    actual = source.content_length(),
                    "chunk source changed size since registration"
                );
                false
            }
            Ok(source) => {
                let on_bytes_sent: BytesSentCallback = {
                    let chunk = Arc::clone(chunk);
                    let progress = Arc::clone(&ctx.progress);
                    Box::new(move |sent| {
                        chunk.record_sent(sent);
                        progress.publish();
                    })
                };
                ctx.transport
                    .upload(chunk.destination_uri(), source, &ctx.cancel, on_bytes_sent)
                    .await
            }
            Err(e) => {
                warn!(
                    lane,
                    path = %chunk.source_path().display(),
                    error = %e,
                    "cannot open chunk source"
                );
                false
            }
        };

        if uploaded {
            chunk.mark_complete();
            ctx.failed
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&index);
            debug!(lane, index, bytes = chunk.total_bytes(), "chunk uploaded");
        } else {
            warn!(
                lane,
                index,
                path = %chunk.source_path().display(),
                "chunk failed to upload"
            );
        }

        ctx.progress.publish();
    }

    debug!(lane, "lane finished");
}
