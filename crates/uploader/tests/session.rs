//! End-to-end session behavior against in-memory transport and metadata mocks.

use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};
use synthlift_transfer::{BytesSentCallback, Chunk, ChunkSource, ChunkTransport};
use synthlift_uploader::{
    AddFileResponse, AddFilesRequest, AddFilesResponse, ApiFuture, CollectionUpload,
    CreateCollectionRequest, CreateCollectionResponse, EditCollectionRequest, FileChunk, License,
    MediaApi, PrivacyLevel, Topology, UploadError, UploadOutcome, Uploader,
};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const MIB: usize = 1024 * 1024;

/// Streams the whole source, then fails any destination on the fail list.
#[derive(Default)]
struct ScriptedTransport {
    failing: Mutex<HashSet<String>>,
    attempts: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    fn fail(&self, uris: &[String]) {
        *self.failing.lock().unwrap() = uris.iter().cloned().collect();
    }

    fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }
}

impl ChunkTransport for ScriptedTransport {
    fn upload<'a>(
        &'a self,
        destination_uri: &'a str,
        source: ChunkSource,
        cancel: &'a CancellationToken,
        on_bytes_sent: BytesSentCallback,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
        Box::pin(async move {
            self.attempts
                .lock()
                .unwrap()
                .push(destination_uri.to_string());

            let mut reader = source.into_reader();
            let mut buf = vec![0u8; 64 * 1024];
            let mut sent = 0u64;
            loop {
                if cancel.is_cancelled() {
                    return false;
                }
                let n = match reader.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(_) => return false,
                };
                sent += n as u64;
                on_bytes_sent(sent);
                tokio::task::yield_now().await;
            }
            !self.failing.lock().unwrap().contains(destination_uri)
        })
    }
}

#[derive(Default)]
struct MockApi {
    collection_id: Uuid,
    fail_create: bool,
    /// Client ids the service "forgets" to return.
    drop_files: HashSet<String>,
    add_requests: Mutex<Vec<AddFilesRequest>>,
    edit_requests: Mutex<Vec<EditCollectionRequest>>,
}

impl MediaApi for MockApi {
    fn create_collection<'a>(
        &'a self,
        _request: &'a CreateCollectionRequest,
    ) -> ApiFuture<'a, CreateCollectionResponse> {
        Box::pin(async move {
            if self.fail_create {
                return Err(UploadError::Api {
                    status: 401,
                    body: "token expired".into(),
                });
            }
            Ok(CreateCollectionResponse {
                id: self.collection_id,
            })
        })
    }

    fn add_files<'a>(
        &'a self,
        collection_id: Uuid,
        request: &'a AddFilesRequest,
    ) -> ApiFuture<'a, AddFilesResponse> {
        Box::pin(async move {
            assert_eq!(collection_id, self.collection_id);
            self.add_requests.lock().unwrap().push(request.clone());
            // Answer in reverse so the uploader has to match on client id.
            let files = request
                .files
                .iter()
                .rev()
                .filter(|f| !self.drop_files.contains(&f.id))
                .map(|f| AddFileResponse {
                    client_id: f.id.clone(),
                    already_uploaded: false,
                    chunks: vec![FileChunk {
                        id: 0,
                        upload_uri: format!("https://blob.test/{collection_id}/{}", f.id),
                        status: None,
                    }],
                })
                .collect();
            Ok(AddFilesResponse { files })
        })
    }

    fn edit_collection<'a>(
        &'a self,
        _collection_id: Uuid,
        request: &'a EditCollectionRequest,
    ) -> ApiFuture<'a, ()> {
        Box::pin(async move {
            self.edit_requests.lock().unwrap().push(request.clone());
            Ok(())
        })
    }
}

fn write_photos(dir: &Path, count: usize, size: usize) -> Vec<PathBuf> {
    (0..count)
        .map(|i| {
            let path = dir.join(format!("IMG_{i:04}.jpg"));
            std::fs::write(&path, vec![i as u8; size]).unwrap();
            path
        })
        .collect()
}

fn collection(photos: Vec<PathBuf>) -> CollectionUpload {
    CollectionUpload {
        title: "Harbor at dusk".into(),
        description: "Walked the pier".into(),
        tags: vec!["harbor".into(), "evening".into()],
        privacy_level: PrivacyLevel::Unlisted,
        license: License::default(),
        topology: Topology::default(),
        captured_date: Utc.with_ymd_and_hms(2024, 5, 1, 18, 30, 0).unwrap(),
        photo_paths: photos,
    }
}

#[tokio::test]
async fn failed_chunks_are_resumed() {
    let dir = tempfile::tempdir().unwrap();
    let photos = write_photos(dir.path(), 5, 2 * MIB);
    let uris: Vec<String> = (0..5).map(|i| format!("https://blob.test/{i}")).collect();
    let chunks = photos
        .iter()
        .zip(&uris)
        .map(|(p, u)| Chunk::from_file(u, p).unwrap())
        .collect();

    let transport = Arc::new(ScriptedTransport::default());
    transport.fail(&[uris[1].clone(), uris[3].clone()]);
    let uploader = Uploader::new(transport.clone());

    let outcome = uploader
        .start_upload(chunks, CancellationToken::new(), 2)
        .await
        .unwrap();
    assert_eq!(outcome, UploadOutcome::Failed { failed: 2, total: 5 });

    let state = uploader.state();
    assert_eq!(state.status, "2 files failed to upload.");
    assert_eq!(state.progress_percentage, 100.0);
    assert!(state.is_retryable());
    let failed: Vec<&str> = state
        .failed_chunks
        .iter()
        .map(|c| c.destination_uri.as_str())
        .collect();
    assert_eq!(failed, vec![uris[1].as_str(), uris[3].as_str()]);
    // The session crossed the 10 MiB sample size, so it measured throughput.
    assert!(state.estimated_remaining.starts_with("Average upload speed: "));
    assert!(state.estimated_remaining.ends_with(" Mbps"));

    transport.fail(&[]);
    let before = transport.attempts().len();
    let outcome = uploader.resume(CancellationToken::new(), 2).await.unwrap();
    assert_eq!(outcome, UploadOutcome::Succeeded { uploaded: 2 });

    let retried: HashSet<String> = transport.attempts()[before..].iter().cloned().collect();
    assert_eq!(retried, HashSet::from([uris[1].clone(), uris[3].clone()]));

    let state = uploader.state();
    assert_eq!(state.status, "2 files successfully uploaded.");
    assert!(state.failed_chunks.is_empty());
    assert!(!state.is_uploading);
    assert!(uploader.failed_chunks().is_empty());

    // Nothing left: resume is a no-op.
    let outcome = uploader.resume(CancellationToken::new(), 2).await.unwrap();
    assert_eq!(outcome, UploadOutcome::Succeeded { uploaded: 0 });
    assert_eq!(transport.attempts().len(), before + 2);
}

#[tokio::test]
async fn failed_resume_keeps_remaining_chunks() {
    let dir = tempfile::tempdir().unwrap();
    let photos = write_photos(dir.path(), 3, 1000);
    let uris: Vec<String> = (0..3).map(|i| format!("https://blob.test/{i}")).collect();
    let chunks = photos
        .iter()
        .zip(&uris)
        .map(|(p, u)| Chunk::from_file(u, p).unwrap())
        .collect();

    let transport = Arc::new(ScriptedTransport::default());
    transport.fail(&uris);
    let uploader = Uploader::new(transport.clone());

    let outcome = uploader
        .start_upload(chunks, CancellationToken::new(), 4)
        .await
        .unwrap();
    assert_eq!(outcome, UploadOutcome::Failed { failed: 3, total: 3 });

    transport.fail(&[uris[2].clone()]);
    let outcome = uploader.resume(CancellationToken::new(), 4).await.unwrap();
    assert_eq!(outcome, UploadOutcome::Failed { failed: 1, total: 3 });
    assert_eq!(uploader.state().status, "1 files failed to upload.");

    let left = uploader.failed_chunks();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].destination_uri(), uris[2]);
}

#[tokio::test]
async fn collection_upload_runs_metadata_then_files() {
    let dir = tempfile::tempdir().unwrap();
    let photos = write_photos(dir.path(), 3, 4096);
    let api = MockApi {
        collection_id: Uuid::new_v4(),
        ..Default::default()
    };
    let transport = Arc::new(ScriptedTransport::default());
    let uploader = Uploader::new(transport.clone());
    let mut rx = uploader.subscribe();

    let recorder = tokio::spawn(async move {
        let mut seen = Vec::new();
        while rx.changed().await.is_ok() {
            let s = rx.borrow_and_update().clone();
            let done = s.status.ends_with("uploaded.");
            seen.push((s.status, s.progress_percentage));
            if done {
                break;
            }
        }
        seen
    });

    let upload = collection(photos.clone());
    let outcome = uploader
        .upload_collection(&api, &upload, CancellationToken::new(), 2)
        .await
        .unwrap();
    assert_eq!(outcome, UploadOutcome::Succeeded { uploaded: 3 });

    let state = uploader.state();
    assert_eq!(state.collection_id, Some(api.collection_id));
    assert_eq!(state.status, "3 files successfully uploaded.");

    // Files registered in photo order with zero-padded ordering keys.
    let add = api.add_requests.lock().unwrap()[0].clone();
    let orders: Vec<&str> = add.files.iter().map(|f| f.order.as_str()).collect();
    assert_eq!(orders, vec!["000", "001", "002"]);
    assert!(add.files.iter().all(|f| f.extension == "jpg" && f.chunk_count == 1));

    let edit = api.edit_requests.lock().unwrap()[0].clone();
    assert_eq!(edit.name.as_deref(), Some("Harbor at dusk"));
    assert_eq!(edit.tags.as_deref(), Some("harbor,evening"));
    assert_eq!(edit.image_count, Some(3));
    assert_eq!(edit.privacy_level, Some(PrivacyLevel::Unlisted));
    assert_eq!(edit.committed, Some(true));

    // Each photo went to the URI registered under its own client id.
    let attempts: HashSet<String> = transport.attempts().into_iter().collect();
    let expected: HashSet<String> = (0..3)
        .map(|i| format!("https://blob.test/{}/{i}", api.collection_id))
        .collect();
    assert_eq!(attempts, expected);

    let seen = recorder.await.unwrap();
    let statuses: Vec<&str> = seen.iter().map(|(s, _)| s.as_str()).collect();
    let pos = |needle: &str| statuses.iter().position(|s| *s == needle);
    let uploading = pos("Uploading files...").unwrap();
    if let Some(creating) = pos("Creating collection...") {
        assert!(creating < uploading);
    }
    // Upload progress starts above the metadata steps.
    assert!(
        seen[uploading..]
            .iter()
            .all(|(_, p)| *p >= 3.0)
    );
}

#[tokio::test]
async fn unregistered_photos_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let photos = write_photos(dir.path(), 3, 100);
    let api = MockApi {
        collection_id: Uuid::new_v4(),
        drop_files: HashSet::from(["1".to_string()]),
        ..Default::default()
    };
    let uploader = Uploader::new(Arc::new(ScriptedTransport::default()));

    let outcome = uploader
        .upload_collection(&api, &collection(photos), CancellationToken::new(), 2)
        .await
        .unwrap();
    assert_eq!(outcome, UploadOutcome::Succeeded { uploaded: 2 });
}

#[tokio::test]
async fn metadata_failure_ends_session() {
    let dir = tempfile::tempdir().unwrap();
    let photos = write_photos(dir.path(), 2, 100);
    let api = MockApi {
        fail_create: true,
        ..Default::default()
    };
    let transport = Arc::new(ScriptedTransport::default());
    let uploader = Uploader::new(transport.clone());

    let err = uploader
        .upload_collection(&api, &collection(photos), CancellationToken::new(), 2)
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Api { status: 401, .. }));

    let state = uploader.state();
    assert!(!state.is_uploading);
    assert_eq!(state.status, "Error: API error 401: token expired");
    assert!(transport.attempts().is_empty());
    assert!(!uploader.is_uploading());
}

#[tokio::test]
async fn collection_requires_title_and_photos() {
    let uploader = Uploader::new(Arc::new(ScriptedTransport::default()));
    let api = MockApi::default();

    let mut upload = collection(vec![PathBuf::from("a.jpg")]);
    upload.title = "  ".into();
    let err = uploader
        .upload_collection(&api, &upload, CancellationToken::new(), 2)
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::MissingTitle));

    let upload = collection(Vec::new());
    let err = uploader
        .upload_collection(&api, &upload, CancellationToken::new(), 2)
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::NoChunks));
    assert!(api.add_requests.lock().unwrap().is_empty());
}
