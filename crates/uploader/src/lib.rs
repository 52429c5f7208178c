//! Parallel upload sessions for photo collections.
//!
//! This crate holds the session logic. It knows nothing about terminals
//! or configuration files: callers hand it a [`ChunkTransport`] for the
//! bytes and, for full uploads, a [`MediaApi`] for the metadata calls.
//!
//! # Session lifecycle
//!
//! 1. **Create**: the service allocates a collection id
//! 2. **Register**: every photo gets an upload URI
//! 3. **Commit**: title, tags and privacy are written
//! 4. **Upload**: photos stream over parallel lanes
//! 5. **Resume**: failed photos can be retried any number of times
//!
//! [`ChunkTransport`]: synthlift_transfer::ChunkTransport

pub mod api;
pub mod error;
pub mod partition;
pub mod types;
pub mod upload;

pub use api::{ApiFuture, MediaApi, REQUEST_TIMEOUT, RestMediaApi, default_builder};
pub use error::UploadError;
pub use partition::partition;
pub use types::{
    AddFileRequest, AddFileResponse, AddFilesRequest, AddFilesResponse, CollectionUpload,
    CreateCollectionRequest, CreateCollectionResponse, EditCollectionRequest, FileChunk, License,
    PrivacyLevel, SynthPacketProperties, Topology, UploadOutcome, UploadState, UploadType,
};
pub use upload::{DEFAULT_PARALLELISM, Phase, Uploader};
