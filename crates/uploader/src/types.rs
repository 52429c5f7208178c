//! Data types for upload sessions and the metadata service.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use synthlift_transfer::ChunkSummary;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Session outcome and observable state
// ---------------------------------------------------------------------------

/// Result of a finished upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Every chunk in the session was accepted.
    Succeeded { uploaded: usize },
    /// Some chunks remain in the failure set.
    Failed { failed: usize, total: usize },
}

impl UploadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UploadOutcome::Succeeded { .. })
    }
}

impl fmt::Display for UploadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadOutcome::Succeeded { uploaded } => {
                write!(f, "{uploaded} files successfully uploaded.")
            }
            UploadOutcome::Failed { failed, .. } => write!(f, "{failed} files failed to upload."),
        }
    }
}

/// Snapshot of an uploader's observable state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UploadState {
    pub is_uploading: bool,
    /// Human-readable summary of what the session is doing or how it ended.
    pub status: String,
    /// 0–100.
    pub progress_percentage: f64,
    /// Remaining-time estimate while running, average speed once done.
    pub estimated_remaining: String,
    /// Collection created by the last full upload, if any.
    pub collection_id: Option<Uuid>,
    /// Chunks that did not upload in the most recent session.
    pub failed_chunks: Vec<ChunkSummary>,
}

impl UploadState {
    /// `true` when idle with failed chunks left to resume.
    pub fn is_retryable(&self) -> bool {
        !self.is_uploading && !self.failed_chunks.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Collection description (caller input)
// ---------------------------------------------------------------------------

/// Whether a collection shows up in search results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum PrivacyLevel {
    #[default]
    Public,
    Unlisted,
}

impl From<PrivacyLevel> for u8 {
    fn from(v: PrivacyLevel) -> Self {
        match v {
            PrivacyLevel::Public => 0,
            PrivacyLevel::Unlisted => 1,
        }
    }
}

impl TryFrom<u8> for PrivacyLevel {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(PrivacyLevel::Public),
            1 => Ok(PrivacyLevel::Unlisted),
            other => Err(format!("unknown privacy level {other}")),
        }
    }
}

/// License attached to an uploaded collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum License {
    #[default]
    AllRightsReserved,
    CcAttribution,
    CcAttributionShareAlike,
    CcAttributionNoDerivatives,
    CcAttributionNonCommercial,
    CcAttributionNonCommercialShareAlike,
    CcAttributionNonCommercialNoDerivatives,
    PublicDomain,
}

const LICENSES: [License; 8] = [
    License::AllRightsReserved,
    License::CcAttribution,
    License::CcAttributionShareAlike,
    License::CcAttributionNoDerivatives,
    License::CcAttributionNonCommercial,
    License::CcAttributionNonCommercialShareAlike,
    License::CcAttributionNonCommercialNoDerivatives,
    License::PublicDomain,
];

impl From<License> for u8 {
    fn from(v: License) -> Self {
        LICENSES.iter().position(|l| *l == v).unwrap_or(0) as u8
    }
}

impl TryFrom<u8> for License {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        LICENSES
            .get(v as usize)
            .copied()
            .ok_or_else(|| format!("unknown license {v}"))
    }
}

/// Capture layout of the photos, sent to the service as a processing hint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Topology {
    #[default]
    Unknown,
    Spin,
    Panorama,
    Wall,
    Walk,
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Topology::Unknown => "Unknown",
            Topology::Spin => "Spin",
            Topology::Panorama => "Panorama",
            Topology::Wall => "Wall",
            Topology::Walk => "Walk",
        };
        f.write_str(s)
    }
}

/// Everything needed to create and upload a new collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionUpload {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub privacy_level: PrivacyLevel,
    pub license: License,
    pub topology: Topology,
    pub captured_date: DateTime<Utc>,
    pub photo_paths: Vec<PathBuf>,
}

// ---------------------------------------------------------------------------
// Metadata service wire types (PascalCase JSON, unset fields omitted)
// ---------------------------------------------------------------------------

/// Kind of collection being created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "u8")]
pub enum UploadType {
    SynthPacketFromRawImages,
}

impl From<UploadType> for u8 {
    fn from(v: UploadType) -> Self {
        match v {
            UploadType::SynthPacketFromRawImages => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateCollectionRequest {
    pub upload_type: UploadType,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateCollectionResponse {
    pub id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AddFileRequest {
    pub id: String,
    pub extension: String,
    pub order: String,
    pub chunk_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AddFilesRequest {
    pub files: Vec<AddFileRequest>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FileChunk {
    #[serde(default)]
    pub id: i32,
    pub upload_uri: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AddFileResponse {
    pub client_id: String,
    #[serde(default)]
    pub already_uploaded: bool,
    #[serde(default)]
    pub chunks: Vec<FileChunk>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AddFilesResponse {
    #[serde(default)]
    pub files: Vec<AddFileResponse>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SynthPacketProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<License>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct EditCollectionRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub privacy_level: Option<PrivacyLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub captured_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub committed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_hints: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synth_packet: Option<SynthPacketProperties>,
}

impl EditCollectionRequest {
    /// Builds the request that commits a freshly registered collection.
    pub fn commit(upload: &CollectionUpload) -> Self {
        let tags = (!upload.tags.is_empty()).then(|| upload.tags.join(","));
        Self {
            name: Some(upload.title.clone()),
            description: (!upload.description.is_empty()).then(|| upload.description.clone()),
            image_count: Some(upload.photo_paths.len()),
            privacy_level: Some(upload.privacy_level),
            captured_date: Some(upload.captured_date),
            committed: Some(true),
            upload_hints: Some(upload.topology.to_string()),
            tags,
            synth_packet: Some(SynthPacketProperties {
                license: Some(upload.license),
            }),
        }
    }
}
