//! Metadata service boundary.
//!
//! `MediaApi` covers the three calls a full upload needs before any
//! bytes move: create a collection, register its files (which yields the
//! per-file upload URIs), and commit the collection's properties.
//! `RestMediaApi` implements it over HTTP; tests use mocks.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::Method;
use reqwest::header::{AUTHORIZATION, HeaderMap};
use serde::Serialize;
use synthlift_transfer::{CONNECT_TIMEOUT, Credentials};
use tracing::debug;
use uuid::Uuid;

use crate::error::UploadError;
use crate::types::{
    AddFilesRequest, AddFilesResponse, CreateCollectionRequest, CreateCollectionResponse,
    EditCollectionRequest,
};

/// Limit on a whole metadata request, response included.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(100);

/// Boxed future returned by [`MediaApi`] methods.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, UploadError>> + Send + 'a>>;

/// Abstract connection to the media service's metadata endpoints.
pub trait MediaApi: Send + Sync {
    /// Creates an empty collection and returns its identifier.
    fn create_collection<'a>(
        &'a self,
        request: &'a CreateCollectionRequest,
    ) -> ApiFuture<'a, CreateCollectionResponse>;

    /// Registers files against a collection; the response carries one
    /// upload URI per file chunk.
    fn add_files<'a>(
        &'a self,
        collection_id: Uuid,
        request: &'a AddFilesRequest,
    ) -> ApiFuture<'a, AddFilesResponse>;

    /// Sets collection properties (title, tags, privacy, commit flag).
    fn edit_collection<'a>(
        &'a self,
        collection_id: Uuid,
        request: &'a EditCollectionRequest,
    ) -> ApiFuture<'a, ()>;
}

/// [`MediaApi`] over the service's JSON REST interface.
#[derive(Debug, Clone)]
pub struct RestMediaApi {
    http: reqwest::Client,
    credentials: Credentials,
}

impl RestMediaApi {
    /// Creates a client that sends the bearer token on every request.
    ///
    /// Requests give up after [`REQUEST_TIMEOUT`].
    pub fn new(credentials: Credentials) -> Result<Self, UploadError> {
        Self::with_builder(default_builder(), credentials)
    }

    /// Creates a client from a pre-configured builder.
    pub fn with_builder(
        builder: reqwest::ClientBuilder,
        credentials: Credentials,
    ) -> Result<Self, UploadError> {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, credentials.authorization_header()?);
        let http = builder.default_headers(headers).build()?;
        Ok(Self { http, credentials })
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Sends a JSON request and returns the raw response body.
    async fn send_json<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<Vec<u8>, UploadError> {
        let url = self.credentials.rest_url(path);
        debug!(%method, %url, "metadata request");

        let resp = self
            .http
            .request(method, &url)
            .header(reqwest::header::CONTENT_TYPE, "application/json; charset=utf-8")
            .body(serde_json::to_vec(body)?)
            .send()
            .await?;
        let status = resp.status();

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(UploadError::Api {
                status: status.as_u16(),
                body,
            });
        }

        Ok(resp.bytes().await?.to_vec())
    }

    async fn create(
        &self,
        request: &CreateCollectionRequest,
    ) -> Result<CreateCollectionResponse, UploadError> {
        let body = self.send_json(Method::PUT, "/media", request).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn add(
        &self,
        collection_id: Uuid,
        request: &AddFilesRequest,
    ) -> Result<AddFilesResponse, UploadError> {
        let body = self
            .send_json(Method::PUT, &format!("/media/{collection_id}/files"), request)
            .await?;
        if body.is_empty() {
            return Ok(AddFilesResponse::default());
        }
        Ok(serde_json::from_slice(&body)?)
    }

    async fn edit(
        &self,
        collection_id: Uuid,
        request: &EditCollectionRequest,
    ) -> Result<(), UploadError> {
        self.send_json(Method::POST, &format!("/media/{collection_id}"), request)
            .await?;
        Ok(())
    }
}

/// Client builder with the default connect and request timeouts.
pub fn default_builder() -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
}

impl MediaApi for RestMediaApi {
    fn create_collection<'a>(
        &'a self,
        request: &'a CreateCollectionRequest,
    ) -> ApiFuture<'a, CreateCollectionResponse> {
        Box::pin(self.create(request))
    }

    fn add_files<'a>(
        &'a self,
        collection_id: Uuid,
        request: &'a AddFilesRequest,
    ) -> ApiFuture<'a, AddFilesResponse> {
        Box::pin(self.add(collection_id, request))
    }

    fn edit_collection<'a>(
        &'a self,
        collection_id: Uuid,
        request: &'a EditCollectionRequest,
    ) -> ApiFuture<'a, ()> {
        Box::pin(self.edit(collection_id, request))
    }
}
