use std::fmt;

use reqwest::header::HeaderValue;
use serde::{Deserialize, Serialize};

use crate::TransferError;

/// API version used when none is configured.
pub const DEFAULT_API_VERSION: &str = "2014-08";

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

/// Credentials needed to talk to the media service.
///
/// The access token is carried opaquely and only ever turned into a
/// bearer `Authorization` header.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Base URL of the service, without a trailing slash.
    pub service_url: String,
    pub access_token: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
}

impl Credentials {
    /// Creates credentials, falling back to [`DEFAULT_API_VERSION`].
    pub fn new(service_url: &str, access_token: &str, api_version: Option<&str>) -> Self {
        Self {
            service_url: service_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
            api_version: api_version.map_or_else(default_api_version, str::to_string),
        }
    }

    /// Returns the `Authorization` header value (`Bearer <token>`).
    pub fn authorization_header(&self) -> Result<HeaderValue, TransferError> {
        let mut value = HeaderValue::from_str(&format!("Bearer {}", self.access_token))
            .map_err(|_| TransferError::InvalidCredentials)?;
        value.set_sensitive(true);
        Ok(value)
    }

    /// Builds a REST endpoint URL: `{service_url}/rest/{api_version}{path}`.
    pub fn rest_url(&self, path: &str) -> String {
        format!(
            "{}/rest/{}{}",
            self.service_url.trim_end_matches('/'),
            self.api_version,
            path
        )
    }

    /// Returns a browser link to a collection.
    pub fn view_link(&self, collection_id: impl fmt::Display) -> String {
        format!(
            "{}/view/{}",
            self.service_url.trim_end_matches('/'),
            collection_id
        )
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("service_url", &self.service_url)
            .field("access_token", &"<redacted>")
            .field("api_version", &self.api_version)
            .finish()
    }
}
