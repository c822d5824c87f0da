//! Object store over plain HTTP(S) against an S3-compatible endpoint.
//!
//! Requests are path-style (`{endpoint}/{bucket}/{key}`) and unsigned, which
//! covers public buckets, local gateways and presigning proxies. Ranged reads
//! use the `Range` header and expect `206 Partial Content`.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, CONTENT_LENGTH, ETAG, RANGE};
use reqwest::{StatusCode, Url};

use super::{ByteRange, ObjectMetadata, ObjectStore, RangeBody};
use crate::error::{FetchError, FetchResult, StoreError};
use crate::location::ObjectLocation;

/// Default endpoint when none is configured.
pub const DEFAULT_ENDPOINT: &str = "https://s3.amazonaws.com";

/// Prefix of user-metadata headers.
const USER_METADATA_PREFIX: &str = "x-amz-meta-";

/// S3-compatible object store using a blocking HTTP client.
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    client: Client,
    endpoint: String,
    base: Url,
    timeout: Duration,
}

impl HttpObjectStore {
    /// Create a store for `endpoint` with the given per-request timeout.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> FetchResult<Self> {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(FetchError::InvalidConfig(format!(
                "endpoint must be an http(s) URL, got '{}'",
                endpoint
            )));
        }

        let base = Url::parse(&endpoint)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| {
                FetchError::InvalidConfig(format!("endpoint '{}' is not a valid base URL", endpoint))
            })?;

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::InvalidConfig(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            base,
            timeout,
        })
    }

    /// Endpoint base URL without a trailing slash.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Per-request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// URL of an object.
    ///
    /// The bucket and every `/`-separated part of the key are
    /// percent-encoded, so keys containing `#`, `?`, `%` or spaces address
    /// the right object.
    pub fn object_url(&self, location: &ObjectLocation) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .push(&location.bucket)
                .extend(location.key.split('/'));
        }
        url
    }

    fn send_error(e: reqwest::Error) -> StoreError {
        if e.is_timeout() {
            StoreError::Timeout
        } else {
            StoreError::Transport(e.to_string())
        }
    }

    fn status_error(response: &Response) -> StoreError {
        match response.status() {
            StatusCode::NOT_FOUND => StoreError::NotFound,
            StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => StoreError::AccessDenied,
            status => StoreError::Status {
                code: status.as_u16(),
                reason: status
                    .canonical_reason()
                    .unwrap_or("unknown status")
                    .to_string(),
            },
        }
    }
}

/// Extract object metadata from response headers.
///
/// The object size is required; a missing or malformed `Content-Length`
/// is an error rather than an empty object.
fn parse_metadata(headers: &HeaderMap) -> Result<ObjectMetadata, StoreError> {
    let size = headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .ok_or(StoreError::MissingContentLength)?;

    let etag = headers
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim_matches('"').to_string())
        .filter(|s| !s.is_empty());

    let user_metadata: HashMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| {
            let key = name.as_str().strip_prefix(USER_METADATA_PREFIX)?;
            let value = value.to_str().ok()?;
            Some((key.to_string(), value.to_string()))
        })
        .collect();

    Ok(ObjectMetadata {
        size,
        etag,
        user_metadata,
    })
}

impl ObjectStore for HttpObjectStore {
    fn head(&self, location: &ObjectLocation) -> Result<ObjectMetadata, StoreError> {
        let response = self
            .client
            .head(self.object_url(location))
            .send()
            .map_err(Self::send_error)?;

        if !response.status().is_success() {
            return Err(Self::status_error(&response));
        }

        parse_metadata(response.headers())
    }

    fn get_range(
        &self,
        location: &ObjectLocation,
        range: ByteRange,
    ) -> Result<RangeBody, StoreError> {
        let response = self
            .client
            .get(self.object_url(location))
            .header(RANGE, range.header_value())
            .send()
            .map_err(Self::send_error)?;

        match response.status() {
            StatusCode::PARTIAL_CONTENT => Ok(Box::new(response)),
            StatusCode::OK => {
                // Whole-object answer is only usable when it is what we asked for.
                let full_length = response.content_length();
                if range.start == 0 && full_length == Some(range.len()) {
                    Ok(Box::new(response))
                } else {
                    Err(StoreError::RangeIgnored)
                }
            }
            _ => Err(Self::status_error(&response)),
        }
    }
}
