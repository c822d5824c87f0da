//! Error types for segmented downloads.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::extract::ExtractError;

/// Result type for download operations.
pub type FetchResult<T> = Result<T, FetchError>;

/// Errors reported by an [`ObjectStore`](crate::store::ObjectStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// The object (or bucket) does not exist.
    #[error("object not found")]
    NotFound,

    /// The service refused the request.
    #[error("access denied")]
    AccessDenied,

    /// Non-success HTTP status not covered by a more specific variant.
    #[error("unexpected status {code}: {reason}")]
    Status { code: u16, reason: String },

    /// The request did not complete within the configured timeout.
    #[error("request timed out")]
    Timeout,

    /// Connection-level failure (DNS, reset, TLS, ...).
    #[error("transport error: {0}")]
    Transport(String),

    /// The service answered a ranged request with the whole object.
    #[error("server ignored the requested byte range")]
    RangeIgnored,

    /// A metadata response did not state the object size.
    #[error("response carries no usable Content-Length")]
    MissingContentLength,

    /// Reading the response body failed.
    #[error("body read error: {0}")]
    Body(#[source] io::Error),
}

impl StoreError {
    /// Whether another attempt at the same request could succeed.
    ///
    /// Missing objects, authorization failures and client errors other than
    /// 408/429 are definitive.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NotFound
            | Self::AccessDenied
            | Self::RangeIgnored
            | Self::MissingContentLength => false,
            Self::Status { code, .. } => !(400..500).contains(code) || matches!(code, 408 | 429),
            Self::Timeout | Self::Transport(_) | Self::Body(_) => true,
        }
    }
}

/// Errors that can occur while fetching an object.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Invalid download configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// An object location could not be parsed.
    #[error("invalid object location '{input}': {reason}")]
    InvalidLocation { input: String, reason: String },

    /// A segment was constructed with zero length.
    #[error("segment length must be greater than zero")]
    EmptySegment,

    /// A metadata or sidecar request failed.
    #[error("storage request failed: {0}")]
    Store(#[from] StoreError),

    /// The object to download does not exist.
    #[error("object not found: {location}")]
    ObjectNotFound { location: String },

    /// A segment exhausted its retry budget; the transfer is incomplete.
    #[error(
        "segment at offset {start} (length {length}, slot {slot}) failed after {attempts} attempt(s): {reason}"
    )]
    SegmentFailed {
        start: u64,
        length: usize,
        slot: usize,
        attempts: u32,
        reason: String,
    },

    /// Failed to write the output file.
    #[error("failed to write {}: {source}", path.display())]
    WriteFailed { path: PathBuf, source: io::Error },

    /// Failed to read a local file.
    #[error("failed to read {}: {source}", path.display())]
    ReadFailed { path: PathBuf, source: io::Error },

    /// Failed to create a directory.
    #[error("failed to create directory {}: {source}", path.display())]
    CreateDirFailed { path: PathBuf, source: io::Error },

    /// Archive extraction requires an existing destination directory.
    #[error("destination {} does not exist or is not a directory", path.display())]
    NotADirectory { path: PathBuf },

    /// The download completed but unpacking the archive failed.
    #[error("archive extraction failed: {0}")]
    Extraction(#[from] ExtractError),

    /// The downloaded bytes do not match the expected checksum.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
}

impl FetchError {
    /// Byte offset of the failing segment, if this is a fetch failure.
    pub fn failed_offset(&self) -> Option<u64> {
        match self {
            Self::SegmentFailed { start, .. } => Some(*start),
            _ => None,
        }
    }
}
