//! MD5 content checksums for downloaded objects.
//!
//! This module provides:
//! - [`ChecksumAccumulator`], the running digest folded in stream order
//! - file checksums for already-downloaded data
//! - exact comparison against an expected digest
//! - discovery of the expected digest from object metadata

use std::fs::File;
use std::io::Read;
use std::path::Path;

use md5::{Digest, Md5};
use tracing::{debug, info};

use crate::error::{FetchError, FetchResult, StoreError};
use crate::location::ObjectLocation;
use crate::store::{ObjectMetadata, ObjectStore};

/// Buffer size for reading files during checksum calculation (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Length of a hex-encoded MD5 digest.
pub const MD5_HEX_LEN: usize = 32;

/// User-metadata key written by s3cmd.
const S3CMD_ATTRS_KEY: &str = "s3cmd-attrs";

/// Suffix of a sidecar object holding the hex digest.
const SIDECAR_SUFFIX: &str = ".md5";

/// Incremental MD5 state.
///
/// Chunks must be folded in ascending offset order. `finalize` consumes the
/// accumulator, so a digest can only be produced once.
#[derive(Clone, Default)]
pub struct ChecksumAccumulator {
    hasher: Md5,
    bytes: u64,
}

impl ChecksumAccumulator {
    /// Create an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold the next chunk of the stream into the digest.
    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.bytes += chunk.len() as u64;
    }

    /// Bytes folded in so far.
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Produce the lowercase hex digest.
    pub fn finalize(self) -> String {
        format!("{:x}", self.hasher.finalize())
    }
}

impl std::fmt::Debug for ChecksumAccumulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChecksumAccumulator")
            .field("bytes", &self.bytes)
            .finish()
    }
}

/// Calculate the MD5 checksum of a file.
///
/// # Returns
///
/// The lowercase hexadecimal MD5 hash of the file contents.
pub fn calculate_file_checksum(path: &Path) -> FetchResult<String> {
    let mut file = File::open(path).map_err(|e| FetchError::ReadFailed {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut checksum = ChecksumAccumulator::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let bytes_read = file
            .read(&mut buffer)
            .map_err(|e| FetchError::ReadFailed {
                path: path.to_path_buf(),
                source: e,
            })?;

        if bytes_read == 0 {
            break;
        }

        checksum.update(&buffer[..bytes_read]);
    }

    Ok(checksum.finalize())
}

/// Result of comparing a computed digest with an expected one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// Digests are identical.
    Match,
    /// Digests differ. The downloaded output is left in place.
    Mismatch { expected: String, actual: String },
    /// No expected digest was available.
    Skipped,
}

impl Verification {
    /// Whether the digest matched.
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Match)
    }

    /// Turn a mismatch into [`FetchError::ChecksumMismatch`].
    pub fn into_result(self) -> FetchResult<()> {
        match self {
            Self::Mismatch { expected, actual } => {
                Err(FetchError::ChecksumMismatch { expected, actual })
            }
            Self::Match | Self::Skipped => Ok(()),
        }
    }
}

/// Compare `actual` against `expected` with exact, case-sensitive equality.
pub fn verify(expected: Option<&str>, actual: &str) -> Verification {
    match expected {
        None => Verification::Skipped,
        Some(expected) if expected == actual => Verification::Match,
        Some(expected) => Verification::Mismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        },
    }
}

/// Verify that a local file matches an expected checksum.
pub fn verify_file(path: &Path, expected: &str) -> FetchResult<()> {
    let actual = calculate_file_checksum(path)?;
    verify(Some(expected), &actual).into_result()
}

/// Pull the `md5` value out of an s3cmd `k:v/k:v` attribute string.
fn md5_from_s3cmd_attrs(attrs: &str) -> Option<String> {
    attrs
        .split('/')
        .filter_map(|attr| attr.split_once(':'))
        .filter(|(key, value)| *key == "md5" && !value.contains(':'))
        .map(|(_, value)| value.to_string())
        .last()
}

/// Work out the expected MD5 of an object.
///
/// Tried in order:
/// 1. the entity tag, unless it contains `-` (multipart uploads)
/// 2. the `md5` entry of s3cmd's `s3cmd-attrs` user metadata
/// 3. a sidecar object `<key>.md5` holding the hex digest
///
/// A candidate that is not exactly 32 characters is discarded.
pub fn resolve_expected_md5(
    store: &dyn ObjectStore,
    location: &ObjectLocation,
    metadata: &ObjectMetadata,
) -> FetchResult<Option<String>> {
    let candidate = match metadata.etag.as_deref() {
        Some(etag) if !etag.contains('-') => Some(etag.to_string()),
        _ => {
            debug!(object = %location, "entity tag unusable as MD5, looking for alternatives");
            if let Some(attrs) = metadata.user_metadata.get(S3CMD_ATTRS_KEY) {
                info!("using s3cmd-attrs user metadata md5 hash");
                md5_from_s3cmd_attrs(attrs)
            } else {
                let sidecar = location.sidecar(SIDECAR_SUFFIX);
                match store.get_object(&sidecar) {
                    Ok(bytes) if bytes.len() >= MD5_HEX_LEN => {
                        info!(sidecar = %sidecar, "using sidecar object md5 hash");
                        Some(String::from_utf8_lossy(&bytes[..MD5_HEX_LEN]).into_owned())
                    }
                    Ok(_) => None,
                    Err(StoreError::NotFound) => {
                        info!(sidecar = %sidecar, "no sidecar md5 object");
                        None
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
    };

    Ok(candidate.filter(|md5| md5.len() == MD5_HEX_LEN))
}
