//! Object-storage access used by the downloader.
//!
//! The downloader only needs two capabilities from a storage service: the
//! metadata of an object (size, entity tag, user metadata) and a ranged read
//! returning a byte stream. [`ObjectStore`] captures exactly that, so the
//! segmented download logic can be exercised against [`MemoryObjectStore`]
//! in tests and against any S3-compatible endpoint through
//! [`HttpObjectStore`].

mod http;
mod memory;

use std::collections::HashMap;
use std::fmt;
use std::io::Read;

pub use http::{HttpObjectStore, DEFAULT_ENDPOINT};
pub use memory::MemoryObjectStore;

use crate::error::StoreError;
use crate::location::ObjectLocation;

/// Byte stream returned by a ranged read.
pub type RangeBody = Box<dyn Read + Send>;

/// Inclusive byte range, as used by HTTP `Range: bytes=start-end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    /// First byte offset.
    pub start: u64,
    /// Last byte offset (inclusive).
    pub end: u64,
}

impl ByteRange {
    /// Range of `len` bytes starting at `start`. `len` must be non-zero.
    pub fn from_offset_len(start: u64, len: u64) -> Self {
        debug_assert!(len > 0, "byte ranges cannot be empty");
        Self {
            start,
            end: start + len - 1,
        }
    }

    /// Number of bytes covered by the range.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Always false: a range covers at least one byte.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Value for an HTTP `Range` header.
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Metadata of a stored object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectMetadata {
    /// Object size in bytes.
    pub size: u64,
    /// Entity tag with surrounding quotes removed.
    pub etag: Option<String>,
    /// User metadata (`x-amz-meta-*` headers without the prefix).
    pub user_metadata: HashMap<String, String>,
}

/// Ranged-read access to an object store.
pub trait ObjectStore: Send + Sync {
    /// Fetch the metadata of an object.
    fn head(&self, location: &ObjectLocation) -> Result<ObjectMetadata, StoreError>;

    /// Open a stream over `range` of the object.
    ///
    /// A successful stream yields exactly `range.len()` bytes; callers treat
    /// an early end of stream as a failed read.
    fn get_range(
        &self,
        location: &ObjectLocation,
        range: ByteRange,
    ) -> Result<RangeBody, StoreError>;

    /// Read a whole (small) object into memory.
    fn get_object(&self, location: &ObjectLocation) -> Result<Vec<u8>, StoreError> {
        let meta = self.head(location)?;
        if meta.size == 0 {
            return Ok(Vec::new());
        }
        let mut body = self.get_range(location, ByteRange::from_offset_len(0, meta.size))?;
        let mut data = Vec::with_capacity(meta.size as usize);
        body.read_to_end(&mut data).map_err(StoreError::Body)?;
        Ok(data)
    }

    /// Size of the object, or `None` if it does not exist.
    fn exists(&self, location: &ObjectLocation) -> Result<Option<u64>, StoreError> {
        match self.head(location) {
            Ok(meta) => Ok(Some(meta.size)),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
