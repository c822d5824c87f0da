//! In-process object store.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{ByteRange, ObjectMetadata, ObjectStore, RangeBody};
use crate::checksum::ChecksumAccumulator;
use crate::error::StoreError;
use crate::location::ObjectLocation;

#[derive(Debug)]
struct StoredObject {
    data: Arc<Vec<u8>>,
    metadata: ObjectMetadata,
}

/// Object store backed by a map in memory.
///
/// Objects get an entity tag equal to the MD5 of their content, the way a
/// single-part upload does.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<ObjectLocation, StoredObject>>,
}

impl MemoryObjectStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `data` at `location`, replacing any existing object.
    pub fn put(&self, location: &ObjectLocation, data: Vec<u8>) {
        let mut checksum = ChecksumAccumulator::new();
        checksum.update(&data);
        let metadata = ObjectMetadata {
            size: data.len() as u64,
            etag: Some(checksum.finalize()),
            user_metadata: HashMap::new(),
        };
        self.put_with_metadata(location, data, metadata);
    }

    /// Store `data` with explicit metadata. The size field is always taken
    /// from `data`.
    pub fn put_with_metadata(
        &self,
        location: &ObjectLocation,
        data: Vec<u8>,
        mut metadata: ObjectMetadata,
    ) {
        metadata.size = data.len() as u64;
        self.objects.write().insert(
            location.clone(),
            StoredObject {
                data: Arc::new(data),
                metadata,
            },
        );
    }

    /// Remove an object. Returns whether it existed.
    pub fn remove(&self, location: &ObjectLocation) -> bool {
        self.objects.write().remove(location).is_some()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Whether the store holds no objects.
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

impl ObjectStore for MemoryObjectStore {
    fn head(&self, location: &ObjectLocation) -> Result<ObjectMetadata, StoreError> {
        self.objects
            .read()
            .get(location)
            .map(|o| o.metadata.clone())
            .ok_or(StoreError::NotFound)
    }

    fn get_range(
        &self,
        location: &ObjectLocation,
        range: ByteRange,
    ) -> Result<RangeBody, StoreError> {
        let data = self
            .objects
            .read()
            .get(location)
            .map(|o| Arc::clone(&o.data))
            .ok_or(StoreError::NotFound)?;

        let size = data.len() as u64;
        if range.start >= size || range.end >= size {
            return Err(StoreError::Status {
                code: 416,
                reason: format!("range {} outside object of {} bytes", range, size),
            });
        }

        let slice = data[range.start as usize..=range.end as usize].to_vec();
        Ok(Box::new(Cursor::new(slice)))
    }
}
