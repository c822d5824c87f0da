//! Bucket + key addressing for stored objects.

use std::fmt;
use std::str::FromStr;

use crate::error::{FetchError, FetchResult};

const S3_SCHEME: &str = "s3://";

/// Address of an object in an object-storage service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    /// Create a location from a bucket and key.
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Parse an `s3://bucket/key` URL.
    ///
    /// The key is everything after the first `/` following the bucket and
    /// may itself contain `/`.
    pub fn parse(input: &str) -> FetchResult<Self> {
        let invalid = |reason: &str| FetchError::InvalidLocation {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let rest = input
            .strip_prefix(S3_SCHEME)
            .ok_or_else(|| invalid("expected an s3://bucket/key URL"))?;
        let (bucket, key) = rest
            .split_once('/')
            .ok_or_else(|| invalid("missing object key"))?;

        if bucket.is_empty() {
            return Err(invalid("empty bucket name"));
        }
        if key.is_empty() {
            return Err(invalid("empty object key"));
        }

        Ok(Self::new(bucket, key))
    }

    /// Location of a companion object stored next to this one, e.g. `<key>.md5`.
    pub fn sidecar(&self, suffix: &str) -> Self {
        Self::new(self.bucket.clone(), format!("{}{}", self.key, suffix))
    }

    /// Final path component of the key.
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

impl FromStr for ObjectLocation {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}/{}", S3_SCHEME, self.bucket, self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let loc = ObjectLocation::parse("s3://data/obs/cube.tar").unwrap();
        assert_eq!(loc.bucket, "data");
        assert_eq!(loc.key, "obs/cube.tar");
        assert_eq!(loc.file_name(), "cube.tar");
    }

    #[test]
    fn test_parse_rejects_missing_scheme() {
        assert!(matches!(
            ObjectLocation::parse("data/obs"),
            Err(FetchError::InvalidLocation { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_empty_parts() {
        assert!(ObjectLocation::parse("s3:///key").is_err());
        assert!(ObjectLocation::parse("s3://bucket/").is_err());
        assert!(ObjectLocation::parse("s3://bucket").is_err());
    }

    #[test]
    fn test_display_round_trips() {
        let loc = ObjectLocation::new("b", "k/with/slashes");
        assert_eq!(loc.to_string(), "s3://b/k/with/slashes");
        assert_eq!(loc.to_string().parse::<ObjectLocation>().unwrap(), loc);
    }

    #[test]
    fn test_sidecar() {
        let loc = ObjectLocation::new("b", "dir/file.bin");
        let md5 = loc.sidecar(".md5");
        assert_eq!(md5.bucket, "b");
        assert_eq!(md5.key, "dir/file.bin.md5");
    }
}
