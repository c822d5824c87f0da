//! segfetch - segmented parallel downloads from S3-compatible object stores
//!
//! An object is fetched as fixed-size byte ranges by a bounded pool of
//! workers and reassembled in order, so it can be written to a file or
//! streamed straight into a tar extractor while the MD5 of the whole object
//! is computed on the fly.
//!
//! # Modules
//!
//! - [`download`]: segment planning, worker pool, slot window, ordered consumer
//! - [`store`]: object-store seam with HTTP and in-memory backends
//! - [`extract`]: bounded handoff queue and streaming tar extractor
//! - [`checksum`]: MD5 accumulation, verification and expected-digest lookup
//! - [`config`]: download tuning and the persisted INI config file
//! - [`logging`]: tracing subscriber setup

pub mod checksum;
pub mod config;
pub mod download;
pub mod error;
pub mod extract;
pub mod location;
pub mod logging;
pub mod store;

pub use config::DownloadConfig;
pub use download::{
    ArchiveSink, DownloadReport, FileSink, RetryPolicy, SegmentSink, SegmentedDownloader,
};
pub use error::{FetchError, FetchResult, StoreError};
pub use extract::{ExtractError, ExtractReport};
pub use location::ObjectLocation;
pub use store::{HttpObjectStore, MemoryObjectStore, ObjectMetadata, ObjectStore};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
