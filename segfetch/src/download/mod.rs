//! Segmented, ordered download engine.
//!
//! An object is split into fixed-size segments that a pool of W workers
//! fetches concurrently with ranged requests. A single consumer hands the
//! bytes to a [`SegmentSink`] and the MD5 accumulator strictly in offset
//! order, while never holding more than W segments in memory.
//!
//! # Architecture
//!
//! ```text
//! SegmentedDownloader (ordered consumer)
//!         │
//!         ├── SegmentPlanner (next unrequested range)
//!         │
//!         ├── SlotWindow (W slots, mutex + condvar)
//!         │       ▲
//!         │       │ complete / fail
//!         │       │
//!         ├── WorkerPool ── FetchTask ── fetch_segment (retries)
//!         │
//!         ├── SegmentSink
//!         │       ├── FileSink
//!         │       └── ArchiveSink ── HandoffQueue ── TarExtractor
//!         │
//!         └── ProgressReporter (optional)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use segfetch::{DownloadConfig, HttpObjectStore, ObjectLocation, SegmentedDownloader};
//!
//! let store = HttpObjectStore::new("https://s3.amazonaws.com", config.request_timeout)?;
//! let downloader = SegmentedDownloader::new(Arc::new(store), DownloadConfig::default());
//! let location = ObjectLocation::parse("s3://bucket/backup.tar")?;
//! let report = downloader.fetch_to_file(&location, "backup.tar".as_ref())?;
//! println!("{}", report.digest);
//! ```

mod orchestrator;
mod pool;
mod progress;
mod segment;
mod sink;
mod window;
mod worker;

pub use orchestrator::{DownloadReport, SegmentedDownloader};
pub use pool::{Job, WorkerPool};
pub use progress::{DownloadProgressCallback, ProgressCounters, ProgressReporter};
pub use segment::{Segment, SegmentPlanner, SegmentState};
pub use sink::{ArchiveSink, FileSink, SegmentSink};
pub use window::{SegmentFailure, SlotOutcome, SlotWindow};
pub use worker::{fetch_segment, FetchTask, RetryPolicy, DEFAULT_MAX_ATTEMPTS};
