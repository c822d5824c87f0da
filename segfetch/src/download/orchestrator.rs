//! Ordered consumer driving a segmented download.
//!
//! The consumer keeps at most W segments outstanding, one per slot. It waits
//! on slots in round-robin order, so segments are consumed in ascending
//! offset order no matter which worker finishes first. Each consumed slot is
//! immediately refilled with the next unrequested range.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use super::pool::WorkerPool;
use super::progress::{DownloadProgressCallback, ProgressCounters, ProgressReporter};
use super::segment::{Segment, SegmentPlanner};
use super::sink::{ArchiveSink, FileSink, SegmentSink};
use super::window::{SlotOutcome, SlotWindow};
use super::worker::FetchTask;
use crate::checksum::ChecksumAccumulator;
use crate::config::DownloadConfig;
use crate::error::{FetchError, FetchResult, StoreError};
use crate::extract::ExtractReport;
use crate::location::ObjectLocation;
use crate::store::{ObjectMetadata, ObjectStore};

/// Outcome of a completed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    /// Bytes delivered to the sink.
    pub bytes: u64,
    /// Segments consumed.
    pub segments: usize,
    /// Lowercase hex MD5 of the delivered bytes.
    pub digest: String,
    /// Wall-clock duration of the transfer.
    pub elapsed: Duration,
    /// Highest number of slots occupied at once.
    pub peak_in_flight: usize,
}

/// Everything one transfer shares with its fetch tasks.
struct Transfer<'a> {
    downloader: &'a SegmentedDownloader,
    pool: &'a WorkerPool,
    window: Arc<SlotWindow>,
    location: Arc<ObjectLocation>,
    progress: Option<Arc<ProgressCounters>>,
}

impl Transfer<'_> {
    fn submit(&self, segment: Segment) -> FetchResult<()> {
        let (slot, start, length) = (segment.slot(), segment.start(), segment.len());
        self.window.occupy(slot, start, length);
        debug!(slot, offset = start, length, "segment submitted");

        let task = FetchTask {
            segment,
            location: Arc::clone(&self.location),
            store: Arc::clone(&self.downloader.store),
            window: Arc::clone(&self.window),
            retry: self.downloader.config.retry,
            cancel: self.pool.cancel_flag(),
            progress: self.progress.clone(),
        };

        if self.pool.execute(Box::new(move || task.run())) {
            Ok(())
        } else {
            Err(FetchError::SegmentFailed {
                start,
                length,
                slot,
                attempts: 0,
                reason: "worker pool stopped accepting work".to_string(),
            })
        }
    }
}

/// Downloads an object as ordered, checksummed segments.
pub struct SegmentedDownloader {
    store: Arc<dyn ObjectStore>,
    config: DownloadConfig,
    progress: Option<Arc<DownloadProgressCallback>>,
}

impl SegmentedDownloader {
    /// Create a downloader reading from `store`.
    pub fn new(store: Arc<dyn ObjectStore>, config: DownloadConfig) -> Self {
        Self {
            store,
            config,
            progress: None,
        }
    }

    /// Report progress through `callback` while downloading.
    pub fn with_progress(mut self, callback: DownloadProgressCallback) -> Self {
        self.progress = Some(Arc::new(callback));
        self
    }

    /// Download configuration.
    pub fn config(&self) -> &DownloadConfig {
        &self.config
    }

    /// Backing object store.
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Fetch object metadata; a missing object maps to [`FetchError::ObjectNotFound`].
    pub fn head(&self, location: &ObjectLocation) -> FetchResult<ObjectMetadata> {
        self.store.head(location).map_err(|e| match e {
            StoreError::NotFound => FetchError::ObjectNotFound {
                location: location.to_string(),
            },
            other => FetchError::Store(other),
        })
    }

    /// Download `object_size` bytes of `location` into `sink`.
    ///
    /// Bytes reach the sink and the checksum strictly in offset order. On the
    /// first failed segment the workers are cancelled, the sink is aborted
    /// and the failure is returned; no digest is produced.
    pub fn download(
        &self,
        location: &ObjectLocation,
        object_size: u64,
        sink: &mut dyn SegmentSink,
    ) -> FetchResult<DownloadReport> {
        self.config.validate()?;
        let started = Instant::now();

        if object_size == 0 {
            info!(object = %location, "object is empty, nothing to fetch");
            sink.finish()?;
            return Ok(DownloadReport {
                bytes: 0,
                segments: 0,
                digest: ChecksumAccumulator::new().finalize(),
                elapsed: started.elapsed(),
                peak_in_flight: 0,
            });
        }

        let workers = self.config.workers;
        let mut planner = SegmentPlanner::new(object_size, self.config.segment_size)?;
        let total_segments = planner.total_segments();

        info!(
            object = %location,
            size = object_size,
            segments = total_segments,
            segment_size = self.config.segment_size,
            workers,
            "starting segmented download"
        );

        let pool = WorkerPool::new(workers, "segfetch-worker")?;
        let progress = self
            .progress
            .as_ref()
            .map(|_| Arc::new(ProgressCounters::new(workers)));
        let reporter = match (&self.progress, &progress) {
            (Some(callback), Some(counters)) => Some(ProgressReporter::start_default(
                Arc::clone(counters),
                object_size,
                total_segments,
                Arc::clone(callback),
            )),
            _ => None,
        };

        let transfer = Transfer {
            downloader: self,
            pool: &pool,
            window: Arc::new(SlotWindow::new(workers)),
            location: Arc::new(location.clone()),
            progress,
        };

        let mut checksum = ChecksumAccumulator::new();
        let result =
            self.consume_in_order(&transfer, &mut planner, object_size, &mut checksum, sink);
        let peak_in_flight = transfer.window.peak_occupancy();
        drop(transfer);
        drop(reporter);

        let segments = match result {
            Ok(segments) => segments,
            Err(e) => {
                error!(object = %location, error = %e, "download failed, aborting");
                pool.cancel();
                pool.shutdown(self.config.shutdown_grace);
                sink.abort();
                return Err(e);
            }
        };

        pool.shutdown(self.config.shutdown_grace);
        sink.finish()?;

        let digest = checksum.finalize();
        let elapsed = started.elapsed();
        info!(
            object = %location,
            bytes = object_size,
            segments,
            digest = %digest,
            peak_in_flight,
            elapsed_ms = elapsed.as_millis() as u64,
            "download complete"
        );

        Ok(DownloadReport {
            bytes: object_size,
            segments,
            digest,
            elapsed,
            peak_in_flight,
        })
    }

    /// Prime the window, then consume and refill slots round-robin.
    fn consume_in_order(
        &self,
        transfer: &Transfer<'_>,
        planner: &mut SegmentPlanner,
        object_size: u64,
        checksum: &mut ChecksumAccumulator,
        sink: &mut dyn SegmentSink,
    ) -> FetchResult<usize> {
        let workers = self.config.workers;

        for slot in 0..workers {
            let Some((start, length)) = planner.next_range() else {
                break;
            };
            transfer.submit(Segment::new(start, length, slot)?)?;
        }

        let mut slot = 0;
        let mut consumed = 0u64;
        let mut segments = 0;

        while consumed < object_size {
            match transfer
                .window
                .wait_for(slot, self.config.slot_poll_interval)
            {
                SlotOutcome::Failed(failure) => {
                    error!(
                        offset = failure.start,
                        length = failure.length,
                        slot = failure.slot,
                        attempts = failure.attempts,
                        reason = %failure.reason,
                        "segment failed"
                    );
                    return Err(failure.into());
                }
                SlotOutcome::Complete(mut segment) => {
                    debug_assert_eq!(segment.start(), consumed, "segment consumed out of order");
                    let length = segment.len();

                    checksum.update(segment.bytes());
                    sink.consume(&mut segment)?;
                    consumed += length as u64;
                    segments += 1;
                    if let Some(progress) = &transfer.progress {
                        progress.mark_consumed(slot, length as u64);
                    }
                    debug!(slot, offset = segment.start(), length, "segment consumed");

                    if let Some((start, length)) = planner.next_range() {
                        // A sink that took the buffer left nothing to reuse.
                        let next = if sink.takes_buffers() {
                            Segment::new(start, length, slot)?
                        } else {
                            segment.reset(start, length)?;
                            segment
                        };
                        transfer.submit(next)?;
                    }
                    slot = (slot + 1) % workers;
                }
            }
        }

        Ok(segments)
    }

    /// Download `location` into a local file.
    pub fn fetch_to_file(
        &self,
        location: &ObjectLocation,
        path: &Path,
    ) -> FetchResult<DownloadReport> {
        let metadata = self.head(location)?;
        let mut sink = FileSink::create(path)?;
        self.download(location, metadata.size, &mut sink)
    }

    /// Download a tar archive and extract it under `destination` as it streams.
    pub fn fetch_and_extract(
        &self,
        location: &ObjectLocation,
        destination: &Path,
    ) -> FetchResult<(DownloadReport, ExtractReport)> {
        let metadata = self.head(location)?;
        let mut sink = ArchiveSink::start(
            destination,
            self.config.effective_queue_depth(),
            self.config.slot_poll_interval,
        )?;
        let report = self.download(location, metadata.size, &mut sink)?;
        let extracted = sink.report().cloned().unwrap_or_default();
        Ok((report, extracted))
    }
}

impl std::fmt::Debug for SegmentedDownloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SegmentedDownloader")
            .field("config", &self.config)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryObjectStore;
    use tempfile::TempDir;

    const EMPTY_MD5: &str = "d41d8cd98f00b204e9800998ecf8427e";

    fn setup(data: &[u8]) -> (Arc<MemoryObjectStore>, ObjectLocation) {
        let store = Arc::new(MemoryObjectStore::new());
        let location = ObjectLocation::new("bucket", "data.bin");
        store.put(&location, data.to_vec());
        (store, location)
    }

    fn md5(data: &[u8]) -> String {
        let mut checksum = ChecksumAccumulator::new();
        checksum.update(data);
        checksum.finalize()
    }

    #[test]
    fn test_download_to_file() {
        let data: Vec<u8> = (0..62u8).collect();
        let (store, location) = setup(&data);
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("out.bin");

        let downloader = SegmentedDownloader::new(
            store,
            DownloadConfig::new().with_segment_size(6).with_workers(5),
        );
        let report = downloader.fetch_to_file(&location, &path).unwrap();

        assert_eq!(report.bytes, 62);
        assert_eq!(report.segments, 11);
        assert_eq!(report.digest, md5(&data));
        assert!(report.peak_in_flight <= 5);
        assert_eq!(std::fs::read(&path).unwrap(), data);
    }

    #[test]
    fn test_empty_object() {
        let (store, location) = setup(b"");
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("empty.bin");

        let downloader = SegmentedDownloader::new(store, DownloadConfig::default());
        let report = downloader.fetch_to_file(&location, &path).unwrap();

        assert_eq!(report.segments, 0);
        assert_eq!(report.digest, EMPTY_MD5);
        assert_eq!(std::fs::read(&path).unwrap(), b"");
    }

    #[test]
    fn test_missing_object() {
        let store = Arc::new(MemoryObjectStore::new());
        let downloader = SegmentedDownloader::new(store, DownloadConfig::default());
        let temp = TempDir::new().unwrap();

        let err = downloader
            .fetch_to_file(&ObjectLocation::new("b", "nope"), &temp.path().join("x"))
            .unwrap_err();
        assert!(matches!(err, FetchError::ObjectNotFound { .. }));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let (store, location) = setup(b"abc");
        let downloader =
            SegmentedDownloader::new(store, DownloadConfig::new().with_workers(0));
        let temp = TempDir::new().unwrap();
        let mut sink = FileSink::create(&temp.path().join("x")).unwrap();

        let err = downloader.download(&location, 3, &mut sink).unwrap_err();
        assert!(matches!(err, FetchError::InvalidConfig(_)));
    }

    #[test]
    fn test_size_beyond_object_fails_with_offset() {
        let (store, location) = setup(&[7u8; 10]);
        let downloader = SegmentedDownloader::new(
            store,
            DownloadConfig::new()
                .with_segment_size(4)
                .with_workers(2)
                .with_shutdown_grace(Duration::from_secs(1)),
        );
        let temp = TempDir::new().unwrap();
        let mut sink = FileSink::create(&temp.path().join("x")).unwrap();

        // Claim 16 bytes: the range [12, 15] is beyond the object.
        let err = downloader.download(&location, 16, &mut sink).unwrap_err();
        assert!(matches!(err, FetchError::SegmentFailed { .. }));
        assert!(err.failed_offset().is_some());
    }

    /// Sink that moves every buffer out, like the archive sink.
    #[derive(Default)]
    struct TakingSink {
        data: Vec<u8>,
        buffers: usize,
    }

    impl SegmentSink for TakingSink {
        fn consume(&mut self, segment: &mut Segment) -> FetchResult<()> {
            let expected = segment.len();
            let bytes = segment.take_bytes();
            assert_eq!(bytes.len(), expected);
            self.data.extend_from_slice(&bytes);
            self.buffers += 1;
            Ok(())
        }

        fn finish(&mut self) -> FetchResult<()> {
            Ok(())
        }

        fn abort(&mut self) {}

        fn takes_buffers(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_sink_taking_buffers_gets_fresh_segments() {
        let data: Vec<u8> = (0..250u32).map(|i| (i % 256) as u8).collect();
        let (store, location) = setup(&data);
        let downloader = SegmentedDownloader::new(
            store,
            DownloadConfig::new().with_segment_size(16).with_workers(3),
        );

        let mut sink = TakingSink::default();
        let report = downloader.download(&location, 250, &mut sink).unwrap();

        assert_eq!(sink.buffers, 16);
        assert_eq!(sink.data, data);
        assert_eq!(report.digest, md5(&data));
    }

    #[test]
    fn test_progress_callback_reaches_total() {
        use parking_lot::Mutex;

        let data = vec![3u8; 1000];
        let (store, location) = setup(&data);
        let last = Arc::new(Mutex::new((0u64, 0usize)));
        let last_clone = Arc::clone(&last);

        let downloader = SegmentedDownloader::new(
            store,
            DownloadConfig::new().with_segment_size(100).with_workers(3),
        )
        .with_progress(Box::new(move |bytes, _total, done, _segments| {
            *last_clone.lock() = (bytes, done);
        }));

        let temp = TempDir::new().unwrap();
        downloader
            .fetch_to_file(&location, &temp.path().join("out"))
            .unwrap();
        assert_eq!(*last.lock(), (1000, 10));
    }
}
