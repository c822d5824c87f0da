//! Integration tests for segmented downloads.
//!
//! These tests drive the full pipeline (planner, worker pool, slot window,
//! ordered consumer, sink, checksum) against in-memory stores, including
//! stores that delay, fail or truncate responses on purpose.
//!
//! Run with: `cargo test --test segmented_download`

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use md5::{Digest, Md5};
use parking_lot::Mutex;
use proptest::prelude::*;
use rand::Rng;
use tempfile::TempDir;

use segfetch::download::{RetryPolicy, Segment, SegmentSink};
use segfetch::store::{ByteRange, RangeBody};
use segfetch::{
    DownloadConfig, DownloadReport, FetchError, FetchResult, FileSink, MemoryObjectStore,
    ObjectLocation, ObjectMetadata, ObjectStore, SegmentedDownloader, StoreError,
};

// ============================================================================
// Helper Functions
// ============================================================================

fn location() -> ObjectLocation {
    ObjectLocation::new("bucket", "object.bin")
}

/// Deterministic pseudo-random content.
fn content(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i * 31 + i / 7) as u8).collect()
}

/// MD5 computed independently of the downloader.
fn reference_md5(data: &[u8]) -> String {
    format!("{:x}", Md5::digest(data))
}

fn memory_store(data: &[u8]) -> Arc<MemoryObjectStore> {
    let store = Arc::new(MemoryObjectStore::new());
    store.put(&location(), data.to_vec());
    store
}

fn config(segment_size: usize, workers: usize) -> DownloadConfig {
    DownloadConfig::new()
        .with_segment_size(segment_size)
        .with_workers(workers)
        .with_slot_poll_interval(Duration::from_millis(20))
        .with_shutdown_grace(Duration::from_secs(2))
}

/// Sink that keeps everything it is handed.
#[derive(Debug, Default)]
struct RecordingSink {
    data: Vec<u8>,
    /// (start, length, slot) of every consumed segment.
    segments: Vec<(u64, usize, usize)>,
    finished: bool,
    aborted: bool,
}

impl SegmentSink for RecordingSink {
    fn consume(&mut self, segment: &mut Segment) -> FetchResult<()> {
        self.data.extend_from_slice(segment.bytes());
        self.segments
            .push((segment.start(), segment.len(), segment.slot()));
        Ok(())
    }

    fn finish(&mut self) -> FetchResult<()> {
        self.finished = true;
        Ok(())
    }

    fn abort(&mut self) {
        self.aborted = true;
    }
}

/// What a [`FaultyStore`] does with a request for a given offset.
#[derive(Debug, Clone)]
enum Fault {
    /// Fail the next `n` requests with a timeout.
    Timeouts(usize),
    /// Fail every request.
    Always,
    /// Return only the first `keep` bytes for the next `n` requests.
    Short { keep: usize, times: usize },
}

/// Store wrapper that injects delays and faults per segment offset.
struct FaultyStore {
    inner: Arc<MemoryObjectStore>,
    faults: Mutex<HashMap<u64, Fault>>,
    max_delay_ms: u64,
    requests: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl FaultyStore {
    fn new(inner: Arc<MemoryObjectStore>) -> Self {
        Self {
            inner,
            faults: Mutex::new(HashMap::new()),
            max_delay_ms: 0,
            requests: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    fn with_random_delays(mut self, max_delay_ms: u64) -> Self {
        self.max_delay_ms = max_delay_ms;
        self
    }

    fn with_fault(self, offset: u64, fault: Fault) -> Self {
        self.faults.lock().insert(offset, fault);
        self
    }

    fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Apply the fault registered for `offset`, if any.
    fn fault_for(&self, offset: u64) -> Option<Fault> {
        let mut faults = self.faults.lock();
        let fault = faults.get_mut(&offset)?;
        match fault {
            Fault::Timeouts(0) | Fault::Short { times: 0, .. } => None,
            Fault::Timeouts(n) => {
                *n -= 1;
                Some(Fault::Timeouts(1))
            }
            Fault::Short { keep, times } => {
                *times -= 1;
                Some(Fault::Short {
                    keep: *keep,
                    times: 1,
                })
            }
            Fault::Always => Some(Fault::Always),
        }
    }
}

impl ObjectStore for FaultyStore {
    fn head(&self, location: &ObjectLocation) -> Result<ObjectMetadata, StoreError> {
        self.inner.head(location)
    }

    fn get_range(
        &self,
        location: &ObjectLocation,
        range: ByteRange,
    ) -> Result<RangeBody, StoreError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if self.max_delay_ms > 0 {
            let delay = rand::rng().random_range(0..=self.max_delay_ms);
            thread::sleep(Duration::from_millis(delay));
        }

        let result = match self.fault_for(range.start) {
            Some(Fault::Timeouts(_)) => Err(StoreError::Timeout),
            Some(Fault::Always) => Err(StoreError::Transport("connection reset".to_string())),
            Some(Fault::Short { keep, .. }) => {
                let full = self.inner.get_range(location, range).map(|mut body| {
                    let mut bytes = Vec::new();
                    std::io::Read::read_to_end(&mut body, &mut bytes).unwrap();
                    bytes
                })?;
                let truncated = full[..keep.min(full.len())].to_vec();
                Ok(Box::new(Cursor::new(truncated)) as RangeBody)
            }
            None => self.inner.get_range(location, range),
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

fn run(
    store: Arc<dyn ObjectStore>,
    size: u64,
    config: DownloadConfig,
) -> (FetchResult<DownloadReport>, RecordingSink) {
    let downloader = SegmentedDownloader::new(store, config);
    let mut sink = RecordingSink::default();
    let result = downloader.download(&location(), size, &mut sink);
    (result, sink)
}

// ============================================================================
// Ordering and Bounded Memory
// ============================================================================

/// 62 bytes, 6-byte segments, 5 workers: 11 segments, slots cycle 0..5.
#[test]
fn test_reference_scenario() {
    let data = content(62);
    let (result, sink) = run(memory_store(&data), 62, config(6, 5));
    let report = result.unwrap();

    assert_eq!(report.bytes, 62);
    assert_eq!(report.segments, 11);
    assert_eq!(report.digest, reference_md5(&data));
    assert!(report.peak_in_flight <= 5);

    let slots: Vec<usize> = sink.segments.iter().map(|s| s.2).collect();
    assert_eq!(slots, vec![0, 1, 2, 3, 4, 0, 1, 2, 3, 4, 0]);

    let starts: Vec<u64> = sink.segments.iter().map(|s| s.0).collect();
    assert_eq!(starts, (0..11).map(|i| i * 6).collect::<Vec<u64>>());
    assert_eq!(sink.segments.last(), Some(&(60, 2, 0)));

    assert_eq!(sink.data, data);
    assert!(sink.finished);
    assert!(!sink.aborted);
}

/// Workers finishing in random order still produce an in-order stream.
#[test]
fn test_random_completion_order() {
    let data = content(10_000);
    let store = Arc::new(FaultyStore::new(memory_store(&data)).with_random_delays(15));
    let (result, sink) = run(
        Arc::clone(&store) as Arc<dyn ObjectStore>,
        10_000,
        config(128, 8),
    );
    let report = result.unwrap();

    assert_eq!(sink.data, data);
    assert_eq!(report.digest, reference_md5(&data));
    assert_eq!(report.segments, 79);
    assert!(report.peak_in_flight <= 8);
    assert!(store.peak_in_flight() <= 8);
    assert_eq!(store.requests(), 79);

    let starts: Vec<u64> = sink.segments.iter().map(|s| s.0).collect();
    assert!(starts.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_digest_for_boundary_sizes() {
    let segment = 64;
    let workers = 4;
    for size in [0, 1, segment, segment + 1, 3 * workers * segment, 3 * workers * segment - 5] {
        let data = content(size);
        let (result, sink) = run(memory_store(&data), size as u64, config(segment, workers));
        let report = result.unwrap();
        assert_eq!(report.digest, reference_md5(&data), "size {}", size);
        assert_eq!(sink.data, data, "size {}", size);
        assert!(sink.finished, "size {}", size);
    }
}

#[test]
fn test_empty_object_makes_no_requests() {
    let store = Arc::new(FaultyStore::new(memory_store(b"")));
    let (result, sink) = run(Arc::clone(&store) as Arc<dyn ObjectStore>, 0, config(8, 2));
    let report = result.unwrap();

    assert_eq!(report.digest, "d41d8cd98f00b204e9800998ecf8427e");
    assert_eq!(report.segments, 0);
    assert_eq!(store.requests(), 0);
    assert!(sink.finished);
}

#[test]
fn test_single_worker() {
    let data = content(1000);
    let (result, sink) = run(memory_store(&data), 1000, config(100, 1));
    assert_eq!(result.unwrap().peak_in_flight, 1);
    assert!(sink.segments.iter().all(|s| s.2 == 0));
    assert_eq!(sink.data, data);
}

// ============================================================================
// Retries and Failures
// ============================================================================

#[test]
fn test_transient_failures_recovered() {
    let data = content(300);
    let store = Arc::new(
        FaultyStore::new(memory_store(&data))
            .with_fault(60, Fault::Timeouts(2))
            .with_fault(180, Fault::Timeouts(1)),
    );
    let (result, sink) = run(
        Arc::clone(&store) as Arc<dyn ObjectStore>,
        300,
        config(30, 4).with_retry_policy(RetryPolicy::new(3)),
    );

    assert_eq!(result.unwrap().digest, reference_md5(&data));
    assert_eq!(sink.data, data);
    assert_eq!(store.requests(), 10 + 3);
}

#[test]
fn test_short_read_retried_within_budget() {
    let data = content(120);
    let store = Arc::new(
        FaultyStore::new(memory_store(&data)).with_fault(40, Fault::Short { keep: 3, times: 1 }),
    );
    let (result, sink) = run(Arc::clone(&store) as Arc<dyn ObjectStore>, 120, config(20, 3));

    assert_eq!(result.unwrap().digest, reference_md5(&data));
    assert_eq!(sink.data, data);
}

#[test]
fn test_permanently_short_segment_fails() {
    let data = content(120);
    let store = Arc::new(
        FaultyStore::new(memory_store(&data)).with_fault(
            40,
            Fault::Short {
                keep: 3,
                times: usize::MAX,
            },
        ),
    );
    let (result, sink) = run(store, 120, config(20, 3));

    match result.unwrap_err() {
        FetchError::SegmentFailed {
            start,
            length,
            attempts,
            ..
        } => {
            assert_eq!(start, 40);
            assert_eq!(length, 20);
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(sink.aborted);
    assert!(!sink.finished);
}

#[test]
fn test_exhausted_retries_abort_without_digest() {
    let data = content(600);
    let store = Arc::new(FaultyStore::new(memory_store(&data)).with_fault(300, Fault::Always));
    let (result, sink) = run(
        store,
        600,
        config(50, 4).with_retry_policy(RetryPolicy::new(2)),
    );

    let err = result.unwrap_err();
    assert_eq!(err.failed_offset(), Some(300));
    assert!(err.to_string().contains("offset 300"));
    assert!(sink.aborted);
    assert!(!sink.finished);
    // Nothing at or after the failed segment reached the sink.
    assert!(sink.data.len() <= 300);
    assert_eq!(sink.data[..], data[..sink.data.len()]);
}

#[test]
fn test_partial_file_left_after_failure() {
    let data = content(400);
    let store = Arc::new(FaultyStore::new(memory_store(&data)).with_fault(200, Fault::Always));
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("partial.bin");

    let downloader = SegmentedDownloader::new(
        store,
        config(100, 2).with_retry_policy(RetryPolicy::new(1)),
    );
    let mut sink = FileSink::create(&path).unwrap();
    assert!(downloader.download(&location(), 400, &mut sink).is_err());

    let written = std::fs::read(&path).unwrap();
    assert!(written.len() <= 200);
    assert_eq!(written[..], data[..written.len()]);
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn test_round_trip_property(
        size in 0usize..3000,
        segment_size in 1usize..400,
        workers in 1usize..9,
    ) {
        let data = content(size);
        let (result, sink) = run(memory_store(&data), size as u64, config(segment_size, workers));
        let report = result.map_err(|e| TestCaseError::fail(e.to_string()))?;

        prop_assert_eq!(&sink.data, &data);
        prop_assert_eq!(report.digest, reference_md5(&data));
        prop_assert_eq!(report.segments, size.div_ceil(segment_size));
        prop_assert!(report.peak_in_flight <= workers);
        for (i, (_, _, slot)) in sink.segments.iter().enumerate() {
            prop_assert_eq!(*slot, i % workers);
        }
    }
}
