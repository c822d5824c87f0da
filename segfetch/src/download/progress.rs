//! Progress reporting for segmented downloads.
//!
//! Workers publish per-slot byte counts into atomic counters; a dedicated
//! reporter thread aggregates them and invokes a callback periodically.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Progress callback for segmented downloads.
///
/// # Arguments
///
/// * `bytes_downloaded` - Bytes fetched so far, including in-flight segments
/// * `total_bytes` - Object size
/// * `segments_done` - Segments consumed in order
/// * `total_segments` - Number of segments the object splits into
pub type DownloadProgressCallback = Box<dyn Fn(u64, u64, usize, usize) + Send + Sync>;

/// Default reporter poll interval.
const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_millis(100);

/// Shared progress counters for one transfer.
#[derive(Debug)]
pub struct ProgressCounters {
    /// Bytes fetched into the segment currently held by each slot.
    slot_progress: Vec<AtomicU64>,
    /// Bytes of segments already consumed.
    consumed_bytes: AtomicU64,
    /// Number of segments consumed.
    segments_done: AtomicUsize,
    /// Signal to stop the reporter thread.
    done: AtomicBool,
}

impl ProgressCounters {
    /// Create counters for a window of `slots` slots.
    pub fn new(slots: usize) -> Self {
        Self {
            slot_progress: (0..slots).map(|_| AtomicU64::new(0)).collect(),
            consumed_bytes: AtomicU64::new(0),
            segments_done: AtomicUsize::new(0),
            done: AtomicBool::new(false),
        }
    }

    /// Total bytes fetched, consumed or not.
    pub fn total_bytes(&self) -> u64 {
        let in_flight: u64 = self
            .slot_progress
            .iter()
            .map(|p| p.load(Ordering::SeqCst))
            .sum();
        self.consumed_bytes.load(Ordering::SeqCst) + in_flight
    }

    /// Number of segments consumed.
    pub fn segments_done(&self) -> usize {
        self.segments_done.load(Ordering::SeqCst)
    }

    /// Record how many bytes of its current segment a slot has fetched.
    pub fn update_slot(&self, slot: usize, bytes: u64) {
        if let Some(counter) = self.slot_progress.get(slot) {
            counter.store(bytes, Ordering::SeqCst);
        }
    }

    /// Move a consumed segment's bytes from its slot to the consumed total.
    pub fn mark_consumed(&self, slot: usize, bytes: u64) {
        if let Some(counter) = self.slot_progress.get(slot) {
            counter.store(0, Ordering::SeqCst);
        }
        self.consumed_bytes.fetch_add(bytes, Ordering::SeqCst);
        self.segments_done.fetch_add(1, Ordering::SeqCst);
    }

    /// Signal that the transfer is over.
    pub fn signal_done(&self) {
        self.done.store(true, Ordering::SeqCst);
    }

    /// Check if the transfer is over.
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}

/// Background thread that reports progress until the counters signal done.
pub struct ProgressReporter {
    handle: Option<JoinHandle<()>>,
    counters: Arc<ProgressCounters>,
}

impl ProgressReporter {
    /// Start a new progress reporter.
    ///
    /// # Arguments
    ///
    /// * `counters` - Shared progress counters
    /// * `total_size` - Object size
    /// * `total_segments` - Number of segments
    /// * `callback` - Function to call with progress updates
    /// * `poll_interval` - How often to poll for updates
    pub fn start(
        counters: Arc<ProgressCounters>,
        total_size: u64,
        total_segments: usize,
        callback: Arc<DownloadProgressCallback>,
        poll_interval: Duration,
    ) -> Self {
        let counters_clone = Arc::clone(&counters);

        let handle = thread::Builder::new()
            .name("segfetch-progress".to_string())
            .spawn(move || {
                while !counters_clone.is_done() {
                    callback(
                        counters_clone.total_bytes(),
                        total_size,
                        counters_clone.segments_done(),
                        total_segments,
                    );
                    thread::sleep(poll_interval);
                }

                // Final report
                callback(
                    counters_clone.total_bytes(),
                    total_size,
                    counters_clone.segments_done(),
                    total_segments,
                );
            })
            .ok();

        Self { handle, counters }
    }

    /// Start a reporter with the default 100ms poll interval.
    pub fn start_default(
        counters: Arc<ProgressCounters>,
        total_size: u64,
        total_segments: usize,
        callback: Arc<DownloadProgressCallback>,
    ) -> Self {
        Self::start(
            counters,
            total_size,
            total_segments,
            callback,
            DEFAULT_REPORT_INTERVAL,
        )
    }

    /// Stop the reporter and wait for its final report.
    pub fn stop(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        self.counters.signal_done();
        if let Some(handle) = self.handle.take() {
            handle.join().ok();
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_progress_counters_new() {
        let counters = ProgressCounters::new(3);
        assert_eq!(counters.total_bytes(), 0);
        assert_eq!(counters.segments_done(), 0);
        assert!(!counters.is_done());
    }

    #[test]
    fn test_slot_and_consumed_bytes_add_up() {
        let counters = ProgressCounters::new(2);
        counters.update_slot(0, 500);
        counters.update_slot(1, 300);
        assert_eq!(counters.total_bytes(), 800);

        counters.mark_consumed(0, 500);
        assert_eq!(counters.total_bytes(), 800);
        assert_eq!(counters.segments_done(), 1);

        // A retry resets the slot's count.
        counters.update_slot(1, 0);
        assert_eq!(counters.total_bytes(), 500);
    }

    #[test]
    fn test_out_of_range_slot_ignored() {
        let counters = ProgressCounters::new(1);
        counters.update_slot(5, 100);
        assert_eq!(counters.total_bytes(), 0);
    }

    #[test]
    fn test_progress_reporter_final_report() {
        let counters = Arc::new(ProgressCounters::new(2));
        let last = Arc::new(Mutex::new(None));
        let last_clone = Arc::clone(&last);

        let callback: DownloadProgressCallback = Box::new(move |bytes, total, done, segments| {
            *last_clone.lock() = Some((bytes, total, done, segments));
        });

        let reporter = ProgressReporter::start(
            Arc::clone(&counters),
            1000,
            2,
            Arc::new(callback),
            Duration::from_millis(10),
        );

        counters.mark_consumed(0, 600);
        counters.mark_consumed(1, 400);
        reporter.stop();

        assert_eq!(*last.lock(), Some((1000, 1000, 2, 2)));
        assert!(counters.is_done());
    }
}
