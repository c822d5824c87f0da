//! Fetching a single segment with retries.

use std::io::{self, Read};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, trace, warn};

use super::progress::ProgressCounters;
use super::segment::Segment;
use super::window::{SegmentFailure, SlotWindow};
use crate::error::StoreError;
use crate::location::ObjectLocation;
use crate::store::ObjectStore;

/// Default number of attempts per segment.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Read chunk size when draining a response body.
const READ_CHUNK: usize = 64 * 1024;

/// Retry budget of a single segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt. Doubles for every further attempt.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    /// Allow `max_attempts` attempts with no delay between them.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Duration::ZERO,
        }
    }

    /// Set the base backoff.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        if self.backoff.is_zero() || attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
        self.backoff.saturating_mul(factor)
    }
}

/// Fill `buf` from `body`, returning the number of bytes read.
///
/// Reading stops at end of stream or when `buf` is full.
fn fill_buffer(
    body: &mut dyn Read,
    buf: &mut [u8],
    mut on_read: impl FnMut(u64),
) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let end = (filled + READ_CHUNK).min(buf.len());
        match body.read(&mut buf[filled..end]) {
            Ok(0) => break,
            Ok(n) => {
                filled += n;
                on_read(filled as u64);
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// One ranged request into the segment's buffer.
fn fetch_once(
    store: &dyn ObjectStore,
    location: &ObjectLocation,
    segment: &mut Segment,
    on_read: impl FnMut(u64),
) -> Result<(), StoreError> {
    let range = segment.range();
    let expected = segment.len();
    let mut body = store.get_range(location, range)?;

    let got = fill_buffer(&mut body, segment.buffer_mut(), on_read).map_err(StoreError::Body)?;
    if got < expected {
        return Err(StoreError::Body(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("short read for {}: got {} of {} bytes", range, got, expected),
        )));
    }

    let mut probe = [0u8; 1];
    if body.read(&mut probe).map_err(StoreError::Body)? != 0 {
        return Err(StoreError::Body(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("response for {} is longer than {} bytes", range, expected),
        )));
    }

    Ok(())
}

/// Fetch a segment, retrying transient failures.
///
/// On success the segment is marked complete and the number of attempts used
/// is returned. A short read counts as a failed attempt. Definitive storage
/// errors and cancellation end the loop early.
pub fn fetch_segment(
    store: &dyn ObjectStore,
    location: &ObjectLocation,
    segment: &mut Segment,
    policy: &RetryPolicy,
    cancel: &AtomicBool,
    mut on_read: impl FnMut(u64),
) -> Result<u32, SegmentFailure> {
    let mut attempts = 0;
    let mut reason = String::from("cancelled before first attempt");

    while attempts < policy.max_attempts {
        if cancel.load(Ordering::SeqCst) {
            reason = "cancelled".to_string();
            break;
        }
        attempts += 1;

        match fetch_once(store, location, segment, &mut on_read) {
            Ok(()) => {
                segment.mark_complete();
                trace!(
                    start = segment.start(),
                    length = segment.len(),
                    attempts,
                    "segment fetched"
                );
                return Ok(attempts);
            }
            Err(e) => {
                warn!(
                    object = %location,
                    range = %segment.range(),
                    attempt = attempts,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "segment fetch failed"
                );
                on_read(0);
                reason = e.to_string();
                if !e.is_retryable() {
                    break;
                }
                if attempts < policy.max_attempts {
                    let delay = policy.delay(attempts);
                    if !delay.is_zero() {
                        thread::sleep(delay);
                    }
                }
            }
        }
    }

    segment.mark_failed();
    Err(SegmentFailure {
        start: segment.start(),
        length: segment.len(),
        slot: segment.slot(),
        attempts,
        reason,
    })
}

/// A segment fetch scheduled on the worker pool.
///
/// The task owns its segment while fetching and hands it back to the window
/// when done, whatever the outcome.
pub struct FetchTask {
    pub segment: Segment,
    pub location: Arc<ObjectLocation>,
    pub store: Arc<dyn ObjectStore>,
    pub window: Arc<SlotWindow>,
    pub retry: RetryPolicy,
    pub cancel: Arc<AtomicBool>,
    pub progress: Option<Arc<ProgressCounters>>,
}

impl FetchTask {
    /// Fetch the segment and publish the result to its slot.
    pub fn run(self) {
        let FetchTask {
            mut segment,
            location,
            store,
            window,
            retry,
            cancel,
            progress,
        } = self;

        let slot = segment.slot();
        let start = segment.start();
        let length = segment.len();

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            fetch_segment(
                store.as_ref(),
                &location,
                &mut segment,
                &retry,
                &cancel,
                |bytes| {
                    if let Some(progress) = &progress {
                        progress.update_slot(slot, bytes);
                    }
                },
            )
        }));

        match result {
            Ok(Ok(attempts)) => {
                debug!(slot, start, length, attempts, "segment ready");
                window.complete(segment);
            }
            Ok(Err(failure)) => window.fail(failure),
            Err(_) => window.fail(SegmentFailure {
                start,
                length,
                slot,
                attempts: 0,
                reason: "fetch worker panicked".to_string(),
            }),
        }
    }
}

impl std::fmt::Debug for FetchTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchTask")
            .field("location", &self.location)
            .field("start", &self.segment.start())
            .field("length", &self.segment.len())
            .field("slot", &self.segment.slot())
            .finish()
    }
}
