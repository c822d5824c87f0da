//! Fixed-size window of segment slots shared by workers and the consumer.
//!
//! All slot state lives behind one mutex paired with one condition variable.
//! Workers finish out of order, so every completion is broadcast and the
//! consumer re-checks the one slot it is waiting for.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use super::segment::Segment;
use crate::error::FetchError;

/// Terminal failure of one segment fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentFailure {
    pub start: u64,
    pub length: usize,
    pub slot: usize,
    pub attempts: u32,
    pub reason: String,
}

impl From<SegmentFailure> for FetchError {
    fn from(f: SegmentFailure) -> Self {
        FetchError::SegmentFailed {
            start: f.start,
            length: f.length,
            slot: f.slot,
            attempts: f.attempts,
            reason: f.reason,
        }
    }
}

/// What the consumer gets back for a slot.
#[derive(Debug)]
pub enum SlotOutcome {
    Complete(Segment),
    Failed(SegmentFailure),
}

#[derive(Debug)]
enum Slot {
    Empty,
    InFlight { start: u64, length: usize },
    Complete(Segment),
    Failed(SegmentFailure),
}

#[derive(Debug)]
struct WindowState {
    slots: Vec<Slot>,
    occupied: usize,
    peak: usize,
    failed_slot: Option<usize>,
}

impl WindowState {
    fn take(&mut self, slot: usize) -> Slot {
        let taken = std::mem::replace(&mut self.slots[slot], Slot::Empty);
        if !matches!(taken, Slot::Empty) {
            self.occupied -= 1;
        }
        taken
    }
}

/// W slots, each holding at most one segment that is in flight or fetched
/// but not yet consumed.
#[derive(Debug)]
pub struct SlotWindow {
    state: Mutex<WindowState>,
    signal: Condvar,
}

impl SlotWindow {
    /// Create a window of `size` empty slots.
    pub fn new(size: usize) -> Self {
        Self {
            state: Mutex::new(WindowState {
                slots: (0..size).map(|_| Slot::Empty).collect(),
                occupied: 0,
                peak: 0,
                failed_slot: None,
            }),
            signal: Condvar::new(),
        }
    }

    /// Number of slots.
    pub fn size(&self) -> usize {
        self.state.lock().slots.len()
    }

    /// Claim an empty slot for a fetch of `length` bytes at `start`.
    pub fn occupy(&self, slot: usize, start: u64, length: usize) {
        let mut state = self.state.lock();
        debug_assert!(
            matches!(state.slots[slot], Slot::Empty),
            "slot {} reused before its segment was consumed",
            slot
        );
        state.slots[slot] = Slot::InFlight { start, length };
        state.occupied += 1;
        state.peak = state.peak.max(state.occupied);
    }

    /// Publish a fetched segment and wake the consumer.
    pub fn complete(&self, segment: Segment) {
        let slot = segment.slot();
        let mut state = self.state.lock();
        state.slots[slot] = Slot::Complete(segment);
        self.signal.notify_all();
    }

    /// Publish a failed fetch and wake the consumer.
    pub fn fail(&self, failure: SegmentFailure) {
        let slot = failure.slot;
        let mut state = self.state.lock();
        state.slots[slot] = Slot::Failed(failure);
        if state.failed_slot.is_none() {
            state.failed_slot = Some(slot);
        }
        self.signal.notify_all();
    }

    /// Block until `slot` has a terminal result and take it out of the window.
    ///
    /// Each wait is bounded by `poll_interval` so a lost wakeup only delays
    /// the consumer. A failure in any slot is returned as soon as it is seen,
    /// since the transfer cannot complete once one range is lost.
    pub fn wait_for(&self, slot: usize, poll_interval: Duration) -> SlotOutcome {
        let mut state = self.state.lock();
        loop {
            if let Some(failed) = state.failed_slot.take() {
                if let Slot::Failed(failure) = state.take(failed) {
                    return SlotOutcome::Failed(failure);
                }
            }

            match &state.slots[slot] {
                Slot::Complete(_) => {
                    if let Slot::Complete(segment) = state.take(slot) {
                        return SlotOutcome::Complete(segment);
                    }
                }
                Slot::Failed(_) => {
                    if let Slot::Failed(failure) = state.take(slot) {
                        return SlotOutcome::Failed(failure);
                    }
                }
                Slot::InFlight { start, length } => {
                    trace!(slot, start, length, "waiting for slot");
                }
                Slot::Empty => {
                    debug_assert!(false, "waiting on empty slot {}", slot);
                }
            }

            if self.signal.wait_for(&mut state, poll_interval).timed_out() {
                trace!(slot, "slot wait timed out, re-checking");
            }
        }
    }

    /// Slots currently holding a pending or unconsumed segment.
    pub fn occupied(&self) -> usize {
        self.state.lock().occupied
    }

    /// Highest occupancy seen so far.
    pub fn peak_occupancy(&self) -> usize {
        self.state.lock().peak
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    const POLL: Duration = Duration::from_millis(10);

    fn filled(start: u64, len: usize, slot: usize) -> Segment {
        let mut seg = Segment::new(start, len, slot).unwrap();
        seg.mark_complete();
        seg
    }

    #[test]
    fn test_complete_then_wait() {
        let window = SlotWindow::new(2);
        window.occupy(0, 0, 4);
        assert_eq!(window.occupied(), 1);

        window.complete(filled(0, 4, 0));
        match window.wait_for(0, POLL) {
            SlotOutcome::Complete(seg) => assert_eq!(seg.start(), 0),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(window.occupied(), 0);
        assert_eq!(window.peak_occupancy(), 1);
    }

    #[test]
    fn test_wait_ignores_other_slots() {
        let window = Arc::new(SlotWindow::new(3));
        for slot in 0..3 {
            window.occupy(slot, slot as u64 * 4, 4);
        }
        assert_eq!(window.peak_occupancy(), 3);

        // Later slots finish first; the consumer still gets slot 0.
        let worker = {
            let window = Arc::clone(&window);
            thread::spawn(move || {
                window.complete(filled(8, 4, 2));
                window.complete(filled(4, 4, 1));
                thread::sleep(Duration::from_millis(30));
                window.complete(filled(0, 4, 0));
            })
        };

        match window.wait_for(0, POLL) {
            SlotOutcome::Complete(seg) => assert_eq!(seg.slot(), 0),
            other => panic!("unexpected {:?}", other),
        }
        worker.join().unwrap();
        assert_eq!(window.occupied(), 2);
    }

    #[test]
    fn test_failure_anywhere_is_reported() {
        let window = SlotWindow::new(3);
        window.occupy(0, 0, 4);
        window.occupy(1, 4, 4);
        window.fail(SegmentFailure {
            start: 4,
            length: 4,
            slot: 1,
            attempts: 3,
            reason: "reset".to_string(),
        });

        match window.wait_for(0, POLL) {
            SlotOutcome::Failed(failure) => {
                assert_eq!(failure.slot, 1);
                assert_eq!(failure.start, 4);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_failure_converts_to_fetch_error() {
        let err: FetchError = SegmentFailure {
            start: 12,
            length: 6,
            slot: 2,
            attempts: 3,
            reason: "timeout".to_string(),
        }
        .into();
        assert_eq!(err.failed_offset(), Some(12));
    }

    #[test]
    fn test_bounded_wait_survives_missing_notify() {
        let window = Arc::new(SlotWindow::new(1));
        window.occupy(0, 0, 1);

        // Store the result without going through `complete`, as if the
        // broadcast had been lost.
        let writer = {
            let window = Arc::clone(&window);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                let mut state = window.state.lock();
                state.slots[0] = Slot::Complete(filled(0, 1, 0));
            })
        };

        assert!(matches!(
            window.wait_for(0, POLL),
            SlotOutcome::Complete(_)
        ));
        writer.join().unwrap();
    }
}
