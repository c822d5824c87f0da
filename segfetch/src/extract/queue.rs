//! Bounded handoff of segment buffers from the consumer to the extractor.

use std::collections::VecDeque;
use std::io::{self, Read};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

/// Errors from putting into the queue.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The queue was closed or aborted; nothing more is accepted.
    #[error("handoff queue is closed")]
    Closed,
}

#[derive(Debug, Default)]
struct QueueState {
    buffers: VecDeque<Vec<u8>>,
    closed: bool,
    aborted: bool,
}

/// Bounded FIFO of byte buffers with a terminal close marker.
///
/// `put` blocks while the queue is full. After `close` the reader drains what
/// is left and then sees end of stream; after `abort` both sides fail.
#[derive(Debug)]
pub struct HandoffQueue {
    state: Mutex<QueueState>,
    not_full: Condvar,
    not_empty: Condvar,
    capacity: usize,
}

impl HandoffQueue {
    /// Create a queue holding at most `capacity` buffers (minimum 1).
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState::default()),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            capacity: capacity.max(1),
        })
    }

    /// Maximum number of buffered chunks.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Buffers waiting to be read.
    pub fn len(&self) -> usize {
        self.state.lock().buffers.len()
    }

    /// Whether no buffers are waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the queue was aborted.
    pub fn is_aborted(&self) -> bool {
        self.state.lock().aborted
    }

    /// Append a buffer, blocking while the queue is full.
    pub fn put(&self, buffer: Vec<u8>) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        while state.buffers.len() >= self.capacity && !state.closed && !state.aborted {
            self.not_full.wait(&mut state);
        }
        if state.closed || state.aborted {
            return Err(QueueError::Closed);
        }
        if !buffer.is_empty() {
            state.buffers.push_back(buffer);
            self.not_empty.notify_one();
        }
        Ok(())
    }

    /// Mark the end of the stream.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Fail both sides and drop buffered data.
    pub fn abort(&self) {
        let mut state = self.state.lock();
        state.aborted = true;
        state.buffers.clear();
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Take the next buffer, blocking while empty.
    ///
    /// `Ok(None)` means closed and drained.
    fn take(&self) -> io::Result<Option<Vec<u8>>> {
        let mut state = self.state.lock();
        loop {
            if state.aborted {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionAborted,
                    "download aborted",
                ));
            }
            if let Some(buffer) = state.buffers.pop_front() {
                self.not_full.notify_one();
                return Ok(Some(buffer));
            }
            if state.closed {
                return Ok(None);
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// A reader over the concatenation of all buffers, in insertion order.
    pub fn reader(self: &Arc<Self>) -> QueueReader {
        QueueReader {
            queue: Arc::clone(self),
            current: Vec::new(),
            position: 0,
        }
    }
}

/// [`Read`] adapter over a [`HandoffQueue`].
#[derive(Debug)]
pub struct QueueReader {
    queue: Arc<HandoffQueue>,
    current: Vec<u8>,
    position: usize,
}

impl Read for QueueReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.position == self.current.len() {
            match self.queue.take()? {
                Some(next) => {
                    self.current = next;
                    self.position = 0;
                }
                None => return Ok(0),
            }
        }

        let available = &self.current[self.position..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.position += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_reader_concatenates_in_order() {
        let queue = HandoffQueue::new(4);
        queue.put(b"hello ".to_vec()).unwrap();
        queue.put(Vec::new()).unwrap();
        queue.put(b"world".to_vec()).unwrap();
        queue.close();

        let mut out = String::new();
        queue.reader().read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello world");
    }

    #[test]
    fn test_put_after_close_rejected() {
        let queue = HandoffQueue::new(1);
        queue.close();
        assert_eq!(queue.put(vec![1]), Err(QueueError::Closed));
    }

    #[test]
    fn test_capacity_minimum_one() {
        assert_eq!(HandoffQueue::new(0).capacity(), 1);
    }

    #[test]
    fn test_put_blocks_when_full() {
        let queue = HandoffQueue::new(1);
        queue.put(vec![1]).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.put(vec![2]))
        };

        thread::sleep(Duration::from_millis(30));
        assert!(!producer.is_finished());
        assert_eq!(queue.len(), 1);

        let mut reader = queue.reader();
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte).unwrap();
        assert_eq!(byte, [1]);

        producer.join().unwrap().unwrap();
        reader.read_exact(&mut byte).unwrap();
        assert_eq!(byte, [2]);
    }

    #[test]
    fn test_abort_wakes_blocked_producer() {
        let queue = HandoffQueue::new(1);
        queue.put(vec![1]).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.put(vec![2]))
        };
        thread::sleep(Duration::from_millis(20));
        queue.abort();

        assert_eq!(producer.join().unwrap(), Err(QueueError::Closed));
        assert!(queue.is_aborted());
    }

    #[test]
    fn test_abort_fails_reader() {
        let queue = HandoffQueue::new(2);
        queue.put(vec![1, 2, 3]).unwrap();
        queue.abort();

        let mut buf = [0u8; 8];
        let err = queue.reader().read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
    }

    #[test]
    fn test_reader_blocks_until_data() {
        let queue = HandoffQueue::new(2);
        let consumer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let mut out = Vec::new();
                queue.reader().read_to_end(&mut out).unwrap();
                out
            })
        };

        thread::sleep(Duration::from_millis(20));
        queue.put(vec![7; 3]).unwrap();
        queue.put(vec![8; 2]).unwrap();
        queue.close();

        assert_eq!(consumer.join().unwrap(), vec![7, 7, 7, 8, 8]);
    }
}
