//! Configuration for segmented downloads.
//!
//! [`DownloadConfig`] holds the tuning knobs of a single transfer.
//! [`ConfigFile`] is the persisted INI file the CLI reads its defaults from.

mod file;

use std::time::Duration;

pub use file::{config_file_path, format_size, parse_size, ConfigError, ConfigFile, ConfigKey};

use crate::download::RetryPolicy;
use crate::error::{FetchError, FetchResult};

/// Default bytes per ranged request (10 MiB).
pub const DEFAULT_SEGMENT_SIZE: usize = 10 * 1024 * 1024;

/// Default number of fetch workers, which is also the window size.
pub const DEFAULT_WORKERS: usize = 16;

/// Default bounded wait between re-checks of the slot being consumed.
pub const DEFAULT_SLOT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default time given to workers to finish after the transfer ends.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Default per-request timeout (6 hours, for very slow links).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(6 * 60 * 60);

/// Configuration of a segmented download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadConfig {
    /// Bytes requested per segment.
    pub segment_size: usize,

    /// Worker-pool size W. At most W segments are in flight or buffered.
    pub workers: usize,

    /// Retry budget of each segment.
    pub retry: RetryPolicy,

    /// Upper bound on a single wait for the slot being consumed.
    ///
    /// Workers broadcast on completion, so this only matters if a wakeup is
    /// lost; lower values re-check more often.
    pub slot_poll_interval: Duration,

    /// Time given to workers to wind down before they are detached.
    pub shutdown_grace: Duration,

    /// Capacity of the extraction handoff queue. `None` means `W / 2`.
    pub queue_depth: Option<usize>,

    /// Timeout applied to each storage request.
    pub request_timeout: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            segment_size: DEFAULT_SEGMENT_SIZE,
            workers: DEFAULT_WORKERS,
            retry: RetryPolicy::default(),
            slot_poll_interval: DEFAULT_SLOT_POLL_INTERVAL,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            queue_depth: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl DownloadConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the segment size in bytes.
    pub fn with_segment_size(mut self, bytes: usize) -> Self {
        self.segment_size = bytes;
        self
    }

    /// Set the number of workers (window size).
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Set the per-segment retry policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the bounded wait used while waiting for a slot.
    pub fn with_slot_poll_interval(mut self, interval: Duration) -> Self {
        self.slot_poll_interval = interval;
        self
    }

    /// Set the worker shutdown grace period.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Set the extraction queue capacity.
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = Some(depth);
        self
    }

    /// Set the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Effective capacity of the extraction handoff queue.
    pub fn effective_queue_depth(&self) -> usize {
        self.queue_depth.unwrap_or(self.workers / 2).max(1)
    }

    /// Reject settings the downloader cannot run with.
    pub fn validate(&self) -> FetchResult<()> {
        if self.segment_size == 0 {
            return Err(FetchError::InvalidConfig(
                "segment size must be greater than zero".to_string(),
            ));
        }
        if self.workers == 0 {
            return Err(FetchError::InvalidConfig(
                "worker count must be greater than zero".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(FetchError::InvalidConfig(
                "retry budget must allow at least one attempt".to_string(),
            ));
        }
        if self.slot_poll_interval.is_zero() {
            return Err(FetchError::InvalidConfig(
                "slot poll interval must be greater than zero".to_string(),
            ));
        }
        if self.queue_depth == Some(0) {
            return Err(FetchError::InvalidConfig(
                "queue depth must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
