//! Fixed-size pool of fetch worker threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Sender};
use tracing::{debug, warn};

use crate::error::{FetchError, FetchResult};

/// Unit of work executed by a pool thread.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// How often shutdown checks whether workers have exited.
const SHUTDOWN_POLL: Duration = Duration::from_millis(10);

/// W named threads pulling jobs from a shared channel.
///
/// Once the cancel flag is raised, queued jobs are dropped unexecuted.
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    cancel: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Spawn `size` worker threads named `{name}-{index}`.
    pub fn new(size: usize, name: &str) -> FetchResult<Self> {
        if size == 0 {
            return Err(FetchError::InvalidConfig(
                "worker pool needs at least one thread".to_string(),
            ));
        }

        let (sender, receiver) = unbounded::<Job>();
        let cancel = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(size);
        for id in 0..size {
            let receiver = receiver.clone();
            let cancel = Arc::clone(&cancel);
            let handle = thread::Builder::new()
                .name(format!("{}-{}", name, id))
                .spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        if cancel.load(Ordering::SeqCst) {
                            continue;
                        }
                        job();
                    }
                })
                .map_err(|e| {
                    FetchError::InvalidConfig(format!("failed to spawn worker thread: {}", e))
                })?;
            workers.push(handle);
        }

        debug!(workers = size, name, "worker pool started");
        Ok(Self {
            sender: Some(sender),
            workers,
            cancel,
        })
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Shared flag that tells running jobs to stop early.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Raise the cancel flag.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Queue a job. Returns false if the pool is shutting down.
    pub fn execute(&self, job: Job) -> bool {
        match &self.sender {
            Some(sender) => sender.send(job).is_ok(),
            None => false,
        }
    }

    /// Stop accepting work and wait up to `grace` for workers to exit.
    ///
    /// When the grace period runs out the cancel flag is raised and workers
    /// still running are detached. Returns the number of workers joined.
    pub fn shutdown(mut self, grace: Duration) -> usize {
        self.stop(grace)
    }

    fn stop(&mut self, grace: Duration) -> usize {
        self.sender.take();

        let deadline = Instant::now() + grace;
        while self.workers.iter().any(|w| !w.is_finished()) && Instant::now() < deadline {
            thread::sleep(SHUTDOWN_POLL);
        }

        if self.workers.iter().any(|w| !w.is_finished()) {
            self.cancel();
        }

        let mut joined = 0;
        let mut detached = 0;
        for worker in self.workers.drain(..) {
            if worker.is_finished() {
                if worker.join().is_err() {
                    warn!("worker thread panicked");
                }
                joined += 1;
            } else {
                detached += 1;
            }
        }

        if detached > 0 {
            warn!(detached, ?grace, "workers still busy after grace period, detaching");
        } else {
            debug!(joined, "worker pool stopped");
        }
        joined
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.cancel();
            self.stop(Duration::ZERO);
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers.len())
            .field("cancelled", &self.cancel.load(Ordering::SeqCst))
            .finish()
    }
}
