//! Destinations for the ordered byte stream.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::segment::Segment;
use crate::error::{FetchError, FetchResult};
use crate::extract::{ExtractError, ExtractReport, ExtractorHandle, HandoffQueue, TarExtractor};

/// Receives segments strictly in ascending offset order.
pub trait SegmentSink: Send {
    /// Accept the next segment. A sink that takes buffers may move the
    /// segment's bytes out.
    fn consume(&mut self, segment: &mut Segment) -> FetchResult<()>;

    /// Called once after the last segment.
    fn finish(&mut self) -> FetchResult<()>;

    /// Called instead of `finish` when the transfer failed.
    fn abort(&mut self);

    /// Whether `consume` moves buffers out of segments.
    fn takes_buffers(&self) -> bool {
        false
    }
}

/// Writes the stream to a local file.
///
/// After an abort the partial file stays on disk and must be treated as
/// invalid by the caller.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    written: u64,
}

impl FileSink {
    /// Create (or truncate) the file at `path`, creating parent directories.
    pub fn create(path: &Path) -> FetchResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| FetchError::CreateDirFailed {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }
        }

        if path.exists() {
            info!(path = %path.display(), "overwriting existing file");
        }

        let file = File::create(path).map_err(|e| FetchError::WriteFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: Some(BufWriter::new(file)),
            written: 0,
        })
    }

    /// Output path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes written so far.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    fn write_error(&self, source: io::Error) -> FetchError {
        FetchError::WriteFailed {
            path: self.path.clone(),
            source,
        }
    }
}

impl SegmentSink for FileSink {
    fn consume(&mut self, segment: &mut Segment) -> FetchResult<()> {
        let Some(writer) = self.writer.as_mut() else {
            let closed = io::Error::new(io::ErrorKind::Other, "file already closed");
            return Err(self.write_error(closed));
        };
        if let Err(e) = writer.write_all(segment.bytes()) {
            return Err(self.write_error(e));
        }
        self.written += segment.len() as u64;
        Ok(())
    }

    fn finish(&mut self) -> FetchResult<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().map_err(|e| self.write_error(e))?;
        }
        debug!(path = %self.path.display(), bytes = self.written, "output file closed");
        Ok(())
    }

    fn abort(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush() {
                debug!(path = %self.path.display(), error = %e, "flush of partial file failed");
            }
        }
        warn!(
            path = %self.path.display(),
            bytes = self.written,
            "download aborted, partial file left in place"
        );
    }
}

/// Streams the bytes into a tar extractor running on its own thread.
#[derive(Debug)]
pub struct ArchiveSink {
    destination: PathBuf,
    queue: Arc<HandoffQueue>,
    extractor: Option<ExtractorHandle>,
    poll_interval: Duration,
    report: Option<ExtractReport>,
}

impl ArchiveSink {
    /// Start an extractor writing under `destination`.
    ///
    /// `destination` must be an existing directory. At most `queue_depth`
    /// segment buffers wait for the extractor before `consume` blocks.
    pub fn start(
        destination: &Path,
        queue_depth: usize,
        poll_interval: Duration,
    ) -> FetchResult<Self> {
        if !destination.is_dir() {
            return Err(FetchError::NotADirectory {
                path: destination.to_path_buf(),
            });
        }

        let queue = HandoffQueue::new(queue_depth);
        let extractor = TarExtractor::spawn(Arc::clone(&queue), destination)?;
        debug!(
            destination = %destination.display(),
            queue_depth = queue.capacity(),
            "archive extractor started"
        );

        Ok(Self {
            destination: destination.to_path_buf(),
            queue,
            extractor: Some(extractor),
            poll_interval,
            report: None,
        })
    }

    /// Destination directory.
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// What the extractor wrote, once `finish` succeeded.
    pub fn report(&self) -> Option<&ExtractReport> {
        self.report.as_ref()
    }

    /// Wait for the extractor and keep its report.
    fn join_extractor(&mut self) -> Result<ExtractReport, ExtractError> {
        match self.extractor.take() {
            Some(handle) => handle.wait(self.poll_interval),
            None => Err(ExtractError::Panicked),
        }
    }
}

impl SegmentSink for ArchiveSink {
    fn consume(&mut self, segment: &mut Segment) -> FetchResult<()> {
        if self.queue.put(segment.take_bytes()).is_ok() {
            return Ok(());
        }

        // The extractor stopped reading; surface its error.
        match self.join_extractor() {
            Err(e) => Err(FetchError::Extraction(e)),
            Ok(_) => Err(FetchError::Extraction(ExtractError::Archive(
                io::Error::new(
                    io::ErrorKind::Other,
                    "extractor stopped before the end of the stream",
                ),
            ))),
        }
    }

    fn finish(&mut self) -> FetchResult<()> {
        self.queue.close();
        let report = self.join_extractor()?;
        self.report = Some(report);
        Ok(())
    }

    fn abort(&mut self) {
        self.queue.abort();
        if let Some(handle) = self.extractor.take() {
            if let Err(e) = handle.wait(self.poll_interval) {
                debug!(error = %e, "extractor stopped after abort");
            }
        }
        warn!(
            destination = %self.destination.display(),
            "download aborted, extracted entries may be incomplete"
        );
    }

    fn takes_buffers(&self) -> bool {
        true
    }
}

impl Drop for ArchiveSink {
    fn drop(&mut self) {
        if self.extractor.is_some() {
            self.queue.abort();
        }
    }
}
