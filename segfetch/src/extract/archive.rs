//! Tar extraction over a byte stream.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tar::{Archive, EntryType};
use tracing::{debug, info, trace, warn};

use super::queue::HandoffQueue;
use super::{ExtractError, ExtractReport};

/// Resolve an archive entry path under `base`.
///
/// Absolute paths and `..` components are rejected. `Ok(None)` means the
/// entry names the destination itself (e.g. `./`).
fn sanitize_entry_path(base: &Path, entry: &Path) -> Result<Option<PathBuf>, ExtractError> {
    let mut relative = PathBuf::new();
    for component in entry.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ExtractError::UnsafePath {
                    entry: entry.to_path_buf(),
                });
            }
        }
    }

    if relative.as_os_str().is_empty() {
        Ok(None)
    } else {
        Ok(Some(base.join(relative)))
    }
}

fn create_dir(path: &Path, entry: &Path) -> Result<(), ExtractError> {
    fs::create_dir_all(path).map_err(|source| ExtractError::Io {
        entry: entry.to_path_buf(),
        source,
    })
}

/// Writes the entries of a tar stream under a destination directory.
#[derive(Debug, Clone)]
pub struct TarExtractor {
    destination: PathBuf,
}

impl TarExtractor {
    /// Create an extractor writing under `destination`.
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: destination.into(),
        }
    }

    /// Destination directory.
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Extract every entry of the tar stream read from `reader`.
    ///
    /// Directories are created, regular files are written with exactly their
    /// declared size, and other entry types are skipped. The stream is read
    /// to its end even after the end-of-archive marker, so a writer feeding
    /// `reader` is never left blocked.
    pub fn extract<R: Read>(&self, reader: R) -> Result<ExtractReport, ExtractError> {
        let mut archive = Archive::new(reader);
        let mut report = ExtractReport::default();

        for entry in archive.entries().map_err(ExtractError::Archive)? {
            let mut entry = entry.map_err(ExtractError::Archive)?;
            let entry_path = entry.path().map_err(ExtractError::Archive)?.into_owned();
            let target = sanitize_entry_path(&self.destination, &entry_path)?;
            let entry_type = entry.header().entry_type();

            match (entry_type, target) {
                (EntryType::Directory, None) => {}
                (EntryType::Directory, Some(dir)) => {
                    trace!(entry = %entry_path.display(), "creating directory");
                    create_dir(&dir, &entry_path)?;
                    report.directories += 1;
                }
                (EntryType::Regular | EntryType::Continuous, Some(file_path)) => {
                    let declared = entry.size();
                    if let Some(parent) = file_path.parent() {
                        create_dir(parent, &entry_path)?;
                    }

                    let io_error = |source: io::Error| ExtractError::Io {
                        entry: entry_path.clone(),
                        source,
                    };
                    let file = File::create(&file_path).map_err(io_error)?;
                    let mut writer = BufWriter::new(file);
                    let written = io::copy(&mut entry, &mut writer).map_err(io_error)?;
                    writer.flush().map_err(io_error)?;

                    if written != declared {
                        return Err(io_error(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            format!("wrote {} of {} declared bytes", written, declared),
                        )));
                    }

                    trace!(entry = %entry_path.display(), bytes = written, "file extracted");
                    report.files += 1;
                    report.bytes += written;
                }
                (EntryType::Regular | EntryType::Continuous, None) => {
                    return Err(ExtractError::UnsafePath { entry: entry_path });
                }
                (other, _) => {
                    warn!(
                        entry = %entry_path.display(),
                        entry_type = ?other,
                        "skipping unsupported archive entry"
                    );
                    report.skipped += 1;
                }
            }
        }

        let mut rest = archive.into_inner();
        let trailing = io::copy(&mut rest, &mut io::sink()).map_err(ExtractError::Archive)?;
        if trailing > 0 {
            debug!(bytes = trailing, "discarded data after end of archive");
        }

        Ok(report)
    }

    /// Start extracting `queue` on a dedicated thread.
    ///
    /// On failure the thread aborts the queue so the producer does not block
    /// on a stage that will never read again.
    pub fn spawn(
        queue: Arc<HandoffQueue>,
        destination: &Path,
    ) -> Result<ExtractorHandle, ExtractError> {
        let extractor = TarExtractor::new(destination);
        let done = Arc::new(AtomicBool::new(false));

        let guard = DoneGuard {
            done: Arc::clone(&done),
            queue: Arc::clone(&queue),
        };
        let handle = thread::Builder::new()
            .name("segfetch-extract".to_string())
            .spawn(move || {
                let guard = guard;
                let result = extractor.extract(queue.reader());
                match &result {
                    Ok(report) => info!(
                        destination = %extractor.destination.display(),
                        files = report.files,
                        directories = report.directories,
                        bytes = report.bytes,
                        "archive extracted"
                    ),
                    Err(e) => {
                        warn!(error = %e, "archive extraction failed");
                        guard.queue.abort();
                    }
                }
                result
            })
            .map_err(|source| ExtractError::Io {
                entry: destination.to_path_buf(),
                source,
            })?;

        Ok(ExtractorHandle {
            handle: Some(handle),
            done,
        })
    }
}

/// Flags completion when the extractor thread exits, even by panicking.
struct DoneGuard {
    done: Arc<AtomicBool>,
    queue: Arc<HandoffQueue>,
}

impl Drop for DoneGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            self.queue.abort();
        }
        self.done.store(true, Ordering::SeqCst);
    }
}

/// Handle to a running extractor thread.
#[derive(Debug)]
pub struct ExtractorHandle {
    handle: Option<JoinHandle<Result<ExtractReport, ExtractError>>>,
    done: Arc<AtomicBool>,
}

impl ExtractorHandle {
    /// Whether the extractor has finished, successfully or not.
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
            || self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Wait for the extractor, checking its done state every `poll_interval`.
    pub fn wait(mut self, poll_interval: Duration) -> Result<ExtractReport, ExtractError> {
        while !self.is_done() {
            trace!("waiting for extractor");
            thread::sleep(poll_interval);
        }

        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| ExtractError::Panicked)?,
            None => Err(ExtractError::Panicked),
        }
    }
}
