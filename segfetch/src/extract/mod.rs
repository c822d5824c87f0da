//! Streaming tar extraction fed by the ordered consumer.
//!
//! The consumer moves each segment buffer into a bounded [`HandoffQueue`];
//! a [`TarExtractor`] thread reads the queue as one continuous stream and
//! writes entries under the destination directory while the download is
//! still running.

mod archive;
mod queue;

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub use self::archive::{ExtractorHandle, TarExtractor};
pub use self::queue::{HandoffQueue, QueueError, QueueReader};

/// Errors raised while extracting an archive stream.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Writing an entry to disk failed.
    #[error("failed to extract {}: {source}", entry.display())]
    Io {
        entry: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The entry would land outside the destination directory.
    #[error("refusing to extract {}: path escapes the destination", entry.display())]
    UnsafePath { entry: PathBuf },

    /// The archive stream itself could not be read or parsed.
    #[error("malformed archive stream: {0}")]
    Archive(#[source] io::Error),

    /// The extractor thread died without reporting a result.
    #[error("extractor thread panicked")]
    Panicked,
}

/// What an extraction wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractReport {
    /// Regular files written.
    pub files: usize,
    /// Directories created.
    pub directories: usize,
    /// Entries of unsupported types that were skipped.
    pub skipped: usize,
    /// File content bytes written.
    pub bytes: u64,
}
