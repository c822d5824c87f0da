//! CLI error type and process exit codes.

use segfetch::config::ConfigError;
use segfetch::{ExtractError, FetchError, StoreError};
use thiserror::Error;

/// Exit code for a failed or incomplete download.
pub const EXIT_DOWNLOAD: u8 = 1;
/// Exit code for a checksum mismatch.
pub const EXIT_CHECKSUM: u8 = 2;
/// Exit code for an archive extraction failure.
pub const EXIT_EXTRACTION: u8 = 3;
/// Exit code for bad arguments or configuration (`EX_USAGE`).
pub const EXIT_USAGE: u8 = 64;

/// Errors surfaced to the user by CLI commands.
#[derive(Debug, Error)]
pub enum CliError {
    /// Invalid arguments or configuration.
    #[error("{0}")]
    Config(String),

    /// The requested object does not exist.
    #[error("object not found: {0}")]
    NotFound(String),

    /// The transfer did not complete.
    #[error("download failed: {0}")]
    Download(FetchError),

    /// The downloaded bytes do not match the expected MD5.
    #[error("MD5 mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// The archive could not be unpacked.
    #[error("extraction failed: {0}")]
    Extraction(ExtractError),
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::Config(_) => EXIT_USAGE,
            CliError::NotFound(_) | CliError::Download(_) => EXIT_DOWNLOAD,
            CliError::ChecksumMismatch { .. } => EXIT_CHECKSUM,
            CliError::Extraction(_) => EXIT_EXTRACTION,
        }
    }
}

impl From<FetchError> for CliError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::InvalidConfig(_)
            | FetchError::InvalidLocation { .. }
            | FetchError::NotADirectory { .. } => CliError::Config(e.to_string()),
            FetchError::ObjectNotFound { location } => CliError::NotFound(location),
            FetchError::ChecksumMismatch { expected, actual } => {
                CliError::ChecksumMismatch { expected, actual }
            }
            FetchError::Extraction(e) => CliError::Extraction(e),
            other => CliError::Download(other),
        }
    }
}

impl From<StoreError> for CliError {
    fn from(e: StoreError) -> Self {
        CliError::Download(FetchError::Store(e))
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::Config(e.to_string())
    }
}
