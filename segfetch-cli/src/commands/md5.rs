//! Md5 command - hash a local file the same way downloads are hashed.

use std::path::Path;

use segfetch::checksum::{calculate_file_checksum, verify, Verification};

use crate::error::CliError;

/// Run the md5 command.
pub fn run(path: &Path, expected: Option<&str>) -> Result<(), CliError> {
    let digest = calculate_file_checksum(path)?;
    println!("{}  {}", digest, path.display());

    match verify(expected, &digest) {
        Verification::Match | Verification::Skipped => Ok(()),
        Verification::Mismatch { expected, actual } => {
            Err(CliError::ChecksumMismatch { expected, actual })
        }
    }
}
