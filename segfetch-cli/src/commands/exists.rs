//! Exists command - report whether an object is present.

use indicatif::HumanBytes;
use segfetch::config::ConfigFile;
use segfetch::ObjectStore;

use super::common::{build_store, parse_location, resolve_download_config, StoreOverrides};
use crate::error::CliError;

/// Run the exists command.
///
/// Prints the object size, or fails with [`CliError::NotFound`].
pub fn run(source: &str, overrides: &StoreOverrides) -> Result<(), CliError> {
    let location = parse_location(source)?;
    let config = ConfigFile::load()?;
    let download = resolve_download_config(overrides, &config)?;
    let store = build_store(overrides, &config, &download)?;

    match store.exists(&location)? {
        Some(size) => {
            println!("{} {} ({})", location, size, HumanBytes(size));
            Ok(())
        }
        None => Err(CliError::NotFound(location.to_string())),
    }
}
