//! Get command - download an object, optionally unpacking it as a tar stream.

use std::path::{Path, PathBuf};

use indicatif::HumanBytes;
use segfetch::checksum::{resolve_expected_md5, verify, Verification};
use segfetch::config::ConfigFile;
use segfetch::{ArchiveSink, DownloadReport, FileSink};
use tracing::info;

use super::common::{
    build_downloader, parse_location, progress_callback, transfer_progress_bar, StoreOverrides,
};
use crate::error::CliError;

/// Arguments for the get command.
pub struct GetArgs {
    pub source: String,
    pub destination: PathBuf,
    pub extract_tar: bool,
    pub expected_md5: Option<String>,
    pub no_verify: bool,
    pub store: StoreOverrides,
}

/// Where the object's bytes go when not extracting.
///
/// An existing directory receives a file named after the key.
fn output_path(destination: &Path, file_name: &str) -> PathBuf {
    if destination.is_dir() {
        destination.join(file_name)
    } else {
        destination.to_path_buf()
    }
}

fn throughput(report: &DownloadReport) -> String {
    let secs = report.elapsed.as_secs_f64();
    if secs <= 0.0 {
        return "-".to_string();
    }
    format!("{}/s", HumanBytes((report.bytes as f64 / secs) as u64))
}

/// Run the get command.
pub fn run(args: GetArgs) -> Result<(), CliError> {
    let location = parse_location(&args.source)?;
    let config = ConfigFile::load()?;
    let (store, downloader) = build_downloader(&args.store, &config)?;

    let metadata = downloader.head(&location)?;
    info!(object = %location, size = metadata.size, "starting download");
    println!("{} ({})", location, HumanBytes(metadata.size));

    let bar = transfer_progress_bar(metadata.size);
    let downloader = downloader.with_progress(progress_callback(bar.clone()));

    let result = if args.extract_tar {
        let download = downloader.config();
        let mut sink = ArchiveSink::start(
            &args.destination,
            download.effective_queue_depth(),
            download.slot_poll_interval,
        )?;
        downloader
            .download(&location, metadata.size, &mut sink)
            .map(|report| (report, sink.report().cloned()))
    } else {
        let path = output_path(&args.destination, location.file_name());
        let mut sink = FileSink::create(&path)?;
        downloader
            .download(&location, metadata.size, &mut sink)
            .map(|report| (report, None))
    };

    let (report, extracted) = match result {
        Ok(done) => {
            bar.finish_and_clear();
            done
        }
        Err(e) => {
            bar.abandon();
            return Err(e.into());
        }
    };

    println!(
        "Downloaded {} in {:.1}s ({})",
        HumanBytes(report.bytes),
        report.elapsed.as_secs_f64(),
        throughput(&report)
    );
    if let Some(extracted) = extracted {
        println!(
            "Extracted {} files, {} directories into {}",
            extracted.files,
            extracted.directories,
            args.destination.display()
        );
        if extracted.skipped > 0 {
            println!("  Skipped {} unsupported entries", extracted.skipped);
        }
    }

    if args.no_verify {
        println!("MD5 {} (not verified)", report.digest);
        return Ok(());
    }

    // Explicit flag wins over what the store advertises
    let expected = match args.expected_md5 {
        Some(md5) => Some(md5),
        None => resolve_expected_md5(store.as_ref(), &location, &metadata)?,
    };

    match verify(expected.as_deref(), &report.digest) {
        Verification::Match => {
            println!("MD5 {} verified", report.digest);
            Ok(())
        }
        Verification::Skipped => {
            println!("MD5 {} (no expected hash available)", report.digest);
            Ok(())
        }
        Verification::Mismatch { expected, actual } => {
            Err(CliError::ChecksumMismatch { expected, actual })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_output_path_into_directory() {
        let temp = TempDir::new().unwrap();
        assert_eq!(
            output_path(temp.path(), "backup.tar"),
            temp.path().join("backup.tar")
        );
    }

    #[test]
    fn test_output_path_explicit_file() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("renamed.bin");
        assert_eq!(output_path(&target, "backup.tar"), target);
    }

    #[test]
    fn test_throughput_zero_elapsed() {
        let report = DownloadReport {
            bytes: 10,
            segments: 1,
            digest: String::new(),
            elapsed: Duration::ZERO,
            peak_in_flight: 1,
        };
        assert_eq!(throughput(&report), "-");
    }

    #[test]
    fn test_throughput() {
        let report = DownloadReport {
            bytes: 4 * 1024 * 1024,
            segments: 1,
            digest: String::new(),
            elapsed: Duration::from_secs(2),
            peak_in_flight: 1,
        };
        assert_eq!(throughput(&report), "2.00 MiB/s");
    }
}
