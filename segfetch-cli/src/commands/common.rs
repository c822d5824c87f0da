//! Common types and utilities shared across CLI commands.

use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use segfetch::config::{parse_size, ConfigFile};
use segfetch::download::DownloadProgressCallback;
use segfetch::{DownloadConfig, HttpObjectStore, ObjectLocation, SegmentedDownloader};

use crate::error::CliError;

/// Tuning flags shared by commands that talk to the object store.
#[derive(Debug, Clone, Default)]
pub struct StoreOverrides {
    pub endpoint: Option<String>,
    pub segment_size: Option<String>,
    pub workers: Option<usize>,
}

/// Parse an `s3://bucket/key` argument.
pub fn parse_location(source: &str) -> Result<ObjectLocation, CliError> {
    ObjectLocation::parse(source).map_err(|e| CliError::Config(e.to_string()))
}

/// Resolve download settings from CLI args and config.
pub fn resolve_download_config(
    overrides: &StoreOverrides,
    config: &ConfigFile,
) -> Result<DownloadConfig, CliError> {
    // CLI takes precedence, then config
    let mut download = config.to_download_config();

    if let Some(ref size) = overrides.segment_size {
        let bytes = parse_size(size).filter(|b| *b > 0).ok_or_else(|| {
            CliError::Config(format!(
                "Invalid segment size '{}'. Use a byte count or a K/M/G suffix, e.g. 8M.",
                size
            ))
        })?;
        download = download.with_segment_size(bytes);
    }
    if let Some(workers) = overrides.workers {
        download = download.with_workers(workers);
    }

    download.validate()?;
    Ok(download)
}

/// Build the HTTP store for the resolved endpoint.
pub fn build_store(
    overrides: &StoreOverrides,
    config: &ConfigFile,
    download: &DownloadConfig,
) -> Result<Arc<HttpObjectStore>, CliError> {
    let endpoint = overrides
        .endpoint
        .clone()
        .unwrap_or_else(|| config.storage.endpoint.clone());
    let store = HttpObjectStore::new(endpoint, download.request_timeout)?;
    Ok(Arc::new(store))
}

/// Build a downloader against the configured endpoint.
pub fn build_downloader(
    overrides: &StoreOverrides,
    config: &ConfigFile,
) -> Result<(Arc<HttpObjectStore>, SegmentedDownloader), CliError> {
    let download = resolve_download_config(overrides, config)?;
    let store = build_store(overrides, config, &download)?;
    let downloader = SegmentedDownloader::new(store.clone(), download);
    Ok((store, downloader))
}

/// Byte progress bar for a transfer of `total` bytes.
pub fn transfer_progress_bar(total: u64) -> ProgressBar {
    let bar = ProgressBar::new(total);
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("━━╾─");
    bar.set_style(style);
    bar.enable_steady_tick(Duration::from_millis(200));
    bar
}

/// Progress callback that drives `bar`.
pub fn progress_callback(bar: ProgressBar) -> DownloadProgressCallback {
    Box::new(move |bytes, _total, done, segments| {
        bar.set_position(bytes);
        bar.set_message(format!("{}/{} segments", done, segments));
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let config = ConfigFile::default();
        let overrides = StoreOverrides {
            endpoint: None,
            segment_size: Some("4M".to_string()),
            workers: Some(3),
        };
        let download = resolve_download_config(&overrides, &config).unwrap();
        assert_eq!(download.segment_size, 4 * 1024 * 1024);
        assert_eq!(download.workers, 3);
    }

    #[test]
    fn test_config_used_without_overrides() {
        let mut config = ConfigFile::default();
        config.download.workers = 7;
        let download = resolve_download_config(&StoreOverrides::default(), &config).unwrap();
        assert_eq!(download.workers, 7);
    }

    #[test]
    fn test_invalid_segment_size_is_usage_error() {
        let overrides = StoreOverrides {
            segment_size: Some("lots".to_string()),
            ..Default::default()
        };
        let err = resolve_download_config(&overrides, &ConfigFile::default()).unwrap_err();
        assert!(matches!(err, CliError::Config(_)));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let overrides = StoreOverrides {
            workers: Some(0),
            ..Default::default()
        };
        let err = resolve_download_config(&overrides, &ConfigFile::default()).unwrap_err();
        assert_eq!(err.exit_code(), crate::error::EXIT_USAGE);
    }

    #[test]
    fn test_endpoint_override() {
        let overrides = StoreOverrides {
            endpoint: Some("http://127.0.0.1:9000/".to_string()),
            ..Default::default()
        };
        let config = ConfigFile::default();
        let download = resolve_download_config(&overrides, &config).unwrap();
        let store = build_store(&overrides, &config, &download).unwrap();
        assert_eq!(store.endpoint(), "http://127.0.0.1:9000");
    }

    #[test]
    fn test_bad_location() {
        assert!(matches!(parse_location("bucket/key"), Err(CliError::Config(_))));
    }
}
