//! INI configuration file.
//!
//! ```ini
//! [storage]
//! endpoint = https://s3.amazonaws.com
//! timeout = 21600
//!
//! [download]
//! segment_size = 10M
//! workers = 16
//! retries = 3
//! poll_interval_ms = 1000
//! ```
//!
//! Missing files and missing keys fall back to the library defaults.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use super::{
    DownloadConfig, DEFAULT_REQUEST_TIMEOUT, DEFAULT_SEGMENT_SIZE, DEFAULT_SLOT_POLL_INTERVAL,
    DEFAULT_WORKERS,
};
use crate::download::{RetryPolicy, DEFAULT_MAX_ATTEMPTS};
use crate::store::DEFAULT_ENDPOINT;

const SECTION_STORAGE: &str = "storage";
const SECTION_DOWNLOAD: &str = "download";

/// Errors reading or writing the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    #[error("unknown configuration key '{0}'")]
    UnknownKey(String),

    #[error("no configuration directory available on this platform")]
    NoConfigDir,
}

/// Location of the user configuration file (`<config dir>/segfetch/config.ini`).
pub fn config_file_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("segfetch").join("config.ini"))
}

/// Parse a byte size with an optional `K`, `M` or `G` (1024-based) suffix.
pub fn parse_size(input: &str) -> Option<usize> {
    let trimmed = input.trim();
    let upper = trimmed.to_ascii_uppercase();
    let without_b = upper
        .strip_suffix("IB")
        .or_else(|| upper.strip_suffix('B'))
        .unwrap_or(&upper);

    let (digits, multiplier) = match without_b.chars().last()? {
        'K' => (&without_b[..without_b.len() - 1], 1024usize),
        'M' => (&without_b[..without_b.len() - 1], 1024 * 1024),
        'G' => (&without_b[..without_b.len() - 1], 1024 * 1024 * 1024),
        _ => (without_b, 1),
    };

    digits.trim().parse::<usize>().ok()?.checked_mul(multiplier)
}

/// Format a byte size using the largest exact `K`/`M`/`G` suffix.
pub fn format_size(bytes: usize) -> String {
    const UNITS: [(usize, &str); 3] = [
        (1024 * 1024 * 1024, "G"),
        (1024 * 1024, "M"),
        (1024, "K"),
    ];
    for (unit, suffix) in UNITS {
        if bytes >= unit && bytes % unit == 0 {
            return format!("{}{}", bytes / unit, suffix);
        }
    }
    bytes.to_string()
}

/// Storage endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSettings {
    pub endpoint: String,
    pub timeout_secs: u64,
}

/// Download tuning settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSettings {
    pub segment_size: usize,
    pub workers: usize,
    pub retries: u32,
    pub poll_interval_ms: u64,
}

/// Contents of the configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFile {
    pub storage: StorageSettings,
    pub download: DownloadSettings,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            storage: StorageSettings {
                endpoint: DEFAULT_ENDPOINT.to_string(),
                timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
            },
            download: DownloadSettings {
                segment_size: DEFAULT_SEGMENT_SIZE,
                workers: DEFAULT_WORKERS,
                retries: DEFAULT_MAX_ATTEMPTS,
                poll_interval_ms: DEFAULT_SLOT_POLL_INTERVAL.as_millis() as u64,
            },
        }
    }
}

impl ConfigFile {
    /// Load the user configuration file, or defaults if it does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        match config_file_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load a configuration file from `path`.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_file(path).map_err(|e| match e {
            ini::Error::Io(source) => ConfigError::Io {
                path: path.to_path_buf(),
                source,
            },
            ini::Error::Parse(e) => ConfigError::Parse {
                path: path.to_path_buf(),
                reason: e.to_string(),
            },
        })?;

        let mut config = Self::default();
        for key in ConfigKey::all() {
            if let Some(value) = ini
                .section(Some(key.section()))
                .and_then(|s| s.get(key.name()))
            {
                key.set(&mut config, value)?;
            }
        }
        Ok(config)
    }

    /// Save to the user configuration file.
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = config_file_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)
    }

    /// Save to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut ini = Ini::new();
        for key in ConfigKey::all() {
            ini.with_section(Some(key.section()))
                .set(key.name(), key.get(self));
        }
        ini.write_to_file(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Build the library download configuration from these settings.
    pub fn to_download_config(&self) -> DownloadConfig {
        DownloadConfig::new()
            .with_segment_size(self.download.segment_size)
            .with_workers(self.download.workers)
            .with_retry_policy(RetryPolicy::new(self.download.retries))
            .with_slot_poll_interval(Duration::from_millis(self.download.poll_interval_ms))
            .with_request_timeout(Duration::from_secs(self.storage.timeout_secs))
    }
}

/// A settable `section.key` of the configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigKey {
    StorageEndpoint,
    StorageTimeout,
    DownloadSegmentSize,
    DownloadWorkers,
    DownloadRetries,
    DownloadPollInterval,
}

impl ConfigKey {
    /// Every key, in file order.
    pub fn all() -> &'static [ConfigKey] {
        &[
            ConfigKey::StorageEndpoint,
            ConfigKey::StorageTimeout,
            ConfigKey::DownloadSegmentSize,
            ConfigKey::DownloadWorkers,
            ConfigKey::DownloadRetries,
            ConfigKey::DownloadPollInterval,
        ]
    }

    /// INI section of the key.
    pub fn section(&self) -> &'static str {
        match self {
            Self::StorageEndpoint | Self::StorageTimeout => SECTION_STORAGE,
            _ => SECTION_DOWNLOAD,
        }
    }

    /// Key name within its section.
    pub fn name(&self) -> &'static str {
        match self {
            Self::StorageEndpoint => "endpoint",
            Self::StorageTimeout => "timeout",
            Self::DownloadSegmentSize => "segment_size",
            Self::DownloadWorkers => "workers",
            Self::DownloadRetries => "retries",
            Self::DownloadPollInterval => "poll_interval_ms",
        }
    }

    /// Current value rendered as a string.
    pub fn get(&self, config: &ConfigFile) -> String {
        match self {
            Self::StorageEndpoint => config.storage.endpoint.clone(),
            Self::StorageTimeout => config.storage.timeout_secs.to_string(),
            Self::DownloadSegmentSize => format_size(config.download.segment_size),
            Self::DownloadWorkers => config.download.workers.to_string(),
            Self::DownloadRetries => config.download.retries.to_string(),
            Self::DownloadPollInterval => config.download.poll_interval_ms.to_string(),
        }
    }

    /// Parse and store `value`.
    pub fn set(&self, config: &mut ConfigFile, value: &str) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidValue {
            key: self.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        };
        let positive = |reason: &str| -> Result<u64, ConfigError> {
            value
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|v| *v > 0)
                .ok_or_else(|| invalid(reason))
        };

        match self {
            Self::StorageEndpoint => {
                let endpoint = value.trim();
                if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                    return Err(invalid("expected an http(s) URL"));
                }
                config.storage.endpoint = endpoint.to_string();
            }
            Self::StorageTimeout => {
                config.storage.timeout_secs = positive("expected a positive number of seconds")?;
            }
            Self::DownloadSegmentSize => {
                config.download.segment_size = parse_size(value)
                    .filter(|v| *v > 0)
                    .ok_or_else(|| invalid("expected a size such as 8M or 1048576"))?;
            }
            Self::DownloadWorkers => {
                config.download.workers = positive("expected a positive worker count")? as usize;
            }
            Self::DownloadRetries => {
                config.download.retries = u32::try_from(positive("expected a positive attempt count")?)
                    .map_err(|_| invalid("attempt count too large"))?;
            }
            Self::DownloadPollInterval => {
                config.download.poll_interval_ms =
                    positive("expected a positive number of milliseconds")?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.section(), self.name())
    }
}

impl FromStr for ConfigKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConfigKey::all()
            .iter()
            .copied()
            .find(|key| key.to_string() == s)
            .ok_or_else(|| ConfigError::UnknownKey(s.to_string()))
    }
}
