//! Configuration for the task-mining recorder.
//!
//! Loaded once by the binary and passed to each component explicitly.

use crate::collector::AppAllowlist;
use crate::core::{ExportConfig, FallbackPolicy};
use crate::publisher::{default_bucket_id, PublisherConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Event store connection
    pub store: StoreSettings,

    /// Bucket to write into; `aw-watcher-uia_<host>` when unset
    pub bucket_id: Option<String>,

    /// Applications to capture (empty captures all)
    pub allowlist: Vec<String>,

    /// Capture is paused while this file exists
    pub pause_file: PathBuf,

    pub publisher: PublisherSettings,

    pub export: ExportSettings,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = Self::data_dir();

        Self {
            store: StoreSettings::default(),
            bucket_id: None,
            allowlist: Vec::new(),
            pause_file: data_dir.join("aw_uia.PAUSE"),
            publisher: PublisherSettings::default(),
            export: ExportSettings {
                output_dir: data_dir.join("outputs"),
                ..ExportSettings::default()
            },
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&config_path, serde_json::to_string_pretty(self)?)?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("taskmining-recorder")
            .join("config.json")
    }

    /// Writable data directory for outputs and the pause file.
    pub fn data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("taskmining-recorder")
    }

    /// Ensure the output directory exists.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.export.output_dir)?;
        Ok(())
    }

    pub fn bucket_id(&self) -> String {
        self.bucket_id.clone().unwrap_or_else(default_bucket_id)
    }

    pub fn allowlist(&self) -> AppAllowlist {
        AppAllowlist::from_apps(&self.allowlist)
    }

    pub fn publisher_config(&self) -> PublisherConfig {
        let settings = &self.publisher;
        let mut config = PublisherConfig::new(self.bucket_id());
        config.queue_capacity = settings.queue_capacity;
        config.poll_interval = settings.poll_interval;
        config.flush_interval = settings.flush_interval;
        config.batch_size = settings.batch_size;
        config.join_timeout = settings.join_timeout;
        config
    }

    /// Export settings as used by the exporter. Fails on durations chrono
    /// cannot represent.
    pub fn export_config(&self) -> Result<ExportConfig, ConfigError> {
        let settings = &self.export;
        Ok(ExportConfig {
            output_dir: settings.output_dir.clone(),
            case_id: settings.case_id.clone(),
            policy: FallbackPolicy {
                skew_before: seconds("export.skew_before_secs", settings.skew_before_secs)?,
                skew_after: seconds("export.skew_after_secs", settings.skew_after_secs)?,
                recent_windows: settings
                    .recent_window_mins
                    .iter()
                    .map(|m| minutes("export.recent_window_mins", *m))
                    .collect::<Result<_, _>>()?,
            },
        })
    }
}

fn seconds(field: &str, value: u64) -> Result<chrono::Duration, ConfigError> {
    i64::try_from(value)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .ok_or_else(|| ConfigError::OutOfRange {
            field: field.to_string(),
            value,
        })
}

fn minutes(field: &str, value: u64) -> Result<chrono::Duration, ConfigError> {
    i64::try_from(value)
        .ok()
        .and_then(chrono::Duration::try_minutes)
        .ok_or_else(|| ConfigError::OutOfRange {
            field: field.to_string(),
            value,
        })
}

/// Event store address.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub host: String,
    pub port: u16,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5600,
        }
    }
}

/// Publisher tuning. Durations are stored in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherSettings {
    pub queue_capacity: usize,
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,
    #[serde(with = "duration_ms")]
    pub flush_interval: Duration,
    pub batch_size: usize,
    #[serde(with = "duration_ms")]
    pub join_timeout: Duration,
}

impl Default for PublisherSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 10_000,
            poll_interval: Duration::from_millis(500),
            flush_interval: Duration::from_secs(1),
            batch_size: 200,
            join_timeout: Duration::from_secs(2),
        }
    }
}

/// Export settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    pub output_dir: PathBuf,
    pub case_id: String,
    pub skew_before_secs: u64,
    pub skew_after_secs: u64,
    pub recent_window_mins: Vec<u64>,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("outputs"),
            case_id: "1".to_string(),
            skew_before_secs: 60,
            skew_after_secs: 5,
            recent_window_mins: vec![15, 60],
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("{field} is out of range: {value}")]
    OutOfRange { field: String, value: u64 },
}

/// Serde support for Duration as milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
