//! Configuration for the Gait Sensor Agent.

use crate::source::{FlarePeriod, MockProfile, SourceKind};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the gait agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Opaque patient/session key sent with every payload
    pub patient_id: String,

    /// Where raw gait samples come from
    pub source: SourceConfig,

    /// Remote collector connection
    pub collector: CollectorConfig,

    /// Time between live monitoring ticks
    #[serde(with = "duration_serde")]
    pub monitor_interval: Duration,

    /// Length of the trailing window aggregated on each live tick
    #[serde(with = "duration_serde")]
    pub live_window: Duration,

    /// Days covered by a default historical request
    pub backfill_days: u32,

    /// IANA time zone used to cut calendar days
    pub timezone: String,

    /// Locale written into export files
    pub locale: String,

    /// Path for XML exports
    pub export_path: PathBuf,

    /// Path for storing state and transparency logs
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gait-sensor-agent");

        Self {
            patient_id: "patient-001".to_string(),
            source: SourceConfig::default(),
            collector: CollectorConfig::default(),
            monitor_interval: Duration::from_secs(30),
            live_window: Duration::from_secs(60),
            backfill_days: crate::backfill::DEFAULT_BACKFILL_DAYS,
            timezone: "UTC".to_string(),
            locale: "en_US".to_string(),
            export_path: data_dir.join("exports"),
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults if it is absent.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gait-sensor-agent")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.export_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        std::fs::create_dir_all(&self.data_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// The configured time zone.
    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::InvalidTimezone(self.timezone.clone()))
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tz()?;
        if self.live_window.as_secs() == 0 {
            return Err(ConfigError::InvalidLiveWindow);
        }
        Ok(())
    }

    /// Live window as a signed duration for window arithmetic.
    pub fn live_window_span(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.live_window).unwrap_or(chrono::Duration::minutes(1))
    }

    /// Path of the persisted transparency statistics.
    pub fn transparency_path(&self) -> PathBuf {
        self.data_path.join("transparency.json")
    }
}

/// Configuration of the metric source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Which implementation to use
    pub kind: SourceKind,
    /// Export file replayed by the `health_export` source
    pub export_file: Option<PathBuf>,
    /// Patient profile for the `mock` source
    pub profile: MockProfile,
    /// Spacing of mock samples in seconds
    pub sample_interval_secs: u64,
    /// Flare periods injected by the mock source
    pub flares: Vec<FlarePeriod>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Mock,
            export_file: None,
            profile: MockProfile::MultipleSclerosis,
            sample_interval_secs: 60,
            flares: Vec::new(),
        }
    }
}

/// Remote collector settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// WebSocket endpoint; the patient id is appended as a query parameter
    pub url: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8000/ws".to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    InvalidTimezone(String),
    /// Live window shorter than one second
    InvalidLiveWindow,
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::InvalidTimezone(tz) => write!(f, "Unknown time zone '{tz}'"),
            ConfigError::InvalidLiveWindow => {
                write!(f, "live_window must be at least one second")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.monitor_interval, Duration::from_secs(30));
        assert_eq!(config.live_window, Duration::from_secs(60));
        assert_eq!(config.backfill_days, 90);
        assert_eq!(config.source.kind, SourceKind::Mock);
        assert_eq!(config.tz().unwrap(), Tz::UTC);
    }

    #[test]
    fn test_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.patient_id = "P042".to_string();
        config.monitor_interval = Duration::from_secs(15);
        config.timezone = "Europe/Berlin".to_string();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.patient_id, "P042");
        assert_eq!(loaded.monitor_interval, Duration::from_secs(15));
        assert_eq!(loaded.tz().unwrap(), chrono_tz::Europe::Berlin);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"patient_id":"P7","monitor_interval":10,"source":{"kind":"mock","profile":"healthy"}}"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.patient_id, "P7");
        assert_eq!(config.monitor_interval, Duration::from_secs(10));
        assert_eq!(config.source.profile, MockProfile::Healthy);
        assert_eq!(config.source.sample_interval_secs, 60);
        assert_eq!(config.backfill_days, 90);
    }

    #[test]
    fn test_invalid_timezone_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"timezone":"Mars/Olympus"}"#).unwrap();

        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::InvalidTimezone(_))
        ));
    }

    #[test]
    fn test_zero_live_window_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"live_window":0}"#).unwrap();

        assert!(matches!(
            Config::load_from(&path),
            Err(ConfigError::InvalidLiveWindow)
        ));
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.locale, "en_US");
    }
}
