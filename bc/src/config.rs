//! Broadcaster configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{BroadcastError, BroadcastResult};

/// Default time a delivery attempt waits on a subscriber before dropping the message
pub const DEFAULT_WAIT_TIME_MS: u64 = 1000;

/// Default capacity of the coordinator request queue
///
/// A capacity of 1 keeps producers in lockstep with the coordinator: `cast`
/// returns only once the coordinator has room to accept the request.
pub const DEFAULT_EVENT_BUFFER: usize = 1;

/// Default capacity of each subscriber's stream
pub const DEFAULT_SINK_BUFFER: usize = 1;

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level", skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,

    /// Broadcaster engine settings
    pub broadcaster: BroadcasterConfig,
}

impl Config {
    /// Load configuration with fallback chain
    ///
    /// Explicit path, then `./.broadcaster.yml`, then
    /// `<config_dir>/broadcaster/broadcaster.yml`, then defaults.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let local_config = PathBuf::from(".broadcaster.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("broadcaster").join("broadcaster.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read just the log level, ignoring any errors
    ///
    /// Used before logging is initialized, so failures are swallowed here and
    /// reported later by [`Config::load`].
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        Self::load(config_path).ok().and_then(|config| config.log_level)
    }

    /// Serialize to YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize config")
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.broadcaster.validate()?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Settings for one broadcaster instance
///
/// Every value must be greater than zero. A zero `wait-time-ms` is an error,
/// it does not fall back to the 1s default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcasterConfig {
    /// Time to wait on a subscriber's stream before giving up on a message
    #[serde(rename = "wait-time-ms", default = "default_wait_time_ms")]
    pub wait_time_ms: u64,

    /// Capacity of the coordinator request queue
    #[serde(rename = "event-buffer", default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Capacity of each subscriber's stream
    #[serde(rename = "sink-buffer", default = "default_sink_buffer")]
    pub sink_buffer: usize,
}

fn default_wait_time_ms() -> u64 {
    DEFAULT_WAIT_TIME_MS
}

fn default_event_buffer() -> usize {
    DEFAULT_EVENT_BUFFER
}

fn default_sink_buffer() -> usize {
    DEFAULT_SINK_BUFFER
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self {
            wait_time_ms: DEFAULT_WAIT_TIME_MS,
            event_buffer: DEFAULT_EVENT_BUFFER,
            sink_buffer: DEFAULT_SINK_BUFFER,
        }
    }
}

impl BroadcasterConfig {
    /// Default settings with the given wait time
    ///
    /// The wait time is kept in whole milliseconds; a duration with a
    /// sub-millisecond part is rejected rather than rounded.
    pub fn with_wait_time(wait_time: Duration) -> BroadcastResult<Self> {
        debug!(?wait_time, "BroadcasterConfig::with_wait_time: called");
        if wait_time.subsec_nanos() % 1_000_000 != 0 {
            return Err(BroadcastError::InvalidConfig(format!(
                "wait time must be a whole number of milliseconds, got {:?}",
                wait_time
            )));
        }
        let wait_time_ms = u64::try_from(wait_time.as_millis())
            .map_err(|_| BroadcastError::InvalidConfig(format!("wait time too large: {:?}", wait_time)))?;

        let config = Self {
            wait_time_ms,
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Get the wait time as a Duration
    pub fn wait_time(&self) -> Duration {
        Duration::from_millis(self.wait_time_ms)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> BroadcastResult<()> {
        debug!(
            wait_time_ms = self.wait_time_ms,
            event_buffer = self.event_buffer,
            sink_buffer = self.sink_buffer,
            "BroadcasterConfig::validate: called"
        );
        if self.wait_time_ms == 0 {
            return Err(BroadcastError::InvalidConfig(
                "wait-time-ms must be greater than zero".to_string(),
            ));
        }
        if self.event_buffer == 0 {
            return Err(BroadcastError::InvalidConfig(
                "event-buffer must be greater than zero".to_string(),
            ));
        }
        if self.sink_buffer == 0 {
            return Err(BroadcastError::InvalidConfig(
                "sink-buffer must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = BroadcasterConfig::default();
        assert_eq!(config.wait_time_ms, 1000);
        assert_eq!(config.event_buffer, 1);
        assert_eq!(config.sink_buffer, 1);
        assert_eq!(config.wait_time(), Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_with_wait_time() {
        let config = BroadcasterConfig::with_wait_time(Duration::from_secs(3600)).unwrap();
        assert_eq!(config.wait_time(), Duration::from_secs(3600));
        assert_eq!(config.sink_buffer, DEFAULT_SINK_BUFFER);
    }

    #[test]
    fn test_with_wait_time_rejects_sub_millisecond() {
        let result = BroadcasterConfig::with_wait_time(Duration::from_micros(500));
        assert!(matches!(result, Err(BroadcastError::InvalidConfig(_))));

        let result = BroadcasterConfig::with_wait_time(Duration::from_micros(1900));
        assert!(matches!(result, Err(BroadcastError::InvalidConfig(_))));

        let result = BroadcasterConfig::with_wait_time(Duration::ZERO);
        assert!(matches!(result, Err(BroadcastError::InvalidConfig(_))));

        let config = BroadcasterConfig::with_wait_time(Duration::from_micros(2000)).unwrap();
        assert_eq!(config.wait_time(), Duration::from_millis(2));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let zero_wait = BroadcasterConfig {
            wait_time_ms: 0,
            ..Default::default()
        };
        assert!(matches!(zero_wait.validate(), Err(BroadcastError::InvalidConfig(_))));

        let zero_events = BroadcasterConfig {
            event_buffer: 0,
            ..Default::default()
        };
        assert!(matches!(zero_events.validate(), Err(BroadcastError::InvalidConfig(_))));

        let zero_sink = BroadcasterConfig {
            sink_buffer: 0,
            ..Default::default()
        };
        assert!(matches!(zero_sink.validate(), Err(BroadcastError::InvalidConfig(_))));
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let config: Config = serde_yaml::from_str("broadcaster:\n  wait-time-ms: 250\n").unwrap();
        assert_eq!(config.broadcaster.wait_time(), Duration::from_millis(250));
        assert_eq!(config.broadcaster.event_buffer, DEFAULT_EVENT_BUFFER);
        assert!(config.log_level.is_none());
    }

    #[test]
    fn test_negative_wait_time_rejected() {
        let result: Result<Config, _> = serde_yaml::from_str("broadcaster:\n  wait-time-ms: -5\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_explicit_path() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broadcaster.yml");
        fs::write(
            &path,
            "log-level: debug\nbroadcaster:\n  wait-time-ms: 50\n  sink-buffer: 4\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.broadcaster.wait_time_ms, 50);
        assert_eq!(config.broadcaster.sink_buffer, 4);
        assert_eq!(Config::load_log_level(Some(&path)).as_deref(), Some("debug"));
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broadcaster.yml");
        fs::write(&path, "broadcaster:\n  wait-time-ms: 0\n").unwrap();

        let err = Config::load(Some(&path)).unwrap_err();
        assert!(format!("{:#}", err).contains("wait-time-ms"));
        assert!(Config::load_log_level(Some(&path)).is_none());
    }

    #[test]
    fn test_yaml_roundtrip_keys() {
        let yaml = Config::default().to_yaml().unwrap();
        assert!(yaml.contains("wait-time-ms: 1000"));
        assert!(yaml.contains("event-buffer: 1"));
        assert!(yaml.contains("sink-buffer: 1"));
    }
}
