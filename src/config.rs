//! Deploy-time configuration.
//!
//! Read once from `thermofleet.toml` at startup; every field has a default
//! so a missing file or a partial file still yields a complete config.

use crate::actuator::{DEFAULT_SYSFS_GPIO_ROOT, THRESHOLD_CELSIUS};
use crate::store::RETENTION_WINDOW_SECS;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{info, warn};

pub const CONFIG_ENV_VAR: &str = "THERMOFLEET_CONFIG";
pub const CONFIG_FILE_NAME: &str = "thermofleet.toml";

pub const DEFAULT_BROKER: &str = "172.20.10.2:1883";
pub const DEFAULT_TOPIC: &str = "temp/pico";
pub const DEFAULT_CLIENT_ID: &str = "subscriber";
pub const POLL_INTERVAL_MS: u64 = 1000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub transport: TransportConfig,
    pub aggregation: AggregationConfig,
    pub indicator: IndicatorConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Broker address as `host:port`.
    pub broker: String,
    pub client_id: String,
    pub topic: String,
    pub keep_alive_secs: u16,
    pub connect_timeout_ms: u64,
    pub connect_attempts: u32,
    pub connect_backoff_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            broker: DEFAULT_BROKER.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
            topic: DEFAULT_TOPIC.to_string(),
            keep_alive_secs: 60,
            connect_timeout_ms: 5000,
            connect_attempts: 5,
            connect_backoff_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    pub retention_window_secs: u64,
    pub threshold_celsius: f32,
    pub poll_interval_ms: u64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            retention_window_secs: RETENTION_WINDOW_SECS,
            threshold_celsius: THRESHOLD_CELSIUS,
            poll_interval_ms: POLL_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum IndicatorConfig {
    Log,
    Gpio {
        pin: u8,
        #[serde(default = "default_sysfs_root")]
        sysfs_root: String,
    },
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        IndicatorConfig::Log
    }
}

fn default_sysfs_root() -> String {
    DEFAULT_SYSFS_GPIO_ROOT.to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    pub fn max_level(&self) -> Result<tracing::Level, ConfigError> {
        tracing::Level::from_str(&self.level)
            .map_err(|_| ConfigError::Invalid(format!("unknown log level '{}'", self.level)))
    }
}

impl AggregatorConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: AggregatorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Load from `$THERMOFLEET_CONFIG`, `config/thermofleet.toml` or
    /// `../config/thermofleet.toml`, falling back to defaults when none
    /// exists. A file that exists but does not load is an error.
    pub fn load_or_default() -> Result<Self, ConfigError> {
        let mut paths = Vec::new();
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            paths.push(PathBuf::from(path));
        }
        paths.push(PathBuf::from("config").join(CONFIG_FILE_NAME));
        paths.push(PathBuf::from("..").join("config").join(CONFIG_FILE_NAME));

        for path in &paths {
            if path.exists() {
                let config = Self::load(path)?;
                info!("Loaded configuration from {}", path.display());
                return Ok(config);
            }
        }

        warn!("No configuration file found, using built-in defaults");
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let transport = &self.transport;
        if transport.topic.is_empty() {
            return Err(ConfigError::Invalid("transport.topic is empty".into()));
        }
        if transport.topic.contains(|c: char| c == '+' || c == '#') {
            return Err(ConfigError::Invalid(format!(
                "transport.topic '{}' must not contain wildcards",
                transport.topic
            )));
        }
        if transport.client_id.is_empty() {
            return Err(ConfigError::Invalid("transport.client_id is empty".into()));
        }
        if transport.broker.is_empty() {
            return Err(ConfigError::Invalid("transport.broker is empty".into()));
        }
        if transport.keep_alive_secs == 0 {
            return Err(ConfigError::Invalid("transport.keep_alive_secs must be positive".into()));
        }
        if transport.connect_attempts == 0 {
            return Err(ConfigError::Invalid("transport.connect_attempts must be at least 1".into()));
        }

        let aggregation = &self.aggregation;
        if aggregation.retention_window_secs == 0 {
            return Err(ConfigError::Invalid(
                "aggregation.retention_window_secs must be positive".into(),
            ));
        }
        if aggregation.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("aggregation.poll_interval_ms must be positive".into()));
        }
        if !aggregation.threshold_celsius.is_finite() {
            return Err(ConfigError::Invalid("aggregation.threshold_celsius must be finite".into()));
        }

        self.logging.max_level()?;
        Ok(())
    }

    pub fn log_summary(&self) {
        info!("┌─────────────────────────────────────────┐");
        info!("│        THERMOFLEET CONFIGURATION        │");
        info!("├─────────────────────────────────────────┤");
        info!("│ Broker: {}", self.transport.broker);
        info!("│ Topic: {}", self.transport.topic);
        info!("│ Window: {}s", self.aggregation.retention_window_secs);
        info!("│ Threshold: {:.2}°C", self.aggregation.threshold_celsius);
        info!("│ Poll Interval: {}ms", self.aggregation.poll_interval_ms);
        info!("│ Indicator: {:?}", self.indicator);
        info!("└─────────────────────────────────────────┘");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_fixed_constants() {
        let config = AggregatorConfig::default();
        assert_eq!(config.transport.broker, "172.20.10.2:1883");
        assert_eq!(config.transport.topic, "temp/pico");
        assert_eq!(config.transport.client_id, "subscriber");
        assert_eq!(config.aggregation.retention_window_secs, 600);
        assert_eq!(config.aggregation.threshold_celsius, 25.0);
        assert_eq!(config.aggregation.poll_interval_ms, 1000);
        assert_eq!(config.indicator, IndicatorConfig::Log);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = AggregatorConfig::from_toml(
            r#"
            [transport]
            broker = "10.0.0.5:1883"

            [aggregation]
            threshold_celsius = 21.5
            "#,
        )
        .unwrap();

        assert_eq!(config.transport.broker, "10.0.0.5:1883");
        assert_eq!(config.transport.topic, "temp/pico");
        assert_eq!(config.aggregation.threshold_celsius, 21.5);
        assert_eq!(config.aggregation.retention_window_secs, 600);
    }

    #[test]
    fn test_gpio_indicator_section() {
        let config = AggregatorConfig::from_toml(
            r#"
            [indicator]
            kind = "gpio"
            pin = 25
            "#,
        )
        .unwrap();

        assert_eq!(
            config.indicator,
            IndicatorConfig::Gpio {
                pin: 25,
                sysfs_root: "/sys/class/gpio".to_string()
            }
        );
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let wildcard = AggregatorConfig::from_toml("[transport]\ntopic = \"temp/#\"\n");
        assert!(matches!(wildcard, Err(ConfigError::Invalid(_))));

        let zero_window = AggregatorConfig::from_toml("[aggregation]\nretention_window_secs = 0\n");
        assert!(matches!(zero_window, Err(ConfigError::Invalid(_))));

        let bad_level = AggregatorConfig::from_toml("[logging]\nlevel = \"chatty\"\n");
        assert!(matches!(bad_level, Err(ConfigError::Invalid(_))));

        let no_attempts = AggregatorConfig::from_toml("[transport]\nconnect_attempts = 0\n");
        assert!(matches!(no_attempts, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let result = AggregatorConfig::from_toml("[transport\nbroker = ");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let result = AggregatorConfig::load("/nonexistent/thermofleet.toml");
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_shipped_config_file_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config").join(CONFIG_FILE_NAME);
        let config = AggregatorConfig::load(path).unwrap();
        assert_eq!(config.aggregation.retention_window_secs, 600);
        assert_eq!(config.indicator, IndicatorConfig::Log);
    }
}
