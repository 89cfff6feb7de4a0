/*!
 * Configuration for the Rampart resilience layer
 */

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use rampart_core_resilience::{
    CircuitBreakerConfig, ErrorCategory, RecoveryConfig, ResilienceConfig, RetryPolicy,
};

use crate::error::{RampartError, Result};

/// Settings recognized by the resilience layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RampartConfig {
    /// Breaker thresholds keyed by category name (`api` or `api_error`)
    pub circuit_breaker: BTreeMap<String, usize>,

    /// Minutes a breaker stays open
    pub circuit_breaker_duration: u64,

    /// Seconds to wait before re-testing the API
    pub api_retry_delay: u64,

    /// Retries after the first attempt
    pub max_retries: u32,

    /// Seconds before the first retry
    pub base_delay: f64,

    /// Horizon of the per-category error windows, in minutes
    pub error_window_minutes: u64,

    /// Ceiling for the network recovery backoff, in seconds
    pub network_backoff_cap: u64,

    /// Seconds to wait before reassessing positions after a trading halt
    pub trading_halt_wait: u64,

    /// Directory for snapshot files
    pub snapshot_dir: PathBuf,

    /// Seconds between scheduled snapshots (0 disables the schedule)
    pub snapshot_interval: u64,

    /// Log verbosity
    pub log_level: LogLevel,

    /// Write JSON logs to this file instead of stdout
    pub log_file: Option<PathBuf>,
}

impl Default for RampartConfig {
    fn default() -> Self {
        Self {
            circuit_breaker: BTreeMap::new(),
            circuit_breaker_duration: default_breaker_minutes(),
            api_retry_delay: 5,
            max_retries: 3,
            base_delay: 1.0,
            error_window_minutes: 60,
            network_backoff_cap: 60,
            trading_halt_wait: 300,
            snapshot_dir: PathBuf::from("snapshots"),
            snapshot_interval: 0,
            log_level: LogLevel::default(),
            log_file: None,
        }
    }
}

/// Log level for diagnostic output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Only errors
    Error,

    /// Warnings and errors
    Warn,

    /// Info, warnings, and errors
    #[default]
    Info,

    /// Debug and above
    Debug,

    /// All messages including traces
    Trace,
}

impl LogLevel {
    /// Convert to tracing::Level
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

impl FromStr for LogLevel {
    type Err = RampartError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(RampartError::Config(format!("Unknown log level: {}", other))),
        }
    }
}

/// Largest minute count that still fits in a `Duration` of whole seconds
const MAX_MINUTES: u64 = u64::MAX / 60;

fn minutes(count: u64) -> Duration {
    Duration::from_secs(count.saturating_mul(60))
}

fn default_breaker_minutes() -> u64 {
    15
}

impl RampartConfig {
    /// Load configuration from a TOML file, or JSON when the extension is `.json`
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        let config: RampartConfig = if is_json {
            serde_json::from_str(&contents)?
        } else {
            toml::from_str(&contents)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| RampartError::Config(format!("Failed to encode config: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Reject settings the resilience layer cannot honor
    pub fn validate(&self) -> Result<()> {
        let mut seen: HashMap<ErrorCategory, &str> = HashMap::new();
        for (name, threshold) in &self.circuit_breaker {
            let category = ErrorCategory::from_str(name).map_err(|_| {
                RampartError::Config(format!("Unknown circuit_breaker category: {}", name))
            })?;
            if let Some(previous) = seen.insert(category, name) {
                return Err(RampartError::Config(format!(
                    "circuit_breaker sets {} twice ({} and {})",
                    category.as_str(),
                    previous,
                    name
                )));
            }
            if *threshold == 0 {
                return Err(RampartError::Config(format!(
                    "circuit_breaker.{} must be at least 1",
                    category.as_str()
                )));
            }
        }

        if Duration::try_from_secs_f64(self.base_delay).is_err() {
            return Err(RampartError::Config(format!(
                "base_delay must be a non-negative, representable number of seconds, got {}",
                self.base_delay
            )));
        }

        if self.circuit_breaker_duration == 0
            || self.circuit_breaker_duration > MAX_MINUTES
        {
            return Err(RampartError::Config(format!(
                "circuit_breaker_duration must be between 1 and {} minutes",
                MAX_MINUTES
            )));
        }

        if self.error_window_minutes == 0 || self.error_window_minutes > MAX_MINUTES {
            return Err(RampartError::Config(format!(
                "error_window_minutes must be between 1 and {}",
                MAX_MINUTES
            )));
        }

        Ok(())
    }

    /// Breaker thresholds by category (unknown names are skipped)
    pub fn thresholds(&self) -> HashMap<ErrorCategory, usize> {
        self.circuit_breaker
            .iter()
            .filter_map(|(name, threshold)| {
                ErrorCategory::from_str(name)
                    .ok()
                    .map(|category| (category, *threshold))
            })
            .collect()
    }

    /// Convert into the core crate's configuration
    pub fn resilience_config(&self) -> ResilienceConfig {
        let breaker = CircuitBreakerConfig {
            thresholds: self.thresholds(),
            cool_down: minutes(self.circuit_breaker_duration),
            ..Default::default()
        };

        // validate() rejects values that do not convert; saturate if it was skipped
        let base_delay = Duration::try_from_secs_f64(self.base_delay).unwrap_or(
            if self.base_delay > 0.0 {
                Duration::MAX
            } else {
                Duration::ZERO
            },
        );
        let retry = RetryPolicy::default()
            .with_max_retries(self.max_retries)
            .with_base_delay(base_delay);

        let recovery = RecoveryConfig {
            api_retry_delay: Duration::from_secs(self.api_retry_delay),
            network_backoff_cap: Duration::from_secs(self.network_backoff_cap),
            trading_halt_wait: Duration::from_secs(self.trading_halt_wait),
            ..Default::default()
        };

        ResilienceConfig {
            window_horizon: minutes(self.error_window_minutes),
            breaker,
            retry,
            recovery,
        }
    }

    /// Copy of the configuration stored in snapshots
    ///
    /// Paths become strings and a missing `log_file` becomes `null`, so the copy
    /// deserializes back into a `RampartConfig`.
    pub fn snapshot_configuration(&self) -> Result<BTreeMap<String, Value>> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map.into_iter().collect()),
            other => Err(RampartError::Serialization(format!(
                "configuration encoded as {}, expected an object",
                other
            ))),
        }
    }

    /// Scheduled snapshot interval, if enabled
    pub fn snapshot_schedule(&self) -> Option<Duration> {
        (self.snapshot_interval > 0).then(|| Duration::from_secs(self.snapshot_interval))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RampartConfig::default();
        assert_eq!(config.circuit_breaker_duration, 15);
        assert_eq!(config.api_retry_delay, 5);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_delay, 1.0);
        assert!(config.validate().is_ok());
        assert!(config.snapshot_schedule().is_none());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_str = r#"
            circuit_breaker_duration = 30
            max_retries = 5

            [circuit_breaker]
            api = 3
            network_error = 10
        "#;

        let config: RampartConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.circuit_breaker_duration, 30);
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.api_retry_delay, 5);

        let thresholds = config.thresholds();
        assert_eq!(thresholds[&ErrorCategory::Api], 3);
        assert_eq!(thresholds[&ErrorCategory::Network], 10);
    }

    #[test]
    fn test_resilience_config_conversion() {
        let mut config = RampartConfig {
            circuit_breaker_duration: 20,
            base_delay: 0.5,
            ..Default::default()
        };
        config.circuit_breaker.insert("trading".to_string(), 2);

        let resilience = config.resilience_config();
        assert_eq!(resilience.breaker.cool_down, Duration::from_secs(1200));
        assert_eq!(resilience.breaker.threshold(ErrorCategory::Trading), 2);
        assert_eq!(resilience.breaker.threshold(ErrorCategory::Api), 5);
        assert_eq!(resilience.retry.base_delay, Duration::from_millis(500));
        assert_eq!(resilience.window_horizon, Duration::from_secs(3600));
        assert_eq!(resilience.recovery.api_retry_delay, Duration::from_secs(5));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = RampartConfig::default();
        config.circuit_breaker.insert("weather".to_string(), 3);
        assert!(config.validate().is_err());

        let mut config = RampartConfig::default();
        config.circuit_breaker.insert("api".to_string(), 0);
        assert!(config.validate().is_err());

        let config = RampartConfig {
            base_delay: f64::NAN,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_categories() {
        let mut config = RampartConfig::default();
        config.circuit_breaker.insert("api".to_string(), 3);
        config.circuit_breaker.insert("api_error".to_string(), 9);

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("api"));
    }

    #[test]
    fn test_validate_rejects_unrepresentable_durations() {
        let config = RampartConfig {
            base_delay: 1e30,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = RampartConfig {
            circuit_breaker_duration: u64::MAX,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = RampartConfig {
            error_window_minutes: u64::MAX / 2,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = RampartConfig {
            circuit_breaker_duration: MAX_MINUTES,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unvalidated_extremes_saturate() {
        let config = RampartConfig {
            circuit_breaker_duration: u64::MAX,
            base_delay: 1e30,
            ..Default::default()
        };

        let resilience = config.resilience_config();
        assert_eq!(resilience.breaker.cool_down, Duration::from_secs(u64::MAX));
        assert_eq!(resilience.retry.base_delay, Duration::MAX);
    }

    #[test]
    fn test_snapshot_configuration_deserializes_back() {
        let mut config = RampartConfig {
            base_delay: 0.1 + 0.2,
            ..Default::default()
        };
        config.circuit_breaker.insert("model".to_string(), 7);

        let copy = config.snapshot_configuration().unwrap();
        assert_eq!(copy["snapshot_dir"], Value::from("snapshots"));
        assert_eq!(copy["log_file"], Value::Null);
        assert_eq!(copy["circuit_breaker"]["model"], Value::from(7));

        let object: serde_json::Map<String, Value> = copy.into_iter().collect();
        let restored: RampartConfig = serde_json::from_value(Value::Object(object)).unwrap();
        assert_eq!(restored, config);
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert!("loud".parse::<LogLevel>().is_err());
    }
}
