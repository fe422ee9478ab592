//! Runtime configuration.
//!
//! The runtime does not load configuration itself. A deployment builds a
//! [`RuntimeConfig`] directly, deserializes one with serde, or converts the
//! string properties of its own configuration source with
//! [`RuntimeConfig::from_properties`].

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

pub const DEFAULT_POOL_SIZE: usize = 4;
pub const MIN_POOL_SIZE: usize = 1;
pub const MAX_POOL_SIZE: usize = 40;

pub const DEFAULT_IDLE_BACKOFF: Duration = Duration::from_millis(10);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_millis(5000);
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_LONG_BATCH_WARNING: Duration = Duration::from_secs(5);

/// Settings for one [`System`](crate::system::System).
///
/// Durations deserialize from whole milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Used in log fields and as the prefix of every thread name.
    pub name: String,
    /// Workers in the normal pool, clamped on use.
    pub thread_pool_size: usize,
    /// Workers in the blocking pool, clamped on use.
    pub blocking_thread_pool_size: usize,
    /// How long an idle worker waits on its ready queue before rechecking
    /// whether the system is still running.
    #[serde(rename = "idle_backoff_ms", deserialize_with = "millis")]
    pub idle_backoff: Duration,
    /// Delay between a graceful actor shutdown request and its finalize.
    #[serde(rename = "shutdown_grace_ms", deserialize_with = "millis")]
    pub shutdown_grace: Duration,
    /// How long each pool gets to finish in-flight batches on system shutdown.
    #[serde(rename = "drain_timeout_ms", deserialize_with = "millis")]
    pub drain_timeout: Duration,
    /// Batches running longer than this are reported by
    /// [`System::check_thread_activity`](crate::system::System::check_thread_activity).
    #[serde(rename = "long_batch_warning_ms", deserialize_with = "millis")]
    pub long_batch_warning: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            name: "colony".to_string(),
            thread_pool_size: DEFAULT_POOL_SIZE,
            blocking_thread_pool_size: DEFAULT_POOL_SIZE,
            idle_backoff: DEFAULT_IDLE_BACKOFF,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            long_batch_warning: DEFAULT_LONG_BATCH_WARNING,
        }
    }
}

impl RuntimeConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Build a config from string properties.
    ///
    /// Recognised keys are `name`, `thread_pool_size`,
    /// `blocking_thread_pool_size`, `idle_backoff_ms`, `shutdown_grace_ms`,
    /// `drain_timeout_ms` and `long_batch_warning_ms`. Missing or unparsable
    /// values keep their defaults; a bad value is logged.
    pub fn from_properties(properties: &HashMap<String, String>) -> Self {
        let defaults = Self::default();
        Self {
            name: properties
                .get("name")
                .cloned()
                .unwrap_or(defaults.name),
            thread_pool_size: property(properties, "thread_pool_size")
                .unwrap_or(defaults.thread_pool_size),
            blocking_thread_pool_size: property(properties, "blocking_thread_pool_size")
                .unwrap_or(defaults.blocking_thread_pool_size),
            idle_backoff: property(properties, "idle_backoff_ms")
                .map(Duration::from_millis)
                .unwrap_or(defaults.idle_backoff),
            shutdown_grace: property(properties, "shutdown_grace_ms")
                .map(Duration::from_millis)
                .unwrap_or(defaults.shutdown_grace),
            drain_timeout: property(properties, "drain_timeout_ms")
                .map(Duration::from_millis)
                .unwrap_or(defaults.drain_timeout),
            long_batch_warning: property(properties, "long_batch_warning_ms")
                .map(Duration::from_millis)
                .unwrap_or(defaults.long_batch_warning),
        }
    }

    pub fn normal_pool_size(&self) -> usize {
        self.thread_pool_size.clamp(MIN_POOL_SIZE, MAX_POOL_SIZE)
    }

    pub fn blocking_pool_size(&self) -> usize {
        self.blocking_thread_pool_size
            .clamp(MIN_POOL_SIZE, MAX_POOL_SIZE)
    }
}

fn property<T: FromStr>(properties: &HashMap<String, String>, key: &str) -> Option<T> {
    let raw = properties.get(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable runtime property");
            None
        }
    }
}

fn millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_sizes_are_clamped() {
        let config = RuntimeConfig {
            thread_pool_size: 0,
            blocking_thread_pool_size: 500,
            ..RuntimeConfig::default()
        };
        assert_eq!(config.normal_pool_size(), MIN_POOL_SIZE);
        assert_eq!(config.blocking_pool_size(), MAX_POOL_SIZE);
        assert_eq!(RuntimeConfig::default().normal_pool_size(), 4);
    }

    #[test_log::test]
    fn test_properties_fall_back_to_defaults() {
        let properties = HashMap::from([
            ("name".to_string(), "rover".to_string()),
            ("thread_pool_size".to_string(), "8".to_string()),
            ("blocking_thread_pool_size".to_string(), "lots".to_string()),
            ("shutdown_grace_ms".to_string(), " 250 ".to_string()),
        ]);
        let config = RuntimeConfig::from_properties(&properties);
        assert_eq!(config.name, "rover");
        assert_eq!(config.thread_pool_size, 8);
        assert_eq!(config.blocking_thread_pool_size, DEFAULT_POOL_SIZE);
        assert_eq!(config.shutdown_grace, Duration::from_millis(250));
        assert_eq!(config.idle_backoff, DEFAULT_IDLE_BACKOFF);
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: RuntimeConfig =
            serde_json::from_str(r#"{"name": "arm", "idle_backoff_ms": 2}"#).unwrap();
        assert_eq!(config.name, "arm");
        assert_eq!(config.idle_backoff, Duration::from_millis(2));
        assert_eq!(config.drain_timeout, DEFAULT_DRAIN_TIMEOUT);
    }
}
