//! Configuration for the presence bridge
//!
//! Every field has a default, so an empty JSON object is a valid config.
//! Durations use humantime text (`"500ms"`, `"2s"`).

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{BridgeError, Result};

/// Default number of devices tracked by the observation cache
pub const DEFAULT_CACHE_CAPACITY: usize = 128;

/// Default minimum signal-strength change (dBm) that triggers a report
pub const DEFAULT_DELTA_THRESHOLD: u32 = 15;

/// Default idle poll interval for gated loops
pub const DEFAULT_IDLE_POLL_MS: u64 = 500;

/// Default bounded wait for the next broker command
pub const DEFAULT_COMMAND_WAIT_MS: u64 = 500;

/// Default broker endpoint
pub const DEFAULT_BROKER_URL: &str = "mqtt://127.0.0.1:1883";

/// Default broker topic prefix
pub const DEFAULT_TOPIC_PREFIX: &str = "mesh";

/// Bridge behavior configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Broker endpoint handed to the broker client on connect
    #[serde(default = "default_broker_url")]
    pub broker_url: String,

    /// Prefix for every broker topic
    #[serde(default = "default_topic_prefix")]
    pub topic_prefix: String,

    /// Maximum number of devices in the observation cache
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Minimum absolute RSSI change that is forwarded
    #[serde(default = "default_delta_threshold")]
    pub delta_threshold: u32,

    /// Idle poll interval while a loop is gated off
    #[serde(with = "humantime_serde", default = "default_idle_poll")]
    pub idle_poll: Duration,

    /// Bounded wait for the next broker command
    #[serde(with = "humantime_serde", default = "default_command_wait")]
    pub command_wait: Duration,

    /// Depth of the lifecycle event channel
    #[serde(default = "default_event_queue_size")]
    pub event_queue_size: usize,

    /// Depth of the radio discovery channel
    #[serde(default = "default_discovery_queue_size")]
    pub discovery_queue_size: usize,
}

fn default_broker_url() -> String {
    DEFAULT_BROKER_URL.to_string()
}

fn default_topic_prefix() -> String {
    DEFAULT_TOPIC_PREFIX.to_string()
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

fn default_delta_threshold() -> u32 {
    DEFAULT_DELTA_THRESHOLD
}

fn default_idle_poll() -> Duration {
    Duration::from_millis(DEFAULT_IDLE_POLL_MS)
}

fn default_command_wait() -> Duration {
    Duration::from_millis(DEFAULT_COMMAND_WAIT_MS)
}

fn default_event_queue_size() -> usize {
    64
}

fn default_discovery_queue_size() -> usize {
    128
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            broker_url: default_broker_url(),
            topic_prefix: default_topic_prefix(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            delta_threshold: DEFAULT_DELTA_THRESHOLD,
            idle_poll: default_idle_poll(),
            command_wait: default_command_wait(),
            event_queue_size: default_event_queue_size(),
            discovery_queue_size: default_discovery_queue_size(),
        }
    }
}

impl BridgeConfig {
    /// Reject values the bridge cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.broker_url.is_empty() {
            return Err(BridgeError::InvalidConfig("broker_url is empty".into()));
        }
        if self.topic_prefix.is_empty() || self.topic_prefix.contains(|c| c == '+' || c == '#') {
            return Err(BridgeError::InvalidConfig(format!(
                "topic_prefix {:?} must be non-empty and free of wildcards",
                self.topic_prefix
            )));
        }
        if self.cache_capacity == 0 {
            return Err(BridgeError::InvalidConfig("cache_capacity must be > 0".into()));
        }
        if self.delta_threshold == 0 {
            return Err(BridgeError::InvalidConfig("delta_threshold must be > 0".into()));
        }
        if self.idle_poll.is_zero() || self.command_wait.is_zero() {
            return Err(BridgeError::InvalidConfig(
                "idle_poll and command_wait must be non-zero".into(),
            ));
        }
        if self.event_queue_size == 0 || self.discovery_queue_size == 0 {
            return Err(BridgeError::InvalidConfig("queue sizes must be > 0".into()));
        }
        Ok(())
    }

    /// Parse from JSON and validate
    pub fn from_json(data: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(data)
            .map_err(|e| BridgeError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

/// Builder for BridgeConfig
#[derive(Debug, Default)]
pub struct BridgeConfigBuilder {
    config: BridgeConfig,
}

impl BridgeConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set broker endpoint
    pub fn broker_url(mut self, url: impl Into<String>) -> Self {
        self.config.broker_url = url.into();
        self
    }

    /// Set topic prefix
    pub fn topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.topic_prefix = prefix.into();
        self
    }

    /// Set observation cache capacity
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.config.cache_capacity = capacity;
        self
    }

    /// Set RSSI delta threshold
    pub fn delta_threshold(mut self, threshold: u32) -> Self {
        self.config.delta_threshold = threshold;
        self
    }

    /// Set idle poll interval
    pub fn idle_poll(mut self, poll: Duration) -> Self {
        self.config.idle_poll = poll;
        self
    }

    /// Set bounded command wait
    pub fn command_wait(mut self, wait: Duration) -> Self {
        self.config.command_wait = wait;
        self
    }

    /// Set lifecycle event channel depth
    pub fn event_queue_size(mut self, size: usize) -> Self {
        self.config.event_queue_size = size;
        self
    }

    /// Set discovery channel depth
    pub fn discovery_queue_size(mut self, size: usize) -> Self {
        self.config.discovery_queue_size = size;
        self
    }

    /// Build the configuration
    pub fn build(self) -> BridgeConfig {
        self.config
    }
}

// Custom serde module for Duration with humantime
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();
        assert_eq!(config.cache_capacity, 128);
        assert_eq!(config.delta_threshold, 15);
        assert_eq!(config.idle_poll, Duration::from_millis(500));
        assert_eq!(config.command_wait, Duration::from_millis(500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_json_is_default() {
        let config = BridgeConfig::from_json("{}").unwrap();
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn test_humantime_fields() {
        let config =
            BridgeConfig::from_json(r#"{"idle_poll":"20ms","command_wait":"1s"}"#).unwrap();
        assert_eq!(config.idle_poll, Duration::from_millis(20));
        assert_eq!(config.command_wait, Duration::from_secs(1));

        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"20ms\""));
    }

    #[test]
    fn test_builder() {
        let config = BridgeConfigBuilder::new()
            .broker_url("mqtt://broker.local:1883")
            .cache_capacity(16)
            .delta_threshold(10)
            .idle_poll(Duration::from_millis(5))
            .build();

        assert_eq!(config.broker_url, "mqtt://broker.local:1883");
        assert_eq!(config.cache_capacity, 16);
        assert_eq!(config.delta_threshold, 10);
        assert_eq!(config.idle_poll, Duration::from_millis(5));
    }

    #[test]
    fn test_validation_rejects_zeroes() {
        assert!(BridgeConfigBuilder::new().cache_capacity(0).build().validate().is_err());
        assert!(BridgeConfigBuilder::new().delta_threshold(0).build().validate().is_err());
        assert!(BridgeConfigBuilder::new()
            .idle_poll(Duration::ZERO)
            .build()
            .validate()
            .is_err());
        assert!(BridgeConfigBuilder::new().topic_prefix("mesh/#").build().validate().is_err());
        assert!(BridgeConfig::from_json(r#"{"cache_capacity":0}"#).is_err());
    }
}
