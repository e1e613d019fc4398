//! Configuration types for the cache client.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::str::FromStr;

/// Property name for the batch flush size.
pub const PROP_PIPELINE_SIZE: &str = "redis.pipeline.size";
/// Property name for the pattern scan request width.
pub const PROP_SCAN_LIMIT: &str = "redis.scan.limit";
/// Property name for the key namespace prefix.
pub const PROP_KEY_NAMESPACE: &str = "redis.key.namespace";
/// Property name for the entity codec.
pub const PROP_CODEC: &str = "ignite.codec.class";
/// Property name enabling the health monitor.
pub const PROP_HEALTH_MONITOR_ENABLED: &str = "health.redis.monitor.enabled";
/// Property name asking for a restart when the store turns unhealthy.
pub const PROP_NEEDS_RESTART_ON_FAILURE: &str = "health.redis.needs.restart.on.failure";

/// Delimiter placed between the namespace prefix and the logical key.
pub const DEFAULT_NAMESPACE_DELIMITER: &str = ":";

/// Number of registration attempts before a batch race becomes fatal.
pub const MAX_BATCH_RETRIES: u32 = 5;

/// Main configuration for the cache client.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Operations accumulated before a batch is flushed.
    pub batch_size: u64,

    /// Requested width of each pattern scan call. Values below 10 are raised to 10.
    pub scan_limit: usize,

    /// Namespace prefix applied to keys. `None` or blank disables namespacing.
    pub namespace: Option<String>,

    /// Delimiter between namespace and key.
    pub namespace_delimiter: String,

    /// Registered name of the entity codec. Blank selects the JSON codec.
    pub codec: String,

    /// Health monitor configuration.
    pub health: HealthConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            scan_limit: 100,
            namespace: None,
            namespace_delimiter: DEFAULT_NAMESPACE_DELIMITER.to_string(),
            codec: String::new(),
            health: HealthConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a configuration from flat property pairs.
    ///
    /// Unknown properties are ignored; missing ones keep their defaults.
    pub fn from_properties(props: &HashMap<String, String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(size) = parse_prop::<u64>(props, PROP_PIPELINE_SIZE)? {
            config.batch_size = size;
        }
        if let Some(limit) = parse_prop::<usize>(props, PROP_SCAN_LIMIT)? {
            config.scan_limit = limit;
        }
        if let Some(ns) = props.get(PROP_KEY_NAMESPACE) {
            config.namespace = Some(ns.trim().to_string());
        }
        if let Some(codec) = props.get(PROP_CODEC) {
            config.codec = codec.trim().to_string();
        }
        if let Some(enabled) = parse_prop::<bool>(props, PROP_HEALTH_MONITOR_ENABLED)? {
            config.health.enabled = enabled;
        }
        if let Some(restart) = parse_prop::<bool>(props, PROP_NEEDS_RESTART_ON_FAILURE)? {
            config.health.needs_restart_on_failure = restart;
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the batch flush size.
    pub fn with_batch_size(mut self, size: u64) -> Self {
        self.batch_size = size;
        self
    }

    /// Set the pattern scan width.
    pub fn with_scan_limit(mut self, limit: usize) -> Self {
        self.scan_limit = limit;
        self
    }

    /// Set the key namespace prefix.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Set the namespace delimiter.
    pub fn with_namespace_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.namespace_delimiter = delimiter.into();
        self
    }

    /// Select the entity codec by registered name.
    pub fn with_codec(mut self, codec: impl Into<String>) -> Self {
        self.codec = codec.into();
        self
    }

    /// Set health monitor configuration.
    pub fn with_health_config(mut self, health: HealthConfig) -> Self {
        self.health = health;
        self
    }

    /// Check the configuration for values the client cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config("batch size must be at least 1".to_string()));
        }
        Ok(())
    }
}

fn parse_prop<T: FromStr>(props: &HashMap<String, String>, name: &str) -> Result<Option<T>> {
    match props.get(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::Config(format!("invalid value {:?} for {}", raw, name))),
    }
}

/// Health monitor configuration.
#[derive(Debug, Clone, Default)]
pub struct HealthConfig {
    /// Whether the store health monitor is enabled.
    pub enabled: bool,

    /// Whether the host should restart when the store is found unhealthy.
    pub needs_restart_on_failure: bool,
}

impl HealthConfig {
    /// Create an enabled health configuration.
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Default::default()
        }
    }

    /// Ask for a restart on failure.
    pub fn with_restart_on_failure(mut self, restart: bool) -> Self {
        self.needs_restart_on_failure = restart;
        self
    }
}
