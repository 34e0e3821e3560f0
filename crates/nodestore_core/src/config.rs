//! NodeManager configuration.

use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

/// Configuration for a [`NodeManager`](crate::NodeManager).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Maximum number of cache slots.
    pub cache_size: usize,

    /// Whether to render SQL statements at debug level.
    pub log_sql: bool,

    /// Whether to log replication batch sizes.
    pub log_replication: bool,

    /// First value handed out by the embedded id generator.
    ///
    /// Never below 1: ids 0 and 1 belong to the root and user-root nodes.
    pub id_base_value: u64,

    /// How long `kill` waits for a transactor to finish on its own.
    pub kill_grace: Duration,

    /// How long `kill` waits after forcing the transactor down.
    pub kill_force_wait: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_size: 1000,
            log_sql: false,
            log_replication: false,
            id_base_value: 1,
            kill_grace: Duration::from_millis(500),
            kill_force_wait: Duration::from_millis(1000),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the cache capacity.
    #[must_use]
    pub const fn cache_size(mut self, size: usize) -> Self {
        self.cache_size = size;
        self
    }

    /// Sets whether SQL is logged.
    #[must_use]
    pub const fn log_sql(mut self, value: bool) -> Self {
        self.log_sql = value;
        self
    }

    /// Sets whether replication batches are logged.
    #[must_use]
    pub const fn log_replication(mut self, value: bool) -> Self {
        self.log_replication = value;
        self
    }

    /// Sets the id generator base value (clamped to at least 1).
    #[must_use]
    pub const fn id_base_value(mut self, value: u64) -> Self {
        self.id_base_value = if value < 1 { 1 } else { value };
        self
    }

    /// Sets the kill grace period.
    #[must_use]
    pub const fn kill_grace(mut self, value: Duration) -> Self {
        self.kill_grace = value;
        self
    }

    /// Sets the wait after a forced kill.
    #[must_use]
    pub const fn kill_force_wait(mut self, value: Duration) -> Self {
        self.kill_force_wait = value;
        self
    }

    /// Builds a configuration from application properties.
    ///
    /// Recognized keys: `cachesize`, `logsql`, `logReplication`,
    /// `idBaseValue`. Unparseable values are logged and ignored.
    #[must_use]
    pub fn from_properties(props: &HashMap<String, String>) -> Self {
        let mut config = Self::default();
        if let Some(v) = props.get("cachesize") {
            match v.trim().parse::<usize>() {
                Ok(n) => config.cache_size = n,
                Err(_) => warn!(value = %v, "ignoring invalid cachesize"),
            }
        }
        if let Some(v) = props.get("logsql") {
            config.log_sql = parse_flag(v);
        }
        if let Some(v) = props.get("logReplication") {
            config.log_replication = parse_flag(v);
        }
        if let Some(v) = props.get("idBaseValue") {
            match v.trim().parse::<u64>() {
                Ok(n) => config = config.id_base_value(n),
                Err(_) => warn!(value = %v, "ignoring invalid idBaseValue"),
            }
        }
        config
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.cache_size, 1000);
        assert!(!config.log_sql);
        assert_eq!(config.id_base_value, 1);
        assert_eq!(config.kill_grace, Duration::from_millis(500));
    }

    #[test]
    fn builder_clamps_base_value() {
        let config = Config::new().id_base_value(0).cache_size(10);
        assert_eq!(config.id_base_value, 1);
        assert_eq!(config.cache_size, 10);
    }

    #[test]
    fn from_properties() {
        let mut props = HashMap::new();
        props.insert("cachesize".to_string(), "250".to_string());
        props.insert("logsql".to_string(), "true".to_string());
        props.insert("logReplication".to_string(), "false".to_string());
        props.insert("idBaseValue".to_string(), "5000".to_string());
        let config = Config::from_properties(&props);
        assert_eq!(config.cache_size, 250);
        assert!(config.log_sql);
        assert!(!config.log_replication);
        assert_eq!(config.id_base_value, 5000);
    }

    #[test]
    fn from_properties_ignores_garbage() {
        let mut props = HashMap::new();
        props.insert("cachesize".to_string(), "lots".to_string());
        let config = Config::from_properties(&props);
        assert_eq!(config.cache_size, 1000);
    }
}
