//! Configuration for the log sink

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::time::Duration;

/// Ordered mapping from a 0-based column index in a delimited log line to a
/// classification string: `ts`, `tag:<name>` or `field:<name>`.
pub type FieldMapping = BTreeMap<usize, String>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Measurement name every parsed point is written under
    pub measurement: String,

    /// Base URL of the InfluxDB 1.x instance, e.g. `http://localhost:8086`
    pub url: String,

    /// Optional username for authentication
    pub username: Option<String>,

    /// Optional password for authentication
    pub password: Option<String>,

    /// Database the points are written to
    pub database: String,

    /// How long the flush loop sleeps when the queue is empty
    pub flush_interval: Duration,

    /// Unconditional pause after every batch write; caps the write rate even
    /// when the queue is constantly non-empty
    pub write_cooldown: Duration,

    /// HTTP timeout for backend requests
    pub http_timeout: Duration,

    /// Maximum retry attempts for a failed batch write
    pub max_retries: u32,

    /// Base backoff between retries, doubled per attempt
    pub retry_backoff_ms: u64,

    /// Separator the log lines are split on
    pub separator: String,

    /// Column-to-classification mapping applied to every line
    pub field_mapping: FieldMapping,

    /// Offset from UTC, in seconds, that line timestamps are interpreted in
    pub utc_offset_secs: i32,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            measurement: "logs".to_string(),
            url: "http://localhost:8086".to_string(),
            username: None,
            password: None,
            database: "logs".to_string(),
            flush_interval: Duration::from_secs(1),
            write_cooldown: Duration::from_secs(5),
            http_timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_backoff_ms: 1000,
            separator: " | ".to_string(),
            field_mapping: default_field_mapping(),
            utc_offset_secs: 0,
        }
    }
}

/// The mapping used when none is configured:
/// `timestamp | level | location | message`.
pub fn default_field_mapping() -> FieldMapping {
    let mut mapping = FieldMapping::new();
    mapping.insert(0, "ts".to_string());
    mapping.insert(1, "tag:log_level".to_string());
    mapping.insert(2, "field:location".to_string());
    mapping.insert(3, "field:message".to_string());
    mapping
}

impl SinkConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = SinkConfig::default();

        if let Ok(measurement) = env::var("INFLUX_MEASUREMENT") {
            config.measurement = measurement;
        }

        if let Ok(url) = env::var("INFLUX_URL") {
            config.url = url;
        }

        if let Ok(username) = env::var("INFLUX_USERNAME") {
            config.username = Some(username);
        }

        if let Ok(password) = env::var("INFLUX_PASSWORD") {
            config.password = Some(password);
        }

        if let Ok(database) = env::var("INFLUX_DATABASE") {
            config.database = database;
        }

        if let Ok(flush_interval) = env::var("FLUSH_INTERVAL_SECONDS") {
            if let Ok(seconds) = flush_interval.parse::<u64>() {
                config.flush_interval = Duration::from_secs(seconds);
            }
        }

        if let Ok(cooldown) = env::var("WRITE_COOLDOWN_SECONDS") {
            if let Ok(seconds) = cooldown.parse::<u64>() {
                config.write_cooldown = Duration::from_secs(seconds);
            }
        }

        if let Ok(timeout) = env::var("HTTP_TIMEOUT_SECONDS") {
            if let Ok(seconds) = timeout.parse::<u64>() {
                config.http_timeout = Duration::from_secs(seconds);
            }
        }

        if let Ok(max_retries) = env::var("MAX_RETRIES") {
            if let Ok(retries) = max_retries.parse() {
                config.max_retries = retries;
            }
        }

        if let Ok(backoff) = env::var("RETRY_BACKOFF_MS") {
            if let Ok(ms) = backoff.parse() {
                config.retry_backoff_ms = ms;
            }
        }

        if let Ok(separator) = env::var("LOG_SEPARATOR") {
            config.separator = separator;
        }

        if let Ok(mapping) = env::var("FIELD_MAPPING") {
            if let Some(parsed) = parse_field_mapping(&mapping) {
                config.field_mapping = parsed;
            }
        }

        if let Ok(offset) = env::var("UTC_OFFSET_SECS") {
            if let Ok(secs) = offset.parse() {
                config.utc_offset_secs = secs;
            }
        }

        config
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.measurement.is_empty() {
            return Err("measurement cannot be empty".to_string());
        }

        if self.url.is_empty() {
            return Err("url cannot be empty".to_string());
        }

        if self.database.is_empty() {
            return Err("database cannot be empty".to_string());
        }

        if self.separator.is_empty() {
            return Err("separator cannot be empty".to_string());
        }

        if self.flush_interval.is_zero() {
            return Err("flush_interval must be greater than zero".to_string());
        }

        if self.field_mapping.is_empty() {
            return Err("field_mapping cannot be empty".to_string());
        }

        let ts_columns = self
            .field_mapping
            .values()
            .filter(|c| c.as_str() == "ts")
            .count();
        if ts_columns != 1 {
            return Err(format!(
                "field_mapping must classify exactly one column as `ts`, found {}",
                ts_columns
            ));
        }

        Ok(())
    }
}

/// Parse a mapping of the form `0=ts,1=tag:log_level,2=field:message`.
fn parse_field_mapping(raw: &str) -> Option<FieldMapping> {
    let mut mapping = FieldMapping::new();

    for entry in raw.split(',') {
        let (index, classification) = entry.split_once('=')?;
        let index = index.trim().parse::<usize>().ok()?;
        mapping.insert(index, classification.trim().to_string());
    }

    if mapping.is_empty() {
        None
    } else {
        Some(mapping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(SinkConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_measurement() {
        let config = SinkConfig {
            measurement: String::new(),
            ..SinkConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_exactly_one_ts() {
        let mut config = SinkConfig::default();
        config.field_mapping.insert(4, "ts".to_string());
        assert!(config.validate().is_err());

        config.field_mapping = FieldMapping::new();
        config
            .field_mapping
            .insert(0, "field:message".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_field_mapping() {
        let mapping = parse_field_mapping("0=ts, 1=tag:level, 2=field:msg").unwrap();
        assert_eq!(mapping.len(), 3);
        assert_eq!(mapping.get(&0), Some(&"ts".to_string()));
        assert_eq!(mapping.get(&1), Some(&"tag:level".to_string()));
        assert_eq!(mapping.get(&2), Some(&"field:msg".to_string()));

        assert!(parse_field_mapping("nonsense").is_none());
    }
}
