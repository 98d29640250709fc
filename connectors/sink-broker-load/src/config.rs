//! Configuration for the Broker Load Sink Connector
//!
//! One TOML file carries everything:
//! - Danube connection and batching settings (root level)
//! - `[load]`: staging location, target table and load statement options
//! - `[database]`: MySQL-protocol connection to the database frontend
//!
//! Environment variables override file values.

use broker_load_core::{
    ConnectorError, ConnectorResult, DatabaseConfig, LoadConfig, MAX_LABEL_LEN,
};
use danube_client::SubType;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Complete configuration for the Broker Load Sink Connector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerLoadSinkConfig {
    /// Danube and batching settings (flattened at root level)
    #[serde(flatten)]
    pub core: ConnectorConfig,

    /// Staging and load statement settings
    pub load: LoadConfig,

    /// Database frontend connection
    pub database: DatabaseConfig,
}

/// Subscription type for configuration (mirrors SubType but with Serialize/Deserialize)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SubscriptionType {
    #[default]
    Exclusive,
    Shared,
    FailOver,
}

impl From<SubscriptionType> for SubType {
    fn from(st: SubscriptionType) -> Self {
        match st {
            SubscriptionType::Exclusive => SubType::Exclusive,
            SubscriptionType::Shared => SubType::Shared,
            SubscriptionType::FailOver => SubType::FailOver,
        }
    }
}

/// Danube side of the connector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Danube broker service URL
    pub danube_service_url: String,

    /// Connector name (must be unique)
    pub connector_name: String,

    /// Topic to consume
    pub topic: String,

    /// Subscription name
    pub subscription: String,

    #[serde(default)]
    pub subscription_type: SubscriptionType,

    /// Messages per staged file
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Flush a partial batch once its first message is this old
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,

    /// First component of generated load labels
    #[serde(default = "default_label_prefix")]
    pub label_prefix: String,

    /// Appended to records that do not already end with it
    #[serde(default = "default_line_delimiter")]
    pub line_delimiter: String,

    /// Log level used when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Characters a generated label adds to `<prefix>` and `<table>`:
/// three `_` separators, a `yyyyMMddHHmmss` timestamp and a simple uuid
pub const LABEL_GENERATED_LEN: usize = 3 + 14 + 32;

fn default_batch_size() -> usize {
    10_000
}

fn default_batch_timeout_ms() -> u64 {
    30_000
}

fn default_label_prefix() -> String {
    "danube".to_string()
}

fn default_line_delimiter() -> String {
    "\n".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ConnectorConfig {
    /// Load from environment variables
    ///
    /// - `DANUBE_SERVICE_URL`: Required, Danube broker URL
    /// - `CONNECTOR_NAME`: Required, unique connector name
    /// - `DANUBE_TOPIC`: Required, topic to consume
    /// - `SUBSCRIPTION_NAME`: Subscription name (default: `<connector>-sub`)
    /// - `SUBSCRIPTION_TYPE`: Exclusive, Shared or Failover (default: Exclusive)
    /// - `BATCH_SIZE`, `BATCH_TIMEOUT_MS`, `LABEL_PREFIX`, `LOG_LEVEL`
    pub fn from_env() -> ConnectorResult<Self> {
        let danube_service_url = env::var("DANUBE_SERVICE_URL")
            .map_err(|_| ConnectorError::config("DANUBE_SERVICE_URL is required"))?;

        let connector_name = env::var("CONNECTOR_NAME")
            .map_err(|_| ConnectorError::config("CONNECTOR_NAME is required"))?;

        let topic = env::var("DANUBE_TOPIC")
            .map_err(|_| ConnectorError::config("DANUBE_TOPIC is required"))?;

        let subscription =
            env::var("SUBSCRIPTION_NAME").unwrap_or_else(|_| format!("{}-sub", connector_name));

        let mut config = Self {
            danube_service_url,
            connector_name,
            topic,
            subscription,
            subscription_type: SubscriptionType::default(),
            batch_size: default_batch_size(),
            batch_timeout_ms: default_batch_timeout_ms(),
            label_prefix: default_label_prefix(),
            line_delimiter: default_line_delimiter(),
            log_level: default_log_level(),
        };
        config.apply_env_overrides();

        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("DANUBE_SERVICE_URL") {
            self.danube_service_url = val;
        }
        if let Ok(val) = env::var("CONNECTOR_NAME") {
            self.connector_name = val;
        }
        if let Ok(val) = env::var("DANUBE_TOPIC") {
            self.topic = val;
        }
        if let Ok(val) = env::var("SUBSCRIPTION_NAME") {
            self.subscription = val;
        }
        if let Some(st) = env::var("SUBSCRIPTION_TYPE")
            .ok()
            .and_then(|s| parse_subscription_type(&s))
        {
            self.subscription_type = st;
        }
        if let Ok(val) = env::var("BATCH_SIZE") {
            if let Ok(n) = val.parse() {
                self.batch_size = n;
            }
        }
        if let Ok(val) = env::var("BATCH_TIMEOUT_MS") {
            if let Ok(n) = val.parse() {
                self.batch_timeout_ms = n;
            }
        }
        if let Ok(val) = env::var("LABEL_PREFIX") {
            self.label_prefix = val;
        }
        if let Ok(val) = env::var("LOG_LEVEL") {
            self.log_level = val;
        }
    }

    pub fn validate(&self) -> ConnectorResult<()> {
        if self.danube_service_url.is_empty() {
            return Err(ConnectorError::config("danube_service_url cannot be empty"));
        }
        if self.connector_name.is_empty() {
            return Err(ConnectorError::config("connector_name cannot be empty"));
        }
        if self.topic.is_empty() {
            return Err(ConnectorError::config("topic cannot be empty"));
        }
        if self.subscription.is_empty() {
            return Err(ConnectorError::config("subscription cannot be empty"));
        }
        if self.batch_size == 0 {
            return Err(ConnectorError::config("batch_size must be > 0"));
        }
        if self.label_prefix.is_empty()
            || !self
                .label_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(ConnectorError::config(
                "label_prefix must be non-empty and use only letters, digits, '-' and '_'",
            ));
        }
        Ok(())
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }
}

fn parse_subscription_type(raw: &str) -> Option<SubscriptionType> {
    match raw.to_lowercase().as_str() {
        "exclusive" => Some(SubscriptionType::Exclusive),
        "shared" => Some(SubscriptionType::Shared),
        "failover" => Some(SubscriptionType::FailOver),
        _ => None,
    }
}

impl BrokerLoadSinkConfig {
    /// Load from `CONFIG_FILE` when set, otherwise from the environment.
    ///
    /// Priority: TOML file, then environment variables.
    ///
    /// ```toml
    /// danube_service_url = "http://broker:6650"
    /// connector_name = "orders-broker-load"
    /// topic = "/default/orders"
    /// subscription = "orders-loader"
    /// batch_size = 50000
    ///
    /// [load]
    /// staging_dir = "s3://warehouse/staging"
    /// load_options = "COLUMNS TERMINATED BY \",\" (id, item, qty)"
    /// credentials = "loader,secret"
    /// broker = "s3_broker"
    /// database = "sales"
    /// table = "orders"
    ///
    /// [database]
    /// url = "mysql://root@doris-fe:9030/sales"
    /// query_timeout_secs = 300
    /// ```
    pub fn load() -> ConnectorResult<Self> {
        let mut config = if let Ok(config_file) = env::var("CONFIG_FILE") {
            Self::from_file(&config_file)?
        } else {
            Self::from_env()?
        };

        config.core.apply_env_overrides();
        config.load.apply_env_overrides();
        config.database.apply_env_overrides();

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> ConnectorResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConnectorError::config(format!("Failed to read config file {}: {}", path, e))
        })?;

        Self::from_toml(&content)
            .map_err(|e| ConnectorError::config(format!("Failed to parse config file {}: {}", path, e)))
    }

    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> ConnectorResult<Self> {
        Ok(Self {
            core: ConnectorConfig::from_env()?,
            load: LoadConfig::default(),
            database: DatabaseConfig::default(),
        })
    }

    /// Validate all configuration
    pub fn validate(&self) -> ConnectorResult<()> {
        self.core.validate()?;
        self.load.validate()?;
        self.database.validate()?;

        let label_len =
            self.core.label_prefix.len() + self.load.table.len() + LABEL_GENERATED_LEN;
        if label_len > MAX_LABEL_LEN {
            return Err(ConnectorError::config(format!(
                "label_prefix '{}' and table '{}' produce {}-character load labels, the limit is {}",
                self.core.label_prefix, self.load.table, label_len, MAX_LABEL_LEN
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        danube_service_url = "http://localhost:6650"
        connector_name = "orders-loader"
        topic = "/default/orders"
        subscription = "orders-sub"
        subscription_type = "Shared"
        batch_size = 500

        [load]
        staging_dir = "/mnt/staging"
        load_options = "COLUMNS TERMINATED BY \",\""
        credentials = "hdfs,secret"
        broker = "hdfs_broker"
        database = "sales"
        table = "orders"

        [database]
        url = "mysql://root@localhost:9030/sales"
    "#;

    #[test]
    fn test_parse_sample() {
        let config = BrokerLoadSinkConfig::from_toml(SAMPLE).unwrap();
        assert!(config.validate().is_ok());

        assert_eq!(config.core.batch_size, 500);
        assert_eq!(config.core.subscription_type, SubscriptionType::Shared);
        assert_eq!(config.core.batch_timeout(), Duration::from_secs(30));
        assert_eq!(config.core.label_prefix, "danube");
        assert_eq!(config.core.line_delimiter, "\n");
        assert_eq!(config.load.table, "orders");
        assert_eq!(config.load.max_retries, 3);
        assert_eq!(config.database.max_connections, 2);
    }

    #[test]
    fn test_validation() {
        let mut config = BrokerLoadSinkConfig::from_toml(SAMPLE).unwrap();

        config.core.batch_size = 0;
        assert!(config.validate().is_err());
        config.core.batch_size = 1;

        config.core.label_prefix = "bad prefix".to_string();
        assert!(config.validate().is_err());
        config.core.label_prefix = "ok_prefix".to_string();
        assert!(config.validate().is_ok());

        config.load.broker.clear();
        assert!(config.validate().unwrap_err().is_configuration());
    }

    #[test]
    fn test_label_length_is_checked_against_table() {
        let mut config = BrokerLoadSinkConfig::from_toml(SAMPLE).unwrap();
        config.core.label_prefix = "p".repeat(30);
        config.load.table = "t".repeat(64);
        let err = config.validate().unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("143-character"));

        let longest_table = MAX_LABEL_LEN - LABEL_GENERATED_LEN - config.core.label_prefix.len();
        config.load.table = "t".repeat(longest_table);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_section_is_rejected() {
        let without_database = SAMPLE.split("[database]").next().unwrap();
        assert!(BrokerLoadSinkConfig::from_toml(without_database).is_err());
    }

    #[test]
    fn test_subscription_type_parsing() {
        assert_eq!(
            parse_subscription_type("FAILOVER"),
            Some(SubscriptionType::FailOver)
        );
        assert_eq!(parse_subscription_type("shared"), Some(SubscriptionType::Shared));
        assert_eq!(parse_subscription_type("round-robin"), None);
    }
}
