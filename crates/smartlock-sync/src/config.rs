//! # Tag Sync Configuration
//!
//! Configuration management for the broker link and the tag sync agent.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     SMARTLOCK_BROKER_URL=wss://broker:8884/mqtt                        │
//! │     SMARTLOCK_TOPIC_PREFIX=smartlock/esp32                             │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/smartlock/console.toml (Linux)                           │
//! │     ~/Library/Application Support/com.smartlock.smartlock/... (macOS)  │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     public demo broker, smartlock/esp32/* topics, 25s timeouts         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [client]
//! id = "web-client-1a2b3c"
//!
//! [broker]
//! url = "wss://broker.example:8884/mqtt"
//! username = "smart_lock_web"
//! password = "secret"
//! keep_alive_secs = 30
//! retry_interval_secs = 3
//! max_retries = 0
//! qos = 0
//!
//! [topics]
//! cmd = "smartlock/esp32/cmd"
//! events = "smartlock/esp32/events"
//! tags = "smartlock/esp32/tags"
//!
//! [operations]
//! add_timeout_secs = 25
//! delete_timeout_secs = 25
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use smartlock_core::{OperationTimeouts, DEFAULT_ADD_TIMEOUT_SECS, DEFAULT_DELETE_TIMEOUT_SECS};

use crate::error::{SyncError, SyncResult};

/// URL schemes the transport knows how to dial.
pub const SUPPORTED_SCHEMES: [&str; 4] = ["mqtt", "mqtts", "ws", "wss"];

// =============================================================================
// Client Configuration
// =============================================================================

/// Identity this session presents to the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// MQTT client id. Must be unique per broker; two sessions sharing an
    /// id keep kicking each other off.
    #[serde(default = "default_client_id")]
    pub id: String,
}

fn default_client_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("web-client-{}", &suffix[..6])
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            id: default_client_id(),
        }
    }
}

// =============================================================================
// Broker Configuration
// =============================================================================

/// Broker endpoint, credentials and reconnect behaviour.
#[derive(Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// `mqtt://`, `mqtts://`, `ws://` or `wss://` URL.
    #[serde(default = "default_broker_url")]
    pub url: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// MQTT keep-alive interval (seconds).
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    /// Fixed delay between reconnect attempts (seconds).
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,

    /// Maximum consecutive reconnect attempts. 0 retries forever.
    #[serde(default)]
    pub max_retries: u32,

    /// QoS for commands and subscriptions (0, 1 or 2).
    #[serde(default)]
    pub qos: u8,
}

fn default_broker_url() -> String {
    "wss://broker.hivemq.com:8884/mqtt".to_string()
}

fn default_keep_alive() -> u64 {
    30
}

fn default_retry_interval() -> u64 {
    3
}

impl Default for BrokerConfig {
    fn default() -> Self {
        BrokerConfig {
            url: default_broker_url(),
            username: None,
            password: None,
            keep_alive_secs: default_keep_alive(),
            retry_interval_secs: default_retry_interval(),
            max_retries: 0,
            qos: 0,
        }
    }
}

impl std::fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("keep_alive_secs", &self.keep_alive_secs)
            .field("retry_interval_secs", &self.retry_interval_secs)
            .field("max_retries", &self.max_retries)
            .field("qos", &self.qos)
            .finish()
    }
}

// =============================================================================
// Topics
// =============================================================================

/// The three channels shared with the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicsConfig {
    /// Commands to the device.
    #[serde(default = "default_cmd_topic")]
    pub cmd: String,

    /// Single-line outcome events from the device.
    #[serde(default = "default_events_topic")]
    pub events: String,

    /// JSON tag list snapshots from the device.
    #[serde(default = "default_tags_topic")]
    pub tags: String,
}

const DEFAULT_TOPIC_PREFIX: &str = "smartlock/esp32";

fn default_cmd_topic() -> String {
    format!("{}/cmd", DEFAULT_TOPIC_PREFIX)
}

fn default_events_topic() -> String {
    format!("{}/events", DEFAULT_TOPIC_PREFIX)
}

fn default_tags_topic() -> String {
    format!("{}/tags", DEFAULT_TOPIC_PREFIX)
}

impl TopicsConfig {
    /// Topics for a device publishing under `prefix`.
    pub fn with_prefix(prefix: &str) -> Self {
        let prefix = prefix.trim_end_matches('/');
        TopicsConfig {
            cmd: format!("{}/cmd", prefix),
            events: format!("{}/events", prefix),
            tags: format!("{}/tags", prefix),
        }
    }
}

impl Default for TopicsConfig {
    fn default() -> Self {
        TopicsConfig {
            cmd: default_cmd_topic(),
            events: default_events_topic(),
            tags: default_tags_topic(),
        }
    }
}

// =============================================================================
// Operation Settings
// =============================================================================

/// How long add and delete operations may wait for the device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationsConfig {
    #[serde(default = "default_add_timeout")]
    pub add_timeout_secs: u64,

    #[serde(default = "default_delete_timeout")]
    pub delete_timeout_secs: u64,
}

fn default_add_timeout() -> u64 {
    DEFAULT_ADD_TIMEOUT_SECS
}

fn default_delete_timeout() -> u64 {
    DEFAULT_DELETE_TIMEOUT_SECS
}

impl Default for OperationsConfig {
    fn default() -> Self {
        OperationsConfig {
            add_timeout_secs: default_add_timeout(),
            delete_timeout_secs: default_delete_timeout(),
        }
    }
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete tag sync configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagSyncConfig {
    #[serde(default)]
    pub client: ClientConfig,

    #[serde(default)]
    pub broker: BrokerConfig,

    #[serde(default)]
    pub topics: TopicsConfig,

    #[serde(default)]
    pub operations: OperationsConfig,
}

impl TagSyncConfig {
    /// Creates a config with defaults and a generated client id.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (console.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> SyncResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading tag sync config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load tag sync config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> SyncResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| SyncError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents)?;

        info!(?path, "Tag sync config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> SyncResult<()> {
        if self.client.id.trim().is_empty() {
            return Err(SyncError::InvalidConfig("client id must not be empty".into()));
        }

        let url = url::Url::parse(&self.broker.url)?;
        if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
            return Err(SyncError::InvalidUrl(format!(
                "Broker URL must use one of {:?}, got: {}",
                SUPPORTED_SCHEMES, self.broker.url
            )));
        }
        if url.host_str().is_none() {
            return Err(SyncError::InvalidUrl(format!(
                "Broker URL has no host: {}",
                self.broker.url
            )));
        }

        let topics = [&self.topics.cmd, &self.topics.events, &self.topics.tags];
        if topics.iter().any(|t| t.trim().is_empty()) {
            return Err(SyncError::InvalidConfig("topics must not be empty".into()));
        }
        if topics[0] == topics[1] || topics[0] == topics[2] || topics[1] == topics[2] {
            return Err(SyncError::InvalidConfig("topics must be distinct".into()));
        }

        if self.operations.add_timeout_secs == 0 || self.operations.delete_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "operation timeouts must be greater than 0".into(),
            ));
        }

        if self.broker.retry_interval_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "retry_interval_secs must be greater than 0".into(),
            ));
        }

        if self.broker.qos > 2 {
            return Err(SyncError::InvalidConfig(format!(
                "qos must be 0, 1 or 2, got {}",
                self.broker.qos
            )));
        }

        Ok(())
    }

    /// Replaces all three topics with `<prefix>/cmd|events|tags`.
    pub fn with_topic_prefix(mut self, prefix: &str) -> Self {
        self.topics = TopicsConfig::with_prefix(prefix);
        self
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("SMARTLOCK_BROKER_URL") {
            debug!(url = %url, "Overriding broker URL from environment");
            self.broker.url = url;
        }

        if let Some(username) = lookup("SMARTLOCK_USERNAME") {
            self.broker.username = Some(username);
        }

        if let Some(password) = lookup("SMARTLOCK_PASSWORD") {
            self.broker.password = Some(password);
        }

        if let Some(id) = lookup("SMARTLOCK_CLIENT_ID") {
            debug!(client_id = %id, "Overriding client id from environment");
            self.client.id = id;
        }

        if let Some(prefix) = lookup("SMARTLOCK_TOPIC_PREFIX") {
            debug!(prefix = %prefix, "Overriding topic prefix from environment");
            self.topics = TopicsConfig::with_prefix(&prefix);
        }

        if let Some(secs) = lookup("SMARTLOCK_ADD_TIMEOUT_SECS") {
            match secs.parse::<u64>() {
                Ok(s) => self.operations.add_timeout_secs = s,
                Err(_) => warn!(value = %secs, "Ignoring invalid SMARTLOCK_ADD_TIMEOUT_SECS"),
            }
        }

        if let Some(secs) = lookup("SMARTLOCK_DELETE_TIMEOUT_SECS") {
            match secs.parse::<u64>() {
                Ok(s) => self.operations.delete_timeout_secs = s,
                Err(_) => warn!(value = %secs, "Ignoring invalid SMARTLOCK_DELETE_TIMEOUT_SECS"),
            }
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "smartlock", "smartlock")
            .map(|dirs| dirs.config_dir().join("console.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Returns the MQTT client id.
    pub fn client_id(&self) -> &str {
        &self.client.id
    }

    /// Timeouts for the state machine.
    pub fn timeouts(&self) -> OperationTimeouts {
        OperationTimeouts {
            add: Duration::from_secs(self.operations.add_timeout_secs),
            delete: Duration::from_secs(self.operations.delete_timeout_secs),
        }
    }

    /// Fixed reconnect interval.
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.broker.retry_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = TagSyncConfig::default();
        assert!(config.client.id.starts_with("web-client-"));
        assert_eq!(config.client.id.len(), "web-client-".len() + 6);
        assert_eq!(config.topics.cmd, "smartlock/esp32/cmd");
        assert_eq!(config.retry_interval(), Duration::from_secs(3));
        assert_eq!(config.timeouts(), OperationTimeouts::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = TagSyncConfig::default();

        config.broker.url = "http://broker:80".to_string();
        assert!(matches!(config.validate(), Err(SyncError::InvalidUrl(_))));

        config.broker.url = "mqtt://localhost:1883".to_string();
        assert!(config.validate().is_ok());

        config.topics.tags = config.topics.events.clone();
        assert!(config.validate().is_err());

        config.topics = TopicsConfig::default();
        config.operations.add_timeout_secs = 0;
        assert!(config.validate().is_err());

        config.operations.add_timeout_secs = 25;
        config.broker.qos = 3;
        assert!(config.validate().is_err());

        config.broker.qos = 1;
        config.client.id = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = TagSyncConfig::default();
        config.apply_overrides(lookup(&[
            ("SMARTLOCK_BROKER_URL", "mqtts://lock.local:8883"),
            ("SMARTLOCK_CLIENT_ID", "door-panel"),
            ("SMARTLOCK_TOPIC_PREFIX", "site/front/"),
            ("SMARTLOCK_ADD_TIMEOUT_SECS", "40"),
            ("SMARTLOCK_DELETE_TIMEOUT_SECS", "soon"),
        ]));

        assert_eq!(config.broker.url, "mqtts://lock.local:8883");
        assert_eq!(config.client_id(), "door-panel");
        assert_eq!(config.topics.events, "site/front/events");
        assert_eq!(config.operations.add_timeout_secs, 40);
        // Unparseable values are ignored
        assert_eq!(config.operations.delete_timeout_secs, 25);
    }

    #[test]
    fn test_password_redacted_in_debug() {
        let mut config = TagSyncConfig::default();
        config.broker.password = Some("hunter2".to_string());
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: TagSyncConfig = toml::from_str(
            r#"
            [broker]
            url = "ws://10.0.0.5:9001/mqtt"

            [operations]
            add_timeout_secs = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.broker.url, "ws://10.0.0.5:9001/mqtt");
        assert_eq!(config.broker.keep_alive_secs, 30);
        assert_eq!(config.operations.add_timeout_secs, 10);
        assert_eq!(config.operations.delete_timeout_secs, 25);
        assert_eq!(config.topics, TopicsConfig::default());
    }

    #[test]
    fn test_toml_serialization() {
        let config = TagSyncConfig::default().with_topic_prefix("lab/lock");
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[broker]"));
        assert!(toml_str.contains("lab/lock/cmd"));
    }
}
