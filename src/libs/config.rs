use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 4;
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Settings the front-end hands over when it creates a `ChatClient`.
#[derive(Clone, Debug, PartialEq, Deserialize, uniffi::Record)]
pub struct ChatConfig {
    pub database_path: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl ChatConfig {
    pub fn new(database_path: impl Into<String>) -> Self {
        Self {
            database_path: database_path.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }

    /// Parses a JSON config; every field except `database_path` may be omitted.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// A pool of zero connections can never serve a request.
    pub fn pool_size(&self) -> u32 {
        self.max_connections.max(1)
    }
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

fn default_log_filter() -> String {
    DEFAULT_LOG_FILTER.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_uses_defaults() {
        let config = ChatConfig::new("/tmp/chat.db");
        assert_eq!(config.database_path, "/tmp/chat.db");
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(config.busy_timeout(), Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS));
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn missing_json_fields_fall_back_to_defaults() {
        let config = ChatConfig::from_json(r#"{"database_path": "/data/zodiac.db"}"#).unwrap();
        assert_eq!(config, ChatConfig::new("/data/zodiac.db"));

        let tuned = ChatConfig::from_json(
            r#"{"database_path": "chat.db", "max_connections": 8, "log_filter": "debug"}"#,
        )
        .unwrap();
        assert_eq!(tuned.max_connections, 8);
        assert_eq!(tuned.busy_timeout_ms, DEFAULT_BUSY_TIMEOUT_MS);
        assert_eq!(tuned.log_filter, "debug");
    }

    #[test]
    fn json_without_database_path_is_rejected() {
        assert!(ChatConfig::from_json(r#"{"max_connections": 2}"#).is_err());
    }

    #[test]
    fn pool_size_is_never_zero() {
        let mut config = ChatConfig::new("chat.db");
        config.max_connections = 0;
        assert_eq!(config.pool_size(), 1);
    }
}
