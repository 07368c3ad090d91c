use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::discord::DEFAULT_API_BASE;
use crate::parser::ParseOptions;

pub const BOT_TOKEN_ENV: &str = "DISCORD_BOT_TOKEN";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub requests: RequestsConfig,
    pub parser: ParserConfig,
    pub discord: DiscordConfig,
    pub workers: WorkersConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestsConfig {
    #[serde(alias = "serviceHost")]
    pub service_host: String,
    #[serde(alias = "requestTimeoutSeconds")]
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    #[serde(alias = "timeoutMs")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    #[serde(alias = "apiBase")]
    pub api_base: String,
    #[serde(alias = "botToken")]
    pub bot_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    pub count: usize,
    #[serde(alias = "inboundCapacity")]
    pub inbound_capacity: usize,
    #[serde(alias = "outboundCapacity")]
    pub outbound_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Keeps everything in memory when unset.
    #[serde(alias = "dataDir")]
    pub data_dir: Option<PathBuf>,
    /// How long delivery records are kept. Must cover the largest rate-limit window.
    #[serde(alias = "recordRetentionHours")]
    pub record_retention_hours: i64,
}

impl Default for RequestsConfig {
    fn default() -> Self {
        Self {
            service_host: "http://localhost:5000".to_owned(),
            request_timeout_seconds: 15,
        }
    }
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self { timeout_ms: 10_000 }
    }
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_owned(),
            bot_token: None,
        }
    }
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            count: 4,
            inbound_capacity: 64,
            outbound_capacity: 256,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            record_retention_hours: 7 * 24,
        }
    }
}

impl StorageConfig {
    pub fn record_retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.record_retention_hours)
    }
}

impl RequestsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl ParserConfig {
    pub fn options(&self) -> ParseOptions {
        ParseOptions {
            timeout: Duration::from_millis(self.timeout_ms),
        }
    }
}

impl WorkerConfig {
    /// Loads `config.json` from `dir`, falling back to defaults.
    /// `DISCORD_BOT_TOKEN` overrides the configured token.
    pub fn load(dir: &std::path::Path) -> Self {
        let path = dir.join("config.json");
        let mut config = match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<WorkerConfig>(&content) {
                Ok(config) => config,
                Err(e) => {
                    warn!(error = %e, path = %path.display(), "invalid config, using defaults");
                    Self::default()
                }
            },
            Err(e) => {
                warn!(error = %e, path = %path.display(), "config not readable, using defaults");
                Self::default()
            }
        };
        if let Ok(token) = std::env::var(BOT_TOKEN_ENV) {
            if !token.is_empty() {
                config.discord.bot_token = Some(token);
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let config: WorkerConfig = serde_json::from_str(r#"{ "workers": { "count": 2 } }"#).unwrap();
        assert_eq!(config.workers.count, 2);
        assert_eq!(config.workers.inbound_capacity, 64);
        assert_eq!(config.parser.timeout_ms, 10_000);
        assert_eq!(config.discord.api_base, DEFAULT_API_BASE);
        assert_eq!(config.storage.record_retention(), chrono::Duration::days(7));
    }

    #[test]
    fn camel_case_keys_are_accepted() {
        let config: WorkerConfig = serde_json::from_str(
            r#"{ "parser": { "timeoutMs": 5 }, "requests": { "serviceHost": "http://fr:1" },
                 "workers": { "outboundCapacity": 8 }, "storage": { "dataDir": "/tmp/relay", "recordRetentionHours": 48 } }"#,
        )
        .unwrap();
        assert_eq!(config.parser.timeout_ms, 5);
        assert_eq!(config.requests.service_host, "http://fr:1");
        assert_eq!(config.workers.outbound_capacity, 8);
        assert_eq!(config.storage.data_dir, Some(PathBuf::from("/tmp/relay")));
        assert_eq!(config.storage.record_retention(), chrono::Duration::hours(48));
    }

    #[test]
    fn missing_file_uses_defaults() {
        let dir = std::env::temp_dir().join("relay_config_missing_dir");
        let config = WorkerConfig::load(&dir);
        assert_eq!(config.parser.options().timeout, Duration::from_millis(10_000));
    }
}
