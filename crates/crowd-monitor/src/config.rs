//! Application configuration.

use crate::error::{AppError, AppResult};
use crowd_core::EntityKey;
use crowd_feed::{MergePolicy, DEFAULT_HISTORY_CAPACITY};
use crowd_registry::{EntityDefinition, EntityRegistry};
use crowd_ws::{ReconnectPolicy, SessionConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Config file used when neither `--config` nor `CROWD_CONFIG` is given.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "CROWD_CONFIG";

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// REST API base URL.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Push channel base URL.
    #[serde(default = "default_push_url")]
    pub push_url: String,
    /// Temple selected at startup. Defaults to the first registered temple.
    #[serde(default)]
    pub selected: Option<String>,
    /// Number of readings kept in the selection history.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Periodic history refresh for the selection (ms, 0 = disabled).
    #[serde(default = "default_history_refresh_interval_ms")]
    pub history_refresh_interval_ms: u64,
    /// Periodic snapshot refresh (ms, 0 = disabled).
    #[serde(default)]
    pub snapshot_refresh_interval_ms: u64,
    /// REST request timeout (ms).
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,
    /// Ordering rule between sources.
    #[serde(default)]
    pub merge_policy: MergePolicy,
    /// Push channel configuration.
    #[serde(default)]
    pub websocket: WsConfig,
    /// Registered temples, in display order.
    #[serde(default = "EntityRegistry::default_definitions")]
    pub temples: Vec<EntityDefinition>,
}

fn default_api_url() -> String {
    "http://127.0.0.1:5090".to_string()
}

fn default_push_url() -> String {
    "ws://127.0.0.1:5090".to_string()
}

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

fn default_history_refresh_interval_ms() -> u64 {
    30_000
}

fn default_http_timeout_ms() -> u64 {
    10_000
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            push_url: default_push_url(),
            selected: None,
            history_limit: default_history_limit(),
            history_refresh_interval_ms: default_history_refresh_interval_ms(),
            snapshot_refresh_interval_ms: 0,
            http_timeout_ms: default_http_timeout_ms(),
            merge_policy: MergePolicy::default(),
            websocket: WsConfig::default(),
            temples: EntityRegistry::default_definitions(),
        }
    }
}

/// Push channel configuration subset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsConfig {
    /// Maximum consecutive reconnection attempts (0 = infinite).
    #[serde(default)]
    pub max_reconnect_attempts: u32,
    /// Base delay for reconnection backoff (ms).
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    /// Backoff cap (ms).
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
    /// Random jitter bound added to each delay (ms).
    #[serde(default = "default_reconnect_jitter_ms")]
    pub reconnect_jitter_ms: u64,
    /// Handshake timeout (ms).
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Ping interval assumed before the server announces its own (ms).
    #[serde(default = "default_ping_interval_ms")]
    pub ping_interval_ms: u64,
    /// Ping timeout assumed before the server announces its own (ms).
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,
}

fn default_reconnect_base_delay_ms() -> u64 {
    1000
}

fn default_reconnect_max_delay_ms() -> u64 {
    5000
}

fn default_reconnect_jitter_ms() -> u64 {
    500
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

fn default_ping_interval_ms() -> u64 {
    25_000
}

fn default_ping_timeout_ms() -> u64 {
    20_000
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 0,
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            reconnect_jitter_ms: default_reconnect_jitter_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            ping_interval_ms: default_ping_interval_ms(),
            ping_timeout_ms: default_ping_timeout_ms(),
        }
    }
}

impl From<WsConfig> for SessionConfig {
    fn from(cfg: WsConfig) -> Self {
        Self {
            url: String::new(), // Set separately
            reconnect: ReconnectPolicy {
                max_attempts: cfg.max_reconnect_attempts,
                base_delay_ms: cfg.reconnect_base_delay_ms,
                max_delay_ms: cfg.reconnect_max_delay_ms,
                jitter_ms: cfg.reconnect_jitter_ms,
            },
            handshake_timeout_ms: cfg.handshake_timeout_ms,
            ping_interval_ms: cfg.ping_interval_ms,
            ping_timeout_ms: cfg.ping_timeout_ms,
        }
    }
}

impl AppConfig {
    /// Load configuration.
    ///
    /// Path precedence: `cli_path` > `CROWD_CONFIG` > `config/default.toml`.
    /// Only a missing default file falls back to built-in defaults; an
    /// explicitly named file must exist.
    pub fn load(cli_path: Option<String>) -> AppResult<Self> {
        if let Some(path) = cli_path.or_else(|| std::env::var(CONFIG_ENV).ok()) {
            return Self::from_file(&path);
        }

        if Path::new(DEFAULT_CONFIG_PATH).exists() {
            Self::from_file(DEFAULT_CONFIG_PATH)
        } else {
            warn!(path = DEFAULT_CONFIG_PATH, "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config {path}: {e}")))?;

        Self::from_toml(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.api_url.is_empty() {
            return Err(AppError::Config("api_url must not be empty".to_string()));
        }
        if self.push_url.is_empty() {
            return Err(AppError::Config("push_url must not be empty".to_string()));
        }
        if self.history_limit == 0 {
            return Err(AppError::Config("history_limit must be positive".to_string()));
        }
        if self.http_timeout_ms == 0 {
            return Err(AppError::Config("http_timeout_ms must be positive".to_string()));
        }
        Ok(())
    }

    /// Build the temple registry.
    pub fn registry(&self) -> AppResult<EntityRegistry> {
        Ok(EntityRegistry::new(&self.temples)?)
    }

    /// Temple to select at startup.
    pub fn initial_selection(&self, registry: &EntityRegistry) -> AppResult<EntityKey> {
        match &self.selected {
            Some(key) => {
                let key = EntityKey::parse(key)?;
                registry.resolve(&key)?;
                Ok(key)
            }
            None => Ok(registry.first().key.clone()),
        }
    }

    /// Push session configuration.
    pub fn session_config(&self) -> SessionConfig {
        let mut session: SessionConfig = self.websocket.clone().into();
        session.url = self.push_url.clone();
        session
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    pub fn history_refresh_interval(&self) -> Option<Duration> {
        non_zero_ms(self.history_refresh_interval_ms)
    }

    pub fn snapshot_refresh_interval(&self) -> Option<Duration> {
        non_zero_ms(self.snapshot_refresh_interval_ms)
    }
}

fn non_zero_ms(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}
