use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{
    error::{FixEmbedError, Result},
    limiter::RateLimitPolicy,
    platform::DISCORD_API_BASE,
    store::{RetryPolicy, StoreConfig},
    utils::Snowflake,
};

/// Process configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub bot_token: Option<String>,
    /// The only user allowed to list the bot's guilds
    pub owner_id: Option<Snowflake>,
    pub database_path: String,
    pub http_addr: String,
    pub api_base: String,
    pub rate_limit: RateLimitSettings,
    pub store: StoreSettings,
}

/// Outbound send window
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
    pub capacity: usize,
    pub window_ms: u64,
}

/// Durable write retry behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    pub connection_timeout_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            owner_id: None,
            database_path: "fixembed_data.db".to_string(),
            http_addr: "0.0.0.0:8080".to_string(),
            api_base: DISCORD_API_BASE.to_string(),
            rate_limit: RateLimitSettings::default(),
            store: StoreSettings::default(),
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        let policy = RateLimitPolicy::default();
        Self {
            capacity: policy.capacity,
            window_ms: policy.window.as_millis() as u64,
        }
    }
}

impl Default for StoreSettings {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            max_attempts: retry.max_attempts,
            retry_delay_ms: retry.delay.as_millis() as u64,
            connection_timeout_ms: 5000,
        }
    }
}

impl AppConfig {
    /// Layer the environment over an optional YAML file.
    ///
    /// Keys map directly (`BOT_TOKEN`, `OWNER_ID`, `DATABASE_PATH`); nested
    /// keys use a double underscore (`RATE_LIMIT__CAPACITY`).
    pub fn load(path: Option<&str>) -> Result<Self> {
        let base = match path {
            Some(path) => load_config_from_file(path)?,
            None => AppConfig::default(),
        };

        let layered = config::Config::builder()
            .add_source(config::Config::try_from(&base).map_err(config_error)?)
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(config_error)?;

        layered.try_deserialize().map_err(config_error)
    }

    /// The bot token, required to talk to the platform
    pub fn token(&self) -> Result<&str> {
        self.bot_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| FixEmbedError::Config("BOT_TOKEN is not set".to_string()))
    }

    pub fn rate_limit_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            capacity: self.rate_limit.capacity,
            window: Duration::from_millis(self.rate_limit.window_ms),
        }
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            path: self.database_path.clone(),
            connection_timeout: Duration::from_millis(self.store.connection_timeout_ms),
            retry: RetryPolicy {
                max_attempts: self.store.max_attempts,
                delay: Duration::from_millis(self.store.retry_delay_ms),
            },
            ..Default::default()
        }
    }
}

fn config_error(e: config::ConfigError) -> FixEmbedError {
    FixEmbedError::Config(e.to_string())
}

/// Load configuration from YAML string
pub fn load_config_from_yaml(yaml: &str) -> Result<AppConfig> {
    serde_yaml::from_str(yaml)
        .map_err(|e| FixEmbedError::Config(format!("Failed to parse YAML: {}", e)))
}

/// Load configuration from YAML file
pub fn load_config_from_file(path: &str) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    load_config_from_yaml(&content)
}
