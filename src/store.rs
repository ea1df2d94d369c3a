use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::{future::Future, str::FromStr, sync::Arc, time::Duration};
use tracing::{debug, info, warn};

use crate::{
    error::{FixEmbedError, Result},
    metrics::Metrics,
    settings::{decode_services, encode_services, GuildSettings},
    utils::{from_db_id, to_db_id, Snowflake},
};

/// Path that opens a private in-memory database
pub const IN_MEMORY: &str = ":memory:";

/// Settings store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub path: String,
    pub connection_timeout: Duration,
    /// How long SQLite itself waits on a lock before reporting busy
    pub busy_timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "fixembed_data.db".to_string(),
            connection_timeout: Duration::from_secs(5),
            busy_timeout: Duration::ZERO,
            retry: RetryPolicy::default(),
        }
    }
}

/// Fixed-delay retry applied to busy/locked durable writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds, fails with a non-busy error, or the
    /// attempts run out. Exhaustion surfaces as `StoreBusy`.
    pub async fn run<T, F, Fut>(&self, metrics: Option<&Metrics>, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        for attempt in 1..=attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_store_busy() => {
                    debug!("Settings store busy (attempt {}/{}): {}", attempt, attempts, e);
                    if let Some(metrics) = metrics {
                        metrics.record_store_retry();
                    }
                    if attempt < attempts {
                        tokio::time::sleep(self.delay).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(FixEmbedError::StoreBusy { attempts })
    }
}

/// Durable backing for channel activation and guild settings
#[async_trait]
pub trait SettingsRepository: Send + Sync {
    async fn load_channel_states(&self) -> Result<Vec<(Snowflake, bool)>>;

    async fn upsert_channel_state(&self, channel_id: Snowflake, active: bool) -> Result<()>;

    async fn load_guild_settings(&self) -> Result<Vec<(Snowflake, GuildSettings)>>;

    async fn get_guild_settings(&self, guild_id: Snowflake) -> Result<Option<GuildSettings>>;

    async fn upsert_guild_settings(&self, guild_id: Snowflake, settings: &GuildSettings) -> Result<()>;

    async fn health_check(&self) -> Result<()>;
}

#[derive(sqlx::FromRow)]
struct ChannelStateRow {
    channel_id: i64,
    state: Option<bool>,
}

#[derive(sqlx::FromRow)]
struct GuildSettingsRow {
    guild_id: i64,
    enabled_services: Option<String>,
    mention_users: Option<bool>,
    delete_original: Option<bool>,
}

impl From<GuildSettingsRow> for GuildSettings {
    fn from(row: GuildSettingsRow) -> Self {
        GuildSettings {
            enabled_services: decode_services(row.enabled_services.as_deref()),
            mention_users: row.mention_users.unwrap_or(true),
            delete_original: row.delete_original.unwrap_or(true),
        }
    }
}

/// SQLite-backed settings repository over a single connection
#[derive(Clone)]
pub struct SqliteSettingsRepository {
    pool: SqlitePool,
}

impl SqliteSettingsRepository {
    /// Open (creating if needed) the database and bring its schema up to date
    pub async fn open(config: &StoreConfig) -> Result<Self> {
        info!("Opening settings store at {}", config.path);

        let options = if config.path == IN_MEMORY {
            SqliteConnectOptions::from_str("sqlite::memory:")?
        } else {
            SqliteConnectOptions::new()
                .filename(&config.path)
                .create_if_missing(true)
        }
        .busy_timeout(config.busy_timeout);

        // in-memory databases live and die with their connection
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(config.connection_timeout)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| {
                warn!("Failed to open settings store: {}", e);
                FixEmbedError::Database(e)
            })?;

        let repository = Self { pool };
        repository.init_schema().await?;
        info!("Settings store ready");
        Ok(repository)
    }

    /// Open a private in-memory store
    pub async fn in_memory() -> Result<Self> {
        Self::open(&StoreConfig {
            path: IN_MEMORY.to_string(),
            ..Default::default()
        })
        .await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS channel_states (channel_id INTEGER PRIMARY KEY, state BOOLEAN)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS guild_settings (
                guild_id         INTEGER PRIMARY KEY,
                enabled_services TEXT,
                mention_users    BOOLEAN DEFAULT 1,
                delete_original  BOOLEAN DEFAULT 1
            )"#,
        )
        .execute(&self.pool)
        .await?;

        // databases created by older releases lack the toggle columns
        for column in ["mention_users", "delete_original"] {
            let statement =
                format!("ALTER TABLE guild_settings ADD COLUMN {} BOOLEAN DEFAULT 1", column);
            match sqlx::query(&statement).execute(&self.pool).await {
                Ok(_) => info!("Added missing guild_settings column {}", column),
                Err(sqlx::Error::Database(db)) if db.message().contains("duplicate column") => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }
}

#[async_trait]
impl SettingsRepository for SqliteSettingsRepository {
    async fn load_channel_states(&self) -> Result<Vec<(Snowflake, bool)>> {
        let rows = sqlx::query_as::<_, ChannelStateRow>(
            "SELECT channel_id, state FROM channel_states",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| (from_db_id(row.channel_id), row.state.unwrap_or(true)))
            .collect())
    }

    async fn upsert_channel_state(&self, channel_id: Snowflake, active: bool) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO channel_states (channel_id, state) VALUES (?, ?)
               ON CONFLICT(channel_id) DO UPDATE SET state = excluded.state"#,
        )
        .bind(to_db_id(channel_id))
        .bind(active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_guild_settings(&self) -> Result<Vec<(Snowflake, GuildSettings)>> {
        let rows = sqlx::query_as::<_, GuildSettingsRow>(
            "SELECT guild_id, enabled_services, mention_users, delete_original FROM guild_settings",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| (from_db_id(row.guild_id), GuildSettings::from(row)))
            .collect())
    }

    async fn get_guild_settings(&self, guild_id: Snowflake) -> Result<Option<GuildSettings>> {
        let row = sqlx::query_as::<_, GuildSettingsRow>(
            "SELECT guild_id, enabled_services, mention_users, delete_original FROM guild_settings WHERE guild_id = ?",
        )
        .bind(to_db_id(guild_id))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(GuildSettings::from))
    }

    async fn upsert_guild_settings(&self, guild_id: Snowflake, settings: &GuildSettings) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO guild_settings (guild_id, enabled_services, mention_users, delete_original)
               VALUES (?, ?, ?, ?)
               ON CONFLICT(guild_id) DO UPDATE SET
                 enabled_services = excluded.enabled_services,
                 mention_users = excluded.mention_users,
                 delete_original = excluded.delete_original"#,
        )
        .bind(to_db_id(guild_id))
        .bind(encode_services(&settings.enabled_services))
        .bind(settings.mention_users)
        .bind(settings.delete_original)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Replicates in-memory settings into the repository.
///
/// Consistency windows:
/// - channel activation: the cache is authoritative and is updated before
///   the write is issued, so the store trails the cache by at most one write
///   plus the retry budget (`max_attempts * delay`). A failed write leaves
///   the store stale until the next toggle of that channel.
/// - guild settings: the caller holds the settings lock while the write
///   runs and only updates the cache on success, so the store never trails
///   what readers observe.
#[derive(Clone)]
pub struct DurableWriter {
    repository: Arc<dyn SettingsRepository>,
    policy: RetryPolicy,
    metrics: Option<Arc<Metrics>>,
}

impl DurableWriter {
    pub fn new(
        repository: Arc<dyn SettingsRepository>,
        policy: RetryPolicy,
        metrics: Option<Arc<Metrics>>,
    ) -> Self {
        Self {
            repository,
            policy,
            metrics,
        }
    }

    pub fn repository(&self) -> &Arc<dyn SettingsRepository> {
        &self.repository
    }

    pub async fn write_channel_state(&self, channel_id: Snowflake, active: bool) -> Result<()> {
        let result = self
            .policy
            .run(self.metrics.as_deref(), || {
                self.repository.upsert_channel_state(channel_id, active)
            })
            .await;
        self.observe(result, "channel state", channel_id)
    }

    pub async fn write_guild_settings(&self, guild_id: Snowflake, settings: &GuildSettings) -> Result<()> {
        let result = self
            .policy
            .run(self.metrics.as_deref(), || {
                self.repository.upsert_guild_settings(guild_id, settings)
            })
            .await;
        self.observe(result, "guild settings", guild_id)
    }

    fn observe(&self, result: Result<()>, what: &str, id: Snowflake) -> Result<()> {
        if let Err(e) = &result {
            warn!("Failed to persist {} for {}: {}", what, id, e);
            if let Some(metrics) = &self.metrics {
                metrics.record_store_write_error();
            }
        }
        result
    }
}
