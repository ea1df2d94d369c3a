use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{
    error::Result,
    patterns::Service,
    platform::SessionSnapshot,
    settings::GuildSettings,
    store::DurableWriter,
    utils::Snowflake,
};

/// Counts from a startup load
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub stored_channels: usize,
    pub seeded_channels: usize,
    pub guilds: usize,
}

/// In-memory channel activation and guild settings, replicated to the
/// durable store.
///
/// The channel cache is the serving truth: toggles land in memory first and
/// are then written through, and a failed write is not rolled back. Guild
/// settings are written to the store first while the settings lock is held,
/// so readers never observe a record that is not durable yet.
pub struct ConfigStore {
    channels: RwLock<HashMap<Snowflake, bool>>,
    guilds: RwLock<HashMap<Snowflake, GuildSettings>>,
    writer: DurableWriter,
}

impl ConfigStore {
    pub fn new(writer: DurableWriter) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            guilds: RwLock::new(HashMap::new()),
            writer,
        }
    }

    /// Populate both caches from the store, then mark every session text
    /// channel the store has never seen as active. Seeded entries are not
    /// written back; they materialize on their first explicit toggle.
    /// Keys already cached keep their value, so a reload never reverts a
    /// toggle the store failed to record.
    pub async fn load(&self, snapshot: &SessionSnapshot) -> Result<LoadReport> {
        let repository = self.writer.repository();
        let stored = repository.load_channel_states().await?;
        let settings = repository.load_guild_settings().await?;

        let mut report = LoadReport {
            stored_channels: stored.len(),
            guilds: settings.len(),
            ..Default::default()
        };

        {
            let mut channels = self.channels.write().await;
            // cached entries win on a reload; they may hold toggles whose
            // durable write failed
            for (channel_id, active) in stored {
                channels.entry(channel_id).or_insert(active);
            }
            for channel_id in snapshot.text_channels() {
                if !channels.contains_key(&channel_id) {
                    channels.insert(channel_id, true);
                    report.seeded_channels += 1;
                }
            }
        }

        {
            let mut guilds = self.guilds.write().await;
            for (guild_id, record) in settings {
                guilds.entry(guild_id).or_insert(record);
            }
        }

        info!(
            "Loaded {} stored channel states, seeded {} channels, loaded {} guild settings",
            report.stored_channels, report.seeded_channels, report.guilds
        );
        Ok(report)
    }

    /// Channels are active unless explicitly deactivated
    pub async fn is_channel_active(&self, channel_id: Snowflake) -> bool {
        self.channels
            .read()
            .await
            .get(&channel_id)
            .copied()
            .unwrap_or(true)
    }

    /// Flip a channel; the new state serves reads even if persisting it fails
    pub async fn set_channel_active(&self, channel_id: Snowflake, active: bool) -> Result<()> {
        self.channels.write().await.insert(channel_id, active);
        debug!("Channel {} active={}", channel_id, active);
        self.writer.write_channel_state(channel_id, active).await
    }

    /// Whether every listed channel is currently active
    pub async fn guild_channels_active(&self, channel_ids: &[Snowflake]) -> bool {
        let channels = self.channels.read().await;
        channel_ids
            .iter()
            .all(|id| channels.get(id).copied().unwrap_or(true))
    }

    /// Deactivate all listed channels if they are all active, otherwise
    /// activate all of them. Returns the state applied.
    ///
    /// Every channel is attempted; the first persistence error is returned.
    pub async fn toggle_guild_channels(&self, channel_ids: &[Snowflake]) -> Result<bool> {
        let new_state = !self.guild_channels_active(channel_ids).await;
        let mut first_error = None;
        for &channel_id in channel_ids {
            if let Err(e) = self.set_channel_active(channel_id, new_state).await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(new_state),
        }
    }

    /// Cache first, then the store; defaults when neither knows the guild.
    /// A store miss does not create a row.
    pub async fn get_guild_settings(&self, guild_id: Snowflake) -> GuildSettings {
        if let Some(settings) = self.guilds.read().await.get(&guild_id) {
            return settings.clone();
        }

        match self.writer.repository().get_guild_settings(guild_id).await {
            Ok(Some(settings)) => {
                let mut guilds = self.guilds.write().await;
                // a concurrent writer may have filled the entry meanwhile
                guilds.entry(guild_id).or_insert(settings).clone()
            }
            Ok(None) => GuildSettings::default(),
            Err(e) => {
                warn!("Failed to read settings for guild {}: {}", guild_id, e);
                GuildSettings::default()
            }
        }
    }

    /// Persist then cache a full settings record. On failure the cached
    /// record is left as it was.
    pub async fn set_guild_settings(
        &self,
        guild_id: Snowflake,
        settings: GuildSettings,
    ) -> Result<GuildSettings> {
        let settings = settings.normalized();
        let mut guilds = self.guilds.write().await;
        self.writer.write_guild_settings(guild_id, &settings).await?;
        guilds.insert(guild_id, settings.clone());
        Ok(settings)
    }

    /// Create the default record for a guild unless one exists in memory or
    /// in the store. Returns whether a record was created.
    pub async fn ensure_guild_defaults(&self, guild_id: Snowflake) -> Result<bool> {
        let mut guilds = self.guilds.write().await;
        if guilds.contains_key(&guild_id) {
            return Ok(false);
        }

        if let Some(existing) = self.writer.repository().get_guild_settings(guild_id).await? {
            guilds.insert(guild_id, existing);
            return Ok(false);
        }

        let defaults = GuildSettings::default();
        self.writer.write_guild_settings(guild_id, &defaults).await?;
        guilds.insert(guild_id, defaults);
        info!("Created default settings for guild {}", guild_id);
        Ok(true)
    }

    pub async fn set_enabled_services(
        &self,
        guild_id: Snowflake,
        services: Vec<Service>,
    ) -> Result<GuildSettings> {
        self.update_guild_settings(guild_id, |mut settings| {
            settings.enabled_services = services;
            settings
        })
        .await
    }

    pub async fn toggle_mention_users(&self, guild_id: Snowflake) -> Result<GuildSettings> {
        self.update_guild_settings(guild_id, |mut settings| {
            settings.mention_users = !settings.mention_users;
            settings
        })
        .await
    }

    pub async fn toggle_delete_original(&self, guild_id: Snowflake) -> Result<GuildSettings> {
        self.update_guild_settings(guild_id, |mut settings| {
            settings.delete_original = !settings.delete_original;
            settings
        })
        .await
    }

    pub async fn health_check(&self) -> Result<()> {
        self.writer.repository().health_check().await
    }

    /// Read-modify-write under the settings lock so concurrent toggles on
    /// one guild cannot lose each other's updates
    async fn update_guild_settings<F>(&self, guild_id: Snowflake, update: F) -> Result<GuildSettings>
    where
        F: FnOnce(GuildSettings) -> GuildSettings,
    {
        let mut guilds = self.guilds.write().await;
        let current = match guilds.get(&guild_id) {
            Some(settings) => settings.clone(),
            None => self
                .writer
                .repository()
                .get_guild_settings(guild_id)
                .await?
                .unwrap_or_default(),
        };

        let updated = update(current).normalized();
        self.writer.write_guild_settings(guild_id, &updated).await?;
        guilds.insert(guild_id, updated.clone());
        Ok(updated)
    }
}
