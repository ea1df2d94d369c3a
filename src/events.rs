//! Session events relayed from the gateway, and the replies to
//! configuration commands.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{
    cache::LoadReport,
    error::{FixEmbedError, Result},
    patterns::Service,
    platform::{GuildSnapshot, SessionSnapshot},
    service::{Author, InboundMessage, MessageProcessor, Outcome},
    settings::GuildSettings,
    utils::{parse_optional_snowflake, parse_snowflake, Snowflake},
};

/// Guild as it appears on the wire; ids are decimal strings
#[derive(Debug, Clone, Deserialize)]
pub struct WireGuild {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub text_channels: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireAuthor {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub global_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireMessage {
    pub id: String,
    pub channel_id: String,
    #[serde(default)]
    pub guild_id: Option<String>,
    pub author: WireAuthor,
    #[serde(default)]
    pub content: String,
}

/// Configuration command issued by a user
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum Command {
    /// Activate a channel, the invoking one when none is given
    Activate {
        #[serde(default)]
        channel_id: Option<String>,
    },
    Deactivate {
        #[serde(default)]
        channel_id: Option<String>,
    },
    SelectServices {
        services: Vec<String>,
    },
    ToggleMention,
    ToggleDelete,
    /// Flip every known text channel of the guild at once
    ToggleGuild,
    Settings,
    /// Credits for the mirror services
    About,
    /// Owner-only listing of joined guilds
    OwnerGuilds,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireInteraction {
    #[serde(default)]
    pub guild_id: Option<String>,
    pub channel_id: String,
    pub user_id: String,
    pub command: Command,
}

/// Event accepted by the ingress endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    Ready { guilds: Vec<WireGuild> },
    GuildCreate(WireGuild),
    MessageCreate(WireMessage),
    Interaction(WireInteraction),
}

impl From<WireGuild> for GuildSnapshot {
    fn from(guild: WireGuild) -> Self {
        Self {
            id: parse_snowflake(&guild.id),
            name: guild.name,
            text_channels: guild
                .text_channels
                .iter()
                .map(|id| parse_snowflake(id))
                .collect(),
        }
    }
}

impl From<WireMessage> for InboundMessage {
    fn from(message: WireMessage) -> Self {
        Self {
            id: parse_snowflake(&message.id),
            channel_id: parse_snowflake(&message.channel_id),
            guild_id: parse_optional_snowflake(message.guild_id.as_deref()),
            author: Author {
                id: parse_snowflake(&message.author.id),
                username: message.author.username,
                display_name: message.author.global_name,
            },
            content: message.content,
        }
    }
}

/// Response to a configuration command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InteractionReply {
    pub title: String,
    pub description: String,
    pub footer: Option<String>,
    /// Visible only to the invoking user
    pub ephemeral: bool,
}

/// Dispatches session events to the config store and the processor
pub struct EventHandler {
    processor: Arc<MessageProcessor>,
    owner_id: Option<Snowflake>,
    session: RwLock<SessionSnapshot>,
}

impl EventHandler {
    pub fn new(processor: Arc<MessageProcessor>, owner_id: Option<Snowflake>) -> Self {
        Self {
            processor,
            owner_id,
            session: RwLock::new(SessionSnapshot::default()),
        }
    }

    pub fn processor(&self) -> &Arc<MessageProcessor> {
        &self.processor
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.session.read().await.clone()
    }

    /// Handle one event; only interactions produce a reply
    pub async fn handle(&self, event: GatewayEvent) -> Result<Option<InteractionReply>> {
        match event {
            GatewayEvent::Ready { guilds } => {
                let snapshot = SessionSnapshot {
                    guilds: guilds.into_iter().map(GuildSnapshot::from).collect(),
                };
                self.on_ready(snapshot).await?;
                Ok(None)
            }
            GatewayEvent::GuildCreate(guild) => {
                self.on_guild_create(guild.into()).await?;
                Ok(None)
            }
            GatewayEvent::MessageCreate(message) => {
                self.on_message(&message.into()).await?;
                Ok(None)
            }
            GatewayEvent::Interaction(interaction) => {
                Ok(Some(self.on_interaction(interaction).await))
            }
        }
    }

    /// Replace the session snapshot and load both caches
    pub async fn on_ready(&self, snapshot: SessionSnapshot) -> Result<LoadReport> {
        info!("Session ready with {} guild(s)", snapshot.guilds.len());
        let report = self.processor.config().load(&snapshot).await?;
        *self.session.write().await = snapshot;
        Ok(report)
    }

    /// Track the guild and give it a default settings record if it has none
    pub async fn on_guild_create(&self, guild: GuildSnapshot) -> Result<bool> {
        let guild_id = guild.id;
        {
            let mut session = self.session.write().await;
            session.guilds.retain(|known| known.id != guild_id);
            session.guilds.push(guild);
        }
        self.processor.config().ensure_guild_defaults(guild_id).await
    }

    pub async fn on_message(&self, message: &InboundMessage) -> Result<Outcome> {
        let outcome = self.processor.process(message).await?;
        debug!("Message {} finished as {:?}", message.id, outcome);
        Ok(outcome)
    }

    pub async fn on_interaction(&self, interaction: WireInteraction) -> InteractionReply {
        let guild_id = parse_optional_snowflake(interaction.guild_id.as_deref());
        let channel_id = parse_snowflake(&interaction.channel_id);
        let user_id = parse_snowflake(&interaction.user_id);
        let config = self.processor.config();

        match interaction.command {
            Command::Activate { channel_id: target } => {
                let target = parse_optional_snowflake(target.as_deref()).unwrap_or(channel_id);
                self.set_channel(target, true).await
            }
            Command::Deactivate { channel_id: target } => {
                let target = parse_optional_snowflake(target.as_deref()).unwrap_or(channel_id);
                self.set_channel(target, false).await
            }
            Command::OwnerGuilds => self.owner_guilds(user_id).await,
            Command::About => self.reply("About", ABOUT_TEXT.to_string()),
            Command::Settings => {
                let settings = match guild_id {
                    Some(guild_id) => config.get_guild_settings(guild_id).await,
                    None => GuildSettings::default(),
                };
                self.reply("Settings", settings_summary(&settings))
            }
            command => {
                let Some(guild_id) = guild_id else {
                    return self.reply(
                        "Settings",
                        "This command can only be used in a server.".to_string(),
                    );
                };
                self.guild_command(guild_id, command).await
            }
        }
    }

    async fn guild_command(&self, guild_id: Snowflake, command: Command) -> InteractionReply {
        let config = self.processor.config();
        match command {
            Command::SelectServices { services } => {
                let services = services
                    .iter()
                    .filter_map(|name| match name.parse::<Service>() {
                        Ok(service) => Some(service),
                        Err(e) => {
                            warn!("Ignoring service selection for guild {}: {}", guild_id, e);
                            None
                        }
                    })
                    .collect();
                match config.set_enabled_services(guild_id, services).await {
                    Ok(settings) => self.reply(
                        "Service Settings",
                        format!("Saved service settings.\n{}", service_lines(&settings)),
                    ),
                    Err(e) => self.failed("Service Settings", guild_id, e),
                }
            }
            Command::ToggleMention => match config.toggle_mention_users(guild_id).await {
                Ok(settings) => self.reply(
                    "Mention Users Settings",
                    format!("Mention users: {}", on_off(settings.mention_users)),
                ),
                Err(e) => self.failed("Mention Users Settings", guild_id, e),
            },
            Command::ToggleDelete => match config.toggle_delete_original(guild_id).await {
                Ok(settings) => self.reply(
                    "Delivery Method Settings",
                    format!("Delete original: {}", on_off(settings.delete_original)),
                ),
                Err(e) => self.failed("Delivery Method Settings", guild_id, e),
            },
            Command::ToggleGuild => {
                let channels = self
                    .session
                    .read()
                    .await
                    .guild(guild_id)
                    .map(|guild| guild.text_channels.clone())
                    .unwrap_or_default();
                if channels.is_empty() {
                    return self.reply(
                        "FixEmbed Settings",
                        "No text channels are known for this server.".to_string(),
                    );
                }
                match config.toggle_guild_channels(&channels).await {
                    Ok(active) => self.reply(
                        "FixEmbed Settings",
                        format!(
                            "{} in {} channel(s).",
                            if active { "Activated" } else { "Deactivated" },
                            channels.len()
                        ),
                    ),
                    Err(e) => self.failed("FixEmbed Settings", guild_id, e),
                }
            }
            other => {
                warn!("Unexpected guild command {:?}", other);
                self.reply("Settings", "Unknown command.".to_string())
            }
        }
    }

    async fn set_channel(&self, channel_id: Snowflake, active: bool) -> InteractionReply {
        let title = self.processor.platform().identity().username.clone();
        if let Err(e) = self
            .processor
            .config()
            .set_channel_active(channel_id, active)
            .await
        {
            // the cached state already serves reads
            warn!("Failed to persist state of channel {}: {}", channel_id, e);
        }
        let description = if active {
            format!("✅ Activated for <#{}>!", channel_id)
        } else {
            format!("❌ Deactivated for <#{}>!", channel_id)
        };
        self.reply(&title, description)
    }

    async fn owner_guilds(&self, user_id: Snowflake) -> InteractionReply {
        let authorized = self.owner_id.is_some_and(|owner| owner == user_id);
        let description = if !authorized {
            warn!("User {} is not allowed to list guilds", user_id);
            "You are not authorized to use this command.".to_string()
        } else {
            let session = self.session.read().await;
            if session.guilds.is_empty() {
                "Bot is not in any guilds.".to_string()
            } else {
                session
                    .guilds
                    .iter()
                    .map(|guild| format!("{} (ID: {})", guild.name, guild.id))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        };
        InteractionReply {
            title: "Guilds".to_string(),
            description,
            footer: None,
            ephemeral: true,
        }
    }

    fn reply(&self, title: &str, description: String) -> InteractionReply {
        InteractionReply {
            title: title.to_string(),
            description,
            footer: Some(self.processor.platform().identity().footer_text()),
            ephemeral: false,
        }
    }

    fn failed(&self, title: &str, guild_id: Snowflake, e: FixEmbedError) -> InteractionReply {
        warn!("Failed to save settings for guild {}: {}", guild_id, e);
        self.reply(title, "Failed to save settings, please try again.".to_string())
    }
}

const ABOUT_TEXT: &str = "\
This bot fixes the lack of embed support in Discord.

**Quick Links**
- [Invite FixEmbed](https://discord.com/oauth2/authorize?client_id=1360722454678605914)
- [Star our Source Code on GitHub](https://github.com/ld3z/fixembed-go)

**Credits**
- [FxTwitter](https://github.com/FixTweet/FxTwitter), created by FixTweet
- [InstaFix](https://github.com/Wikidepia/InstaFix), created by Wikidepia
- [vxReddit](https://github.com/dylanpdx/vxReddit), created by dylanpdx
- [fixthreads](https://github.com/milanmdev/fixthreads), created by milanmdev
- [phixiv](https://github.com/thelaao/phixiv), created by thelaao
- [VixBluesky](https://github.com/Rapougnac/VixBluesky), created by Rapougnac";

fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

fn service_lines(settings: &GuildSettings) -> String {
    Service::ALL
        .iter()
        .map(|&service| {
            let marker = if settings.is_enabled(service) { "🟢" } else { "🔴" };
            format!("{} {}", marker, service)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn settings_summary(settings: &GuildSettings) -> String {
    format!(
        "{}\nMention users: {}\nDelete original: {}",
        service_lines(settings),
        on_off(settings.mention_users),
        on_off(settings.delete_original)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_message_event() {
        let event: GatewayEvent = serde_json::from_value(json!({
            "type": "message_create",
            "id": "1001",
            "channel_id": "20",
            "guild_id": "3",
            "author": { "id": "77", "username": "alice_u", "global_name": "Alice" },
            "content": "https://x.com/a/status/1"
        }))
        .unwrap();

        let GatewayEvent::MessageCreate(message) = event else {
            panic!("expected a message event");
        };
        let message = InboundMessage::from(message);
        assert_eq!(message.id, 1001);
        assert_eq!(message.guild_id, Some(3));
        assert_eq!(message.author.display_name(), "Alice");
    }

    #[test]
    fn test_decode_direct_message_without_guild() {
        let event: GatewayEvent = serde_json::from_value(json!({
            "type": "message_create",
            "id": "1",
            "channel_id": "2",
            "author": { "id": "3", "username": "bob" }
        }))
        .unwrap();
        let GatewayEvent::MessageCreate(message) = event else {
            panic!("expected a message event");
        };
        let message = InboundMessage::from(message);
        assert_eq!(message.guild_id, None);
        assert_eq!(message.content, "");
    }

    #[test]
    fn test_decode_interaction_commands() {
        let event: GatewayEvent = serde_json::from_value(json!({
            "type": "interaction",
            "guild_id": "3",
            "channel_id": "20",
            "user_id": "9",
            "command": { "name": "select_services", "services": ["Twitter", "Reddit"] }
        }))
        .unwrap();
        let GatewayEvent::Interaction(interaction) = event else {
            panic!("expected an interaction");
        };
        assert_eq!(
            interaction.command,
            Command::SelectServices {
                services: vec!["Twitter".into(), "Reddit".into()]
            }
        );

        let command: Command = serde_json::from_value(json!({ "name": "toggle_mention" })).unwrap();
        assert_eq!(command, Command::ToggleMention);

        let command: Command = serde_json::from_value(json!({ "name": "about" })).unwrap();
        assert_eq!(command, Command::About);

        let command: Command = serde_json::from_value(json!({ "name": "activate" })).unwrap();
        assert_eq!(command, Command::Activate { channel_id: None });
    }

    #[test]
    fn test_decode_ready_guilds() {
        let event: GatewayEvent = serde_json::from_value(json!({
            "type": "ready",
            "guilds": [{ "id": "5", "name": "home", "text_channels": ["50", "51"] }]
        }))
        .unwrap();
        let GatewayEvent::Ready { guilds } = event else {
            panic!("expected ready");
        };
        let guild = GuildSnapshot::from(guilds[0].clone());
        assert_eq!(guild.text_channels, vec![50, 51]);
    }

    #[test]
    fn test_unknown_event_type_rejected() {
        let result: std::result::Result<GatewayEvent, _> =
            serde_json::from_value(json!({ "type": "typing_start" }));
        assert!(result.is_err());
    }

    #[test]
    fn test_settings_summary() {
        let settings = GuildSettings::new(vec![Service::Twitter], false, true);
        let summary = settings_summary(&settings);
        assert!(summary.starts_with("🟢 Twitter\n🔴 Instagram"));
        assert!(summary.ends_with("Mention users: off\nDelete original: on"));
    }
}
