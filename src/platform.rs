//! Chat-platform capabilities consumed by the pipeline.

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::{
    error::{FixEmbedError, Result},
    utils::{parse_snowflake, Snowflake},
    VERSION,
};

/// Default Discord REST endpoint
pub const DISCORD_API_BASE: &str = "https://discord.com/api/v10";

/// Discord's SUPPRESS_EMBEDS message flag
const SUPPRESS_EMBEDS: u64 = 1 << 2;

/// The bot's own account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotIdentity {
    pub id: Snowflake,
    pub username: String,
}

impl BotIdentity {
    /// Footer text used on configuration replies
    pub fn footer_text(&self) -> String {
        format!("{} | v{}", self.username, VERSION)
    }
}

/// A guild as seen by the live session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GuildSnapshot {
    pub id: Snowflake,
    pub name: String,
    pub text_channels: Vec<Snowflake>,
}

/// Guilds and text channels known to the session at ready time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub guilds: Vec<GuildSnapshot>,
}

impl SessionSnapshot {
    pub fn guild(&self, guild_id: Snowflake) -> Option<&GuildSnapshot> {
        self.guilds.iter().find(|guild| guild.id == guild_id)
    }

    pub fn text_channels(&self) -> impl Iterator<Item = Snowflake> + '_ {
        self.guilds
            .iter()
            .flat_map(|guild| guild.text_channels.iter().copied())
    }
}

/// Side effects the processor delegates to the platform
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    fn identity(&self) -> &BotIdentity;

    async fn send_message(&self, channel_id: Snowflake, content: &str) -> Result<()>;

    async fn delete_message(&self, channel_id: Snowflake, message_id: Snowflake) -> Result<()>;

    /// Hide the auto-embed of a message, leaving its content unchanged
    async fn suppress_embeds(&self, channel_id: Snowflake, message_id: Snowflake) -> Result<()>;
}

#[derive(Deserialize)]
struct CurrentUser {
    id: String,
    username: String,
}

/// Discord REST implementation of [`ChatPlatform`]
pub struct DiscordRestClient {
    client: reqwest::Client,
    bot_token: String,
    api_base: String,
    identity: BotIdentity,
}

impl DiscordRestClient {
    /// Build a client and resolve the bot's identity from `/users/@me`
    pub async fn connect(bot_token: impl Into<String>, api_base: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        let mut rest = Self {
            client,
            bot_token: bot_token.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            identity: BotIdentity {
                id: 0,
                username: String::new(),
            },
        };

        let url = format!("{}/users/@me", rest.api_base);
        let user: CurrentUser = rest.request(Method::GET, &url, None).await?.json().await?;
        rest.identity = BotIdentity {
            id: parse_snowflake(&user.id),
            username: user.username,
        };
        info!("Authenticated as {} ({})", rest.identity.username, rest.identity.id);
        Ok(rest)
    }

    async fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response> {
        debug!("Discord {} {}", method, url);
        let mut request = self
            .client
            .request(method, url)
            .header("Authorization", format!("Bot {}", self.bot_token));
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<failed to read response body: {}>", e));
            warn!("Discord request failed ({}): {}", status, body);
            return Err(FixEmbedError::Platform(format!(
                "Discord request failed ({}): {}",
                status, body
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl ChatPlatform for DiscordRestClient {
    fn identity(&self) -> &BotIdentity {
        &self.identity
    }

    async fn send_message(&self, channel_id: Snowflake, content: &str) -> Result<()> {
        let url = format!("{}/channels/{}/messages", self.api_base, channel_id);
        self.request(Method::POST, &url, Some(json!({ "content": content })))
            .await?;
        Ok(())
    }

    async fn delete_message(&self, channel_id: Snowflake, message_id: Snowflake) -> Result<()> {
        let url = format!(
            "{}/channels/{}/messages/{}",
            self.api_base, channel_id, message_id
        );
        self.request(Method::DELETE, &url, None).await?;
        Ok(())
    }

    async fn suppress_embeds(&self, channel_id: Snowflake, message_id: Snowflake) -> Result<()> {
        let url = format!(
            "{}/channels/{}/messages/{}",
            self.api_base, channel_id, message_id
        );
        self.request(Method::PATCH, &url, Some(json!({ "flags": SUPPRESS_EMBEDS })))
            .await?;
        Ok(())
    }
}
