use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    cache::ConfigStore,
    error::{FixEmbedError, Result},
    limiter::RateLimiter,
    metrics::Metrics,
    patterns::{LinkMatch, PatternEngine, Scan},
    platform::ChatPlatform,
    settings::GuildSettings,
    utils::Snowflake,
};

/// Author of an inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub id: Snowflake,
    pub username: String,
    pub display_name: Option<String>,
}

impl Author {
    /// Name shown when users are not mentioned
    pub fn display_name(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.username)
    }
}

/// A message as delivered by the platform session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub id: Snowflake,
    pub channel_id: Snowflake,
    pub guild_id: Option<Snowflake>,
    pub author: Author,
    pub content: String,
}

/// Why a message was dropped before any link handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    OwnMessage,
    DirectMessage,
}

/// Terminal state of one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Ignored(IgnoreReason),
    Deactivated,
    Suppressed,
    NoLinks,
    Processed {
        /// Rewrites successfully sent
        delivered: usize,
        /// Links skipped because their service is disabled
        disabled: usize,
    },
}

/// Turns inbound messages into rewritten replies
pub struct MessageProcessor {
    config: Arc<ConfigStore>,
    engine: PatternEngine,
    limiter: Arc<RateLimiter>,
    platform: Arc<dyn ChatPlatform>,
    metrics: Arc<Metrics>,
    shutdown: CancellationToken,
}

impl MessageProcessor {
    pub fn new(
        config: Arc<ConfigStore>,
        limiter: Arc<RateLimiter>,
        platform: Arc<dyn ChatPlatform>,
        metrics: Arc<Metrics>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            engine: PatternEngine::new(),
            limiter,
            platform,
            metrics,
            shutdown,
        }
    }

    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    pub fn platform(&self) -> &Arc<dyn ChatPlatform> {
        &self.platform
    }

    /// Run one message through the pipeline.
    ///
    /// Platform failures are logged and counted, never returned; the only
    /// error is a send wait cut short by shutdown.
    pub async fn process(&self, message: &InboundMessage) -> Result<Outcome> {
        self.metrics.record_message();

        if message.author.id == self.platform.identity().id {
            return Ok(self.skip(Outcome::Ignored(IgnoreReason::OwnMessage), "own_message"));
        }
        let guild_id = match message.guild_id {
            Some(guild_id) => guild_id,
            None => {
                let outcome = Outcome::Ignored(IgnoreReason::DirectMessage);
                return Ok(self.skip(outcome, "direct_message"));
            }
        };

        debug!(
            "Processing message {} guild={} channel={} author={}",
            message.id, guild_id, message.channel_id, message.author.id
        );

        let settings = self.config.get_guild_settings(guild_id).await;
        debug!(
            "Guild {} settings: services={:?} mention_users={} delete_original={}",
            guild_id, settings.enabled_services, settings.mention_users, settings.delete_original
        );

        if !self.config.is_channel_active(message.channel_id).await {
            debug!("Channel {} is deactivated, skipping message", message.channel_id);
            return Ok(self.skip(Outcome::Deactivated, "deactivated"));
        }

        let links = match self.engine.scan(&message.content) {
            Scan::Suppressed => {
                debug!("Message {} contains a suppressed link, skipping", message.id);
                return Ok(self.skip(Outcome::Suppressed, "suppressed"));
            }
            Scan::Links(links) if links.is_empty() => {
                return Ok(self.skip(Outcome::NoLinks, "no_links"));
            }
            Scan::Links(links) => links,
        };
        debug!("Found {} link(s) in message {}", links.len(), message.id);

        let mut delivered = 0;
        let mut disabled = 0;
        let mut original_handled = false;

        for link in &links {
            if !settings.is_enabled(link.service) {
                debug!("Service {} is not enabled for guild {}", link.service, guild_id);
                self.metrics.record_link_disabled(link.service.as_str());
                disabled += 1;
                continue;
            }

            let reply = format_reply(link, &message.author, &settings);
            debug!("Rewrote {} -> {}", link.original_url, link.rewritten_url);

            let sent = if settings.delete_original {
                let sent = self.send(message.channel_id, &reply).await?;
                if sent && !original_handled {
                    original_handled = true;
                    self.delete_original(message).await;
                }
                sent
            } else {
                if !original_handled {
                    original_handled = true;
                    self.suppress_original(message).await;
                }
                self.send(message.channel_id, &reply).await?
            };

            if sent {
                delivered += 1;
                self.metrics.record_link_rewritten(link.service.as_str());
            }
        }

        Ok(Outcome::Processed { delivered, disabled })
    }

    fn skip(&self, outcome: Outcome, reason: &str) -> Outcome {
        self.metrics.record_skipped(reason);
        outcome
    }

    /// Rate-limited send; `Ok(false)` when the platform rejected it
    async fn send(&self, channel_id: Snowflake, content: &str) -> Result<bool> {
        let result = self
            .limiter
            .send(&self.shutdown, || self.platform.send_message(channel_id, content))
            .await;
        match result {
            Ok(()) => Ok(true),
            Err(FixEmbedError::Cancelled) => Err(FixEmbedError::Cancelled),
            Err(e) => {
                warn!("Failed to send rewritten link to channel {}: {}", channel_id, e);
                self.metrics.record_platform_error("send");
                Ok(false)
            }
        }
    }

    async fn delete_original(&self, message: &InboundMessage) {
        if let Err(e) = self
            .platform
            .delete_message(message.channel_id, message.id)
            .await
        {
            warn!("Failed to delete original message {}: {}", message.id, e);
            self.metrics.record_platform_error("delete");
        }
    }

    async fn suppress_original(&self, message: &InboundMessage) {
        if let Err(e) = self
            .platform
            .suppress_embeds(message.channel_id, message.id)
            .await
        {
            warn!("Failed to suppress embeds on message {}: {}", message.id, e);
            self.metrics.record_platform_error("suppress_embeds");
        }
    }
}

/// `[<label>](<rewritten>) | Sent by <attribution>`
pub fn format_reply(link: &LinkMatch, author: &Author, settings: &GuildSettings) -> String {
    let attribution = if settings.mention_users {
        format!("<@{}>", author.id)
    } else {
        author.display_name().to_string()
    };
    format!(
        "[{}]({}) | Sent by {}",
        link.display_label, link.rewritten_url, attribution
    )
}
