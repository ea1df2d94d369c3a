use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use fixembed::{
    cache::ConfigStore,
    error::{FixEmbedError, Result},
    events::{Command, EventHandler, WireInteraction},
    limiter::RateLimiter,
    metrics::Metrics,
    patterns::Service,
    platform::{BotIdentity, ChatPlatform, GuildSnapshot, SessionSnapshot},
    server::{router, AppState},
    service::{Author, IgnoreReason, InboundMessage, MessageProcessor, Outcome},
    settings::GuildSettings,
    store::{DurableWriter, RetryPolicy, SettingsRepository, SqliteSettingsRepository},
    utils::Snowflake,
};
use serde_json::json;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

const BOT_ID: Snowflake = 999;
const OWNER_ID: Snowflake = 42;
const GUILD_ID: Snowflake = 3;
const CHANNEL_ID: Snowflake = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Send { channel_id: Snowflake, content: String },
    Delete { channel_id: Snowflake, message_id: Snowflake },
    Suppress { channel_id: Snowflake, message_id: Snowflake },
}

/// Records every side effect instead of talking to a server
struct RecordingPlatform {
    identity: BotIdentity,
    calls: Mutex<Vec<Call>>,
    fail_sends: AtomicBool,
}

impl RecordingPlatform {
    fn new() -> Self {
        Self {
            identity: BotIdentity {
                id: BOT_ID,
                username: "FixEmbed".to_string(),
            },
            calls: Mutex::new(Vec::new()),
            fail_sends: AtomicBool::new(false),
        }
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatPlatform for RecordingPlatform {
    fn identity(&self) -> &BotIdentity {
        &self.identity
    }

    async fn send_message(&self, channel_id: Snowflake, content: &str) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(FixEmbedError::Platform("Missing Permissions".into()));
        }
        self.calls.lock().unwrap().push(Call::Send {
            channel_id,
            content: content.to_string(),
        });
        Ok(())
    }

    async fn delete_message(&self, channel_id: Snowflake, message_id: Snowflake) -> Result<()> {
        self.calls.lock().unwrap().push(Call::Delete {
            channel_id,
            message_id,
        });
        Ok(())
    }

    async fn suppress_embeds(&self, channel_id: Snowflake, message_id: Snowflake) -> Result<()> {
        self.calls.lock().unwrap().push(Call::Suppress {
            channel_id,
            message_id,
        });
        Ok(())
    }
}

struct Harness {
    events: Arc<EventHandler>,
    platform: Arc<RecordingPlatform>,
    config: Arc<ConfigStore>,
    repository: Arc<dyn SettingsRepository>,
    metrics: Arc<Metrics>,
}

async fn harness() -> Harness {
    let repository: Arc<dyn SettingsRepository> =
        Arc::new(SqliteSettingsRepository::in_memory().await.unwrap());
    let metrics = Arc::new(Metrics::new().unwrap());
    let writer = DurableWriter::new(repository.clone(), RetryPolicy::default(), Some(metrics.clone()));
    let config = Arc::new(ConfigStore::new(writer));
    let platform = Arc::new(RecordingPlatform::new());
    let processor = Arc::new(MessageProcessor::new(
        config.clone(),
        Arc::new(RateLimiter::default()),
        platform.clone(),
        metrics.clone(),
        CancellationToken::new(),
    ));
    let events = Arc::new(EventHandler::new(processor, Some(OWNER_ID)));

    Harness {
        events,
        platform,
        config,
        repository,
        metrics,
    }
}

fn message(content: &str) -> InboundMessage {
    InboundMessage {
        id: 1001,
        channel_id: CHANNEL_ID,
        guild_id: Some(GUILD_ID),
        author: Author {
            id: 77,
            username: "alice_u".to_string(),
            display_name: Some("Alice".to_string()),
        },
        content: content.to_string(),
    }
}

fn interaction(user_id: Snowflake, command: Command) -> WireInteraction {
    WireInteraction {
        guild_id: Some(GUILD_ID.to_string()),
        channel_id: CHANNEL_ID.to_string(),
        user_id: user_id.to_string(),
        command,
    }
}

fn home_guild() -> SessionSnapshot {
    SessionSnapshot {
        guilds: vec![GuildSnapshot {
            id: GUILD_ID,
            name: "home".to_string(),
            text_channels: vec![CHANNEL_ID, 21],
        }],
    }
}

#[tokio::test]
async fn test_rewrite_then_delete_original() {
    let h = harness().await;

    let outcome = h
        .events
        .on_message(&message("look https://twitter.com/alice/status/123"))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        Outcome::Processed {
            delivered: 1,
            disabled: 0
        }
    );
    assert_eq!(
        h.platform.calls(),
        vec![
            Call::Send {
                channel_id: CHANNEL_ID,
                content: "[Twitter • alice](https://fxtwitter.com/alice/status/123) | Sent by <@77>"
                    .to_string(),
            },
            Call::Delete {
                channel_id: CHANNEL_ID,
                message_id: 1001,
            },
        ]
    );
}

#[tokio::test]
async fn test_keep_original_suppresses_embeds_first() {
    let h = harness().await;
    h.config
        .set_guild_settings(GUILD_ID, GuildSettings::new(Service::ALL.to_vec(), false, false))
        .await
        .unwrap();

    h.events
        .on_message(&message("https://www.instagram.com/p/Cabc123/"))
        .await
        .unwrap();

    let calls = h.platform.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(
        calls[0],
        Call::Suppress {
            channel_id: CHANNEL_ID,
            message_id: 1001,
        }
    );
    match &calls[1] {
        Call::Send { content, .. } => assert!(content.ends_with("| Sent by Alice")),
        other => panic!("expected a send, got {:?}", other),
    }
}

#[tokio::test]
async fn test_multiple_links_delete_original_once() {
    let h = harness().await;

    let outcome = h
        .events
        .on_message(&message(
            "https://x.com/a/status/1 and https://bsky.app/profile/bob.bsky.social/post/3k",
        ))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        Outcome::Processed {
            delivered: 2,
            disabled: 0
        }
    );
    let calls = h.platform.calls();
    let sends = calls.iter().filter(|c| matches!(c, Call::Send { .. })).count();
    let deletes = calls.iter().filter(|c| matches!(c, Call::Delete { .. })).count();
    assert_eq!((sends, deletes), (2, 1));
}

#[tokio::test]
async fn test_deactivated_channel_makes_no_calls() {
    let h = harness().await;
    h.config.set_channel_active(CHANNEL_ID, false).await.unwrap();

    let outcome = h
        .events
        .on_message(&message("https://twitter.com/alice/status/123"))
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::Deactivated);
    assert!(h.platform.calls().is_empty());
}

#[tokio::test]
async fn test_suppressed_link_skips_whole_message() {
    let h = harness().await;

    let outcome = h
        .events
        .on_message(&message(
            "<https://twitter.com/a/status/1> https://twitter.com/b/status/2",
        ))
        .await
        .unwrap();

    assert_eq!(outcome, Outcome::Suppressed);
    assert!(h.platform.calls().is_empty());
}

#[tokio::test]
async fn test_disabled_service_is_skipped() {
    let h = harness().await;
    h.config
        .set_enabled_services(GUILD_ID, vec![Service::Reddit])
        .await
        .unwrap();

    let outcome = h
        .events
        .on_message(&message("https://twitter.com/alice/status/123"))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        Outcome::Processed {
            delivered: 0,
            disabled: 1
        }
    );
    assert!(h.platform.calls().is_empty());
}

#[tokio::test]
async fn test_own_and_direct_messages_ignored() {
    let h = harness().await;

    let mut own = message("https://twitter.com/alice/status/123");
    own.author.id = BOT_ID;
    assert_eq!(
        h.events.on_message(&own).await.unwrap(),
        Outcome::Ignored(IgnoreReason::OwnMessage)
    );

    let mut direct = message("https://twitter.com/alice/status/123");
    direct.guild_id = None;
    assert_eq!(
        h.events.on_message(&direct).await.unwrap(),
        Outcome::Ignored(IgnoreReason::DirectMessage)
    );

    assert!(h.platform.calls().is_empty());
}

#[tokio::test]
async fn test_failed_send_keeps_original() {
    let h = harness().await;
    h.platform.fail_sends.store(true, Ordering::SeqCst);

    let outcome = h
        .events
        .on_message(&message("https://twitter.com/alice/status/123"))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        Outcome::Processed {
            delivered: 0,
            disabled: 0
        }
    );
    assert!(h.platform.calls().is_empty());
}

#[tokio::test]
async fn test_ready_seeds_channels_without_writing_rows() {
    let h = harness().await;

    let report = h.events.on_ready(home_guild()).await.unwrap();

    assert_eq!(report.seeded_channels, 2);
    assert!(h.config.is_channel_active(CHANNEL_ID).await);
    assert!(h.repository.load_channel_states().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_guild_create_writes_defaults_once() {
    let h = harness().await;
    let guild = home_guild().guilds.remove(0);

    assert!(h.events.on_guild_create(guild.clone()).await.unwrap());
    assert!(!h.events.on_guild_create(guild).await.unwrap());

    let stored = h.repository.get_guild_settings(GUILD_ID).await.unwrap();
    assert_eq!(stored, Some(GuildSettings::default()));
    assert_eq!(h.events.snapshot().await.guilds.len(), 1);
}

#[tokio::test]
async fn test_toggle_guild_then_message_is_skipped() {
    let h = harness().await;
    h.events.on_ready(home_guild()).await.unwrap();

    let reply = h
        .events
        .on_interaction(interaction(77, Command::ToggleGuild))
        .await;
    assert_eq!(reply.description, "Deactivated in 2 channel(s).");

    let outcome = h
        .events
        .on_message(&message("https://twitter.com/alice/status/123"))
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Deactivated);

    let stored = h.repository.load_channel_states().await.unwrap();
    assert_eq!(stored.len(), 2);
    assert!(stored.iter().all(|(_, active)| !active));
}

#[tokio::test]
async fn test_activate_other_channel() {
    let h = harness().await;
    h.config.set_channel_active(55, false).await.unwrap();

    let reply = h
        .events
        .on_interaction(interaction(
            77,
            Command::Activate {
                channel_id: Some("55".to_string()),
            },
        ))
        .await;

    assert_eq!(reply.title, "FixEmbed");
    assert_eq!(reply.description, "✅ Activated for <#55>!");
    assert!(reply.footer.unwrap().starts_with("FixEmbed | v"));
    assert!(h.config.is_channel_active(55).await);
}

#[tokio::test]
async fn test_settings_toggles_persist() {
    let h = harness().await;

    let reply = h
        .events
        .on_interaction(interaction(77, Command::ToggleMention))
        .await;
    assert_eq!(reply.description, "Mention users: off");

    h.events
        .on_interaction(interaction(
            77,
            Command::SelectServices {
                services: vec!["twitter".into(), "bogus".into()],
            },
        ))
        .await;

    let stored = h
        .repository
        .get_guild_settings(GUILD_ID)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.enabled_services, vec![Service::Twitter]);
    assert!(!stored.mention_users);
    assert!(stored.delete_original);
}

#[tokio::test]
async fn test_about_lists_credits_without_guild() {
    let h = harness().await;
    let mut direct = interaction(77, Command::About);
    direct.guild_id = None;

    let reply = h.events.on_interaction(direct).await;

    assert_eq!(reply.title, "About");
    assert!(reply
        .description
        .starts_with("This bot fixes the lack of embed support in Discord."));
    assert!(reply.description.contains("[VixBluesky](https://github.com/Rapougnac/VixBluesky)"));
    assert!(!reply.ephemeral);
    assert!(reply.footer.unwrap().starts_with("FixEmbed | v"));
}

#[tokio::test]
async fn test_owner_guilds_requires_owner() {
    let h = harness().await;
    h.events.on_ready(home_guild()).await.unwrap();

    let denied = h
        .events
        .on_interaction(interaction(77, Command::OwnerGuilds))
        .await;
    assert!(denied.ephemeral);
    assert_eq!(denied.description, "You are not authorized to use this command.");

    let listed = h
        .events
        .on_interaction(interaction(OWNER_ID, Command::OwnerGuilds))
        .await;
    assert_eq!(listed.description, "home (ID: 3)");
}

fn app(h: &Harness) -> axum::Router {
    router(AppState {
        events: h.events.clone(),
        metrics: h.metrics.clone(),
    })
}

#[tokio::test]
async fn test_healthcheck_route() {
    let h = harness().await;

    let response = app(&h)
        .oneshot(Request::builder().uri("/healthcheck").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_metrics_route() {
    let h = harness().await;
    h.events
        .on_message(&message("no links here"))
        .await
        .unwrap();

    let response = app(&h)
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = String::from_utf8(body.to_vec()).unwrap();
    assert!(body.contains("fixembed_messages_total 1"));
}

#[tokio::test]
async fn test_message_event_is_accepted_and_processed() {
    let h = harness().await;
    let event = json!({
        "type": "message_create",
        "id": "1001",
        "channel_id": "20",
        "guild_id": "3",
        "author": { "id": "77", "username": "alice_u" },
        "content": "https://twitter.com/alice/status/123"
    });

    let response = app(&h)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/events")
                .header("content-type", "application/json")
                .body(Body::from(event.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    // handled on a spawned task
    for _ in 0..100 {
        if h.platform.calls().len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.platform.calls().len(), 2);
}

#[tokio::test]
async fn test_interaction_event_returns_reply() {
    let h = harness().await;
    let event = json!({
        "type": "interaction",
        "guild_id": "3",
        "channel_id": "20",
        "user_id": "77",
        "command": { "name": "deactivate" }
    });

    let response = app(&h)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/events")
                .header("content-type", "application/json")
                .body(Body::from(event.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let reply: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(reply["description"], "❌ Deactivated for <#20>!");
    assert!(!h.config.is_channel_active(CHANNEL_ID).await);
}

#[tokio::test]
async fn test_malformed_event_rejected() {
    let h = harness().await;

    let response = app(&h)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/events")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"type":"typing_start"}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert!(response.status().is_client_error());
}
