// Debug binary to check each startup dependency in isolation
// Run this with: cargo run --bin debug_startup

use anyhow::Result;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fixembed::{
    config::AppConfig,
    platform::{ChatPlatform, DiscordRestClient},
    store::{SettingsRepository, SqliteSettingsRepository},
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("🚀 Starting debug startup test...");
    let start_time = Instant::now();

    let config_path = std::env::var("CONFIG_PATH").ok();
    let config = AppConfig::load(config_path.as_deref())?;

    test_store(&config).await?;
    test_platform(&config).await?;

    info!("✅ All checks completed in {:?}", start_time.elapsed());
    Ok(())
}

async fn test_store(config: &AppConfig) -> Result<()> {
    let store_config = config.store_config();
    info!("🔍 Opening settings store at {}", store_config.path);

    let open_start = Instant::now();
    let result = tokio::time::timeout(
        Duration::from_secs(10),
        SqliteSettingsRepository::open(&store_config),
    )
    .await;

    let repository = match result {
        Ok(Ok(repository)) => {
            info!("✅ Store opened in {:?}", open_start.elapsed());
            repository
        }
        Ok(Err(e)) => {
            error!("❌ Store open failed: {}", e);
            return Err(e.into());
        }
        Err(_) => {
            error!("❌ Store open timed out after 10 seconds");
            error!("Another process may be holding a lock on the database file");
            return Err(anyhow::anyhow!("settings store open timeout"));
        }
    };

    repository.health_check().await?;
    let channels = repository.load_channel_states().await?;
    let guilds = repository.load_guild_settings().await?;
    info!(
        "✅ Store readable: {} channel states, {} guild settings",
        channels.len(),
        guilds.len()
    );
    Ok(())
}

async fn test_platform(config: &AppConfig) -> Result<()> {
    let token = match config.token() {
        Ok(token) => token,
        Err(e) => {
            warn!("Skipping platform check: {}", e);
            return Ok(());
        }
    };

    info!("🔍 Resolving bot identity via {}", config.api_base);
    let connect_start = Instant::now();
    match DiscordRestClient::connect(token, config.api_base.clone()).await {
        Ok(client) => {
            let identity = client.identity();
            info!(
                "✅ Authenticated as {} ({}) in {:?}",
                identity.username,
                identity.id,
                connect_start.elapsed()
            );
            Ok(())
        }
        Err(e) => {
            error!("❌ Platform check failed: {}", e);
            Err(e.into())
        }
    }
}
