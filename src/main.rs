use anyhow::Result;
use std::{net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, signal};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fixembed::{
    cache::ConfigStore,
    config::AppConfig,
    events::EventHandler,
    limiter::RateLimiter,
    metrics::Metrics,
    platform::{ChatPlatform, DiscordRestClient},
    server::{router, AppState},
    service::MessageProcessor,
    store::{DurableWriter, SettingsRepository, SqliteSettingsRepository},
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fixembed=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting FixEmbed v{}", fixembed::VERSION);

    let config_path = std::env::var("CONFIG_PATH").ok();
    let config = AppConfig::load(config_path.as_deref())?;
    let token = config.token()?.to_string();

    let metrics = Arc::new(Metrics::new()?);
    let shutdown = CancellationToken::new();
    let events = Arc::new(create_handler(&config, &token, metrics.clone(), shutdown.clone()).await?);
    let state = AppState { events, metrics };

    let http_addr = config.http_addr.parse::<SocketAddr>()?;
    let listener = TcpListener::bind(http_addr).await?;
    info!("HTTP server listening on {}", http_addr);

    let server = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.clone().cancelled_owned());

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                warn!("HTTP server error: {}", e);
            }
        }
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    // wakes any send still waiting on the limiter
    shutdown.cancel();
    info!("Service stopped");
    Ok(())
}

async fn create_handler(
    config: &AppConfig,
    token: &str,
    metrics: Arc<Metrics>,
    shutdown: CancellationToken,
) -> Result<EventHandler> {
    let store_config = config.store_config();
    info!("Opening settings store at {}", store_config.path);
    let repository: Arc<dyn SettingsRepository> =
        Arc::new(SqliteSettingsRepository::open(&store_config).await?);
    let writer = DurableWriter::new(repository, store_config.retry, Some(metrics.clone()));
    let config_store = Arc::new(ConfigStore::new(writer));

    let platform: Arc<dyn ChatPlatform> =
        Arc::new(DiscordRestClient::connect(token, config.api_base.clone()).await?);

    let limiter = Arc::new(RateLimiter::new(config.rate_limit_policy()).with_metrics(metrics.clone()));
    let processor = Arc::new(MessageProcessor::new(
        config_store,
        limiter,
        platform,
        metrics,
        shutdown,
    ));

    Ok(EventHandler::new(processor, config.owner_id))
}
