//! FixEmbed
//!
//! Rewrites social-media links posted in chat to embed-friendly mirror
//! hosts. Per-channel activation and per-guild settings are cached in memory
//! and persisted to SQLite; outbound sends share one sliding-window limiter.

pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod limiter;
pub mod metrics;
pub mod patterns;
pub mod platform;
pub mod server;
pub mod service;
pub mod settings;
pub mod store;
pub mod utils;

/// Crate version, shown in reply footers
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// Re-export main types
pub use cache::ConfigStore;
pub use config::AppConfig;
pub use error::{FixEmbedError, Result};
pub use events::{EventHandler, GatewayEvent};
pub use limiter::RateLimiter;
pub use patterns::{PatternEngine, Service};
pub use service::MessageProcessor;
