use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::warn;

/// Platform snowflake identifier (guilds, channels, messages, users)
pub type Snowflake = u64;

/// Time utilities for the send window and health reporting
#[derive(Debug, Clone, Copy)]
pub struct TimeSource {
    _private: (),
}

impl TimeSource {
    pub fn new() -> Self {
        Self { _private: () }
    }

    /// Monotonic now; follows tokio's paused clock in tests
    pub fn now(&self) -> Instant {
        Instant::now()
    }

    /// Get the current time as a DateTime<Utc>
    pub fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

impl Default for TimeSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a snowflake string, yielding 0 for malformed input.
///
/// Zero never names a real guild or channel, so callers treat it as a
/// no-op identifier instead of rejecting the event.
pub fn parse_snowflake(raw: &str) -> Snowflake {
    match raw.trim().parse::<Snowflake>() {
        Ok(id) => id,
        Err(e) => {
            warn!("Malformed snowflake {:?}: {}", raw, e);
            0
        }
    }
}

/// Parse an optional snowflake; empty strings count as absent
pub fn parse_optional_snowflake(raw: Option<&str>) -> Option<Snowflake> {
    raw.filter(|s| !s.trim().is_empty()).map(parse_snowflake)
}

/// SQLite stores INTEGER as i64; snowflakes stay below 2^63
pub(crate) fn to_db_id(id: Snowflake) -> i64 {
    id as i64
}

pub(crate) fn from_db_id(id: i64) -> Snowflake {
    id as Snowflake
}
