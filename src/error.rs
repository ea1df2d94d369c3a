use thiserror::Error;

/// Result type for FixEmbed operations
pub type Result<T> = std::result::Result<T, FixEmbedError>;

/// Errors that can occur in the message pipeline
#[derive(Error, Debug)]
pub enum FixEmbedError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Settings store busy after {attempts} attempts")]
    StoreBusy { attempts: u32 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Platform error: {0}")]
    Platform(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Timed out waiting for send capacity")]
    SendTimeout,
}

impl FixEmbedError {
    /// Whether the error is SQLite reporting a busy or locked database
    pub fn is_store_busy(&self) -> bool {
        match self {
            FixEmbedError::Database(sqlx::Error::Database(db)) => {
                let busy_code = db
                    .code()
                    .and_then(|code| code.parse::<i32>().ok())
                    // extended result codes keep the primary code in the low byte
                    .map(|code| matches!(code & 0xff, 5 | 6))
                    .unwrap_or(false);
                busy_code || db.message().contains("database is locked")
            }
            _ => false,
        }
    }
}
