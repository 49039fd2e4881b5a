use thiserror::Error;

pub type TavernResult<T> = Result<T, TavernError>;

#[derive(Error, Debug)]
pub enum TavernError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// Volatile tier not configured, unreachable or timed out. Callers on the
    /// read paths turn this into a fallback; it is never fatal there.
    #[error("Volatile tier unavailable: {0}")]
    TierUnavailable(String),

    #[error("Volatile tier rejected entry: {0}")]
    Cache(String),

    /// Durable store write failed or was rejected.
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Expiry notification failed: {0}")]
    Notification(String),

    #[error("Unknown setting: {0}")]
    UnknownSetting(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
