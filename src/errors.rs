/// Domain-specific error types for the allocation engine.
/// Per-asset failures exclude one asset and the batch continues.
/// Run-level failures abort the run and surface unchanged to the caller.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("invalid odds: {0}")]
    InvalidOdds(String),

    #[error("data unavailable for {ticker}: {reason}")]
    DataUnavailable { ticker: String, reason: String },

    #[error("invalid portfolio value: {0}")]
    InvalidPortfolioValue(f64),

    #[error("config error: {0}")]
    Config(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("channel closed: {0}")]
    ChannelClosed(String),
}

impl EngineError {
    /// True for failures that only disqualify a single asset from the batch.
    #[inline]
    pub fn is_per_asset(&self) -> bool {
        matches!(
            self,
            EngineError::InsufficientData(_)
                | EngineError::InvalidOdds(_)
                | EngineError::DataUnavailable { .. }
        )
    }

    pub fn unavailable(ticker: &str, reason: impl Into<String>) -> Self {
        EngineError::DataUnavailable {
            ticker: ticker.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        EngineError::Network(e.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Parse(e.to_string())
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(e: rusqlite::Error) -> Self {
        EngineError::Database(e.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Network(e.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
