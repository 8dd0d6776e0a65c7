use super::OptionChainProvider;
use crate::errors::{EngineError, EngineResult};
use crate::portfolio::options::OptionQuote;
use std::path::Path;

/// Call quotes loaded once from a JSON array of `OptionQuote` records.
#[derive(Debug, Clone, Default)]
pub struct QuoteFileProvider {
    quotes: Vec<OptionQuote>,
}

impl QuoteFileProvider {
    pub fn from_quotes(quotes: Vec<OptionQuote>) -> Self {
        Self { quotes }
    }

    pub fn from_json(raw: &str) -> EngineResult<Self> {
        let mut quotes: Vec<OptionQuote> = serde_json::from_str(raw)?;
        for q in quotes.iter_mut() {
            q.underlying = q.underlying.trim().to_ascii_uppercase();
        }
        Ok(Self { quotes })
    }

    pub fn from_file(path: &Path) -> EngineResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("option quotes {}: {e}", path.display())))?;
        let provider = Self::from_json(&raw)?;
        tracing::info!(path = %path.display(), quotes = provider.quotes.len(), "option quotes loaded");
        Ok(provider)
    }
}

impl OptionChainProvider for QuoteFileProvider {
    async fn option_quotes(&self, underlying: &str) -> EngineResult<Vec<OptionQuote>> {
        Ok(self
            .quotes
            .iter()
            .filter(|q| q.underlying == underlying)
            .cloned()
            .collect())
    }
}
