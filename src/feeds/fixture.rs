use super::{AssetHistory, ReturnSeriesProvider};
use crate::errors::{EngineError, EngineResult};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, serde::Deserialize)]
struct FixtureEntry {
    current_price: f64,
    returns: Vec<f64>,
}

/// Return series served from memory. Loaded from a JSON object of
/// `{ "TICKER": { "current_price": 1.0, "returns": [...] } }`.
#[derive(Debug, Clone, Default)]
pub struct FixtureProvider {
    series: BTreeMap<String, AssetHistory>,
}

impl FixtureProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_series(mut self, ticker: &str, current_price: f64, returns: Vec<f64>) -> Self {
        self.series.insert(
            ticker.to_string(),
            AssetHistory {
                ticker: ticker.to_string(),
                current_price,
                returns,
            },
        );
        self
    }

    pub fn from_json(raw: &str) -> EngineResult<Self> {
        let entries: BTreeMap<String, FixtureEntry> = serde_json::from_str(raw)?;
        let series = entries
            .into_iter()
            .map(|(ticker, e)| {
                let ticker = ticker.trim().to_ascii_uppercase();
                let history = AssetHistory {
                    ticker: ticker.clone(),
                    current_price: e.current_price,
                    returns: e.returns,
                };
                (ticker, history)
            })
            .collect();
        Ok(Self { series })
    }

    pub fn from_file(path: &Path) -> EngineResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("fixture {}: {e}", path.display())))?;
        let provider = Self::from_json(&raw)?;
        let tickers: Vec<&str> = provider.tickers().collect();
        tracing::info!(path = %path.display(), tickers = %tickers.join(","), "return fixture loaded");
        Ok(provider)
    }

    pub fn tickers(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }
}

impl ReturnSeriesProvider for FixtureProvider {
    async fn fetch_history(&self, ticker: &str, lookback_days: u32) -> EngineResult<AssetHistory> {
        let mut history = self
            .series
            .get(ticker)
            .cloned()
            .ok_or_else(|| EngineError::unavailable(ticker, "not in fixture"))?;

        let keep = lookback_days as usize;
        if history.returns.len() > keep {
            history.returns.drain(..history.returns.len() - keep);
        }
        Ok(history)
    }
}
