pub mod fixture;
pub mod quotes;
pub mod yahoo;

use crate::errors::EngineResult;
use crate::portfolio::options::OptionQuote;
use std::future::Future;

/// Price history for one ticker, oldest first, reduced to simple returns.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct AssetHistory {
    pub ticker: String,
    /// Latest close
    pub current_price: f64,
    pub returns: Vec<f64>,
}

impl AssetHistory {
    /// Simple returns between consecutive closes. Non-positive closes end a
    /// period without producing a return.
    pub fn from_closes(ticker: &str, closes: &[f64]) -> Option<Self> {
        let current_price = *closes.last()?;
        let returns = closes
            .windows(2)
            .filter(|w| w[0] > 0.0)
            .map(|w| w[1] / w[0] - 1.0)
            .collect();
        Some(Self {
            ticker: ticker.to_string(),
            current_price,
            returns,
        })
    }
}

/// Source of return series. A failure for one ticker is reported as a
/// per-asset error and never affects other tickers.
pub trait ReturnSeriesProvider: Send + Sync {
    fn fetch_history(
        &self,
        ticker: &str,
        lookback_days: u32,
    ) -> impl Future<Output = EngineResult<AssetHistory>> + Send;
}

/// Source of call quotes for an underlying.
pub trait OptionChainProvider: Send + Sync {
    fn option_quotes(&self, underlying: &str) -> impl Future<Output = EngineResult<Vec<OptionQuote>>> + Send;
}

/// Options book disabled.
pub struct NoOptions;

impl OptionChainProvider for NoOptions {
    async fn option_quotes(&self, _underlying: &str) -> EngineResult<Vec<OptionQuote>> {
        Ok(Vec::new())
    }
}

/// Return-series source selected at startup.
pub enum MarketData {
    Yahoo(yahoo::YahooChartProvider),
    Fixture(fixture::FixtureProvider),
}

impl ReturnSeriesProvider for MarketData {
    async fn fetch_history(&self, ticker: &str, lookback_days: u32) -> EngineResult<AssetHistory> {
        match self {
            MarketData::Yahoo(p) => p.fetch_history(ticker, lookback_days).await,
            MarketData::Fixture(p) => p.fetch_history(ticker, lookback_days).await,
        }
    }
}

/// Option-quote source selected at startup.
pub enum OptionData {
    File(quotes::QuoteFileProvider),
    Disabled(NoOptions),
}

impl OptionChainProvider for OptionData {
    async fn option_quotes(&self, underlying: &str) -> EngineResult<Vec<OptionQuote>> {
        match self {
            OptionData::File(p) => p.option_quotes(underlying).await,
            OptionData::Disabled(p) => p.option_quotes(underlying).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_returns_from_closes() {
        let h = AssetHistory::from_closes("ACB", &[10.0, 11.0, 9.9]).unwrap();
        assert_eq!(h.current_price, 9.9);
        assert_eq!(h.returns.len(), 2);
        assert!((h.returns[0] - 0.1).abs() < 1e-12);
        assert!((h.returns[1] + 0.1).abs() < 1e-12);
        assert!(AssetHistory::from_closes("ACB", &[]).is_none());
    }
}
