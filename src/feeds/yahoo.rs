use super::{AssetHistory, ReturnSeriesProvider};
use crate::errors::{EngineError, EngineResult};
use reqwest::Client;

/// Calendar days fetched per trading period requested, so the window
/// still covers `lookback_days` returns across weekends and holidays.
const CALENDAR_PADDING: f64 = 1.5;

/// Daily closes from the Yahoo Finance v8 chart endpoint.
#[derive(Clone)]
pub struct YahooChartProvider {
    client: Client,
    base_url: String,
}

impl YahooChartProvider {
    pub fn new(base_url: &str, user_agent: &str, timeout_secs: u64) -> EngineResult<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| EngineError::Config(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn fetch_closes(&self, ticker: &str, lookback_days: u32) -> EngineResult<Vec<f64>> {
        let period2 = chrono::Utc::now().timestamp();
        let span_days = (lookback_days as f64 * CALENDAR_PADDING).ceil() as i64 + 7;
        let period1 = period2 - span_days * 86_400;
        let url = format!(
            "{}/v8/finance/chart/{ticker}?period1={period1}&period2={period2}&interval=1d",
            self.base_url
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::unavailable(ticker, format!("request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(EngineError::unavailable(ticker, format!("HTTP {status}")));
        }

        let data: ChartResponse = resp
            .json()
            .await
            .map_err(|e| EngineError::unavailable(ticker, format!("parse: {e}")))?;

        closes_from_chart(ticker, data)
    }
}

impl ReturnSeriesProvider for YahooChartProvider {
    async fn fetch_history(&self, ticker: &str, lookback_days: u32) -> EngineResult<AssetHistory> {
        let mut closes = self.fetch_closes(ticker, lookback_days).await?;

        // Keep lookback_days returns, i.e. lookback_days + 1 closes
        let keep = lookback_days as usize + 1;
        if closes.len() > keep {
            closes.drain(..closes.len() - keep);
        }

        tracing::debug!(ticker, closes = closes.len(), "chart fetched");

        AssetHistory::from_closes(ticker, &closes)
            .ok_or_else(|| EngineError::unavailable(ticker, "no closes in window"))
    }
}

// Response shape (fields we read):
// {
//   "chart": {
//     "result": [{
//       "timestamp": [1700000000, ...],
//       "indicators": { "quote": [{ "close": [1.23, null, ...] }] }
//     }],
//     "error": null
//   }
// }

#[derive(serde::Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(serde::Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(serde::Deserialize)]
struct ChartError {
    code: Option<String>,
    description: Option<String>,
}

#[derive(serde::Deserialize)]
struct ChartResult {
    indicators: Indicators,
}

#[derive(serde::Deserialize)]
struct Indicators {
    quote: Vec<QuoteBlock>,
}

#[derive(serde::Deserialize)]
struct QuoteBlock {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

fn closes_from_chart(ticker: &str, data: ChartResponse) -> EngineResult<Vec<f64>> {
    if let Some(err) = data.chart.error {
        return Err(EngineError::unavailable(
            ticker,
            format!(
                "{}: {}",
                err.code.unwrap_or_default(),
                err.description.unwrap_or_default()
            ),
        ));
    }

    let closes: Vec<f64> = data
        .chart
        .result
        .as_ref()
        .and_then(|r| r.first())
        .and_then(|r| r.indicators.quote.first())
        .map(|q| q.close.iter().flatten().copied().filter(|c| c.is_finite()).collect())
        .unwrap_or_default();

    if closes.is_empty() {
        return Err(EngineError::unavailable(ticker, "empty chart"));
    }
    Ok(closes)
}
