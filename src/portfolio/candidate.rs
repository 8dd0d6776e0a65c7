use crate::config::EstimationConfig;
use crate::errors::{EngineError, EngineResult};
use crate::feeds::AssetHistory;
use crate::models::black_scholes::OptionGreeks;
use crate::models::confidence::{self, ProbabilityEstimates};
use crate::models::ratios::{RatioResult, RiskRatioCalculator};
use crate::models::volatility::{per_period_rate, SeriesStats};
use crate::risk::kelly::{self, KellyResult};
use crate::risk::scoring::{UnifiedScore, UnifiedScorer};

/// One scored asset for a single allocation run. Built once, never mutated.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AssetCandidate {
    pub ticker: String,
    /// Price of one unit (share, or per-share option premium)
    pub current_price: f64,
    /// Units per tradable lot: 1 for shares, 100 for option contracts
    pub contract_multiplier: f64,
    pub estimates: ProbabilityEstimates,
    pub kelly: KellyResult,
    pub ratios: RatioResult,
    pub stats: SeriesStats,
    pub score: UnifiedScore,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub greeks: Option<OptionGreeks>,
}

impl AssetCandidate {
    /// Cost of one tradable lot.
    #[inline]
    pub fn lot_cost(&self) -> f64 {
        self.current_price * self.contract_multiplier
    }
}

/// Turns a fetched history into a scored candidate. Pure: same history,
/// same configuration, same candidate.
#[derive(Debug, Clone, Copy)]
pub struct CandidateBuilder {
    estimation: EstimationConfig,
    scorer: UnifiedScorer,
    ratios: RiskRatioCalculator,
}

impl CandidateBuilder {
    pub fn new(estimation: EstimationConfig, scorer: UnifiedScorer) -> Self {
        let ratios = RiskRatioCalculator::new(estimation.risk_free_rate, estimation.periods_per_year);
        Self {
            estimation,
            scorer,
            ratios,
        }
    }

    #[inline]
    pub fn estimation(&self) -> &EstimationConfig {
        &self.estimation
    }

    #[inline]
    pub fn scorer(&self) -> &UnifiedScorer {
        &self.scorer
    }

    pub fn build(&self, history: &AssetHistory) -> EngineResult<AssetCandidate> {
        let returns = history.returns.as_slice();
        let cfg = &self.estimation;

        if returns.len() < cfg.min_sample_size.max(1) {
            return Err(EngineError::InsufficientData(format!(
                "{}: {} returns, need {}",
                history.ticker,
                returns.len(),
                cfg.min_sample_size.max(1)
            )));
        }
        if returns.iter().any(|r| !r.is_finite()) {
            return Err(EngineError::unavailable(&history.ticker, "non-finite return in series"));
        }
        if !(history.current_price > 0.0 && history.current_price.is_finite()) {
            return Err(EngineError::unavailable(
                &history.ticker,
                format!("invalid current price {}", history.current_price),
            ));
        }

        let estimates = confidence::estimate_probabilities(returns, cfg.confidence_level)?;
        let kelly = kelly::from_estimates(&estimates, cfg.risk_aversion)
            .map_err(|e| tag_ticker(e, &history.ticker))?;
        let ratios = self.ratios.ratios(returns, cfg.lookback_days as f64);
        let stats = SeriesStats::from_returns(
            returns,
            per_period_rate(cfg.risk_free_rate, cfg.periods_per_year),
        );
        let score = self.scorer.score(&kelly, ratios.sortino_ratio, ratios.calmar_ratio);

        tracing::debug!(
            ticker = %history.ticker,
            n = returns.len(),
            p = estimates.win.point_estimate,
            cwk = kelly.confidence_weighted_kelly,
            sortino = ratios.sortino_ratio,
            calmar = ratios.calmar_ratio,
            unified = score.unified_score,
            "candidate scored"
        );

        Ok(AssetCandidate {
            ticker: history.ticker.clone(),
            current_price: history.current_price,
            contract_multiplier: 1.0,
            estimates,
            kelly,
            ratios,
            stats,
            score,
            greeks: None,
        })
    }
}

fn tag_ticker(e: EngineError, ticker: &str) -> EngineError {
    match e {
        EngineError::InvalidOdds(msg) => EngineError::InvalidOdds(format!("{ticker}: {msg}")),
        other => other,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::risk::scoring::ScoringConfig;

    pub(crate) fn builder() -> CandidateBuilder {
        let scorer = UnifiedScorer::new(ScoringConfig::default()).unwrap();
        CandidateBuilder::new(EstimationConfig::default(), scorer)
    }

    /// Deterministic series with a 60% hit rate: +2% winners, -1% losers.
    pub(crate) fn trending_returns(n: usize) -> Vec<f64> {
        (0..n).map(|i| if i % 5 < 3 { 0.02 } else { -0.01 }).collect()
    }

    pub(crate) fn history(ticker: &str, returns: Vec<f64>) -> AssetHistory {
        AssetHistory {
            ticker: ticker.to_string(),
            current_price: 4.0,
            returns,
        }
    }

    #[test]
    fn test_scores_trending_asset() {
        let c = builder().build(&history("ACB", trending_returns(250))).unwrap();
        assert!((c.estimates.win.point_estimate - 0.6).abs() < 1e-12);
        // p = 0.6, b = 2 => base Kelly 0.4
        assert!((c.kelly.base_kelly - 0.4).abs() < 1e-9, "base={}", c.kelly.base_kelly);
        assert!(c.kelly.has_edge());
        assert!(c.kelly.confidence_weighted_kelly < c.kelly.base_kelly);
        assert!(c.ratios.sortino_ratio > 0.0);
        assert!(c.score.unified_score > 0.0 && c.score.unified_score <= 1.0);
        assert_eq!(c.lot_cost(), 4.0);
    }

    #[test]
    fn test_short_series_is_insufficient() {
        let err = builder().build(&history("ACB", trending_returns(10))).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientData(_)));
        assert!(err.is_per_asset());
    }

    #[test]
    fn test_all_positive_series_has_invalid_odds() {
        let err = builder().build(&history("UP", vec![0.01; 60])).unwrap_err();
        assert!(matches!(err, EngineError::InvalidOdds(_)), "got {err}");
    }

    #[test]
    fn test_bad_price_or_nan_unavailable() {
        let mut h = history("ACB", trending_returns(60));
        h.current_price = 0.0;
        assert!(matches!(builder().build(&h), Err(EngineError::DataUnavailable { .. })));

        let mut returns = trending_returns(60);
        returns[3] = f64::NAN;
        let err = builder().build(&history("ACB", returns)).unwrap_err();
        assert!(matches!(err, EngineError::DataUnavailable { .. }));
    }
}
