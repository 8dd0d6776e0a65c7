use super::candidate::AssetCandidate;
use crate::config::EstimationConfig;
use crate::errors::{EngineError, EngineResult};
use crate::models::black_scholes::BlackScholes;
use crate::models::confidence::ConfidenceEstimate;
use crate::risk::kelly;
use crate::risk::scoring::UnifiedScorer;

/// Shares controlled by one listed option contract.
pub const CONTRACT_MULTIPLIER: f64 = 100.0;

/// Gain assumed when the target move leaves the call out of the money.
const FALLBACK_GAIN: f64 = 0.1;

/// Calendar days per year for option time to expiry.
const DAYS_PER_YEAR: f64 = 365.0;

/// One call quote. Prices are per share.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct OptionQuote {
    pub underlying: String,
    pub strike: f64,
    pub bid: f64,
    pub ask: f64,
    pub expiry: String,
    pub days_to_expiry: u32,
    pub underlying_price: f64,
}

impl OptionQuote {
    pub fn validate(&self) -> EngineResult<()> {
        let label = self.label();
        let positive = [
            ("strike", self.strike),
            ("ask", self.ask),
            ("underlying price", self.underlying_price),
        ];
        for (name, v) in positive {
            if !(v > 0.0 && v.is_finite()) {
                return Err(EngineError::unavailable(&label, format!("{name} must be positive: {v}")));
            }
        }
        if !(self.bid >= 0.0 && self.bid.is_finite()) {
            return Err(EngineError::unavailable(&label, format!("bid must be non-negative: {}", self.bid)));
        }
        if self.days_to_expiry == 0 {
            return Err(EngineError::unavailable(&label, "expired"));
        }
        Ok(())
    }

    /// "ACB 5.00C 2026-12-18"
    pub fn label(&self) -> String {
        format!("{} {:.2}C {}", self.underlying, self.strike, self.expiry)
    }
}

/// Scores call options against the statistics of their underlying.
pub struct OptionCandidateBuilder {
    estimation: EstimationConfig,
    scorer: UnifiedScorer,
    target_move: f64,
    bs: BlackScholes,
}

impl OptionCandidateBuilder {
    pub fn new(estimation: EstimationConfig, scorer: UnifiedScorer, target_move: f64) -> EngineResult<Self> {
        Ok(Self {
            estimation,
            scorer,
            target_move,
            bs: BlackScholes::new()?,
        })
    }

    /// Kelly bet on the underlying rising `target_move` before expiry.
    /// Win probability comes from the underlying's daily volatility; the
    /// premium is the whole stake at risk.
    pub fn build(&self, underlying: &AssetCandidate, quote: &OptionQuote) -> EngineResult<AssetCandidate> {
        quote.validate()?;
        let label = quote.label();
        let sigma_daily = underlying.stats.volatility;
        let dte = quote.days_to_expiry as f64;

        let p = self.bs.move_probability(self.target_move, sigma_daily, dte);

        let target_price = quote.underlying_price * (1.0 + self.target_move);
        let intrinsic_gain = (target_price - quote.strike) / quote.ask;
        let g = if intrinsic_gain > 0.0 { intrinsic_gain } else { FALLBACK_GAIN };
        let l = 1.0;

        let est = &underlying.estimates;
        let kelly = kelly::confidence_weighted(
            p,
            g,
            l,
            est.win.sample_confidence,
            est.gain.sample_confidence,
            est.loss.sample_confidence,
            self.estimation.risk_aversion,
        )
        .map_err(|e| EngineError::InvalidOdds(format!("{label}: {e}")))?;

        let score = self
            .scorer
            .score(&kelly, underlying.ratios.sortino_ratio, underlying.ratios.calmar_ratio);

        let sigma_annual = sigma_daily * self.estimation.periods_per_year.sqrt();
        let greeks = self
            .bs
            .call_greeks(
                quote.underlying_price,
                quote.strike,
                dte / DAYS_PER_YEAR,
                self.estimation.risk_free_rate,
                sigma_annual,
            )
            .ok();

        tracing::debug!(
            option = %label,
            p,
            g,
            cwk = kelly.confidence_weighted_kelly,
            unified = score.unified_score,
            "option scored"
        );

        let mut estimates = underlying.estimates;
        estimates.win = ConfidenceEstimate {
            point_estimate: p,
            lower_bound: p,
            upper_bound: p,
            ..underlying.estimates.win
        };
        estimates.gain.point_estimate = g;
        estimates.loss.point_estimate = l;

        Ok(AssetCandidate {
            ticker: label,
            current_price: quote.ask,
            contract_multiplier: CONTRACT_MULTIPLIER,
            estimates,
            kelly,
            ratios: underlying.ratios,
            stats: underlying.stats,
            score,
            greeks,
        })
    }
}
