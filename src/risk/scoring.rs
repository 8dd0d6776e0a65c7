use crate::errors::{EngineError, EngineResult};
use crate::risk::kelly::KellyResult;

/// Weights and normalisation constants for fusing Kelly, Sortino and Calmar.
/// The divisors are calibration constants, not derived quantities.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct ScoringConfig {
    pub kelly_weight: f64,
    pub sortino_weight: f64,
    pub calmar_weight: f64,
    /// Multiplier mapping single-digit-percent Kelly fractions onto [0, 1].
    pub kelly_scale: f64,
    pub sortino_divisor: f64,
    pub calmar_divisor: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            kelly_weight: 0.4,
            sortino_weight: 0.3,
            calmar_weight: 0.3,
            kelly_scale: 10.0,
            sortino_divisor: 2.0,
            calmar_divisor: 3.0,
        }
    }
}

impl ScoringConfig {
    pub fn validate(&self) -> EngineResult<()> {
        let weights = [self.kelly_weight, self.sortino_weight, self.calmar_weight];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(EngineError::Config(format!("score weights must be non-negative: {weights:?}")));
        }
        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > 1e-9 {
            return Err(EngineError::Config(format!("score weights must sum to 1, got {sum}")));
        }
        for (name, v) in [
            ("KELLY_SCALE", self.kelly_scale),
            ("SORTINO_DIVISOR", self.sortino_divisor),
            ("CALMAR_DIVISOR", self.calmar_divisor),
        ] {
            if !(v > 0.0 && v.is_finite()) {
                return Err(EngineError::Config(format!("{name} must be positive: {v}")));
            }
        }
        Ok(())
    }
}

/// Fused risk-reward score. Sub-scores and the fused score lie in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct UnifiedScore {
    pub kelly_score: f64,
    pub sortino_score: f64,
    pub calmar_score: f64,
    pub unified_score: f64,
    /// confidence_weighted_kelly * unified_score: the fraction positions are sized with.
    pub risk_adjusted_kelly: f64,
}

/// Normalises and fuses the three risk lenses. Immutable after construction.
#[derive(Debug, Clone, Copy)]
pub struct UnifiedScorer {
    config: ScoringConfig,
}

impl UnifiedScorer {
    pub fn new(config: ScoringConfig) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    #[inline]
    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    pub fn score(&self, kelly: &KellyResult, sortino_ratio: f64, calmar_ratio: f64) -> UnifiedScore {
        let c = &self.config;
        let kelly_score = unit_clamp(kelly.confidence_weighted_kelly * c.kelly_scale);
        let sortino_score = unit_clamp(sortino_ratio / c.sortino_divisor);
        let calmar_score = unit_clamp(calmar_ratio / c.calmar_divisor);

        let unified_score = c.kelly_weight * kelly_score
            + c.sortino_weight * sortino_score
            + c.calmar_weight * calmar_score;

        UnifiedScore {
            kelly_score,
            sortino_score,
            calmar_score,
            unified_score,
            risk_adjusted_kelly: kelly.confidence_weighted_kelly * unified_score,
        }
    }
}

/// Clamp to [0, 1]; NaN maps to 0.
#[inline]
fn unit_clamp(x: f64) -> f64 {
    if x.is_nan() {
        return 0.0;
    }
    x.clamp(0.0, 1.0)
}
