use crate::errors::{EngineError, EngineResult};
use crate::risk::kelly;

/// Position constraints for one book. Equities and options share the
/// allocator and differ only in this value.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct ConstraintSet {
    /// Fractional Kelly multiplier (0.5 = half-Kelly)
    pub scaling_factor: f64,
    /// Per-position ceiling as a fraction of the portfolio, scaled by quality
    pub max_position_pct: f64,
    /// Dollar floor, scaled by quality
    pub min_allocation: f64,
    /// Candidates at or below this quality are discarded
    pub min_score_threshold: f64,
}

impl ConstraintSet {
    pub fn equity() -> Self {
        Self {
            scaling_factor: 0.5,
            max_position_pct: 0.20,
            min_allocation: 10.0,
            min_score_threshold: 0.1,
        }
    }

    pub fn options() -> Self {
        Self {
            scaling_factor: 0.25,
            max_position_pct: 0.05,
            min_allocation: 5.0,
            min_score_threshold: 0.1,
        }
    }

    pub fn validate(&self, label: &str) -> EngineResult<()> {
        if !(self.scaling_factor > 0.0 && self.scaling_factor.is_finite()) {
            return Err(EngineError::Config(format!(
                "{label} scaling factor must be positive: {}",
                self.scaling_factor
            )));
        }
        if !(self.max_position_pct > 0.0 && self.max_position_pct <= 1.0) {
            return Err(EngineError::Config(format!(
                "{label} max position pct must be in (0, 1]: {}",
                self.max_position_pct
            )));
        }
        if !(self.min_allocation >= 0.0 && self.min_allocation.is_finite()) {
            return Err(EngineError::Config(format!(
                "{label} min allocation must be non-negative: {}",
                self.min_allocation
            )));
        }
        if !(self.min_score_threshold >= 0.0 && self.min_score_threshold < 1.0) {
            return Err(EngineError::Config(format!(
                "{label} min score threshold must be in [0, 1): {}",
                self.min_score_threshold
            )));
        }
        Ok(())
    }
}

/// Risk limit check result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskCheck {
    /// Position survives every constraint
    Allowed,
    /// Dropped with reason
    Blocked(&'static str),
}

impl RiskCheck {
    #[inline]
    pub fn is_allowed(&self) -> bool {
        matches!(self, RiskCheck::Allowed)
    }
}

/// A candidate position after fractional scaling and the cap.
#[derive(Debug, Clone, Copy)]
pub struct SizedPosition {
    pub scaled_kelly: f64,
    pub dollars: f64,
    pub check: RiskCheck,
}

/// Size one position and check it against the book's constraints.
/// Pure function, no side effects.
#[inline]
pub fn size_position(
    constraints: &ConstraintSet,
    quality: f64,
    kelly_fraction: f64,
    portfolio_value: f64,
) -> SizedPosition {
    let blocked = |reason| SizedPosition {
        scaled_kelly: 0.0,
        dollars: 0.0,
        check: RiskCheck::Blocked(reason),
    };

    // 1. Conviction threshold
    if !(quality > constraints.min_score_threshold) {
        return blocked("score below threshold");
    }

    // 2. Fractional Kelly sizing
    let scaled_kelly = kelly::scaled(kelly_fraction, constraints.scaling_factor);
    let mut dollars = scaled_kelly * portfolio_value;
    if !dollars.is_finite() {
        return blocked("non-finite allocation");
    }

    // 3. Quality-scaled ceiling; no edge means no position
    let max_allocation = portfolio_value * constraints.max_position_pct * quality;
    dollars = dollars.min(max_allocation);
    if dollars <= 0.0 {
        return blocked("no edge");
    }

    // 4. Quality-scaled floor
    let min_allocation = constraints.min_allocation * quality;
    if dollars <= min_allocation {
        return blocked("below minimum allocation");
    }

    SizedPosition {
        scaled_kelly,
        dollars,
        check: RiskCheck::Allowed,
    }
}
