use crate::models::black_scholes::BlackScholes;
use crate::portfolio::allocator::AllocationPlan;
use crate::portfolio::candidate::AssetCandidate;
use statrs::distribution::{Continuous, ContinuousCDF};
use std::collections::BTreeMap;

/// Tail probability for VaR and expected shortfall.
pub const TAIL_PROBABILITY: f64 = 0.05;

/// Parametric portfolio summary of one plan.
///
/// Per-period fractions of invested capital. Cross-asset correlation is
/// taken as zero, so volatility is `sqrt(sum w^2 sigma^2)`. VaR and ES are
/// normal at 95% and positive numbers mean losses.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
pub struct RiskMetrics {
    pub expected_return: f64,
    pub portfolio_volatility: f64,
    pub portfolio_sharpe: f64,
    pub max_drawdown_estimate: f64,
    pub concentration_risk: f64,
    pub value_at_risk: f64,
    pub expected_shortfall: f64,
    pub number_of_positions: usize,
}

/// Summarise `plan` using the per-asset statistics carried on `candidates`.
/// Entries without a matching candidate contribute weight but no return or risk.
pub fn compute_risk_metrics(
    plan: &AllocationPlan,
    candidates: &[AssetCandidate],
    rf_per_period: f64,
    bs: &BlackScholes,
) -> RiskMetrics {
    if plan.entries.is_empty() || plan.total_allocated <= 0.0 {
        return RiskMetrics::default();
    }

    let by_ticker: BTreeMap<&str, &AssetCandidate> =
        candidates.iter().map(|c| (c.ticker.as_str(), c)).collect();

    let mut expected_return = 0.0;
    let mut variance = 0.0;
    let mut max_drawdown_estimate = 0.0;
    let mut concentration_risk: f64 = 0.0;

    for entry in &plan.entries {
        let w = entry.dollar_allocation / plan.total_allocated;
        concentration_risk = concentration_risk.max(w);
        if let Some(c) = by_ticker.get(entry.ticker.as_str()) {
            expected_return += w * c.stats.mean_return;
            variance += w * w * c.stats.volatility * c.stats.volatility;
            max_drawdown_estimate += w * c.ratios.max_drawdown;
        }
    }

    let portfolio_volatility = variance.sqrt();
    let portfolio_sharpe = if portfolio_volatility > 0.0 {
        (expected_return - rf_per_period) / portfolio_volatility
    } else {
        0.0
    };

    let normal = bs.normal();
    let z = normal.inverse_cdf(1.0 - TAIL_PROBABILITY);
    let value_at_risk = z * portfolio_volatility - expected_return;
    let expected_shortfall = portfolio_volatility * normal.pdf(z) / TAIL_PROBABILITY - expected_return;

    RiskMetrics {
        expected_return,
        portfolio_volatility,
        portfolio_sharpe,
        max_drawdown_estimate,
        concentration_risk,
        value_at_risk,
        expected_shortfall,
        number_of_positions: plan.entries.len(),
    }
}
