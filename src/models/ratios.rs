use super::volatility::{drawdown_curve, per_period_rate, wealth_curve};

/// Downside- and drawdown-adjusted return ratios for one series.
///
///   sortino = mean(r - rf_p) / sqrt(mean(min(0, r - rf_p - target)^2))
///   calmar  = cagr / |min drawdown|
///
/// Both ratios are 0 when their denominator is exactly 0: no measured
/// downside is reported as no signal, not as unbounded reward.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct RatioResult {
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,
    pub max_drawdown: f64,
    pub cagr: f64,
}

/// Calmar components, reported together so callers can audit the ratio.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct CalmarResult {
    pub calmar_ratio: f64,
    pub cagr: f64,
    pub max_drawdown: f64,
}

/// Ratio calculator parameterised by the annualisation convention.
#[derive(Debug, Clone, Copy)]
pub struct RiskRatioCalculator {
    pub risk_free_rate: f64,
    pub periods_per_year: f64,
}

impl RiskRatioCalculator {
    pub fn new(risk_free_rate: f64, periods_per_year: f64) -> Self {
        Self {
            risk_free_rate,
            periods_per_year,
        }
    }

    pub fn sortino(&self, returns: &[f64], target_return: f64) -> f64 {
        sortino_ratio(returns, target_return, self.risk_free_rate, self.periods_per_year)
    }

    pub fn calmar(&self, returns: &[f64], lookback_days: f64) -> CalmarResult {
        calmar_ratio(returns, lookback_days, self.periods_per_year)
    }

    /// Sortino (target 0) and Calmar for one series.
    pub fn ratios(&self, returns: &[f64], lookback_days: f64) -> RatioResult {
        let calmar = self.calmar(returns, lookback_days);
        RatioResult {
            sortino_ratio: self.sortino(returns, 0.0),
            calmar_ratio: calmar.calmar_ratio,
            max_drawdown: calmar.max_drawdown,
            cagr: calmar.cagr,
        }
    }
}

pub fn sortino_ratio(
    returns: &[f64],
    target_return: f64,
    risk_free_rate: f64,
    periods_per_year: f64,
) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    let n = returns.len() as f64;
    let rf = per_period_rate(risk_free_rate, periods_per_year);

    let mut excess_sum = 0.0;
    let mut downside_sq_sum = 0.0;
    for &r in returns {
        let excess = r - rf;
        excess_sum += excess;
        let downside = (excess - target_return).min(0.0);
        downside_sq_sum += downside * downside;
    }

    let downside_deviation = (downside_sq_sum / n).sqrt();
    if downside_deviation == 0.0 {
        return 0.0;
    }
    (excess_sum / n) / downside_deviation
}

/// Max drawdown as a non-negative magnitude, measured over the wealth curve.
pub fn max_drawdown(returns: &[f64]) -> f64 {
    let curve = wealth_curve(returns);
    drawdown_curve(&curve)
        .into_iter()
        .fold(0.0_f64, f64::min)
        .abs()
}

/// CAGR over `lookback_days` periods: final_wealth^(periods_per_year / lookback_days) - 1.
pub fn cagr(returns: &[f64], lookback_days: f64, periods_per_year: f64) -> f64 {
    if returns.is_empty() || lookback_days <= 0.0 {
        return 0.0;
    }
    let final_wealth = returns.iter().fold(1.0, |acc, &r| acc * (1.0 + r));
    if final_wealth <= 0.0 {
        return -1.0;
    }
    final_wealth.powf(periods_per_year / lookback_days) - 1.0
}

pub fn calmar_ratio(returns: &[f64], lookback_days: f64, periods_per_year: f64) -> CalmarResult {
    let growth = cagr(returns, lookback_days, periods_per_year);
    let mdd = max_drawdown(returns);
    let ratio = if mdd == 0.0 { 0.0 } else { growth / mdd };
    CalmarResult {
        calmar_ratio: ratio,
        cagr: growth,
        max_drawdown: mdd,
    }
}
