//! Descriptive statistics and scan primitives over a return series.
//! All functions are pure and allocation-light; scans return a new Vec.

/// Convert an annual rate to a per-period rate by geometric de-compounding.
#[inline]
pub fn per_period_rate(annual_rate: f64, periods_per_year: f64) -> f64 {
    if periods_per_year <= 0.0 {
        return 0.0;
    }
    (1.0 + annual_rate).powf(1.0 / periods_per_year) - 1.0
}

#[inline]
pub fn mean(returns: &[f64]) -> f64 {
    if returns.is_empty() {
        return 0.0;
    }
    returns.iter().sum::<f64>() / returns.len() as f64
}

/// Sample standard deviation (n - 1 denominator). Zero below two observations.
pub fn sample_volatility(returns: &[f64]) -> f64 {
    let n = returns.len();
    if n < 2 {
        return 0.0;
    }
    let m = mean(returns);
    let var_sum: f64 = returns.iter().map(|r| (r - m) * (r - m)).sum();
    (var_sum / (n as f64 - 1.0)).sqrt()
}

/// Per-period Sharpe ratio against a per-period risk-free rate.
pub fn sharpe_ratio(returns: &[f64], rf_per_period: f64) -> f64 {
    let vol = sample_volatility(returns);
    if vol <= 0.0 {
        return 0.0;
    }
    (mean(returns) - rf_per_period) / vol
}

/// Running product of (1 + r): the wealth curve starting from 1.
pub fn wealth_curve(returns: &[f64]) -> Vec<f64> {
    returns
        .iter()
        .scan(1.0_f64, |wealth, &r| {
            *wealth *= 1.0 + r;
            Some(*wealth)
        })
        .collect()
}

/// Running maximum of a curve.
pub fn running_max(curve: &[f64]) -> Vec<f64> {
    curve
        .iter()
        .scan(f64::NEG_INFINITY, |peak, &v| {
            *peak = peak.max(v);
            Some(*peak)
        })
        .collect()
}

/// Drawdown curve: (value - running peak) / running peak. Always <= 0.
pub fn drawdown_curve(curve: &[f64]) -> Vec<f64> {
    curve
        .iter()
        .zip(running_max(curve))
        .map(|(&v, peak)| if peak > 0.0 { (v - peak) / peak } else { 0.0 })
        .collect()
}

/// Total compounded return over the series.
#[inline]
pub fn total_return(returns: &[f64]) -> f64 {
    returns.iter().fold(1.0, |acc, &r| acc * (1.0 + r)) - 1.0
}

/// Summary statistics for one asset's series, carried into risk metrics.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct SeriesStats {
    pub mean_return: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub total_return: f64,
}

impl SeriesStats {
    pub fn from_returns(returns: &[f64], rf_per_period: f64) -> Self {
        Self {
            mean_return: mean(returns),
            volatility: sample_volatility(returns),
            sharpe_ratio: sharpe_ratio(returns, rf_per_period),
            total_return: total_return(returns),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_period_rate_compounds_back() {
        let daily = per_period_rate(0.05, 252.0);
        let annual = (1.0 + daily).powf(252.0) - 1.0;
        assert!((annual - 0.05).abs() < 1e-12, "round trip gave {annual}");
        assert_eq!(per_period_rate(0.0, 252.0), 0.0);
    }

    #[test]
    fn test_volatility_small_samples() {
        assert_eq!(sample_volatility(&[]), 0.0);
        assert_eq!(sample_volatility(&[0.05]), 0.0);
        let v = sample_volatility(&[0.01, -0.01]);
        assert!((v - 0.014142135623730951).abs() < 1e-12);
    }

    #[test]
    fn test_scans() {
        let curve = wealth_curve(&[0.1, -0.5, 1.0]);
        assert!((curve[0] - 1.1).abs() < 1e-12);
        assert!((curve[1] - 0.55).abs() < 1e-12);
        assert!((curve[2] - 1.1).abs() < 1e-12);

        let peaks = running_max(&curve);
        assert_eq!(peaks, vec![curve[0], curve[0], curve[0].max(curve[2])]);

        let dd = drawdown_curve(&curve);
        assert_eq!(dd[0], 0.0);
        assert!((dd[1] + 0.5).abs() < 1e-12);
        assert!(dd.iter().all(|&d| d <= 0.0));
    }

    #[test]
    fn test_sharpe_zero_without_dispersion() {
        assert_eq!(sharpe_ratio(&[0.01, 0.01, 0.01], 0.0), 0.0);
        assert!(sharpe_ratio(&[0.02, 0.01, 0.03], 0.0) > 0.0);
    }
}
