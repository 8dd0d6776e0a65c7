use crate::errors::{EngineError, EngineResult};
use crate::models::confidence::ProbabilityEstimates;
use nalgebra::{DMatrix, DVector};

/// Confidence-discounted Kelly sizing.
///
/// f_base = (b * p - (1 - p)) / b,   b = g / l
/// c      = (c_p + c_g + c_l) / 3
/// adj    = 1 / (1 + risk_aversion * (1 - c))
/// f_cw   = f_base * c * adj
///
/// where:
///   p = win probability, g = average gain, l = average loss (magnitude)
///   c_* = sample confidence of each estimate in [0, 1]
///
/// Bounds re-run f_base on confidence-scaled inputs:
///   conservative: p * c_p, g * c_g, l / c_l (2 l when c_l = 0)
///   optimistic:   min(1, p + 0.1 (1 - c_p)), g + 0.05 (1 - c_g), l (1 - 0.5 (1 - c_l))
///
/// f_cw may be negative (no edge); callers must not allocate on it.
/// All inputs/outputs are f64. Pure functions.

/// Kelly sizing result. Stack-allocated.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
#[repr(C)]
pub struct KellyResult {
    pub base_kelly: f64,                // Full Kelly fraction
    pub confidence_factor: f64,         // Mean of the three confidences
    pub risk_adjustment: f64,           // Derating for low confidence, in (0, 1]
    pub confidence_weighted_kelly: f64, // base * confidence * adjustment
    pub conservative_kelly: f64,        // Worst-case inputs
    pub optimistic_kelly: f64,          // Best-case inputs
}

impl KellyResult {
    #[inline]
    pub fn has_edge(&self) -> bool {
        self.confidence_weighted_kelly > 0.0
    }
}

/// Full Kelly fraction for win probability `p`, average gain `g`, average loss `l`.
#[inline]
pub fn base_kelly(p: f64, g: f64, l: f64) -> EngineResult<f64> {
    if !(0.0..=1.0).contains(&p) {
        return Err(EngineError::InvalidOdds(format!("win probability out of [0, 1]: {p}")));
    }
    if !(g >= 0.0) {
        return Err(EngineError::InvalidOdds(format!("average gain must be non-negative: {g}")));
    }
    if !(l > 0.0) {
        return Err(EngineError::InvalidOdds(format!("average loss must be positive: {l}")));
    }

    let b = g / l;
    if b == 0.0 {
        return Ok(0.0);
    }
    Ok((b * p - (1.0 - p)) / b)
}

/// Confidence-weighted Kelly from point estimates and their confidences.
#[allow(clippy::too_many_arguments)]
pub fn confidence_weighted(
    p_est: f64,
    g_est: f64,
    l_est: f64,
    p_conf: f64,
    g_conf: f64,
    l_conf: f64,
    risk_aversion: f64,
) -> EngineResult<KellyResult> {
    let base = base_kelly(p_est, g_est, l_est)?;

    let (p_conf, g_conf, l_conf) = (p_conf.clamp(0.0, 1.0), g_conf.clamp(0.0, 1.0), l_conf.clamp(0.0, 1.0));
    let confidence_factor = (p_conf + g_conf + l_conf) / 3.0;
    let risk_adjustment = 1.0 / (1.0 + risk_aversion.max(0.0) * (1.0 - confidence_factor));

    let conservative_l = if l_conf > 0.0 { l_est / l_conf } else { l_est * 2.0 };
    let conservative_kelly = base_kelly(p_est * p_conf, g_est * g_conf, conservative_l)?;
    let optimistic_kelly = base_kelly(
        (p_est + (1.0 - p_conf) * 0.1).min(1.0),
        g_est + (1.0 - g_conf) * 0.05,
        l_est * (1.0 - (1.0 - l_conf) * 0.5),
    )?;

    Ok(KellyResult {
        base_kelly: base,
        confidence_factor,
        risk_adjustment,
        confidence_weighted_kelly: base * confidence_factor * risk_adjustment,
        conservative_kelly,
        optimistic_kelly,
    })
}

/// Confidence-weighted Kelly straight from a series' probability estimates.
pub fn from_estimates(est: &ProbabilityEstimates, risk_aversion: f64) -> EngineResult<KellyResult> {
    confidence_weighted(
        est.win.point_estimate,
        est.gain.point_estimate,
        est.loss.point_estimate,
        est.win.sample_confidence,
        est.gain.sample_confidence,
        est.loss.sample_confidence,
        risk_aversion,
    )
}

/// Fractional Kelly: 0.5 = half-Kelly, 0.25 for higher-variance instruments.
#[inline]
pub fn scaled(kelly_fraction: f64, scaling_factor: f64) -> f64 {
    kelly_fraction * scaling_factor
}

/// Multi-asset Kelly weights `w = inv(cov) * mu` over per-period excess
/// returns, normalized so that `sum |w_i| = 1`. Negative weights are shorts.
///
/// Series are aligned on their most recent common window. Needs at least two
/// assets and more common observations than assets.
pub fn portfolio_weights(series: &[&[f64]], rf_per_period: f64) -> EngineResult<Vec<f64>> {
    let k = series.len();
    if k < 2 {
        return Err(EngineError::InsufficientData(format!("portfolio Kelly needs two assets, got {k}")));
    }
    let n = series.iter().map(|s| s.len()).min().unwrap_or(0);
    if n <= k {
        return Err(EngineError::InsufficientData(format!(
            "portfolio Kelly: {n} common observations for {k} assets"
        )));
    }

    let excess = DMatrix::from_fn(n, k, |i, j| {
        let s = series[j];
        s[s.len() - n + i] - rf_per_period
    });
    let mu = DVector::from_fn(k, |j, _| excess.column(j).mean());
    let centered = DMatrix::from_fn(n, k, |i, j| excess[(i, j)] - mu[j]);
    let cov = (centered.transpose() * &centered) / (n as f64 - 1.0);

    let inv = cov
        .try_inverse()
        .ok_or_else(|| EngineError::InsufficientData("portfolio Kelly: covariance matrix is singular".into()))?;
    let w = inv * mu;

    let gross: f64 = w.iter().map(|v| v.abs()).sum();
    if !(gross > 0.0 && gross.is_finite()) {
        return Err(EngineError::InsufficientData(format!("portfolio Kelly: degenerate weights, gross {gross}")));
    }
    Ok(w.iter().map(|v| v / gross).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_base_kelly() {
        // b = 2, (2 * 0.6 - 0.4) / 2 = 0.4
        let f = base_kelly(0.6, 0.2, 0.1).unwrap();
        assert!((f - 0.4).abs() < 1e-12, "base kelly={f}");
    }

    #[test]
    fn test_no_edge_is_negative() {
        let f = base_kelly(0.4, 0.1, 0.1).unwrap();
        assert!(f < 0.0, "losing bet should be negative: {f}");
    }

    #[test]
    fn test_zero_gain_is_zero() {
        assert_eq!(base_kelly(0.7, 0.0, 0.1).unwrap(), 0.0);
    }

    #[test]
    fn test_invalid_odds() {
        assert!(matches!(base_kelly(0.6, 0.2, 0.0), Err(EngineError::InvalidOdds(_))));
        assert!(matches!(base_kelly(0.6, 0.2, -0.1), Err(EngineError::InvalidOdds(_))));
        assert!(matches!(base_kelly(1.2, 0.2, 0.1), Err(EngineError::InvalidOdds(_))));
    }

    #[test]
    fn test_weighted_identity() {
        let r = confidence_weighted(0.6, 0.2, 0.1, 0.8, 0.6, 0.7, 1.0).unwrap();
        let expected = r.base_kelly * r.confidence_factor * r.risk_adjustment;
        assert!((r.confidence_weighted_kelly - expected).abs() < 1e-15);
        assert!((r.confidence_factor - 0.7).abs() < 1e-12);
        assert!((r.risk_adjustment - 1.0 / 1.3).abs() < 1e-12);
        assert!(r.risk_adjustment > 0.0 && r.risk_adjustment <= 1.0);
    }

    #[test]
    fn test_strictly_decreasing_in_risk_aversion() {
        let mut prev = f64::INFINITY;
        for ra in [0.0, 0.5, 1.0, 2.0, 5.0] {
            let r = confidence_weighted(0.6, 0.2, 0.1, 0.5, 0.5, 0.5, ra).unwrap();
            assert!(r.confidence_weighted_kelly < prev, "ra={ra} did not shrink size");
            prev = r.confidence_weighted_kelly;
        }
    }

    #[test]
    fn test_constant_in_risk_aversion_at_full_confidence() {
        let a = confidence_weighted(0.6, 0.2, 0.1, 1.0, 1.0, 1.0, 0.0).unwrap();
        let b = confidence_weighted(0.6, 0.2, 0.1, 1.0, 1.0, 1.0, 10.0).unwrap();
        assert_eq!(a.confidence_weighted_kelly, b.confidence_weighted_kelly);
        assert_eq!(b.risk_adjustment, 1.0);
    }

    #[test]
    fn test_more_confidence_never_shrinks_positive_size() {
        let mut prev = 0.0;
        for c in [0.1, 0.3, 0.5, 0.7, 0.9, 1.0] {
            let r = confidence_weighted(0.6, 0.2, 0.1, c, 0.5, 0.5, 1.0).unwrap();
            assert!(r.confidence_weighted_kelly >= prev, "p_conf={c} shrank size");
            prev = r.confidence_weighted_kelly;
        }
    }

    #[test]
    fn test_bounds_bracket_base() {
        // conservative: p 0.48, g 0.12, l 0.1/0.7; optimistic: p 0.62, g 0.22, l 0.085
        let r = confidence_weighted(0.6, 0.2, 0.1, 0.8, 0.6, 0.7, 1.0).unwrap();
        let b = 0.12 / (0.1 / 0.7);
        let conservative = (b * 0.48 - 0.52) / b;
        let b = 0.22 / 0.085;
        let optimistic = (b * 0.62 - 0.38) / b;
        assert!((r.conservative_kelly - conservative).abs() < 1e-12, "conservative={}", r.conservative_kelly);
        assert!((r.optimistic_kelly - optimistic).abs() < 1e-12, "optimistic={}", r.optimistic_kelly);
        assert!(r.conservative_kelly < r.base_kelly);
        assert!(r.base_kelly < r.optimistic_kelly);
    }

    #[test]
    fn test_bounds_collapse_at_full_confidence() {
        let r = confidence_weighted(0.6, 0.2, 0.1, 1.0, 1.0, 1.0, 1.0).unwrap();
        assert!((r.conservative_kelly - r.base_kelly).abs() < 1e-12);
        assert!((r.optimistic_kelly - r.base_kelly).abs() < 1e-12);
    }

    #[test]
    fn test_bounds_at_zero_confidence() {
        // Conservative: p 0, g 0.1, l doubled to 0.2 -> -1 / 0.5.
        // Optimistic p is capped at 1, so the bet is all edge.
        let r = confidence_weighted(0.95, 0.2, 0.1, 0.0, 0.5, 0.0, 1.0).unwrap();
        assert_eq!(r.conservative_kelly, -2.0);
        assert!((r.optimistic_kelly - 1.0).abs() < 1e-12, "optimistic={}", r.optimistic_kelly);
    }

    /// Two uncorrelated series with means 0.004 and deviations 0.01 / 0.02.
    fn uncorrelated_pair() -> (Vec<f64>, Vec<f64>) {
        let a = [1.0, -1.0, 1.0, -1.0].iter().map(|x| 0.004 + 0.01 * x).collect();
        let b = [1.0, 1.0, -1.0, -1.0].iter().map(|x| 0.004 + 0.02 * x).collect();
        (a, b)
    }

    #[test]
    fn test_portfolio_weights_uncorrelated() {
        // w ~ mu / var: 0.004 / (4e-4 / 3) = 30 and 0.004 / (16e-4 / 3) = 7.5
        let (a, b) = uncorrelated_pair();
        let w = portfolio_weights(&[&a, &b], 0.0).unwrap();
        assert!((w[0] - 0.8).abs() < 1e-9, "w={w:?}");
        assert!((w[1] - 0.2).abs() < 1e-9, "w={w:?}");
    }

    #[test]
    fn test_portfolio_weights_align_on_recent_window() {
        let (a, b) = uncorrelated_pair();
        let mut longer = vec![0.5, -0.3, 0.9];
        longer.extend(&a);
        let w = portfolio_weights(&[&longer, &b], 0.0).unwrap();
        assert!((w[0] - 0.8).abs() < 1e-9, "w={w:?}");
    }

    #[test]
    fn test_portfolio_weights_short_losing_asset() {
        // Excess means +0.002 and -0.006 against a 0.002 risk-free rate
        let (a, b) = uncorrelated_pair();
        let b: Vec<f64> = b.iter().map(|r| r - 0.008).collect();
        let w = portfolio_weights(&[&a, &b], 0.002).unwrap();
        assert!(w[0] > 0.0 && w[1] < 0.0, "w={w:?}");
        assert!((w[0].abs() + w[1].abs() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_portfolio_weights_insufficient() {
        let (a, b) = uncorrelated_pair();
        assert!(matches!(portfolio_weights(&[&a], 0.0), Err(EngineError::InsufficientData(_))));
        assert!(matches!(
            portfolio_weights(&[&a[..2], &b[..2]], 0.0),
            Err(EngineError::InsufficientData(_))
        ));
    }

    #[test]
    fn test_scaled() {
        assert_eq!(scaled(0.4, 0.5), 0.2);
        assert_eq!(scaled(0.4, 0.25), 0.1);
    }
}
