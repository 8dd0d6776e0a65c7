use crate::errors::{EngineError, EngineResult};
use statrs::distribution::{ContinuousCDF, Normal};

/// Sample-confidence anchors: (sample size, confidence).
/// Piecewise-linear between anchors, saturating toward 1 past the last one.
const CONFIDENCE_ANCHORS: [(f64, f64); 6] = [
    (0.0, 0.0),
    (30.0, 0.5),
    (60.0, 0.6),
    (125.0, 0.7),
    (252.0, 0.8),
    (500.0, 0.9),
];

/// Point estimate with a confidence interval and a sample-size confidence score.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct ConfidenceEstimate {
    pub point_estimate: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub sample_confidence: f64,
    pub sample_size: usize,
}

impl ConfidenceEstimate {
    /// Estimate for a tail with no observations: zero, with zero confidence.
    pub fn empty() -> Self {
        Self {
            point_estimate: 0.0,
            lower_bound: 0.0,
            upper_bound: 0.0,
            sample_confidence: 0.0,
            sample_size: 0,
        }
    }
}

/// Win probability, average gain and average loss estimated from one series.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct ProbabilityEstimates {
    pub win: ConfidenceEstimate,
    pub gain: ConfidenceEstimate,
    /// Average loss as a positive magnitude.
    pub loss: ConfidenceEstimate,
}

/// Confidence in an estimate drawn from `n` observations.
/// Monotone non-decreasing in `n`, 0 at `n = 0`, approaching 1 as `n` grows.
pub fn sample_confidence(n: usize) -> f64 {
    let x = n as f64;
    let (last_n, last_c) = CONFIDENCE_ANCHORS[CONFIDENCE_ANCHORS.len() - 1];
    if x >= last_n {
        return (1.0 - (1.0 - last_c) * last_n / x).clamp(0.0, 1.0);
    }
    for pair in CONFIDENCE_ANCHORS.windows(2) {
        let (n0, c0) = pair[0];
        let (n1, c1) = pair[1];
        if x <= n1 {
            return c0 + (c1 - c0) * (x - n0) / (n1 - n0);
        }
    }
    last_c
}

/// Two-sided standard normal quantile for a confidence level, e.g. 1.96 at 0.95.
pub fn z_score(confidence_level: f64) -> EngineResult<f64> {
    if !(confidence_level > 0.0 && confidence_level < 1.0) {
        return Err(EngineError::Config(format!(
            "confidence level must be in (0, 1): {confidence_level}"
        )));
    }
    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| EngineError::Config(format!("standard normal: {e}")))?;
    Ok(normal.inverse_cdf((1.0 + confidence_level) / 2.0))
}

/// Win probability with a normal-approximation binomial interval clipped to [0, 1].
pub fn estimate_win_probability(
    returns: &[f64],
    confidence_level: f64,
) -> EngineResult<ConfidenceEstimate> {
    let n = returns.len();
    if n == 0 {
        return Err(EngineError::InsufficientData("empty return series".into()));
    }
    let z = z_score(confidence_level)?;

    let wins = returns.iter().filter(|&&r| r > 0.0).count();
    let p = wins as f64 / n as f64;
    let half_width = z * (p * (1.0 - p) / n as f64).sqrt();

    Ok(ConfidenceEstimate {
        point_estimate: p,
        lower_bound: (p - half_width).clamp(0.0, 1.0),
        upper_bound: (p + half_width).clamp(0.0, 1.0),
        sample_confidence: sample_confidence(n),
        sample_size: n,
    })
}

/// Mean magnitude of a tail subset with a normal interval on the mean.
/// Lower bound is clipped at 0 since magnitudes are non-negative.
fn estimate_magnitude(tail: &[f64], z: f64) -> ConfidenceEstimate {
    let k = tail.len();
    if k == 0 {
        return ConfidenceEstimate::empty();
    }
    let kf = k as f64;
    let mean = tail.iter().sum::<f64>() / kf;
    let std = if k > 1 {
        (tail.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / (kf - 1.0)).sqrt()
    } else {
        0.0
    };
    let half_width = z * std / kf.sqrt();

    ConfidenceEstimate {
        point_estimate: mean,
        lower_bound: (mean - half_width).max(0.0),
        upper_bound: mean + half_width,
        sample_confidence: sample_confidence(k),
        sample_size: k,
    }
}

/// Estimate win probability, average gain and average loss from a return series.
///
/// Gains are the strictly positive periods, losses the strictly negative ones
/// (reported as positive magnitudes). Flat periods count toward `n` but toward
/// neither tail. A missing tail defaults to zero with zero confidence.
pub fn estimate_probabilities(
    returns: &[f64],
    confidence_level: f64,
) -> EngineResult<ProbabilityEstimates> {
    let win = estimate_win_probability(returns, confidence_level)?;
    let z = z_score(confidence_level)?;

    let gains: Vec<f64> = returns.iter().copied().filter(|&r| r > 0.0).collect();
    let losses: Vec<f64> = returns
        .iter()
        .copied()
        .filter(|&r| r < 0.0)
        .map(f64::abs)
        .collect();

    Ok(ProbabilityEstimates {
        win,
        gain: estimate_magnitude(&gains, z),
        loss: estimate_magnitude(&losses, z),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anchor_bands() {
        assert!((sample_confidence(30) - 0.5).abs() < 0.05, "n=30: {}", sample_confidence(30));
        assert!((sample_confidence(60) - 0.6).abs() < 0.05);
        assert!((sample_confidence(125) - 0.7).abs() < 0.05);
        assert!((sample_confidence(252) - 0.8).abs() < 0.05, "n=252: {}", sample_confidence(252));
        assert!(sample_confidence(500) >= 0.9 - 1e-12);
        assert!(sample_confidence(2000) > 0.9);
    }

    #[test]
    fn test_confidence_monotone_and_saturating() {
        let mut prev = sample_confidence(0);
        assert_eq!(prev, 0.0);
        for n in 1..5000 {
            let c = sample_confidence(n);
            assert!(c >= prev, "confidence decreased at n={n}: {c} < {prev}");
            assert!((0.0..=1.0).contains(&c));
            prev = c;
        }
        assert!(sample_confidence(10_000_000) > 0.9999);
    }

    #[test]
    fn test_empty_series_fails() {
        let err = estimate_win_probability(&[], 0.95).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientData(_)));
    }

    #[test]
    fn test_win_probability_interval() {
        let returns = [0.01, -0.02, 0.03, 0.01, -0.01, 0.02, 0.0, 0.015];
        let est = estimate_win_probability(&returns, 0.95).unwrap();
        assert!((est.point_estimate - 5.0 / 8.0).abs() < 1e-12);
        assert!(est.lower_bound <= est.point_estimate);
        assert!(est.point_estimate <= est.upper_bound);
        assert!(est.lower_bound >= 0.0 && est.upper_bound <= 1.0);
        assert_eq!(est.sample_size, 8);
    }

    #[test]
    fn test_wider_interval_at_higher_level() {
        let returns = [0.01, -0.02, 0.03, 0.01, -0.01, 0.02];
        let narrow = estimate_win_probability(&returns, 0.80).unwrap();
        let wide = estimate_win_probability(&returns, 0.99).unwrap();
        assert!(wide.upper_bound - wide.lower_bound > narrow.upper_bound - narrow.lower_bound);
    }

    #[test]
    fn test_all_positive_has_empty_loss_tail() {
        let returns = [0.01, 0.02, 0.005, 0.03];
        let est = estimate_probabilities(&returns, 0.95).unwrap();
        assert_eq!(est.win.point_estimate, 1.0);
        assert_eq!(est.loss, ConfidenceEstimate::empty());
        assert!((est.gain.point_estimate - 0.01625).abs() < 1e-12);
        assert_eq!(est.gain.sample_size, 4);
    }

    #[test]
    fn test_all_negative_has_empty_gain_tail() {
        let returns = [-0.01, -0.03];
        let est = estimate_probabilities(&returns, 0.95).unwrap();
        assert_eq!(est.win.point_estimate, 0.0);
        assert_eq!(est.gain.sample_confidence, 0.0);
        assert!((est.loss.point_estimate - 0.02).abs() < 1e-12);
        assert!(est.loss.lower_bound >= 0.0);
    }

    #[test]
    fn test_bad_confidence_level_rejected() {
        assert!(matches!(z_score(1.0), Err(EngineError::Config(_))));
        assert!(matches!(z_score(0.0), Err(EngineError::Config(_))));
        assert!((z_score(0.95).unwrap() - 1.959964).abs() < 1e-5);
    }
}
