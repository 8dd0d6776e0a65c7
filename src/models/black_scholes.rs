use crate::errors::{EngineError, EngineResult};
use statrs::distribution::{Continuous, ContinuousCDF, Normal};

/// Black-Scholes call sensitivities.
///
///   d1 = (ln(S/K) + (r + sigma^2/2) T) / (sigma sqrt(T)),  d2 = d1 - sigma sqrt(T)
///   delta = N(d1)
///   gamma = n(d1) / (S sigma sqrt(T))
///   theta = -S n(d1) sigma / (2 sqrt(T)) - r K e^(-rT) N(d2)   (per year)
///   vega  = S sqrt(T) n(d1)                                   (per unit vol)
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OptionGreeks {
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
}

/// Standard normal shared by option math. Created once, reused.
pub struct BlackScholes {
    normal: Normal,
}

impl BlackScholes {
    pub fn new() -> EngineResult<Self> {
        let normal = Normal::new(0.0, 1.0)
            .map_err(|e| EngineError::Config(format!("standard normal: {e}")))?;
        Ok(Self { normal })
    }

    /// Call Greeks. `t_years` and `sigma` are annualised.
    pub fn call_greeks(
        &self,
        spot: f64,
        strike: f64,
        t_years: f64,
        rate: f64,
        sigma: f64,
    ) -> EngineResult<OptionGreeks> {
        if spot <= 0.0 || strike <= 0.0 || t_years <= 0.0 || sigma <= 0.0 {
            return Err(EngineError::InvalidOdds(format!(
                "invalid option parameters: S={spot} K={strike} T={t_years} sigma={sigma}"
            )));
        }

        let sqrt_t = t_years.sqrt();
        let sigma_sqrt_t = sigma * sqrt_t;
        let d1 = ((spot / strike).ln() + (rate + 0.5 * sigma * sigma) * t_years) / sigma_sqrt_t;
        let d2 = d1 - sigma_sqrt_t;
        let pdf_d1 = self.normal.pdf(d1);

        Ok(OptionGreeks {
            delta: self.normal.cdf(d1),
            gamma: pdf_d1 / (spot * sigma_sqrt_t),
            theta: -spot * pdf_d1 * sigma / (2.0 * sqrt_t)
                - rate * strike * (-rate * t_years).exp() * self.normal.cdf(d2),
            vega: spot * sqrt_t * pdf_d1,
        })
    }

    /// Probability that the underlying rises by at least `move_fraction` within
    /// `periods` periods, under zero-drift normal returns with per-period
    /// volatility `sigma_per_period`.
    pub fn move_probability(&self, move_fraction: f64, sigma_per_period: f64, periods: f64) -> f64 {
        let spread = sigma_per_period * periods.max(0.0).sqrt();
        if spread <= 0.0 || !spread.is_finite() {
            return if move_fraction <= 0.0 { 1.0 } else { 0.0 };
        }
        1.0 - self.normal.cdf(move_fraction / spread)
    }

    #[inline]
    pub fn normal(&self) -> &Normal {
        &self.normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atm_delta_above_half() {
        let bs = BlackScholes::new().unwrap();
        let g = bs.call_greeks(100.0, 100.0, 0.25, 0.05, 0.3).unwrap();
        assert!(g.delta > 0.5 && g.delta < 0.65, "ATM call delta={}", g.delta);
        assert!(g.gamma > 0.0);
        assert!(g.vega > 0.0);
        assert!(g.theta < 0.0, "long call theta should be negative: {}", g.theta);
    }

    #[test]
    fn test_deep_itm_and_otm_delta() {
        let bs = BlackScholes::new().unwrap();
        let itm = bs.call_greeks(150.0, 100.0, 0.1, 0.05, 0.3).unwrap();
        let otm = bs.call_greeks(60.0, 100.0, 0.1, 0.05, 0.3).unwrap();
        assert!(itm.delta > 0.95, "deep ITM delta={}", itm.delta);
        assert!(otm.delta < 0.05, "deep OTM delta={}", otm.delta);
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        let bs = BlackScholes::new().unwrap();
        assert!(bs.call_greeks(0.0, 100.0, 0.1, 0.05, 0.3).is_err());
        assert!(bs.call_greeks(100.0, 100.0, 0.0, 0.05, 0.3).is_err());
        assert!(bs.call_greeks(100.0, 100.0, 0.1, 0.05, 0.0).is_err());
    }

    #[test]
    fn test_move_probability_grows_with_horizon() {
        let bs = BlackScholes::new().unwrap();
        let short = bs.move_probability(0.25, 0.05, 5.0);
        let long = bs.move_probability(0.25, 0.05, 60.0);
        assert!(short < long, "short={short} long={long}");
        assert!(long < 0.5);
        assert_eq!(bs.move_probability(0.25, 0.0, 30.0), 0.0);
    }
}
