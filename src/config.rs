use crate::errors::{EngineError, EngineResult};
use crate::portfolio::allocator::StrategyKind;
use crate::risk::limits::ConstraintSet;
use crate::risk::scoring::ScoringConfig;
use std::path::PathBuf;
use std::str::FromStr;

/// Statistical knobs shared by every candidate in a run.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct EstimationConfig {
    pub confidence_level: f64,
    pub risk_aversion: f64,
    /// Annualized
    pub risk_free_rate: f64,
    pub periods_per_year: f64,
    /// Fetch window, and the CAGR horizon in periods
    pub lookback_days: u32,
    pub min_sample_size: usize,
}

impl Default for EstimationConfig {
    fn default() -> Self {
        Self {
            confidence_level: 0.95,
            risk_aversion: 1.0,
            risk_free_rate: 0.05,
            periods_per_year: 252.0,
            lookback_days: 252,
            min_sample_size: 30,
        }
    }
}

impl EstimationConfig {
    pub fn validate(&self) -> EngineResult<()> {
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(EngineError::Config(format!(
                "CONFIDENCE_LEVEL must be in (0, 1): {}",
                self.confidence_level
            )));
        }
        if !(self.risk_aversion >= 0.0 && self.risk_aversion.is_finite()) {
            return Err(EngineError::Config(format!("RISK_AVERSION must be >= 0: {}", self.risk_aversion)));
        }
        if !(self.risk_free_rate > -1.0 && self.risk_free_rate.is_finite()) {
            return Err(EngineError::Config(format!("RISK_FREE_RATE out of range: {}", self.risk_free_rate)));
        }
        if !(self.periods_per_year > 0.0 && self.periods_per_year.is_finite()) {
            return Err(EngineError::Config(format!(
                "PERIODS_PER_YEAR must be positive: {}",
                self.periods_per_year
            )));
        }
        if self.lookback_days == 0 {
            return Err(EngineError::Config("LOOKBACK_DAYS must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub tickers: Vec<String>,
    pub portfolio_value: f64,
    pub strategy: StrategyKind,
    pub estimation: EstimationConfig,
    pub scoring: ScoringConfig,
    pub equity_constraints: ConstraintSet,
    pub options_constraints: ConstraintSet,
    pub option_target_move: f64,
    pub fetch_timeout_secs: u64,
    pub fetch_concurrency: usize,
    /// 0 runs a single batch and exits
    pub refresh_interval_secs: u64,
    pub market_data_base_url: String,
    pub market_data_user_agent: String,
    pub returns_fixture_path: Option<PathBuf>,
    pub option_quotes_path: Option<PathBuf>,
    pub server_port: u16,
    pub data_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            tickers: parse_tickers(DEFAULT_TICKERS),
            portfolio_value: 1000.0,
            strategy: StrategyKind::Unified,
            estimation: EstimationConfig::default(),
            scoring: ScoringConfig::default(),
            equity_constraints: ConstraintSet::equity(),
            options_constraints: ConstraintSet::options(),
            option_target_move: 0.25,
            fetch_timeout_secs: 10,
            fetch_concurrency: 8,
            refresh_interval_secs: 3600,
            market_data_base_url: "https://query1.finance.yahoo.com".into(),
            market_data_user_agent: "confident_kelly/0.1".into(),
            returns_fixture_path: None,
            option_quotes_path: None,
            server_port: 3001,
            data_dir: PathBuf::from("data"),
        }
    }
}

const DEFAULT_TICKERS: &str = "SNDL,BITF,ACB,TLRY,CGC,CRON,OGI,VFF";

impl AppConfig {
    pub fn from_env() -> EngineResult<Self> {
        dotenvy::dotenv().ok();

        let d = Self::default();

        let estimation = EstimationConfig {
            confidence_level: parse_or("CONFIDENCE_LEVEL", d.estimation.confidence_level)?,
            risk_aversion: parse_or("RISK_AVERSION", d.estimation.risk_aversion)?,
            risk_free_rate: parse_or("RISK_FREE_RATE", d.estimation.risk_free_rate)?,
            periods_per_year: parse_or("PERIODS_PER_YEAR", d.estimation.periods_per_year)?,
            lookback_days: parse_or("LOOKBACK_DAYS", d.estimation.lookback_days)?,
            min_sample_size: parse_or("MIN_SAMPLE_SIZE", d.estimation.min_sample_size)?,
        };

        let scoring = ScoringConfig {
            kelly_weight: parse_or("KELLY_WEIGHT", d.scoring.kelly_weight)?,
            sortino_weight: parse_or("SORTINO_WEIGHT", d.scoring.sortino_weight)?,
            calmar_weight: parse_or("CALMAR_WEIGHT", d.scoring.calmar_weight)?,
            kelly_scale: parse_or("KELLY_SCALE", d.scoring.kelly_scale)?,
            sortino_divisor: parse_or("SORTINO_DIVISOR", d.scoring.sortino_divisor)?,
            calmar_divisor: parse_or("CALMAR_DIVISOR", d.scoring.calmar_divisor)?,
        };

        // One threshold gates both books
        let min_score_threshold = parse_or("MIN_SCORE_THRESHOLD", d.equity_constraints.min_score_threshold)?;

        let equity_constraints = ConstraintSet {
            scaling_factor: parse_or("SCALING_FACTOR", d.equity_constraints.scaling_factor)?,
            max_position_pct: parse_or("MAX_POSITION_PCT", d.equity_constraints.max_position_pct)?,
            min_allocation: parse_or("MIN_ALLOCATION", d.equity_constraints.min_allocation)?,
            min_score_threshold,
        };

        let options_constraints = ConstraintSet {
            scaling_factor: parse_or("OPTIONS_SCALING_FACTOR", d.options_constraints.scaling_factor)?,
            max_position_pct: parse_or("OPTIONS_MAX_POSITION_PCT", d.options_constraints.max_position_pct)?,
            min_allocation: parse_or("OPTIONS_MIN_ALLOCATION", d.options_constraints.min_allocation)?,
            min_score_threshold,
        };

        let cfg = Self {
            tickers: parse_tickers(&env_var_or("TICKERS", DEFAULT_TICKERS)),
            portfolio_value: parse_or("PORTFOLIO_VALUE", d.portfolio_value)?,
            strategy: StrategyKind::parse(&env_var_or("ALLOCATION_STRATEGY", "unified"))?,
            estimation,
            scoring,
            equity_constraints,
            options_constraints,
            option_target_move: parse_or("OPTION_TARGET_MOVE", d.option_target_move)?,
            fetch_timeout_secs: parse_or("FETCH_TIMEOUT_SECS", d.fetch_timeout_secs)?,
            fetch_concurrency: parse_or("FETCH_CONCURRENCY", d.fetch_concurrency)?,
            refresh_interval_secs: parse_or("REFRESH_INTERVAL_SECS", d.refresh_interval_secs)?,
            market_data_base_url: env_var_or("MARKET_DATA_BASE_URL", &d.market_data_base_url),
            market_data_user_agent: env_var_or("MARKET_DATA_USER_AGENT", &d.market_data_user_agent),
            returns_fixture_path: env_path("RETURNS_FIXTURE_PATH"),
            option_quotes_path: env_path("OPTION_QUOTES_PATH"),
            server_port: parse_or("SERVER_PORT", d.server_port)?,
            data_dir: PathBuf::from(env_var_or("DATA_DIR", "data")),
        };

        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject out-of-range values. Fatal at startup; nothing falls back to defaults.
    pub fn validate(&self) -> EngineResult<()> {
        if self.tickers.is_empty() {
            return Err(EngineError::Config("TICKERS is empty".into()));
        }
        if !(self.portfolio_value > 0.0 && self.portfolio_value.is_finite()) {
            return Err(EngineError::InvalidPortfolioValue(self.portfolio_value));
        }
        self.estimation.validate()?;
        self.scoring.validate()?;
        self.equity_constraints.validate("equity")?;
        self.options_constraints.validate("options")?;
        if !(self.option_target_move > 0.0 && self.option_target_move.is_finite()) {
            return Err(EngineError::Config(format!(
                "OPTION_TARGET_MOVE must be positive: {}",
                self.option_target_move
            )));
        }
        if self.fetch_concurrency == 0 {
            return Err(EngineError::Config("FETCH_CONCURRENCY must be >= 1".into()));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(EngineError::Config("FETCH_TIMEOUT_SECS must be >= 1".into()));
        }
        Ok(())
    }

    #[inline]
    pub fn is_one_shot(&self) -> bool {
        self.refresh_interval_secs == 0
    }
}

/// Comma-separated, trimmed, upper-cased, empties and duplicates dropped.
pub fn parse_tickers(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for t in raw.split(',').map(|t| t.trim().to_ascii_uppercase()) {
        if !t.is_empty() && !out.contains(&t) {
            out.push(t);
        }
    }
    out
}

fn parse_or<T>(key: &str, default: T) -> EngineResult<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| EngineError::Config(format!("{key}: {e}"))),
        Err(_) => Ok(default),
    }
}

fn env_var_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.tickers.len(), 8);
        assert_eq!(cfg.strategy, StrategyKind::Unified);
        assert!(!cfg.is_one_shot());
    }

    #[test]
    fn test_parse_tickers() {
        assert_eq!(parse_tickers(" acb, TLRY ,,acb,cgc "), vec!["ACB", "TLRY", "CGC"]);
        assert!(parse_tickers(" , ").is_empty());
    }

    #[test]
    fn test_out_of_range_rejected() {
        let cfg = AppConfig { portfolio_value: 0.0, ..AppConfig::default() };
        assert!(matches!(cfg.validate(), Err(EngineError::InvalidPortfolioValue(_))));

        let mut cfg = AppConfig::default();
        cfg.estimation.confidence_level = 1.0;
        assert!(matches!(cfg.validate(), Err(EngineError::Config(_))));

        let mut cfg = AppConfig::default();
        cfg.scoring.kelly_weight = 0.6;
        assert!(cfg.validate().is_err());

        let cfg = AppConfig { fetch_concurrency: 0, ..AppConfig::default() };
        assert!(cfg.validate().is_err());
    }
}
