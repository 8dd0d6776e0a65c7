use super::candidate::AssetCandidate;
use super::Exclusion;
use crate::errors::{EngineError, EngineResult};
use crate::risk::limits::{self, ConstraintSet, RiskCheck};

/// How a candidate is pending and ranked. The constrained reduction in
/// `PortfolioAllocator::allocate` is shared by every strategy.
/// Implementations must be pure: deterministic output from the candidate only.
pub trait AllocationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Kelly fraction the position is pending with, before fractional scaling.
    fn kelly_fraction(&self, candidate: &AssetCandidate) -> f64;

    /// Quality in [0, 1] gating the threshold, scaling cap and floor, and ranking.
    fn quality(&self, candidate: &AssetCandidate) -> f64;
}

/// Plain Kelly with flat caps.
pub struct StandardKelly;

/// Confidence-weighted Kelly; caps scale with the confidence factor.
pub struct ConfidenceWeightedKelly;

/// Kelly coupled to all three risk lenses; caps scale with the unified score.
pub struct UnifiedKelly;

impl AllocationStrategy for StandardKelly {
    fn name(&self) -> &'static str {
        "standard"
    }

    fn kelly_fraction(&self, candidate: &AssetCandidate) -> f64 {
        candidate.kelly.base_kelly
    }

    fn quality(&self, _candidate: &AssetCandidate) -> f64 {
        1.0
    }
}

impl AllocationStrategy for ConfidenceWeightedKelly {
    fn name(&self) -> &'static str {
        "confidence"
    }

    fn kelly_fraction(&self, candidate: &AssetCandidate) -> f64 {
        candidate.kelly.confidence_weighted_kelly
    }

    fn quality(&self, candidate: &AssetCandidate) -> f64 {
        candidate.kelly.confidence_factor
    }
}

impl AllocationStrategy for UnifiedKelly {
    fn name(&self) -> &'static str {
        "unified"
    }

    fn kelly_fraction(&self, candidate: &AssetCandidate) -> f64 {
        candidate.score.risk_adjusted_kelly
    }

    fn quality(&self, candidate: &AssetCandidate) -> f64 {
        candidate.score.unified_score
    }
}

static STANDARD: StandardKelly = StandardKelly;
static CONFIDENCE: ConfidenceWeightedKelly = ConfidenceWeightedKelly;
static UNIFIED: UnifiedKelly = UnifiedKelly;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Standard,
    Confidence,
    Unified,
}

impl StrategyKind {
    pub fn parse(s: &str) -> EngineResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(Self::Standard),
            "confidence" | "confidence_weighted" => Ok(Self::Confidence),
            "unified" => Ok(Self::Unified),
            other => Err(EngineError::Config(format!("unknown allocation strategy: {other}"))),
        }
    }

    pub fn strategy(self) -> &'static dyn AllocationStrategy {
        match self {
            Self::Standard => &STANDARD,
            Self::Confidence => &CONFIDENCE,
            Self::Unified => &UNIFIED,
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.strategy().name())
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct AllocationEntry {
    pub ticker: String,
    pub current_price: f64,
    pub dollar_allocation: f64,
    /// Whole lots purchasable: shares, or option contracts
    pub shares: u64,
    pub unified_score: f64,
    pub confidence_factor: f64,
    /// Strategy quality the entry was capped and ranked by
    pub quality: f64,
    pub kelly_fraction_used: f64,
    pub scaled_kelly: f64,
}

/// Output of one allocation. `total_allocated + cash_remaining == portfolio_value` exactly.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct AllocationPlan {
    pub strategy: &'static str,
    pub portfolio_value: f64,
    pub constraints: ConstraintSet,
    pub entries: Vec<AllocationEntry>,
    pub total_allocated: f64,
    pub cash_remaining: f64,
    pub allocation_percentage: f64,
    /// Candidates dropped by the constraints: sizing drops in input order,
    /// then post-pro-rating drops in rank order
    pub dropped: Vec<Exclusion>,
}

impl AllocationPlan {
    pub fn empty(strategy: &'static str, portfolio_value: f64, constraints: ConstraintSet) -> Self {
        Self {
            strategy,
            portfolio_value,
            constraints,
            entries: Vec::new(),
            total_allocated: 0.0,
            cash_remaining: portfolio_value,
            allocation_percentage: 0.0,
            dropped: Vec::new(),
        }
    }
}

/// Constrained allocator for one book. Equities and options differ only in
/// the `ConstraintSet` they are built with.
#[derive(Debug, Clone, Copy)]
pub struct PortfolioAllocator {
    constraints: ConstraintSet,
}

impl PortfolioAllocator {
    pub fn new(constraints: ConstraintSet) -> Self {
        Self { constraints }
    }

    pub fn equities() -> Self {
        Self::new(ConstraintSet::equity())
    }

    pub fn options() -> Self {
        Self::new(ConstraintSet::options())
    }

    #[inline]
    pub fn constraints(&self) -> &ConstraintSet {
        &self.constraints
    }

    /// Allocate `portfolio_value` across `candidates`.
    ///
    /// Single-threaded, order-sensitive reduction over the complete candidate set:
    ///   1. size, cap and floor each candidate (see `limits::size_position`)
    ///   2. rank by quality descending, ticker ascending
    ///   3. pro-rate everything down if the per-position caps overshoot the pool
    ///   4. drop entries pro-rating pushed to the floor, or that no longer buy
    ///      one whole contract, and pro-rate the rest again until stable
    ///   5. settle totals so allocated + cash equals the pool exactly
    pub fn allocate(
        &self,
        strategy: &dyn AllocationStrategy,
        candidates: &[AssetCandidate],
        portfolio_value: f64,
    ) -> EngineResult<AllocationPlan> {
        if !(portfolio_value > 0.0 && portfolio_value.is_finite()) {
            return Err(EngineError::InvalidPortfolioValue(portfolio_value));
        }

        let mut plan = AllocationPlan::empty(strategy.name(), portfolio_value, self.constraints);
        let mut pending: Vec<Pending> = Vec::with_capacity(candidates.len());

        for candidate in candidates {
            let quality = strategy.quality(candidate);
            let kelly_fraction = strategy.kelly_fraction(candidate);
            let position = limits::size_position(&self.constraints, quality, kelly_fraction, portfolio_value);

            if let RiskCheck::Blocked(reason) = position.check {
                tracing::debug!(ticker = %candidate.ticker, quality, kelly_fraction, reason, "candidate dropped");
                plan.dropped.push(Exclusion::new(&candidate.ticker, "allocation", reason));
                continue;
            }

            pending.push(Pending {
                dollars: position.dollars,
                lot_cost: candidate.lot_cost(),
                whole_lots: candidate.contract_multiplier > 1.0,
                entry: AllocationEntry {
                    ticker: candidate.ticker.clone(),
                    current_price: candidate.current_price,
                    dollar_allocation: position.dollars,
                    shares: 0,
                    unified_score: candidate.score.unified_score,
                    confidence_factor: candidate.kelly.confidence_factor,
                    quality,
                    kelly_fraction_used: kelly_fraction,
                    scaled_kelly: position.scaled_kelly,
                },
            });
        }

        pending.sort_by(|a, b| {
            b.entry
                .quality
                .total_cmp(&a.entry.quality)
                .then_with(|| a.entry.ticker.cmp(&b.entry.ticker))
        });

        // Dropping an entry only raises the factor, so every pass removes
        // at least one entry or ends the loop.
        let factor = loop {
            let sum: f64 = pending.iter().map(|s| s.dollars).sum();
            let factor = if sum > portfolio_value { portfolio_value / sum } else { 1.0 };

            let before = pending.len();
            let min_allocation = self.constraints.min_allocation;
            pending.retain(|s| match s.shortfall(factor, min_allocation) {
                Some(reason) => {
                    tracing::debug!(ticker = %s.entry.ticker, factor, reason, "entry dropped after pro-rating");
                    plan.dropped.push(Exclusion::new(&s.entry.ticker, "allocation", reason));
                    false
                }
                None => true,
            });
            if pending.len() == before {
                break factor;
            }
        };

        if factor < 1.0 {
            tracing::info!(portfolio_value, factor, "pro-rated allocations to fit the pool");
        }

        plan.entries = pending
            .into_iter()
            .map(|s| {
                let dollars = s.dollars * factor;
                AllocationEntry {
                    dollar_allocation: dollars,
                    shares: lots(dollars, s.lot_cost),
                    ..s.entry
                }
            })
            .collect();

        // cash = V - t, then t = V - cash: one of the two subtractions is exact
        // (Sterbenz), so t + cash == V holds exactly in f64.
        let allocated: f64 = plan.entries.iter().map(|e| e.dollar_allocation).sum();
        let allocated = allocated.min(portfolio_value).max(0.0);
        plan.cash_remaining = portfolio_value - allocated;
        plan.total_allocated = portfolio_value - plan.cash_remaining;
        plan.allocation_percentage = 100.0 * plan.total_allocated / portfolio_value;

        Ok(plan)
    }
}

/// An entry that passed sizing, with its pre-pro-rating dollars.
struct Pending {
    dollars: f64,
    lot_cost: f64,
    /// Only whole lots trade (option contracts)
    whole_lots: bool,
    entry: AllocationEntry,
}

impl Pending {
    fn shortfall(&self, factor: f64, min_allocation: f64) -> Option<&'static str> {
        let dollars = self.dollars * factor;
        if dollars <= min_allocation * self.entry.quality {
            Some("below minimum allocation")
        } else if self.whole_lots && lots(dollars, self.lot_cost) == 0 {
            Some("allocation below one contract")
        } else {
            None
        }
    }
}

#[inline]
fn lots(dollars: f64, lot_cost: f64) -> u64 {
    if lot_cost > 0.0 {
        (dollars / lot_cost).floor() as u64
    } else {
        0
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::confidence::{ConfidenceEstimate, ProbabilityEstimates};
    use crate::models::ratios::RatioResult;
    use crate::models::volatility::SeriesStats;
    use crate::risk::kelly::KellyResult;
    use crate::risk::scoring::UnifiedScore;

    /// Candidate with hand-picked sizing inputs; statistics are placeholders.
    pub(crate) fn candidate(ticker: &str, unified: f64, risk_adjusted_kelly: f64) -> AssetCandidate {
        let est = ConfidenceEstimate {
            point_estimate: 0.55,
            lower_bound: 0.5,
            upper_bound: 0.6,
            sample_confidence: 0.8,
            sample_size: 252,
        };
        AssetCandidate {
            ticker: ticker.to_string(),
            current_price: 2.5,
            contract_multiplier: 1.0,
            estimates: ProbabilityEstimates { win: est, gain: est, loss: est },
            kelly: KellyResult {
                base_kelly: risk_adjusted_kelly * 2.0,
                confidence_factor: 0.8,
                risk_adjustment: 1.0 / 1.2,
                confidence_weighted_kelly: risk_adjusted_kelly * 1.5,
                conservative_kelly: risk_adjusted_kelly,
                optimistic_kelly: risk_adjusted_kelly * 2.5,
            },
            ratios: RatioResult {
                sortino_ratio: 1.0,
                calmar_ratio: 1.0,
                max_drawdown: 0.2,
                cagr: 0.2,
            },
            stats: SeriesStats {
                mean_return: 0.001,
                volatility: 0.03,
                sharpe_ratio: 0.03,
                total_return: 0.25,
            },
            score: UnifiedScore {
                kelly_score: unified,
                sortino_score: unified,
                calmar_score: unified,
                unified_score: unified,
                risk_adjusted_kelly,
            },
            greeks: None,
        }
    }

    #[test]
    fn test_low_score_excluded() {
        let cands = vec![
            candidate("AAA", 0.8, 0.3),
            candidate("BBB", 0.5, 0.3),
            candidate("CCC", 0.05, 0.3),
        ];
        let plan = PortfolioAllocator::equities().allocate(&UnifiedKelly, &cands, 1000.0).unwrap();
        let tickers: Vec<&str> = plan.entries.iter().map(|e| e.ticker.as_str()).collect();
        assert_eq!(tickers, vec!["AAA", "BBB"]);
        assert_eq!(plan.dropped.len(), 1);
        assert_eq!(plan.dropped[0].ticker, "CCC");
        assert_eq!(plan.dropped[0].reason, "score below threshold");
    }

    #[test]
    fn test_caps_and_shares() {
        // 0.3 half-Kelly = $150; caps: 20% * 0.8 = $160, 20% * 0.5 = $100
        let cands = vec![candidate("AAA", 0.8, 0.3), candidate("BBB", 0.5, 0.3)];
        let plan = PortfolioAllocator::equities().allocate(&UnifiedKelly, &cands, 1000.0).unwrap();
        assert!((plan.entries[0].dollar_allocation - 150.0).abs() < 1e-9);
        assert!((plan.entries[1].dollar_allocation - 100.0).abs() < 1e-9);
        assert_eq!(plan.entries[0].shares, 60);
        assert_eq!(plan.entries[1].shares, 40);
        assert!((plan.allocation_percentage - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_accounting_identity_is_exact() {
        let cands = vec![
            candidate("AAA", 0.83, 0.137),
            candidate("BBB", 0.41, 0.071),
            candidate("CCC", 0.67, 0.0913),
            candidate("DDD", 0.29, 0.4),
        ];
        for v in [1000.0, 1234.56, 0.37, 98_765.4321, 1e9 / 3.0] {
            let plan = PortfolioAllocator::equities().allocate(&UnifiedKelly, &cands, v).unwrap();
            assert_eq!(plan.total_allocated + plan.cash_remaining, v, "identity broke at V={v}");
            assert!(plan.total_allocated <= v);
            assert!(plan.cash_remaining >= 0.0);
        }
    }

    #[test]
    fn test_ties_broken_by_ticker() {
        let cands = vec![
            candidate("ZED", 0.6, 0.2),
            candidate("ALF", 0.6, 0.2),
            candidate("MID", 0.9, 0.2),
        ];
        let plan = PortfolioAllocator::equities().allocate(&UnifiedKelly, &cands, 1000.0).unwrap();
        let tickers: Vec<&str> = plan.entries.iter().map(|e| e.ticker.as_str()).collect();
        assert_eq!(tickers, vec!["MID", "ALF", "ZED"]);
    }

    #[test]
    fn test_deterministic() {
        let cands = vec![
            candidate("AAA", 0.7, 0.21),
            candidate("BBB", 0.7, 0.13),
            candidate("CCC", 0.45, 0.33),
        ];
        let a = PortfolioAllocator::equities().allocate(&UnifiedKelly, &cands, 5000.0).unwrap();
        let b = PortfolioAllocator::equities().allocate(&UnifiedKelly, &cands, 5000.0).unwrap();
        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_pro_rating_preserves_ratio() {
        // Uncapped book: $700 + $500 = $1200 against a $1000 pool
        let constraints = ConstraintSet {
            scaling_factor: 1.0,
            max_position_pct: 1.0,
            min_allocation: 10.0,
            min_score_threshold: 0.1,
        };
        let cands = vec![candidate("AAA", 0.9, 0.7), candidate("BBB", 0.8, 0.5)];
        let plan = PortfolioAllocator::new(constraints).allocate(&UnifiedKelly, &cands, 1000.0).unwrap();

        let factor = 1000.0 / (0.7 * 1000.0 + 0.5 * 1000.0);
        assert!((plan.entries[0].dollar_allocation - 700.0 * factor).abs() < 1e-9);
        assert!((plan.entries[1].dollar_allocation - 500.0 * factor).abs() < 1e-9);
        let ratio = plan.entries[0].dollar_allocation / plan.entries[1].dollar_allocation;
        assert!((ratio - 1.4).abs() < 1e-12, "ratio={ratio}");
        assert_eq!(plan.total_allocated + plan.cash_remaining, 1000.0);
        assert!(plan.total_allocated <= 1000.0);
        assert!((plan.total_allocated - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_pro_rating_respects_floor() {
        // Six $200 positions plus SMALL at $9.75 (floor $9.50) overshoot $1000;
        // pro-rating by 1000/1209.75 would leave SMALL at about $8.06.
        let mut cands: Vec<AssetCandidate> = ["AAA", "BBB", "CCC", "DDD", "EEE", "FFF"]
            .iter()
            .map(|t| candidate(t, 1.0, 0.8))
            .collect();
        cands.push(candidate("SMALL", 0.95, 0.0195));

        let plan = PortfolioAllocator::equities().allocate(&UnifiedKelly, &cands, 1000.0).unwrap();

        assert!(plan.entries.iter().all(|e| e.ticker != "SMALL"));
        let small = plan.dropped.iter().find(|x| x.ticker == "SMALL").unwrap();
        assert_eq!(small.reason, "below minimum allocation");

        let floor = plan.constraints.min_allocation;
        for e in &plan.entries {
            assert!(e.dollar_allocation > floor * e.quality, "{} below floor: {}", e.ticker, e.dollar_allocation);
            assert!((e.dollar_allocation - 1000.0 / 6.0).abs() < 1e-9, "{} not re-pro-rated", e.ticker);
        }
        assert_eq!(plan.entries.len(), 6);
        assert_eq!(plan.total_allocated + plan.cash_remaining, 1000.0);
        assert!((plan.total_allocated - 1000.0).abs() < 1e-9);
    }

    #[test]
    fn test_option_without_whole_contract_dropped() {
        // Options book at $1000: both capped at 5% * 0.8 = $40.
        // One contract costs $50 for DEAR and $20 for CHEAP.
        let cands = vec![
            AssetCandidate {
                current_price: 0.5,
                contract_multiplier: 100.0,
                ..candidate("DEAR", 0.8, 0.3)
            },
            AssetCandidate {
                current_price: 0.2,
                contract_multiplier: 100.0,
                ..candidate("CHEAP", 0.8, 0.3)
            },
        ];
        let plan = PortfolioAllocator::options().allocate(&UnifiedKelly, &cands, 1000.0).unwrap();

        assert_eq!(plan.entries.len(), 1);
        assert_eq!(plan.entries[0].ticker, "CHEAP");
        assert_eq!(plan.entries[0].shares, 2);
        assert_eq!(plan.dropped.len(), 1);
        assert_eq!(plan.dropped[0].ticker, "DEAR");
        assert_eq!(plan.dropped[0].reason, "allocation below one contract");
        assert!((plan.total_allocated - 40.0).abs() < 1e-9);
        assert_eq!(plan.total_allocated + plan.cash_remaining, 1000.0);
    }

    #[test]
    fn test_equities_not_lot_constrained() {
        // $150 buys no $1000 share; the position is kept with zero shares
        let cands = vec![AssetCandidate {
            current_price: 1000.0,
            ..candidate("BRK", 0.8, 0.3)
        }];
        let plan = PortfolioAllocator::equities().allocate(&UnifiedKelly, &cands, 1000.0).unwrap();
        assert_eq!(plan.entries.len(), 1);
        assert_eq!(plan.entries[0].shares, 0);
    }

    #[test]
    fn test_negative_kelly_dropped() {
        let cands = vec![candidate("NEG", 0.9, -0.2)];
        let plan = PortfolioAllocator::equities().allocate(&UnifiedKelly, &cands, 1000.0).unwrap();
        assert!(plan.entries.is_empty());
        assert_eq!(plan.dropped[0].reason, "no edge");
        assert_eq!(plan.cash_remaining, 1000.0);
    }

    #[test]
    fn test_empty_candidates() {
        let plan = PortfolioAllocator::equities().allocate(&UnifiedKelly, &[], 1000.0).unwrap();
        assert!(plan.entries.is_empty());
        assert_eq!(plan.total_allocated, 0.0);
        assert_eq!(plan.cash_remaining, 1000.0);
        assert_eq!(plan.allocation_percentage, 0.0);
    }

    #[test]
    fn test_invalid_portfolio_value() {
        let cands = vec![candidate("AAA", 0.8, 0.3)];
        for v in [0.0, -100.0, f64::NAN, f64::INFINITY] {
            let err = PortfolioAllocator::equities().allocate(&UnifiedKelly, &cands, v).unwrap_err();
            assert!(matches!(err, EngineError::InvalidPortfolioValue(_)));
        }
    }

    #[test]
    fn test_options_book_tighter() {
        // Options: quarter-Kelly of 0.3 = $75, capped at 5% * 0.8 = $40
        let cands = vec![candidate("AAA", 0.8, 0.3)];
        let plan = PortfolioAllocator::options().allocate(&UnifiedKelly, &cands, 1000.0).unwrap();
        assert!((plan.entries[0].dollar_allocation - 40.0).abs() < 1e-9);
    }

    #[test]
    fn test_strategies_share_reduction() {
        let cands = vec![candidate("AAA", 0.5, 0.1)];
        let alloc = PortfolioAllocator::equities();

        // Standard: base Kelly 0.2, half = $100, flat cap $200
        let std_plan = alloc.allocate(StrategyKind::Standard.strategy(), &cands, 1000.0).unwrap();
        assert!((std_plan.entries[0].dollar_allocation - 100.0).abs() < 1e-9);
        assert_eq!(std_plan.strategy, "standard");

        // Confidence: cwk 0.15, half = $75, cap 20% * 0.8 = $160
        let cw_plan = alloc.allocate(StrategyKind::Confidence.strategy(), &cands, 1000.0).unwrap();
        assert!((cw_plan.entries[0].dollar_allocation - 75.0).abs() < 1e-9);

        // Unified: 0.1 half = $50, cap 20% * 0.5 = $100
        let u_plan = alloc.allocate(StrategyKind::Unified.strategy(), &cands, 1000.0).unwrap();
        assert!((u_plan.entries[0].dollar_allocation - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!(StrategyKind::parse("Unified").unwrap(), StrategyKind::Unified);
        assert_eq!(StrategyKind::parse("confidence_weighted").unwrap(), StrategyKind::Confidence);
        assert!(StrategyKind::parse("martingale").is_err());
        assert_eq!(StrategyKind::Standard.to_string(), "standard");
    }
}
