use crate::config::AppConfig;
use crate::errors::{EngineError, EngineResult};
use crate::feeds::{AssetHistory, OptionChainProvider, ReturnSeriesProvider};
use crate::models::black_scholes::BlackScholes;
use crate::models::volatility::per_period_rate;
use crate::portfolio::allocator::PortfolioAllocator;
use crate::portfolio::candidate::{AssetCandidate, CandidateBuilder};
use crate::portfolio::options::OptionCandidateBuilder;
use crate::portfolio::report::{PortfolioKellyWeight, RunReport};
use crate::portfolio::Exclusion;
use crate::risk::kelly;
use crate::risk::metrics::compute_risk_metrics;
use crate::risk::scoring::UnifiedScorer;
use futures_util::stream::{self, StreamExt};
use std::time::Duration;

/// Score every configured ticker and allocate both books.
///
/// Each ticker is fetched and scored as one unit of a bounded,
/// order-preserving concurrent stream with one timeout per fetch. Any
/// per-asset failure becomes an `Exclusion` and the batch
/// continues. Allocation starts only once every fetch has resolved.
/// Run-level failures abort with no partial report.
pub async fn run_batch<P, O>(provider: &P, options: &O, cfg: &AppConfig) -> EngineResult<RunReport>
where
    P: ReturnSeriesProvider,
    O: OptionChainProvider,
{
    if !(cfg.portfolio_value > 0.0 && cfg.portfolio_value.is_finite()) {
        return Err(EngineError::InvalidPortfolioValue(cfg.portfolio_value));
    }

    let run_id = uuid::Uuid::new_v4().to_string();
    let started = std::time::Instant::now();
    let timeout = Duration::from_secs(cfg.fetch_timeout_secs);
    let concurrency = cfg.fetch_concurrency.max(1);
    let scorer = UnifiedScorer::new(cfg.scoring)?;
    let builder = CandidateBuilder::new(cfg.estimation, scorer);
    let bs = BlackScholes::new()?;

    tracing::info!(run_id = %run_id, tickers = cfg.tickers.len(), strategy = %cfg.strategy, "batch started");

    // ── Fetch and score ──

    let scored: Vec<(&String, Result<(AssetHistory, AssetCandidate), (&'static str, EngineError)>)> =
        stream::iter(cfg.tickers.iter())
            .map(|ticker| async move {
                let outcome = match fetch_with_timeout(provider, ticker, cfg.estimation.lookback_days, timeout).await {
                    Ok(history) => match builder.build(&history) {
                        Ok(c) => Ok((history, c)),
                        Err(e) => Err(("score", e)),
                    },
                    Err(e) => Err(("fetch", e)),
                };
                (ticker, outcome)
            })
            .buffered(concurrency)
            .collect()
            .await;

    let mut candidates: Vec<AssetCandidate> = Vec::with_capacity(scored.len());
    let mut histories: Vec<AssetHistory> = Vec::with_capacity(scored.len());
    let mut exclusions: Vec<Exclusion> = Vec::new();
    let mut assets_fetched = 0usize;

    for (ticker, outcome) in scored {
        if !matches!(outcome, Err(("fetch", _))) {
            assets_fetched += 1;
        }
        match outcome {
            Ok((history, c)) => {
                histories.push(history);
                candidates.push(c);
            }
            Err((stage, e)) if stage == "fetch" || e.is_per_asset() => {
                tracing::warn!(ticker = %ticker, stage, error = %e, "asset excluded");
                exclusions.push(Exclusion::new(ticker, stage, e.to_string()));
            }
            Err((_, e)) => return Err(e),
        }
    }

    let rf = per_period_rate(cfg.estimation.risk_free_rate, cfg.estimation.periods_per_year);
    let portfolio_kelly = portfolio_kelly_weights(&histories, rf);

    // ── Equities book ──

    let strategy = cfg.strategy.strategy();
    let equity_plan = PortfolioAllocator::new(cfg.equity_constraints).allocate(
        strategy,
        &candidates,
        cfg.portfolio_value,
    )?;

    // ── Options book ──

    let option_builder = OptionCandidateBuilder::new(cfg.estimation, scorer, cfg.option_target_move)?;
    let chains: Vec<(&AssetCandidate, EngineResult<_>)> = stream::iter(candidates.iter())
        .map(|c| async move {
            let quotes = match tokio::time::timeout(timeout, options.option_quotes(&c.ticker)).await {
                Ok(r) => r,
                Err(_) => Err(EngineError::unavailable(&c.ticker, "option chain timed out")),
            };
            (c, quotes)
        })
        .buffered(concurrency)
        .collect()
        .await;

    let mut option_candidates: Vec<AssetCandidate> = Vec::new();
    for (underlying, quotes) in chains {
        let quotes = match quotes {
            Ok(q) => q,
            Err(e) => {
                tracing::warn!(ticker = %underlying.ticker, error = %e, "option chain unavailable");
                exclusions.push(Exclusion::new(&underlying.ticker, "options", e.to_string()));
                continue;
            }
        };
        for quote in &quotes {
            match option_builder.build(underlying, quote) {
                Ok(c) => option_candidates.push(c),
                Err(e) => {
                    tracing::warn!(option = %quote.label(), error = %e, "option excluded");
                    exclusions.push(Exclusion::new(&quote.label(), "options", e.to_string()));
                }
            }
        }
    }

    let options_plan = PortfolioAllocator::new(cfg.options_constraints).allocate(
        strategy,
        &option_candidates,
        cfg.portfolio_value,
    )?;

    // ── Risk ──

    let equity_risk = compute_risk_metrics(&equity_plan, &candidates, rf, &bs);
    let options_risk = compute_risk_metrics(&options_plan, &option_candidates, rf, &bs);

    tracing::info!(
        run_id = %run_id,
        scored = candidates.len(),
        excluded = exclusions.len(),
        positions = equity_plan.entries.len(),
        option_positions = options_plan.entries.len(),
        allocated = equity_plan.total_allocated,
        cash = equity_plan.cash_remaining,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "batch completed"
    );

    let mut all_candidates = candidates;
    all_candidates.extend(option_candidates);

    Ok(RunReport {
        run_id,
        timestamp: chrono::Utc::now().to_rfc3339(),
        strategy: strategy.name(),
        candidates: all_candidates,
        exclusions,
        assets_fetched,
        portfolio_kelly,
        equity_plan,
        equity_risk,
        options_plan,
        options_risk,
    })
}

/// Multi-asset Kelly weights over the scored equities; empty when they
/// cannot be estimated.
fn portfolio_kelly_weights(histories: &[AssetHistory], rf_per_period: f64) -> Vec<PortfolioKellyWeight> {
    if histories.len() < 2 {
        return Vec::new();
    }
    let series: Vec<&[f64]> = histories.iter().map(|h| h.returns.as_slice()).collect();
    match kelly::portfolio_weights(&series, rf_per_period) {
        Ok(weights) => histories
            .iter()
            .zip(weights)
            .map(|(h, weight)| PortfolioKellyWeight {
                ticker: h.ticker.clone(),
                weight,
            })
            .collect(),
        Err(e) => {
            tracing::warn!(error = %e, "portfolio Kelly weights unavailable");
            Vec::new()
        }
    }
}

async fn fetch_with_timeout<P: ReturnSeriesProvider>(
    provider: &P,
    ticker: &str,
    lookback_days: u32,
    timeout: Duration,
) -> EngineResult<AssetHistory> {
    match tokio::time::timeout(timeout, provider.fetch_history(ticker, lookback_days)).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::unavailable(
            ticker,
            format!("fetch timed out after {}s", timeout.as_secs()),
        )),
    }
}
