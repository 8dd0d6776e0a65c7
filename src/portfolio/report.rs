//! Run reports and their text rendering.
//! All functions are pure -- they take a report and return strings.

use super::allocator::AllocationPlan;
use super::candidate::AssetCandidate;
use super::Exclusion;
use crate::risk::metrics::RiskMetrics;
use std::fmt::Write;

/// Everything one batch produced. Serialized as-is for stdout, HTTP and WS.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RunReport {
    pub run_id: String,
    /// RFC 3339
    pub timestamp: String,
    pub strategy: &'static str,
    pub candidates: Vec<AssetCandidate>,
    pub exclusions: Vec<Exclusion>,
    /// Tickers whose history arrived, scored or not
    pub assets_fetched: usize,
    /// Multi-asset Kelly weights over the scored equities. Diagnostic only:
    /// the allocator never reads them.
    pub portfolio_kelly: Vec<PortfolioKellyWeight>,
    pub equity_plan: AllocationPlan,
    pub equity_risk: RiskMetrics,
    pub options_plan: AllocationPlan,
    pub options_risk: RiskMetrics,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PortfolioKellyWeight {
    pub ticker: String,
    /// Signed, `sum |weight| = 1`
    pub weight: f64,
}

impl RunReport {
    /// Exclusions from fetching and scoring plus allocator drops from both books.
    pub fn all_exclusions(&self) -> impl Iterator<Item = &Exclusion> {
        self.exclusions
            .iter()
            .chain(self.equity_plan.dropped.iter())
            .chain(self.options_plan.dropped.iter())
    }
}

/// "$1.23K", "$4.50M"; plain two decimals under a thousand.
pub fn format_currency(amount: f64) -> String {
    let sign = if amount < 0.0 { "-" } else { "" };
    let abs = amount.abs();
    if abs >= 1e9 {
        format!("{sign}${:.2}B", abs / 1e9)
    } else if abs >= 1e6 {
        format!("{sign}${:.2}M", abs / 1e6)
    } else if abs >= 1e3 {
        format!("{sign}${:.2}K", abs / 1e3)
    } else {
        format!("{sign}${abs:.2}")
    }
}

/// Fraction to percent with one decimal: 0.1234 -> "12.3%".
pub fn format_percentage(fraction: f64) -> String {
    format!("{:.1}%", fraction * 100.0)
}

/// Plain-text plan table for terminals.
pub fn render_plan(title: &str, plan: &AllocationPlan) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{title} ({} strategy)", plan.strategy);
    let _ = writeln!(
        out,
        "{:<24} {:>10} {:>12} {:>8} {:>8} {:>8} {:>8}",
        "TICKER", "PRICE", "ALLOCATION", "LOTS", "SCORE", "CONF", "KELLY"
    );
    for e in &plan.entries {
        let _ = writeln!(
            out,
            "{:<24} {:>10.2} {:>12} {:>8} {:>8.3} {:>8} {:>8}",
            e.ticker,
            e.current_price,
            format_currency(e.dollar_allocation),
            e.shares,
            e.unified_score,
            format_percentage(e.confidence_factor),
            format_percentage(e.scaled_kelly),
        );
    }
    let _ = writeln!(
        out,
        "allocated {} of {} ({:.1}%), cash {}",
        format_currency(plan.total_allocated),
        format_currency(plan.portfolio_value),
        plan.allocation_percentage,
        format_currency(plan.cash_remaining),
    );
    out
}

pub fn render_risk(title: &str, m: &RiskMetrics) -> String {
    format!(
        "{title}: positions {} | exp. return {} | vol {} | sharpe {:.2} | mdd est. {} | top weight {} | VaR95 {} | ES95 {}\n",
        m.number_of_positions,
        format_percentage(m.expected_return),
        format_percentage(m.portfolio_volatility),
        m.portfolio_sharpe,
        format_percentage(m.max_drawdown_estimate),
        format_percentage(m.concentration_risk),
        format_percentage(m.value_at_risk),
        format_percentage(m.expected_shortfall),
    )
}

/// Full human-readable report for one-shot mode.
pub fn render_report(report: &RunReport) -> String {
    let mut out = format!("run {} at {}\n\n", report.run_id, report.timestamp);
    out.push_str(&render_plan("EQUITIES", &report.equity_plan));
    out.push_str(&render_risk("equity risk", &report.equity_risk));
    if !report.portfolio_kelly.is_empty() {
        let weights: Vec<String> = report
            .portfolio_kelly
            .iter()
            .map(|w| format!("{} {}", w.ticker, format_percentage(w.weight)))
            .collect();
        let _ = writeln!(out, "portfolio kelly: {}", weights.join(", "));
    }
    if !report.options_plan.entries.is_empty() {
        out.push('\n');
        out.push_str(&render_plan("OPTIONS", &report.options_plan));
        out.push_str(&render_risk("options risk", &report.options_risk));
    }
    let excluded: Vec<&Exclusion> = report.all_exclusions().collect();
    if !excluded.is_empty() {
        out.push_str("\nexcluded:\n");
        for x in excluded {
            let _ = writeln!(out, "  {:<24} [{}] {}", x.ticker, x.stage, x.reason);
        }
    }
    out
}
