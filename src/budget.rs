/// budget.rs — Per-run capital allocation across a wallet's symbols
///
/// Fixed-dollar budgets are hard commitments: they always receive their full
/// remaining request, even when the account cannot cover them (cash
/// sufficiency is enforced per-order by the executor's cumulative-spent
/// counter).  Percent-of-equity budgets share whatever cash is left after the
/// fixed commitments; under contention every percent-mode remainder is scaled
/// by the same factor, so the scaled remainders sum exactly to the cash pool.
use std::collections::HashMap;

use tracing::info;

use crate::models::{BudgetPolicy, Position, SymbolConfig};

/// Capital granted to one symbol for one orchestrator run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetAllocation {
    /// The policy's full request (unscaled).
    pub total: f64,
    /// Cost basis already committed to the position.
    pub cost_basis: f64,
    /// Spendable this run, after cost basis and cross-symbol scaling.
    pub remaining: f64,
}

/// Allocate budgets for all enabled symbol configs of one wallet.
pub fn allocate(
    cash: f64,
    equity: f64,
    positions: &HashMap<String, Position>,
    configs: &[SymbolConfig],
) -> HashMap<String, BudgetAllocation> {
    struct Request {
        symbol: String,
        fixed: bool,
        requested: f64,
        cost_basis: f64,
        remaining: f64,
    }

    let mut requests = Vec::with_capacity(configs.len());
    let mut fixed_need = 0.0;
    let mut percent_requested = 0.0;

    for cfg in configs {
        let cost_basis = positions.get(&cfg.symbol).map_or(0.0, |p| p.cost_basis);
        let (fixed, requested) = match cfg.budget {
            BudgetPolicy::Fixed(dollars) => (true, dollars),
            BudgetPolicy::Percent(pct) => (false, pct * equity / 100.0),
        };
        let remaining = (requested - cost_basis).max(0.0);
        if fixed {
            fixed_need += remaining;
        } else {
            percent_requested += remaining;
        }
        requests.push(Request { symbol: cfg.symbol.clone(), fixed, requested, cost_basis, remaining });
    }

    let cash_for_percent = (cash - fixed_need).max(0.0);
    let scale = if percent_requested > cash_for_percent && percent_requested > 0.0 {
        cash_for_percent / percent_requested
    } else {
        1.0
    };
    if scale < 1.0 {
        info!(
            fixed_need = format!("{fixed_need:.2}"),
            percent_requested = format!("{percent_requested:.2}"),
            cash_for_percent = format!("{cash_for_percent:.2}"),
            scale = format!("{scale:.4}"),
            "percent budgets scaled down"
        );
    }

    requests
        .into_iter()
        .map(|r| {
            let remaining = if r.fixed { r.remaining } else { r.remaining * scale };
            (
                r.symbol,
                BudgetAllocation { total: r.requested, cost_basis: r.cost_basis, remaining },
            )
        })
        .collect()
}
