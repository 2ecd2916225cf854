/// pricing.rs — Baseline-relative execution prices and the trade decision
///
/// The engine buys the symbol when it is cheap relative to the reference
/// asset and sells when it is rich:
///
///   buy_multiplier  = 1 + buy_pct / 100
///   sell_multiplier = 1 − sell_pct / 100
///   buy_price  = reference_price / (baseline · buy_multiplier)
///   sell_price = reference_price / (baseline · sell_multiplier)
///
/// Prices carry 4 decimals internally; order submission rounds to 2.
use crate::models::{Decision, OrderSide, Position};

#[derive(Debug, Clone, Copy)]
pub struct ExecutionPrices {
    pub buy_ratio: f64,
    pub sell_ratio: f64,
    pub buy_price: f64,
    pub sell_price: f64,
}

pub fn round4(x: f64) -> f64 {
    (x * 10_000.0).round() / 10_000.0
}

pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

pub fn execution_prices(
    reference_price: f64,
    baseline: f64,
    buy_pct: f64,
    sell_pct: f64,
) -> ExecutionPrices {
    let buy_multiplier = 1.0 + buy_pct / 100.0;
    let sell_multiplier = 1.0 - sell_pct / 100.0;

    let buy_ratio = baseline * buy_multiplier;
    let sell_ratio = baseline * sell_multiplier;

    ExecutionPrices {
        buy_ratio,
        sell_ratio,
        buy_price: round4(reference_price / buy_ratio),
        sell_price: round4(reference_price / sell_ratio),
    }
}

/// Decision from held shares and spendable budget, with the reason recorded
/// in the audit snapshot.
pub fn decide(position: Option<&Position>, budget_available: f64) -> (Decision, String) {
    let has_shares = position.is_some_and(|p| p.qty > 0);
    let has_budget = budget_available > 0.0;

    match (has_shares, has_budget) {
        (true, true) => {
            let p = position.expect("has_shares implies position");
            (
                Decision::Both,
                format!(
                    "Has {} shares (cost basis: ${:.2}) and ${budget_available:.2} budget available",
                    p.qty, p.cost_basis
                ),
            )
        }
        (true, false) => {
            let p = position.expect("has_shares implies position");
            (
                Decision::Sell,
                format!(
                    "Has {} shares (cost basis: ${:.2}), no budget available",
                    p.qty, p.cost_basis
                ),
            )
        }
        (false, true) => (
            Decision::Buy,
            format!("No shares, ${budget_available:.2} budget available"),
        ),
        (false, false) => (Decision::Hold, "No shares and no budget available".to_string()),
    }
}

/// Wash-trade avoidance: a Both decision submits exactly one side.
///
/// At or below the buy price the market is attractive, so the buy goes out;
/// above it the sell goes out.  With no live price the position is reduced
/// rather than grown (Both implies shares are held).
pub fn resolve_both(current_price: Option<f64>, buy_price: f64) -> OrderSide {
    match current_price {
        Some(p) if p <= buy_price => OrderSide::Buy,
        _ => OrderSide::Sell,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(qty: i64) -> Position {
        Position {
            symbol: "MARA".to_string(),
            qty,
            cost_basis: 500.0,
            current_price: Some(10.0),
            market_value: qty as f64 * 10.0,
            unrealized_pl: 0.0,
        }
    }

    #[test]
    fn buy_price_formula() {
        let prices = execution_prices(50_000.0, 20_000.0, 1.0, 2.0);
        let expected = 50_000.0 / (20_000.0 * 1.01);
        assert!((prices.buy_price - round4(expected)).abs() < 1e-9);
        let expected_sell = 50_000.0 / (20_000.0 * 0.98);
        assert!((prices.sell_price - round4(expected_sell)).abs() < 1e-9);
    }

    #[test]
    fn prices_round_to_four_decimals() {
        let prices = execution_prices(50_000.0, 17_000.0, 1.3, 2.7);
        assert_eq!(prices.buy_price, round4(prices.buy_price));
        assert_eq!(prices.sell_price, round4(prices.sell_price));
    }

    #[test]
    fn decision_table() {
        assert_eq!(decide(Some(&pos(10)), 100.0).0, Decision::Both);
        assert_eq!(decide(Some(&pos(10)), 0.0).0, Decision::Sell);
        assert_eq!(decide(None, 100.0).0, Decision::Buy);
        assert_eq!(decide(None, 0.0).0, Decision::Hold);
        // a zero-quantity position is not "holding shares"
        assert_eq!(decide(Some(&pos(0)), 0.0).0, Decision::Hold);
    }

    #[test]
    fn resolve_both_boundary() {
        assert_eq!(resolve_both(Some(9.99), 10.0), OrderSide::Buy);
        assert_eq!(resolve_both(Some(10.0), 10.0), OrderSide::Buy);
        assert_eq!(resolve_both(Some(10.01), 10.0), OrderSide::Sell);
        assert_eq!(resolve_both(None, 10.0), OrderSide::Sell);
    }
}
