/// safety.rs — Order admission control
///
/// Three checks, in order; the first failure wins and its reason string is
/// recorded in the audit trail.  A rejected order is skipped for the run,
/// never retried.
///
///   1. cooldown  — a fill inside the window blocks both sides
///   2. conflict  — one resting order per symbol per side: an open SELL
///                  blocks a new BUY and vice versa
///   3. price     — |order − market| must stay within
///                  min(market · max_distance_frac, max_distance_abs);
///                  a missing market price ALLOWS the order (fail open)
use crate::cooldown::CooldownMap;
use crate::models::{OpenOrder, OrderSide};

#[derive(Debug, Clone, Copy)]
pub struct OrderGate {
    pub max_distance_frac: f64,
    pub max_distance_abs: f64,
}

impl Default for OrderGate {
    fn default() -> Self {
        Self { max_distance_frac: 0.10, max_distance_abs: 0.50 }
    }
}

impl OrderGate {
    pub fn check_cooldown(
        &self,
        cooldowns: &CooldownMap,
        wallet_id: &str,
        symbol: &str,
        now_ms: i64,
    ) -> Result<(), String> {
        match cooldowns.remaining(wallet_id, symbol, now_ms) {
            Some(ms) => Err(format!("Cooldown: {}s remaining", (ms as u64).div_ceil(1000))),
            None => Ok(()),
        }
    }

    pub fn check_conflict(
        &self,
        symbol: &str,
        side: OrderSide,
        open_orders: &[OpenOrder],
    ) -> Result<(), String> {
        let opposing = side.opposite();
        let conflict = open_orders
            .iter()
            .any(|o| o.symbol == symbol && o.side == opposing);
        if conflict {
            Err(format!(
                "{} order already exists",
                opposing.as_str().to_uppercase()
            ))
        } else {
            Ok(())
        }
    }

    pub fn check_price(&self, order_price: f64, market_price: Option<f64>) -> Result<(), String> {
        let Some(market) = market_price.filter(|p| *p > 0.0) else {
            // fail open: nothing to compare against
            return Ok(());
        };
        let threshold = (market * self.max_distance_frac).min(self.max_distance_abs);
        let distance = (order_price - market).abs();
        if distance > threshold {
            Err(format!(
                "Price ${order_price:.2} is ${distance:.2} from market ${market:.2} (threshold: ${threshold:.2})"
            ))
        } else {
            Ok(())
        }
    }

    /// All three checks for a proposed order.
    pub fn admit(
        &self,
        cooldowns: &CooldownMap,
        wallet_id: &str,
        symbol: &str,
        side: OrderSide,
        order_price: f64,
        market_price: Option<f64>,
        open_orders: &[OpenOrder],
        now_ms: i64,
    ) -> Result<(), String> {
        self.check_cooldown(cooldowns, wallet_id, symbol, now_ms)?;
        self.check_conflict(symbol, side, open_orders)?;
        self.check_price(order_price, market_price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(symbol: &str, side: OrderSide) -> OpenOrder {
        OpenOrder { id: "o1".to_string(), symbol: symbol.to_string(), side }
    }

    #[test]
    fn price_band_is_min_of_fraction_and_cap() {
        let gate = OrderGate::default();
        // market 10.00 → threshold min(1.00, 0.50) = 0.50
        assert!(gate.check_price(10.60, Some(10.0)).is_err());
        assert!(gate.check_price(10.49, Some(10.0)).is_ok());
        assert!(gate.check_price(10.50, Some(10.0)).is_ok());
        // market 2.00 → threshold min(0.20, 0.50) = 0.20
        assert!(gate.check_price(2.30, Some(2.0)).is_err());
        assert!(gate.check_price(2.15, Some(2.0)).is_ok());
    }

    #[test]
    fn missing_market_price_fails_open() {
        let gate = OrderGate::default();
        assert!(gate.check_price(123.45, None).is_ok());
        assert!(gate.check_price(123.45, Some(0.0)).is_ok());
    }

    #[test]
    fn opposite_side_conflicts() {
        let gate = OrderGate::default();
        let orders = vec![open("MARA", OrderSide::Sell)];
        let err = gate.check_conflict("MARA", OrderSide::Buy, &orders).unwrap_err();
        assert_eq!(err, "SELL order already exists");
        // same side does not conflict, other symbols do not conflict
        assert!(gate.check_conflict("MARA", OrderSide::Sell, &orders).is_ok());
        assert!(gate.check_conflict("RIOT", OrderSide::Buy, &orders).is_ok());
    }

    #[test]
    fn cooldown_blocks_until_window_elapses() {
        let gate = OrderGate::default();
        let mut cooldowns = CooldownMap::default();
        cooldowns.record_fill("w1", "MARA", 1_000_000);

        let err = gate
            .check_cooldown(&cooldowns, "w1", "MARA", 1_000_500)
            .unwrap_err();
        assert_eq!(err, "Cooldown: 60s remaining");
        assert!(gate.check_cooldown(&cooldowns, "w1", "MARA", 1_060_001).is_ok());
    }

    #[test]
    fn admit_reports_first_failure() {
        let gate = OrderGate::default();
        let mut cooldowns = CooldownMap::default();
        cooldowns.record_fill("w1", "MARA", 0);
        let orders = vec![open("MARA", OrderSide::Sell)];

        // cooldown fires before the conflict is even considered
        let err = gate
            .admit(&cooldowns, "w1", "MARA", OrderSide::Buy, 10.0, Some(10.0), &orders, 1_000)
            .unwrap_err();
        assert!(err.starts_with("Cooldown:"), "{err}");

        // past the window, the conflict surfaces
        let err = gate
            .admit(&cooldowns, "w1", "MARA", OrderSide::Buy, 10.0, Some(10.0), &orders, 100_000)
            .unwrap_err();
        assert_eq!(err, "SELL order already exists");
    }
}
