/// executor.rs — Per-symbol execution pipeline
///
/// One symbol's run: resolve the session baseline, derive prices, clamp the
/// allocated budget by the cash still uncommitted this run, decide, write the
/// audit snapshot, then submit at most one order through the safety gate.
///
/// Failures never cross the symbol boundary.  Every symbol yields either a
/// SymbolReport or a SymbolFailure; the orchestrator aggregates them and the
/// loop always reaches the next symbol.  A withheld order (zero quantity or a
/// safety-gate rejection) is a successful skip, not a failure.
use chrono::Utc;
use tracing::{info, warn};

use crate::broker::{Broker, OrderTicket};
use crate::budget::BudgetAllocation;
use crate::cooldown::CooldownMap;
use crate::error::{EngineError, Result};
use crate::models::{
    Decision, ExecutionErrorRecord, ExecutionSnapshot, OrderAck, OrderRecord, OrderSide, Position,
    SymbolConfig,
};
use crate::pricing;
use crate::safety::OrderGate;
use crate::session::Session;
use crate::store::{AuditStore, BaselineStore};

/// Successful outcome for one symbol.
#[derive(Debug)]
pub struct SymbolReport {
    pub symbol: String,
    pub decision: Decision,
    pub orders: Vec<OrderAck>,
    /// Reason an order was withheld, when one was considered but not sent.
    pub skipped: Option<String>,
}

/// Failed outcome for one symbol; the wallet run continues past it.
#[derive(Debug)]
pub struct SymbolFailure {
    pub symbol: String,
    pub error: EngineError,
}

pub type SymbolOutcome = std::result::Result<SymbolReport, SymbolFailure>;

/// Wallet-level inputs shared by every symbol in one run.
#[derive(Debug, Clone, Copy)]
pub struct RunContext<'a> {
    pub user_id: &'a str,
    pub wallet_id: &'a str,
    pub session: Session,
    pub reference_price: f64,
    pub account_cash: f64,
}

pub struct SymbolExecutor<'a> {
    broker: &'a dyn Broker,
    baselines: &'a dyn BaselineStore,
    audit: &'a dyn AuditStore,
    gate: &'a OrderGate,
    cooldowns: &'a mut CooldownMap,
    /// Buy notional committed so far this run; caps later symbols' budgets
    /// against the account cash.
    cumulative_spent: f64,
}

impl<'a> SymbolExecutor<'a> {
    pub fn new(
        broker: &'a dyn Broker,
        baselines: &'a dyn BaselineStore,
        audit: &'a dyn AuditStore,
        gate: &'a OrderGate,
        cooldowns: &'a mut CooldownMap,
    ) -> Self {
        Self { broker, baselines, audit, gate, cooldowns, cumulative_spent: 0.0 }
    }

    pub fn cumulative_spent(&self) -> f64 {
        self.cumulative_spent
    }

    /// Run one symbol, converting any error into a recorded SymbolFailure.
    pub async fn execute(
        &mut self,
        ctx: &RunContext<'_>,
        cfg: &SymbolConfig,
        position: Option<&Position>,
        allocation: &BudgetAllocation,
    ) -> SymbolOutcome {
        match self.process(ctx, cfg, position, allocation).await {
            Ok(report) => Ok(report),
            Err(error) => {
                warn!(symbol = %cfg.symbol, %error, "symbol failed");
                let record = ExecutionErrorRecord {
                    user_id: Some(ctx.user_id.to_string()),
                    wallet_id: Some(ctx.wallet_id.to_string()),
                    symbol: Some(cfg.symbol.clone()),
                    error_type: error.error_type().to_string(),
                    message: error.to_string(),
                    function: "execute_symbol".to_string(),
                    severity: "ERROR".to_string(),
                };
                if let Err(e) = self.audit.record_error(&record).await {
                    warn!("failed to record symbol error: {e}");
                }
                Err(SymbolFailure { symbol: cfg.symbol.clone(), error })
            }
        }
    }

    async fn process(
        &mut self,
        ctx: &RunContext<'_>,
        cfg: &SymbolConfig,
        position: Option<&Position>,
        allocation: &BudgetAllocation,
    ) -> Result<SymbolReport> {
        let (buy_pct, sell_pct) = cfg.offsets(ctx.session);
        let method = cfg.method(ctx.session);

        let baseline = self
            .baselines
            .latest(&cfg.symbol, ctx.session, method)
            .await?
            .ok_or_else(|| {
                EngineError::Data(format!(
                    "no {} baseline ({}) for {}",
                    ctx.session, method, cfg.symbol
                ))
            })?;

        let prices =
            pricing::execution_prices(ctx.reference_price, baseline.baseline, buy_pct, sell_pct);

        let remaining_cash = (ctx.account_cash - self.cumulative_spent).max(0.0);
        let budget_available = allocation.remaining.min(remaining_cash).max(0.0);

        let (decision, reason) = pricing::decide(position, budget_available);
        let symbol_price = position.and_then(|p| p.current_price);

        info!(
            symbol = %cfg.symbol,
            session = %ctx.session,
            method = %method,
            baseline = format!("{:.4}", baseline.baseline),
            buy_price = format!("{:.4}", prices.buy_price),
            sell_price = format!("{:.4}", prices.sell_price),
            budget = format!("{budget_available:.2}"),
            decision = %decision,
            "evaluated"
        );

        let snapshot = ExecutionSnapshot {
            user_id: ctx.user_id.to_string(),
            wallet_id: ctx.wallet_id.to_string(),
            symbol: cfg.symbol.clone(),
            reference_price: ctx.reference_price,
            symbol_price,
            current_ratio: symbol_price.map(|p| ctx.reference_price / p),
            baseline_value: baseline.baseline,
            baseline_method: method,
            buy_price: prices.buy_price,
            sell_price: prices.sell_price,
            decision,
            decision_reason: reason,
            shares_owned: position.map_or(0, |p| p.qty),
            budget_available,
        };
        if let Err(e) = self.audit.record_snapshot(&snapshot).await {
            warn!("snapshot write failed: {e}");
        }

        let mut report = SymbolReport {
            symbol: cfg.symbol.clone(),
            decision,
            orders: Vec::new(),
            skipped: None,
        };

        let side = match decision {
            Decision::Hold => None,
            Decision::Buy => Some(OrderSide::Buy),
            Decision::Sell => Some(OrderSide::Sell),
            // a Both decision narrows to one side; both orders at once would
            // rest against each other
            Decision::Both => Some(pricing::resolve_both(symbol_price, prices.buy_price)),
        };

        match side {
            Some(OrderSide::Buy) => {
                self.try_buy(ctx, cfg, prices.buy_price, budget_available, symbol_price, &mut report)
                    .await?
            }
            Some(OrderSide::Sell) => {
                self.try_sell(ctx, cfg, prices.sell_price, position, symbol_price, &mut report)
                    .await?
            }
            None => {}
        }

        Ok(report)
    }

    async fn try_buy(
        &mut self,
        ctx: &RunContext<'_>,
        cfg: &SymbolConfig,
        buy_price: f64,
        budget_available: f64,
        market_price: Option<f64>,
        report: &mut SymbolReport,
    ) -> Result<()> {
        let qty = (budget_available / buy_price).floor() as i64;
        if qty <= 0 {
            info!(symbol = %cfg.symbol, "insufficient budget to buy even 1 share");
            report.skipped = Some("Insufficient budget to buy even 1 share".to_string());
            return Ok(());
        }

        if self
            .place(ctx, &cfg.symbol, OrderSide::Buy, qty, buy_price, market_price, report)
            .await?
            .is_some()
        {
            let notional = qty as f64 * buy_price;
            self.cumulative_spent += notional;
            info!(
                symbol = %cfg.symbol,
                notional = format!("{notional:.2}"),
                cumulative = format!("{:.2}", self.cumulative_spent),
                "buy notional committed"
            );
        }
        Ok(())
    }

    async fn try_sell(
        &mut self,
        ctx: &RunContext<'_>,
        cfg: &SymbolConfig,
        sell_price: f64,
        position: Option<&Position>,
        market_price: Option<f64>,
        report: &mut SymbolReport,
    ) -> Result<()> {
        let qty = position.map_or(0, |p| p.qty);
        if qty <= 0 {
            info!(symbol = %cfg.symbol, "no shares to sell");
            report.skipped = Some("No shares to sell".to_string());
            return Ok(());
        }
        self.place(ctx, &cfg.symbol, OrderSide::Sell, qty, sell_price, market_price, report)
            .await?;
        Ok(())
    }

    /// Safety-gate the order and submit it.  Ok(None) means the order was
    /// withheld; a submission error propagates as a symbol failure.
    async fn place(
        &mut self,
        ctx: &RunContext<'_>,
        symbol: &str,
        side: OrderSide,
        qty: i64,
        limit_price: f64,
        market_price: Option<f64>,
        report: &mut SymbolReport,
    ) -> Result<Option<OrderAck>> {
        let now_ms = Utc::now().timestamp_millis();

        // fresh conflict view; without it the order is withheld (fail closed)
        let open_orders = match self.broker.get_open_orders().await {
            Ok(orders) => orders,
            Err(e) => {
                warn!(%symbol, "eligibility check failed: {e}");
                report.skipped = Some("Eligibility check failed".to_string());
                return Ok(None);
            }
        };

        if let Err(reason) = self.gate.admit(
            self.cooldowns,
            ctx.wallet_id,
            symbol,
            side,
            limit_price,
            market_price,
            &open_orders,
            now_ms,
        ) {
            info!(%symbol, %side, reason, "order withheld");
            report.skipped = Some(reason);
            return Ok(None);
        }

        let ticket =
            OrderTicket::day_limit(symbol, side, qty, limit_price, !ctx.session.is_core());
        let ack = self.broker.submit_limit_order(&ticket).await?;

        let record = OrderRecord {
            user_id: ctx.user_id.to_string(),
            wallet_id: ctx.wallet_id.to_string(),
            symbol: symbol.to_string(),
            side,
            qty,
            limit_price,
            status: ack.status.clone(),
            broker_order_id: ack.id.clone(),
        };
        if let Err(e) = self.audit.record_order(&record).await {
            warn!("order record write failed: {e}");
        }

        self.cooldowns.record_fill(ctx.wallet_id, symbol, now_ms);
        report.orders.push(ack.clone());
        Ok(Some(ack))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BaselineMethod, BudgetPolicy};
    use crate::testutil::{baseline_row, config, position, MockBroker};
    use crate::store::memory::{MemoryAuditStore, MemoryBaselineStore};

    fn ctx<'a>(cash: f64) -> RunContext<'a> {
        RunContext {
            user_id: "u1",
            wallet_id: "w1",
            session: Session::Core,
            reference_price: 50_000.0,
            account_cash: cash,
        }
    }

    fn stores_with_baseline(baseline: f64) -> (MemoryBaselineStore, MemoryAuditStore) {
        (
            MemoryBaselineStore::with_rows(vec![baseline_row("MARA", Session::Core, BaselineMethod::EqualMean, baseline)]),
            MemoryAuditStore::default(),
        )
    }

    #[tokio::test]
    async fn buy_submits_order_and_tracks_spending() {
        let broker = MockBroker::default();
        let (baselines, audit) = stores_with_baseline(5_000.0);
        let gate = OrderGate::default();
        let mut cooldowns = CooldownMap::default();
        let mut exec = SymbolExecutor::new(&broker, &baselines, &audit, &gate, &mut cooldowns);

        // baseline 5_000, buy pct 1% → buy price 50_000 / 5_050 ≈ 9.9010
        let cfg = config("MARA", BudgetPolicy::Fixed(1_000.0));
        let alloc = BudgetAllocation { total: 1_000.0, cost_basis: 0.0, remaining: 1_000.0 };
        let report = exec.execute(&ctx(10_000.0), &cfg, None, &alloc).await.unwrap();

        assert_eq!(report.decision, Decision::Buy);
        assert_eq!(report.orders.len(), 1);
        let submitted = broker.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].qty, 100); // floor(1_000 / 9.901)
        assert_eq!(submitted[0].side, OrderSide::Buy);
        assert!(!submitted[0].extended_hours);
        assert!((exec.cumulative_spent() - 990.1).abs() < 1e-6);
        assert_eq!(audit.orders.lock().unwrap().len(), 1);
        assert_eq!(audit.snapshots.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn hold_writes_snapshot_and_nothing_else() {
        let broker = MockBroker::default();
        let (baselines, audit) = stores_with_baseline(5_000.0);
        let gate = OrderGate::default();
        let mut cooldowns = CooldownMap::default();
        let mut exec = SymbolExecutor::new(&broker, &baselines, &audit, &gate, &mut cooldowns);

        let cfg = config("MARA", BudgetPolicy::Fixed(0.0));
        let alloc = BudgetAllocation { total: 0.0, cost_basis: 0.0, remaining: 0.0 };
        let report = exec.execute(&ctx(10_000.0), &cfg, None, &alloc).await.unwrap();

        assert_eq!(report.decision, Decision::Hold);
        assert!(report.orders.is_empty());
        assert!(broker.submitted().is_empty());
        assert_eq!(audit.snapshots.lock().unwrap().len(), 1);
        assert!(audit.orders.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_baseline_is_a_recorded_data_failure() {
        let broker = MockBroker::default();
        let baselines = MemoryBaselineStore::default();
        let audit = MemoryAuditStore::default();
        let gate = OrderGate::default();
        let mut cooldowns = CooldownMap::default();
        let mut exec = SymbolExecutor::new(&broker, &baselines, &audit, &gate, &mut cooldowns);

        let cfg = config("MARA", BudgetPolicy::Fixed(1_000.0));
        let alloc = BudgetAllocation { total: 1_000.0, cost_basis: 0.0, remaining: 1_000.0 };
        let failure = exec.execute(&ctx(10_000.0), &cfg, None, &alloc).await.unwrap_err();

        assert!(matches!(failure.error, EngineError::Data(_)));
        let errors = audit.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_type, "DATA_ERROR");
        assert_eq!(errors[0].symbol.as_deref(), Some("MARA"));
    }

    #[tokio::test]
    async fn both_below_buy_price_buys_only() {
        let broker = MockBroker::default();
        let (baselines, audit) = stores_with_baseline(5_000.0);
        let gate = OrderGate::default();
        let mut cooldowns = CooldownMap::default();
        let mut exec = SymbolExecutor::new(&broker, &baselines, &audit, &gate, &mut cooldowns);

        // buy price ≈ 9.9010; market below it → buy
        let pos = position("MARA", 50, 9.85);
        let cfg = config("MARA", BudgetPolicy::Fixed(1_000.0));
        let alloc = BudgetAllocation { total: 1_000.0, cost_basis: 492.5, remaining: 507.5 };
        let report = exec.execute(&ctx(10_000.0), &cfg, Some(&pos), &alloc).await.unwrap();

        assert_eq!(report.decision, Decision::Both);
        let submitted = broker.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].side, OrderSide::Buy);
    }

    #[tokio::test]
    async fn both_above_buy_price_sells_whole_position() {
        let broker = MockBroker::default();
        let (baselines, audit) = stores_with_baseline(5_000.0);
        let gate = OrderGate::default();
        let mut cooldowns = CooldownMap::default();
        let mut exec = SymbolExecutor::new(&broker, &baselines, &audit, &gate, &mut cooldowns);

        let pos = position("MARA", 50, 10.40);
        let cfg = config("MARA", BudgetPolicy::Fixed(1_000.0));
        let alloc = BudgetAllocation { total: 1_000.0, cost_basis: 520.0, remaining: 480.0 };
        let report = exec.execute(&ctx(10_000.0), &cfg, Some(&pos), &alloc).await.unwrap();

        assert_eq!(report.decision, Decision::Both);
        let submitted = broker.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].side, OrderSide::Sell);
        assert_eq!(submitted[0].qty, 50);
    }

    #[tokio::test]
    async fn cumulative_spending_caps_later_symbols() {
        let broker = MockBroker::default();
        let baselines = MemoryBaselineStore::with_rows(vec![
            baseline_row("MARA", Session::Core, BaselineMethod::EqualMean, 5_000.0),
            baseline_row("RIOT", Session::Core, BaselineMethod::EqualMean, 5_000.0),
        ]);
        let audit = MemoryAuditStore::default();
        let gate = OrderGate::default();
        let mut cooldowns = CooldownMap::default();
        let mut exec = SymbolExecutor::new(&broker, &baselines, &audit, &gate, &mut cooldowns);

        // account cash 1_500; both symbols allocated 1_000
        let run = ctx(1_500.0);
        let alloc = BudgetAllocation { total: 1_000.0, cost_basis: 0.0, remaining: 1_000.0 };

        let first = exec
            .execute(&run, &config("MARA", BudgetPolicy::Fixed(1_000.0)), None, &alloc)
            .await
            .unwrap();
        assert_eq!(first.orders.len(), 1);
        let spent_after_first = exec.cumulative_spent();
        assert!(spent_after_first > 989.0);

        // the second symbol only sees what cash is left
        let second = exec
            .execute(&run, &config("RIOT", BudgetPolicy::Fixed(1_000.0)), None, &alloc)
            .await
            .unwrap();
        assert_eq!(second.orders.len(), 1);
        let submitted = broker.submitted();
        let second_notional = submitted[1].qty as f64 * submitted[1].limit_price;
        assert!(
            second_notional <= 1_500.0 - spent_after_first + 1e-9,
            "second buy {second_notional} must fit in remaining cash"
        );
    }

    #[tokio::test]
    async fn conflicting_open_order_withholds_but_does_not_fail() {
        let broker = MockBroker::default();
        broker.set_open_orders(vec![crate::models::OpenOrder {
            id: "o9".to_string(),
            symbol: "MARA".to_string(),
            side: OrderSide::Sell,
        }]);
        let (baselines, audit) = stores_with_baseline(5_000.0);
        let gate = OrderGate::default();
        let mut cooldowns = CooldownMap::default();
        let mut exec = SymbolExecutor::new(&broker, &baselines, &audit, &gate, &mut cooldowns);

        let cfg = config("MARA", BudgetPolicy::Fixed(1_000.0));
        let alloc = BudgetAllocation { total: 1_000.0, cost_basis: 0.0, remaining: 1_000.0 };
        let report = exec.execute(&ctx(10_000.0), &cfg, None, &alloc).await.unwrap();

        assert!(report.orders.is_empty());
        assert_eq!(report.skipped.as_deref(), Some("SELL order already exists"));
        assert!(broker.submitted().is_empty());
    }

    #[tokio::test]
    async fn broker_rejection_is_a_symbol_failure() {
        let broker = MockBroker::default();
        broker.fail_submissions();
        let (baselines, audit) = stores_with_baseline(5_000.0);
        let gate = OrderGate::default();
        let mut cooldowns = CooldownMap::default();
        let mut exec = SymbolExecutor::new(&broker, &baselines, &audit, &gate, &mut cooldowns);

        let cfg = config("MARA", BudgetPolicy::Fixed(1_000.0));
        let alloc = BudgetAllocation { total: 1_000.0, cost_basis: 0.0, remaining: 1_000.0 };
        let failure = exec.execute(&ctx(10_000.0), &cfg, None, &alloc).await.unwrap_err();

        assert!(matches!(failure.error, EngineError::Execution(_)));
        assert_eq!(audit.errors.lock().unwrap().len(), 1);
        // rejected submission never starts a cooldown
        assert!(cooldowns.remaining("w1", "MARA", Utc::now().timestamp_millis()).is_none());
    }
}
