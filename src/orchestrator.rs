/// orchestrator.rs — Wallet runs and the minute scheduler pass
///
/// One pass: read the global switches, then walk every enabled wallet in
/// sequence.  Wallets are never processed concurrently; sequential runs keep
/// the audit ordering simple and avoid brokerage rate-limit bursts, and they
/// guarantee the pre-run order cancellation lands before any new order.
///
/// Nothing here throws past the pass.  A wallet that cannot run (missing
/// keys, dead vendor, lookup failure) yields a failed ExecutionResult and the
/// loop moves on to the next wallet.
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::broker::VendorGateway;
use crate::budget::{self, BudgetAllocation};
use crate::cooldown::CooldownMap;
use crate::error::{EngineError, Result};
use crate::executor::{RunContext, SymbolExecutor, SymbolOutcome};
use crate::models::{CancellationRecord, ExecutionErrorRecord, Wallet};
use crate::safety::OrderGate;
use crate::session;
use crate::store::{AuditStore, BaselineStore, ConfigStore};

/// Aggregate result of one wallet run.  Always produced, success or not.
#[derive(Debug)]
pub struct ExecutionResult {
    pub wallet_id: String,
    pub success: bool,
    pub message: Option<String>,
    pub outcomes: Vec<SymbolOutcome>,
}

impl ExecutionResult {
    fn skipped(wallet_id: &str, message: &str) -> Self {
        Self {
            wallet_id: wallet_id.to_string(),
            success: true,
            message: Some(message.to_string()),
            outcomes: Vec::new(),
        }
    }

    fn failed(wallet_id: &str, message: String) -> Self {
        Self {
            wallet_id: wallet_id.to_string(),
            success: false,
            message: Some(message),
            outcomes: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_ok()).count()
    }

    pub fn failed_symbols(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_err()).count()
    }
}

pub struct Orchestrator {
    config: Arc<dyn ConfigStore>,
    baselines: Arc<dyn BaselineStore>,
    audit: Arc<dyn AuditStore>,
    vendors: Arc<dyn VendorGateway>,
    gate: OrderGate,
    cooldowns: CooldownMap,
    reference_ticker: String,
}

impl Orchestrator {
    pub fn new(
        config: Arc<dyn ConfigStore>,
        baselines: Arc<dyn BaselineStore>,
        audit: Arc<dyn AuditStore>,
        vendors: Arc<dyn VendorGateway>,
        gate: OrderGate,
        cooldowns: CooldownMap,
        reference_ticker: String,
    ) -> Self {
        Self { config, baselines, audit, vendors, gate, cooldowns, reference_ticker }
    }

    /// Entry point for manual triggers: look the wallet up, then run it.
    pub async fn execute_wallet_by_id(&mut self, wallet_id: &str) -> ExecutionResult {
        match self.config.wallet(wallet_id).await {
            Ok(Some(wallet)) => self.execute_wallet(&wallet).await,
            Ok(None) => {
                let error = EngineError::Critical(format!("wallet {wallet_id} not found"));
                self.record_wallet_error(None, Some(wallet_id), &error).await;
                ExecutionResult::failed(wallet_id, error.to_string())
            }
            Err(error) => {
                self.record_wallet_error(None, Some(wallet_id), &error).await;
                ExecutionResult::failed(wallet_id, error.to_string())
            }
        }
    }

    /// Run one wallet; every failure is caught here and reported as a result.
    pub async fn execute_wallet(&mut self, wallet: &Wallet) -> ExecutionResult {
        info!(wallet = %wallet.name, wallet_id = %wallet.wallet_id, "executing wallet");
        match self.run_wallet(wallet).await {
            Ok(result) => result,
            Err(error) => {
                error!(wallet_id = %wallet.wallet_id, %error, "wallet run failed");
                self.record_wallet_error(Some(&wallet.user_id), Some(&wallet.wallet_id), &error)
                    .await;
                ExecutionResult::failed(&wallet.wallet_id, error.to_string())
            }
        }
    }

    async fn run_wallet(&mut self, wallet: &Wallet) -> Result<ExecutionResult> {
        if !wallet.enabled {
            info!(wallet_id = %wallet.wallet_id, "wallet disabled, skipping");
            return Ok(ExecutionResult::skipped(&wallet.wallet_id, "Wallet disabled"));
        }

        let creds = self
            .config
            .broker_credentials(wallet)
            .await?
            .ok_or_else(|| {
                EngineError::Config(format!(
                    "no {} brokerage keys for wallet {}",
                    wallet.env, wallet.wallet_id
                ))
            })?;
        let market_key = self
            .config
            .market_data_key(wallet)
            .await?
            .ok_or_else(|| {
                EngineError::Config(format!("no market-data key for wallet {}", wallet.wallet_id))
            })?;

        let broker = self.vendors.broker_for(wallet, &creds);
        let market = self.vendors.market_for(wallet, &market_key);

        let reference = market.last_trade(&self.reference_ticker).await?;
        let positions = broker.get_positions().await?;
        let account = broker.get_account().await?;

        // one cancellation sweep per run, before any symbol is considered
        let open_orders = broker.get_open_orders().await?;
        if !open_orders.is_empty() {
            info!(count = open_orders.len(), "cancelling open orders");
        }
        for order in open_orders {
            match broker.cancel_order(&order.id).await {
                Ok(()) => {
                    let record = CancellationRecord {
                        user_id: wallet.user_id.clone(),
                        wallet_id: wallet.wallet_id.clone(),
                        symbol: order.symbol.clone(),
                        broker_order_id: order.id.clone(),
                        reason: "Pre-execution cleanup".to_string(),
                    };
                    if let Err(e) = self.audit.record_cancellation(&record).await {
                        warn!("cancellation record write failed: {e}");
                    }
                }
                Err(e) => warn!(order_id = %order.id, "cancel failed: {e}"),
            }
        }

        let configs = self.config.symbol_configs(&wallet.wallet_id).await?;
        let allocations = budget::allocate(account.cash, account.equity, &positions, &configs);
        let current_session = session::session_now(Utc::now());

        info!(
            reference = format!("{:.2}", reference.price),
            cash = format!("{:.2}", account.cash),
            equity = format!("{:.2}", account.equity),
            positions = positions.len(),
            symbols = configs.len(),
            session = %current_session,
            "wallet snapshot loaded"
        );

        let ctx = RunContext {
            user_id: &wallet.user_id,
            wallet_id: &wallet.wallet_id,
            session: current_session,
            reference_price: reference.price,
            account_cash: account.cash,
        };

        let zero_allocation = BudgetAllocation { total: 0.0, cost_basis: 0.0, remaining: 0.0 };
        let mut executor = SymbolExecutor::new(
            broker.as_ref(),
            self.baselines.as_ref(),
            self.audit.as_ref(),
            &self.gate,
            &mut self.cooldowns,
        );

        let mut outcomes = Vec::with_capacity(configs.len());
        for cfg in &configs {
            let allocation = allocations.get(&cfg.symbol).unwrap_or(&zero_allocation);
            let outcome = executor
                .execute(&ctx, cfg, positions.get(&cfg.symbol), allocation)
                .await;
            outcomes.push(outcome);
        }

        let result = ExecutionResult {
            wallet_id: wallet.wallet_id.clone(),
            success: true,
            message: None,
            outcomes,
        };
        info!(
            wallet_id = %wallet.wallet_id,
            processed = result.outcomes.len(),
            succeeded = result.succeeded(),
            failed = result.failed_symbols(),
            "wallet run complete"
        );
        Ok(result)
    }

    /// One scheduler pass over every enabled wallet.
    pub async fn run_pass(&mut self) {
        let settings = match self.config.system_settings().await {
            Ok(settings) => settings,
            Err(error) => {
                error!(%error, "failed to load system settings");
                self.record_scheduler_error(&error).await;
                return;
            }
        };
        if !settings.enabled {
            info!("system disabled, skipping all wallets");
            return;
        }
        if let Some((start, end)) = settings.window {
            let minute = session::minute_of_day(Utc::now());
            if minute < start || minute >= end {
                info!(minute, start, end, "outside global trading window, skipping all wallets");
                return;
            }
        }

        let wallets = match self.config.enabled_wallets().await {
            Ok(wallets) => wallets,
            Err(error) => {
                error!(%error, "failed to list wallets");
                self.record_scheduler_error(&error).await;
                return;
            }
        };
        if wallets.is_empty() {
            info!("no enabled wallets");
            return;
        }

        for wallet in &wallets {
            let result = self.execute_wallet(wallet).await;
            info!(
                wallet = %wallet.name,
                success = result.success,
                symbols = result.outcomes.len(),
                "wallet pass finished"
            );
        }
    }

    async fn record_wallet_error(
        &self,
        user_id: Option<&str>,
        wallet_id: Option<&str>,
        error: &EngineError,
    ) {
        let record = ExecutionErrorRecord {
            user_id: user_id.map(str::to_string),
            wallet_id: wallet_id.map(str::to_string),
            symbol: None,
            error_type: error.error_type().to_string(),
            message: error.to_string(),
            function: "execute_wallet".to_string(),
            severity: "CRITICAL".to_string(),
        };
        if let Err(e) = self.audit.record_error(&record).await {
            warn!("failed to record wallet error: {e}");
        }
    }

    async fn record_scheduler_error(&self, error: &EngineError) {
        let record = ExecutionErrorRecord {
            user_id: None,
            wallet_id: None,
            symbol: None,
            error_type: "SCHEDULER_ERROR".to_string(),
            message: error.to_string(),
            function: "run_pass".to_string(),
            severity: "CRITICAL".to_string(),
        };
        if let Err(e) = self.audit.record_error(&record).await {
            warn!("failed to record scheduler error: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::models::{BudgetPolicy, Credentials, OpenOrder, OrderSide, SystemSettings};
    use crate::models::BaselineMethod;
    use crate::session::Session;
    use crate::store::memory::{MemoryAuditStore, MemoryBaselineStore, MemoryConfigStore};
    use crate::testutil::{baseline_row, config, position, wallet, MockBroker, MockMarket, MockVendors};

    struct Fixture {
        config: Arc<MemoryConfigStore>,
        baselines: Arc<MemoryBaselineStore>,
        audit: Arc<MemoryAuditStore>,
        broker: Arc<MockBroker>,
        market: Arc<MockMarket>,
    }

    impl Fixture {
        fn new(config_store: MemoryConfigStore, baselines: MemoryBaselineStore) -> Self {
            Self {
                config: Arc::new(config_store),
                baselines: Arc::new(baselines),
                audit: Arc::new(MemoryAuditStore::default()),
                broker: Arc::new(MockBroker::with_account(10_000.0, 10_000.0)),
                market: Arc::new(MockMarket::with_price(50_000.0)),
            }
        }

        fn orchestrator(&self) -> Orchestrator {
            let vendors = Arc::new(MockVendors {
                broker: self.broker.clone(),
                market: self.market.clone(),
            });
            Orchestrator::new(
                self.config.clone(),
                self.baselines.clone(),
                self.audit.clone(),
                vendors,
                OrderGate::default(),
                CooldownMap::default(),
                "X:BTCUSD".to_string(),
            )
        }
    }

    fn store_with_wallet(enabled: bool, with_creds: bool, configs: Vec<crate::models::SymbolConfig>) -> MemoryConfigStore {
        let mut store = MemoryConfigStore {
            settings: SystemSettings { enabled: true, window: None },
            ..Default::default()
        };
        store.wallets.push(wallet("w1", "u1", enabled));
        store.symbols.insert("w1".to_string(), configs);
        if with_creds {
            store.user_credentials.insert(
                "u1".to_string(),
                Credentials { key: "k".to_string(), secret: "s".to_string() },
            );
            store.user_market_keys.insert("u1".to_string(), "pk".to_string());
        }
        store
    }

    #[tokio::test]
    async fn disabled_wallet_is_skipped_successfully() {
        let fixture = Fixture::new(
            store_with_wallet(false, true, vec![config("MARA", BudgetPolicy::Fixed(1_000.0))]),
            MemoryBaselineStore::default(),
        );
        let mut orchestrator = fixture.orchestrator();

        let w = wallet("w1", "u1", false);
        let result = orchestrator.execute_wallet(&w).await;
        assert!(result.success);
        assert_eq!(result.message.as_deref(), Some("Wallet disabled"));
        assert!(fixture.broker.submitted().is_empty());
    }

    #[tokio::test]
    async fn missing_credentials_fails_the_wallet_without_panicking() {
        let fixture = Fixture::new(
            store_with_wallet(true, false, vec![config("MARA", BudgetPolicy::Fixed(1_000.0))]),
            MemoryBaselineStore::default(),
        );
        let mut orchestrator = fixture.orchestrator();

        let w = wallet("w1", "u1", true);
        let result = orchestrator.execute_wallet(&w).await;
        assert!(!result.success);
        let errors = fixture.audit.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_type, "CONFIG_ERROR");
        assert_eq!(errors[0].severity, "CRITICAL");
    }

    #[tokio::test]
    async fn one_symbol_failure_does_not_stop_the_others() {
        // RIOT has a baseline, MARA does not
        let baselines = MemoryBaselineStore::with_rows(vec![
            baseline_row("RIOT", Session::Core, BaselineMethod::EqualMean, 5_000.0),
            baseline_row("RIOT", Session::Extended, BaselineMethod::EqualMean, 5_000.0),
        ]);
        let fixture = Fixture::new(
            store_with_wallet(
                true,
                true,
                vec![
                    config("MARA", BudgetPolicy::Fixed(1_000.0)),
                    config("RIOT", BudgetPolicy::Fixed(1_000.0)),
                ],
            ),
            baselines,
        );
        let mut orchestrator = fixture.orchestrator();

        let w = wallet("w1", "u1", true);
        let result = orchestrator.execute_wallet(&w).await;

        assert!(result.success);
        assert_eq!(result.outcomes.len(), 2);
        assert_eq!(result.failed_symbols(), 1);
        assert_eq!(result.succeeded(), 1);
        // the healthy symbol still traded
        let submitted = fixture.broker.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].symbol, "RIOT");
    }

    #[tokio::test]
    async fn open_orders_are_cancelled_before_the_symbol_loop() {
        let baselines = MemoryBaselineStore::with_rows(vec![
            baseline_row("MARA", Session::Core, BaselineMethod::EqualMean, 5_000.0),
            baseline_row("MARA", Session::Extended, BaselineMethod::EqualMean, 5_000.0),
        ]);
        let fixture = Fixture::new(
            store_with_wallet(true, true, vec![config("MARA", BudgetPolicy::Fixed(1_000.0))]),
            baselines,
        );
        fixture.broker.set_open_orders(vec![OpenOrder {
            id: "stale-1".to_string(),
            symbol: "MARA".to_string(),
            side: OrderSide::Sell,
        }]);
        let mut orchestrator = fixture.orchestrator();

        let w = wallet("w1", "u1", true);
        let result = orchestrator.execute_wallet(&w).await;

        assert!(result.success);
        assert_eq!(fixture.broker.cancelled(), vec!["stale-1".to_string()]);
        let cancellations = fixture.audit.cancellations.lock().unwrap();
        assert_eq!(cancellations.len(), 1);
        assert_eq!(cancellations[0].reason, "Pre-execution cleanup");
        // with the stale sell gone, the buy goes through
        assert_eq!(fixture.broker.submitted().len(), 1);
    }

    #[tokio::test]
    async fn run_pass_honors_the_master_switch() {
        let mut store = store_with_wallet(true, true, vec![config("MARA", BudgetPolicy::Fixed(1_000.0))]);
        store.settings = SystemSettings { enabled: false, window: None };
        let fixture = Fixture::new(store, MemoryBaselineStore::default());
        let mut orchestrator = fixture.orchestrator();

        orchestrator.run_pass().await;
        assert!(fixture.broker.submitted().is_empty());
        assert!(fixture.audit.snapshots.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_pass_honors_the_global_window() {
        let mut store = store_with_wallet(true, true, vec![config("MARA", BudgetPolicy::Fixed(1_000.0))]);
        // empty window: every minute is outside it
        store.settings = SystemSettings { enabled: true, window: Some((0, 0)) };
        let fixture = Fixture::new(store, MemoryBaselineStore::default());
        let mut orchestrator = fixture.orchestrator();

        orchestrator.run_pass().await;
        assert!(fixture.audit.snapshots.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn run_pass_executes_enabled_wallets_inside_the_window() {
        let baselines = MemoryBaselineStore::with_rows(vec![
            baseline_row("MARA", Session::Core, BaselineMethod::EqualMean, 5_000.0),
            baseline_row("MARA", Session::Extended, BaselineMethod::EqualMean, 5_000.0),
        ]);
        let mut store = store_with_wallet(true, true, vec![config("MARA", BudgetPolicy::Fixed(1_000.0))]);
        // all-day window: every minute is inside it
        store.settings = SystemSettings { enabled: true, window: Some((0, 1440)) };
        let fixture = Fixture::new(store, baselines);
        let mut orchestrator = fixture.orchestrator();

        orchestrator.run_pass().await;
        assert_eq!(fixture.broker.submitted().len(), 1);
        assert_eq!(fixture.audit.snapshots.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_wallet_id_reports_a_critical_error() {
        let fixture = Fixture::new(store_with_wallet(true, true, vec![]), MemoryBaselineStore::default());
        let mut orchestrator = fixture.orchestrator();

        let result = orchestrator.execute_wallet_by_id("nope").await;
        assert!(!result.success);
        let errors = fixture.audit.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].error_type, "CRITICAL_ERROR");
    }

    #[tokio::test]
    async fn percent_budgets_share_cash_across_symbols() {
        // two percent-mode symbols, equity 10_000, cash only 1_000:
        // requests 3_000 + 1_000 scale to 750 + 250
        let baselines = MemoryBaselineStore::with_rows(vec![
            baseline_row("MARA", Session::Core, BaselineMethod::EqualMean, 5_000.0),
            baseline_row("MARA", Session::Extended, BaselineMethod::EqualMean, 5_000.0),
            baseline_row("RIOT", Session::Core, BaselineMethod::EqualMean, 5_000.0),
            baseline_row("RIOT", Session::Extended, BaselineMethod::EqualMean, 5_000.0),
        ]);
        let store = store_with_wallet(
            true,
            true,
            vec![
                config("MARA", BudgetPolicy::Percent(30.0)),
                config("RIOT", BudgetPolicy::Percent(10.0)),
            ],
        );
        let fixture = Fixture::new(store, baselines);
        *fixture.broker.account.lock().unwrap() = crate::models::AccountSnapshot {
            cash: 1_000.0,
            equity: 10_000.0,
            buying_power: 1_000.0,
        };
        let mut orchestrator = fixture.orchestrator();

        let w = wallet("w1", "u1", true);
        let result = orchestrator.execute_wallet(&w).await;
        assert!(result.success);

        let submitted = fixture.broker.submitted();
        assert_eq!(submitted.len(), 2);
        let total_notional: f64 = submitted.iter().map(|t| t.qty as f64 * t.limit_price).sum();
        assert!(
            total_notional <= 1_000.0 + 1e-6,
            "buys {total_notional} must never exceed cash"
        );
    }

    #[tokio::test]
    async fn snapshot_is_written_even_for_hold() {
        let baselines = MemoryBaselineStore::with_rows(vec![
            baseline_row("MARA", Session::Core, BaselineMethod::EqualMean, 5_000.0),
            baseline_row("MARA", Session::Extended, BaselineMethod::EqualMean, 5_000.0),
        ]);
        let store = store_with_wallet(true, true, vec![config("MARA", BudgetPolicy::Fixed(0.0))]);
        let fixture = Fixture::new(store, baselines);
        let mut orchestrator = fixture.orchestrator();

        let w = wallet("w1", "u1", true);
        let result = orchestrator.execute_wallet(&w).await;
        assert!(result.success);
        assert!(fixture.broker.submitted().is_empty());

        let snapshots = fixture.audit.snapshots.lock().unwrap();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].decision, crate::models::Decision::Hold);
    }

    #[tokio::test]
    async fn positions_map_feeds_decisions() {
        let baselines = MemoryBaselineStore::with_rows(vec![
            baseline_row("MARA", Session::Core, BaselineMethod::EqualMean, 5_000.0),
            baseline_row("MARA", Session::Extended, BaselineMethod::EqualMean, 5_000.0),
        ]);
        let store = store_with_wallet(true, true, vec![config("MARA", BudgetPolicy::Fixed(0.0))]);
        let fixture = Fixture::new(store, baselines);
        // shares held, no budget → sell the position
        fixture.broker.set_positions(vec![position("MARA", 25, 10.0)]);
        let mut orchestrator = fixture.orchestrator();

        let w = wallet("w1", "u1", true);
        let result = orchestrator.execute_wallet(&w).await;
        assert!(result.success);

        let submitted = fixture.broker.submitted();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].side, OrderSide::Sell);
        assert_eq!(submitted[0].qty, 25);
    }

    #[tokio::test]
    async fn dead_market_data_fails_the_wallet_cleanly() {
        let fixture = Fixture::new(
            store_with_wallet(true, true, vec![config("MARA", BudgetPolicy::Fixed(1_000.0))]),
            MemoryBaselineStore::default(),
        );
        *fixture.market.price.lock().unwrap() = None;
        let mut orchestrator = fixture.orchestrator();

        let w = wallet("w1", "u1", true);
        let result = orchestrator.execute_wallet(&w).await;
        assert!(!result.success);
        let errors = fixture.audit.errors.lock().unwrap();
        assert_eq!(errors[0].error_type, "API_ERROR");
    }
}
