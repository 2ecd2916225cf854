/// store/memory.rs — In-memory store implementations
///
/// Deterministic substitutes for the Postgres stores.  The test-suite and
/// local dry runs inject these; every collection is inspectable after a run.
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    BaselineMethod, BaselineRow, CancellationRecord, Credentials, ExecutionErrorRecord,
    ExecutionSnapshot, IoLogRecord, OrderRecord, SymbolConfig, SystemSettings, Wallet,
};
use crate::session::Session;
use crate::store::{AuditStore, BaselineStore, ConfigStore};

#[derive(Default)]
pub struct MemoryConfigStore {
    pub wallets: Vec<Wallet>,
    /// wallet_id → enabled symbol configs
    pub symbols: HashMap<String, Vec<SymbolConfig>>,
    /// wallet_id → wallet-level brokerage keys
    pub wallet_credentials: HashMap<String, Credentials>,
    /// user_id → user-level brokerage keys
    pub user_credentials: HashMap<String, Credentials>,
    /// wallet_id → wallet-level market-data key
    pub wallet_market_keys: HashMap<String, String>,
    /// user_id → user-level market-data key
    pub user_market_keys: HashMap<String, String>,
    pub settings: SystemSettings,
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn wallet(&self, wallet_id: &str) -> Result<Option<Wallet>> {
        Ok(self.wallets.iter().find(|w| w.wallet_id == wallet_id).cloned())
    }

    async fn enabled_wallets(&self) -> Result<Vec<Wallet>> {
        Ok(self.wallets.iter().filter(|w| w.enabled).cloned().collect())
    }

    async fn symbol_configs(&self, wallet_id: &str) -> Result<Vec<SymbolConfig>> {
        Ok(self
            .symbols
            .get(wallet_id)
            .map(|configs| configs.iter().filter(|c| c.enabled).cloned().collect())
            .unwrap_or_default())
    }

    async fn broker_credentials(&self, wallet: &Wallet) -> Result<Option<Credentials>> {
        Ok(self
            .wallet_credentials
            .get(&wallet.wallet_id)
            .or_else(|| self.user_credentials.get(&wallet.user_id))
            .cloned())
    }

    async fn market_data_key(&self, wallet: &Wallet) -> Result<Option<String>> {
        Ok(self
            .wallet_market_keys
            .get(&wallet.wallet_id)
            .or_else(|| self.user_market_keys.get(&wallet.user_id))
            .cloned())
    }

    async fn system_settings(&self) -> Result<SystemSettings> {
        Ok(self.settings)
    }
}

#[derive(Default)]
pub struct MemoryBaselineStore {
    rows: Mutex<Vec<BaselineRow>>,
}

impl MemoryBaselineStore {
    pub fn with_rows(rows: Vec<BaselineRow>) -> Self {
        Self { rows: Mutex::new(rows) }
    }

    pub fn rows(&self) -> Vec<BaselineRow> {
        self.rows.lock().expect("baseline store lock").clone()
    }
}

#[async_trait]
impl BaselineStore for MemoryBaselineStore {
    async fn latest(
        &self,
        symbol: &str,
        session: Session,
        method: BaselineMethod,
    ) -> Result<Option<BaselineRow>> {
        let rows = self.rows.lock().expect("baseline store lock");
        Ok(rows
            .iter()
            .filter(|r| r.symbol == symbol && r.session == session && r.method == method)
            .max_by_key(|r| r.trading_day)
            .cloned())
    }

    async fn upsert(&self, row: &BaselineRow) -> Result<()> {
        let mut rows = self.rows.lock().expect("baseline store lock");
        if let Some(existing) = rows.iter_mut().find(|r| {
            r.trading_day == row.trading_day
                && r.symbol == row.symbol
                && r.session == row.session
                && r.method == row.method
        }) {
            *existing = row.clone();
        } else {
            rows.push(row.clone());
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryAuditStore {
    pub orders: Mutex<Vec<OrderRecord>>,
    pub snapshots: Mutex<Vec<ExecutionSnapshot>>,
    pub errors: Mutex<Vec<ExecutionErrorRecord>>,
    pub cancellations: Mutex<Vec<CancellationRecord>>,
    pub io_log: Mutex<Vec<IoLogRecord>>,
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn record_order(&self, record: &OrderRecord) -> Result<()> {
        self.orders.lock().expect("audit lock").push(record.clone());
        Ok(())
    }

    async fn record_snapshot(&self, snapshot: &ExecutionSnapshot) -> Result<()> {
        self.snapshots.lock().expect("audit lock").push(snapshot.clone());
        Ok(())
    }

    async fn record_error(&self, record: &ExecutionErrorRecord) -> Result<()> {
        self.errors.lock().expect("audit lock").push(record.clone());
        Ok(())
    }

    async fn record_cancellation(&self, record: &CancellationRecord) -> Result<()> {
        self.cancellations.lock().expect("audit lock").push(record.clone());
        Ok(())
    }

    async fn record_io(&self, record: &IoLogRecord) -> Result<()> {
        self.io_log.lock().expect("audit lock").push(record.clone());
        Ok(())
    }
}
