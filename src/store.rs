/// store.rs — Persistence seams
///
/// Three narrow interfaces: wallet configuration reads, the baseline table,
/// and the append-only audit trail.  The audit store is write-only from the
/// engine's point of view; nothing in the core ever reads it back.
pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    BaselineMethod, BaselineRow, CancellationRecord, Credentials, ExecutionErrorRecord,
    ExecutionSnapshot, IoLogRecord, OrderRecord, SymbolConfig, SystemSettings, Wallet,
};
use crate::session::Session;

#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn wallet(&self, wallet_id: &str) -> Result<Option<Wallet>>;
    async fn enabled_wallets(&self) -> Result<Vec<Wallet>>;
    /// Enabled symbol configs for one wallet.
    async fn symbol_configs(&self, wallet_id: &str) -> Result<Vec<SymbolConfig>>;
    /// Brokerage keys for the wallet's environment: wallet-level keys take
    /// precedence, then user-level fallback, then None.
    async fn broker_credentials(&self, wallet: &Wallet) -> Result<Option<Credentials>>;
    /// Market-data key: wallet-level first, then user-level.
    async fn market_data_key(&self, wallet: &Wallet) -> Result<Option<String>>;
    async fn system_settings(&self) -> Result<SystemSettings>;
}

#[async_trait]
pub trait BaselineStore: Send + Sync {
    /// Most recent trading day's row for (symbol, session, method).
    async fn latest(
        &self,
        symbol: &str,
        session: Session,
        method: BaselineMethod,
    ) -> Result<Option<BaselineRow>>;
    async fn upsert(&self, row: &BaselineRow) -> Result<()>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn record_order(&self, record: &OrderRecord) -> Result<()>;
    async fn record_snapshot(&self, snapshot: &ExecutionSnapshot) -> Result<()>;
    async fn record_error(&self, record: &ExecutionErrorRecord) -> Result<()>;
    async fn record_cancellation(&self, record: &CancellationRecord) -> Result<()>;
    async fn record_io(&self, record: &IoLogRecord) -> Result<()>;
}
