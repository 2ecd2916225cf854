use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalletEnv {
    Paper,
    Live,
}

impl WalletEnv {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletEnv::Paper => "paper",
            WalletEnv::Live => "live",
        }
    }
}

impl fmt::Display for WalletEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WalletEnv {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "paper" => Ok(WalletEnv::Paper),
            "live" => Ok(WalletEnv::Live),
            _ => Err(format!("invalid wallet env: {s}")),
        }
    }
}

/// A trading wallet.  Created and mutated externally; read-only here.
#[derive(Debug, Clone)]
pub struct Wallet {
    pub wallet_id: String,
    pub user_id: String,
    pub env: WalletEnv,
    pub name: String,
    pub enabled: bool,
}

/// Brokerage key pair resolved for one wallet.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub key: String,
    pub secret: String,
}

/// How a symbol's spending cap is expressed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BudgetPolicy {
    /// Hard dollar commitment, never scaled down.
    Fixed(f64),
    /// Percent of account equity, scaled down under cash contention.
    Percent(f64),
}

/// Per-symbol wallet configuration.  Exactly one active config exists per
/// (wallet, symbol); the store's primary key enforces it.
#[derive(Debug, Clone)]
pub struct SymbolConfig {
    pub symbol: String,
    pub budget: BudgetPolicy,
    pub buy_pct_core: f64,
    pub sell_pct_core: f64,
    pub buy_pct_extended: f64,
    pub sell_pct_extended: f64,
    pub method_core: BaselineMethod,
    pub method_extended: BaselineMethod,
    pub enabled: bool,
}

impl SymbolConfig {
    /// (buy offset %, sell offset %) for the given session.
    pub fn offsets(&self, session: Session) -> (f64, f64) {
        match session {
            Session::Core => (self.buy_pct_core, self.sell_pct_core),
            Session::Extended => (self.buy_pct_extended, self.sell_pct_extended),
        }
    }

    pub fn method(&self, session: Session) -> BaselineMethod {
        match session {
            Session::Core => self.method_core,
            Session::Extended => self.method_extended,
        }
    }
}

/// Brokerage position snapshot, read at the start of each run.
#[derive(Debug, Clone)]
pub struct Position {
    pub symbol: String,
    pub qty: i64,
    pub cost_basis: f64,
    pub current_price: Option<f64>,
    pub market_value: f64,
    pub unrealized_pl: f64,
}

/// Account snapshot, read once per wallet run.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccountSnapshot {
    pub cash: f64,
    pub equity: f64,
    pub buying_power: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }

    pub fn opposite(&self) -> OrderSide {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "buy" => Ok(OrderSide::Buy),
            "sell" => Ok(OrderSide::Sell),
            _ => Err(format!("invalid order side: {s}")),
        }
    }
}

/// An order resting at the brokerage.
#[derive(Debug, Clone)]
pub struct OpenOrder {
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
}

/// Broker acknowledgement for a submitted order.
#[derive(Debug, Clone)]
pub struct OrderAck {
    pub id: String,
    pub status: String,
}

/// What to do for one symbol this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Hold,
    Buy,
    Sell,
    /// Shares held and budget available.  Wash-trade resolution narrows this
    /// to a single side before any order is submitted.
    Both,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Hold => "HOLD",
            Decision::Buy => "BUY",
            Decision::Sell => "SELL",
            Decision::Both => "BOTH",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Baseline statistic selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BaselineMethod {
    EqualMean,
    Median,
    VwapRatio,
    VolWeighted,
    Winsorized,
}

impl BaselineMethod {
    pub const ALL: [BaselineMethod; 5] = [
        BaselineMethod::EqualMean,
        BaselineMethod::Median,
        BaselineMethod::VwapRatio,
        BaselineMethod::VolWeighted,
        BaselineMethod::Winsorized,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BaselineMethod::EqualMean => "EQUAL_MEAN",
            BaselineMethod::Median => "MEDIAN",
            BaselineMethod::VwapRatio => "VWAP_RATIO",
            BaselineMethod::VolWeighted => "VOL_WEIGHTED",
            BaselineMethod::Winsorized => "WINSORIZED",
        }
    }
}

impl fmt::Display for BaselineMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BaselineMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EQUAL_MEAN" => Ok(BaselineMethod::EqualMean),
            "MEDIAN" => Ok(BaselineMethod::Median),
            "VWAP_RATIO" => Ok(BaselineMethod::VwapRatio),
            "VOL_WEIGHTED" => Ok(BaselineMethod::VolWeighted),
            "WINSORIZED" => Ok(BaselineMethod::Winsorized),
            _ => Err(format!("invalid baseline method: {s}")),
        }
    }
}

/// One computed baseline row.  Upsert-keyed by (day, symbol, session, method);
/// reads always take the most recent trading day.
#[derive(Debug, Clone)]
pub struct BaselineRow {
    pub trading_day: NaiveDate,
    pub symbol: String,
    pub session: Session,
    pub method: BaselineMethod,
    pub baseline: f64,
    pub sample_count: i64,
    pub source: String,
}

/// Global engine switches, read once per scheduler pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSettings {
    pub enabled: bool,
    /// Optional global trading window in Eastern minutes (start, end).
    pub window: Option<(u32, u32)>,
}

// ── Audit records (append-only, never read back) ─────────────────────────

#[derive(Debug, Clone)]
pub struct ExecutionSnapshot {
    pub user_id: String,
    pub wallet_id: String,
    pub symbol: String,
    pub reference_price: f64,
    pub symbol_price: Option<f64>,
    pub current_ratio: Option<f64>,
    pub baseline_value: f64,
    pub baseline_method: BaselineMethod,
    pub buy_price: f64,
    pub sell_price: f64,
    pub decision: Decision,
    pub decision_reason: String,
    pub shares_owned: i64,
    pub budget_available: f64,
}

#[derive(Debug, Clone)]
pub struct ExecutionErrorRecord {
    pub user_id: Option<String>,
    pub wallet_id: Option<String>,
    pub symbol: Option<String>,
    pub error_type: String,
    pub message: String,
    pub function: String,
    pub severity: String,
}

#[derive(Debug, Clone)]
pub struct OrderRecord {
    pub user_id: String,
    pub wallet_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub qty: i64,
    pub limit_price: f64,
    pub status: String,
    pub broker_order_id: String,
}

#[derive(Debug, Clone)]
pub struct CancellationRecord {
    pub user_id: String,
    pub wallet_id: String,
    pub symbol: String,
    pub broker_order_id: String,
    pub reason: String,
}

/// One vendor round trip, for the request/response trail.
#[derive(Debug, Clone)]
pub struct IoLogRecord {
    pub user_id: String,
    pub env: String,
    pub method: String,
    pub path: String,
    pub request_body: Option<String>,
    pub status: Option<u16>,
    pub response_body: Option<String>,
    pub wallet_id: Option<String>,
}
