/// broker.rs — Brokerage and market-data seams
///
/// Everything the engine needs from the outside world goes through these
/// traits, so the executor and orchestrator run identically against the live
/// vendors and the test doubles.  All calls are sequential awaits; the engine
/// never issues concurrent vendor requests.
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::bars::Bar;
use crate::error::Result;
use crate::models::{
    AccountSnapshot, Credentials, OpenOrder, OrderAck, OrderSide, Position, Wallet,
};

/// A limit order ready for submission.
#[derive(Debug, Clone)]
pub struct OrderTicket {
    pub symbol: String,
    pub side: OrderSide,
    pub qty: i64,
    /// 4-decimal engine price; the wire format rounds to 2.
    pub limit_price: f64,
    pub time_in_force: String,
    pub extended_hours: bool,
}

impl OrderTicket {
    pub fn day_limit(symbol: &str, side: OrderSide, qty: i64, limit_price: f64, extended_hours: bool) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            qty,
            limit_price,
            time_in_force: "day".to_string(),
            extended_hours,
        }
    }
}

/// Brokerage operations, bound to one wallet's credentials.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn get_account(&self) -> Result<AccountSnapshot>;
    async fn get_positions(&self) -> Result<HashMap<String, Position>>;
    async fn get_open_orders(&self) -> Result<Vec<OpenOrder>>;
    async fn cancel_order(&self, order_id: &str) -> Result<()>;
    async fn submit_limit_order(&self, ticket: &OrderTicket) -> Result<OrderAck>;
}

/// Most recent trade for a ticker.
#[derive(Debug, Clone, Copy)]
pub struct LastTrade {
    pub price: f64,
    pub timestamp: i64,
}

/// Market-data operations (reference prices and minute aggregates).
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn last_trade(&self, ticker: &str) -> Result<LastTrade>;
    async fn minute_bars(&self, ticker: &str, day: NaiveDate) -> Result<Vec<Bar>>;
}

/// Builds vendor clients bound to one wallet's resolved credentials.
pub trait VendorGateway: Send + Sync {
    fn broker_for(&self, wallet: &Wallet, creds: &Credentials) -> Arc<dyn Broker>;
    fn market_for(&self, wallet: &Wallet, api_key: &str) -> Arc<dyn MarketData>;
}

/// Live wiring: Alpaca for orders, Polygon for market data, one shared HTTP
/// client with a 10 s timeout.
pub struct LiveVendors {
    http: reqwest::Client,
    audit: Arc<dyn crate::store::AuditStore>,
}

impl LiveVendors {
    pub fn new(audit: Arc<dyn crate::store::AuditStore>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("HTTP client build failed");
        Self { http, audit }
    }
}

impl VendorGateway for LiveVendors {
    fn broker_for(&self, wallet: &Wallet, creds: &Credentials) -> Arc<dyn Broker> {
        Arc::new(crate::alpaca::AlpacaBroker::new(
            self.http.clone(),
            self.audit.clone(),
            wallet,
            creds.clone(),
        ))
    }

    fn market_for(&self, wallet: &Wallet, api_key: &str) -> Arc<dyn MarketData> {
        Arc::new(crate::polygon::PolygonClient::new(
            self.http.clone(),
            self.audit.clone(),
            &wallet.user_id,
            Some(&wallet.wallet_id),
            api_key,
        ))
    }
}
