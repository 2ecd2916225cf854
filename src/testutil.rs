/// testutil.rs — Shared test doubles
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::bars::Bar;
use crate::broker::{Broker, LastTrade, MarketData, OrderTicket, VendorGateway};
use crate::error::{EngineError, Result};
use crate::models::{
    AccountSnapshot, BaselineMethod, BaselineRow, BudgetPolicy, Credentials, OpenOrder, OrderAck,
    Position, SymbolConfig, Wallet, WalletEnv,
};
use crate::session::Session;

pub fn wallet(wallet_id: &str, user_id: &str, enabled: bool) -> Wallet {
    Wallet {
        wallet_id: wallet_id.to_string(),
        user_id: user_id.to_string(),
        env: WalletEnv::Paper,
        name: format!("{wallet_id} wallet"),
        enabled,
    }
}

pub fn config(symbol: &str, budget: BudgetPolicy) -> SymbolConfig {
    SymbolConfig {
        symbol: symbol.to_string(),
        budget,
        buy_pct_core: 1.0,
        sell_pct_core: 2.0,
        buy_pct_extended: 1.0,
        sell_pct_extended: 2.0,
        method_core: BaselineMethod::EqualMean,
        method_extended: BaselineMethod::EqualMean,
        enabled: true,
    }
}

pub fn position(symbol: &str, qty: i64, current_price: f64) -> Position {
    Position {
        symbol: symbol.to_string(),
        qty,
        cost_basis: qty as f64 * current_price,
        current_price: Some(current_price),
        market_value: qty as f64 * current_price,
        unrealized_pl: 0.0,
    }
}

pub fn baseline_row(symbol: &str, session: Session, method: BaselineMethod, baseline: f64) -> BaselineRow {
    BaselineRow {
        trading_day: NaiveDate::from_ymd_opt(2025, 7, 9).expect("valid date"),
        symbol: symbol.to_string(),
        session,
        method,
        baseline,
        sample_count: 390,
        source: "test".to_string(),
    }
}

/// Scriptable brokerage double.  Submitted tickets are captured; open orders
/// and failure modes are adjustable mid-test.
#[derive(Default)]
pub struct MockBroker {
    pub account: Mutex<AccountSnapshot>,
    pub positions: Mutex<HashMap<String, Position>>,
    open_orders: Mutex<Vec<OpenOrder>>,
    submitted: Mutex<Vec<OrderTicket>>,
    cancelled: Mutex<Vec<String>>,
    fail_submit: Mutex<bool>,
    next_order_id: Mutex<u32>,
}

impl MockBroker {
    pub fn with_account(cash: f64, equity: f64) -> Self {
        let broker = Self::default();
        *broker.account.lock().unwrap() = AccountSnapshot { cash, equity, buying_power: cash };
        broker
    }

    pub fn set_positions(&self, positions: Vec<Position>) {
        *self.positions.lock().unwrap() =
            positions.into_iter().map(|p| (p.symbol.clone(), p)).collect();
    }

    pub fn set_open_orders(&self, orders: Vec<OpenOrder>) {
        *self.open_orders.lock().unwrap() = orders;
    }

    pub fn fail_submissions(&self) {
        *self.fail_submit.lock().unwrap() = true;
    }

    pub fn submitted(&self) -> Vec<OrderTicket> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn get_account(&self) -> Result<AccountSnapshot> {
        Ok(*self.account.lock().unwrap())
    }

    async fn get_positions(&self) -> Result<HashMap<String, Position>> {
        Ok(self.positions.lock().unwrap().clone())
    }

    async fn get_open_orders(&self) -> Result<Vec<OpenOrder>> {
        Ok(self.open_orders.lock().unwrap().clone())
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        self.cancelled.lock().unwrap().push(order_id.to_string());
        self.open_orders.lock().unwrap().retain(|o| o.id != order_id);
        Ok(())
    }

    async fn submit_limit_order(&self, ticket: &OrderTicket) -> Result<OrderAck> {
        if *self.fail_submit.lock().unwrap() {
            return Err(EngineError::Execution("broker says no".to_string()));
        }
        self.submitted.lock().unwrap().push(ticket.clone());
        let mut next = self.next_order_id.lock().unwrap();
        *next += 1;
        Ok(OrderAck { id: format!("order-{}", *next), status: "accepted".to_string() })
    }
}

/// Market-data double with a fixed last-trade price and canned bars.
#[derive(Default)]
pub struct MockMarket {
    pub price: Mutex<Option<f64>>,
    pub bars: Mutex<HashMap<String, Vec<Bar>>>,
}

impl MockMarket {
    pub fn with_price(price: f64) -> Self {
        let market = Self::default();
        *market.price.lock().unwrap() = Some(price);
        market
    }

    pub fn set_bars(&self, ticker: &str, bars: Vec<Bar>) {
        self.bars.lock().unwrap().insert(ticker.to_string(), bars);
    }
}

#[async_trait]
impl MarketData for MockMarket {
    async fn last_trade(&self, ticker: &str) -> Result<LastTrade> {
        match *self.price.lock().unwrap() {
            Some(price) => Ok(LastTrade { price, timestamp: 0 }),
            None => Err(EngineError::Api(format!("no price for {ticker}"))),
        }
    }

    async fn minute_bars(&self, ticker: &str, day: NaiveDate) -> Result<Vec<Bar>> {
        self.bars
            .lock()
            .unwrap()
            .get(ticker)
            .cloned()
            .ok_or_else(|| EngineError::Data(format!("no bars for {ticker} on {day}")))
    }
}

/// Gateway double handing out pre-built mocks regardless of credentials.
pub struct MockVendors {
    pub broker: Arc<MockBroker>,
    pub market: Arc<MockMarket>,
}

impl VendorGateway for MockVendors {
    fn broker_for(&self, _wallet: &Wallet, _creds: &Credentials) -> Arc<dyn Broker> {
        self.broker.clone()
    }

    fn market_for(&self, _wallet: &Wallet, _api_key: &str) -> Arc<dyn MarketData> {
        self.market.clone()
    }
}
