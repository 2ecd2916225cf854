/// alpaca.rs — Alpaca Trading REST client
///
/// Signed with plain key/secret headers (APCA-API-KEY-ID / APCA-API-SECRET-KEY);
/// paper and live accounts differ only in the base URL.  Every round trip is
/// appended to the vendor I/O log before the response is interpreted, so the
/// audit trail keeps rejected calls too.
///
/// ORDER SUBMISSION:
///   POST /v2/orders with a limit order body; limit_price is sent with
///   2 decimals, time_in_force "day", extended_hours set for any session
///   outside regular trading hours.
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::broker::{Broker, OrderTicket};
use crate::error::{EngineError, Result};
use crate::models::{
    AccountSnapshot, Credentials, IoLogRecord, OpenOrder, OrderAck, OrderSide, Position, Wallet,
    WalletEnv,
};
use crate::pricing::round2;

fn base_url(env: WalletEnv) -> &'static str {
    match env {
        WalletEnv::Paper => "https://paper-api.alpaca.markets",
        WalletEnv::Live => "https://api.alpaca.markets",
    }
}

// ── Response types ────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct AccountResponse {
    cash: Option<String>,
    equity: Option<String>,
    buying_power: Option<String>,
}

#[derive(Deserialize)]
struct PositionResponse {
    symbol: String,
    qty: Option<String>,
    cost_basis: Option<String>,
    current_price: Option<String>,
    market_value: Option<String>,
    unrealized_pl: Option<String>,
}

#[derive(Deserialize)]
struct OrderResponse {
    id: String,
    symbol: Option<String>,
    side: Option<String>,
    status: Option<String>,
}

#[derive(Serialize)]
struct LimitOrderBody<'a> {
    symbol: &'a str,
    qty: i64,
    side: &'a str,
    #[serde(rename = "type")]
    order_type: &'a str,
    limit_price: String,
    time_in_force: &'a str,
    extended_hours: bool,
}

fn parse_num(value: &Option<String>) -> f64 {
    value.as_deref().and_then(|s| s.parse().ok()).unwrap_or(0.0)
}

fn parse_opt_num(value: &Option<String>) -> Option<f64> {
    value.as_deref().and_then(|s| s.parse().ok()).filter(|p: &f64| *p > 0.0)
}

// ── Client ────────────────────────────────────────────────────────────────

pub struct AlpacaBroker {
    http: Client,
    audit: Arc<dyn crate::store::AuditStore>,
    user_id: String,
    wallet_id: String,
    env: WalletEnv,
    creds: Credentials,
}

impl AlpacaBroker {
    pub fn new(
        http: Client,
        audit: Arc<dyn crate::store::AuditStore>,
        wallet: &Wallet,
        creds: Credentials,
    ) -> Self {
        Self {
            http,
            audit,
            user_id: wallet.user_id.clone(),
            wallet_id: wallet.wallet_id.clone(),
            env: wallet.env,
            creds,
        }
    }

    async fn log_io(
        &self,
        method: &Method,
        path: &str,
        request_body: Option<String>,
        status: Option<StatusCode>,
        response_body: Option<String>,
    ) {
        let record = IoLogRecord {
            user_id: self.user_id.clone(),
            env: self.env.as_str().to_string(),
            method: method.to_string(),
            path: path.to_string(),
            request_body,
            status: status.map(|s| s.as_u16()),
            response_body,
            wallet_id: Some(self.wallet_id.clone()),
        };
        if let Err(e) = self.audit.record_io(&record).await {
            warn!("vendor I/O log write failed: {e}");
        }
    }

    /// One authenticated round trip; returns (status, body text).
    async fn call(&self, method: Method, path: &str, body: Option<String>) -> Result<(StatusCode, String)> {
        let url = format!("{}{}", base_url(self.env), path);
        let mut request = self
            .http
            .request(method.clone(), &url)
            .header("APCA-API-KEY-ID", &self.creds.key)
            .header("APCA-API-SECRET-KEY", &self.creds.secret);
        if let Some(ref body) = body {
            request = request
                .header("Content-Type", "application/json")
                .body(body.clone());
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;
        self.log_io(&method, path, body, Some(status), Some(text.clone())).await;
        Ok((status, text))
    }

    fn parse<T: serde::de::DeserializeOwned>(path: &str, status: StatusCode, body: &str) -> Result<T> {
        if !status.is_success() {
            return Err(EngineError::Api(format!("Alpaca {path}: HTTP {status} {body}")));
        }
        serde_json::from_str(body)
            .map_err(|e| EngineError::Api(format!("Alpaca {path}: bad response ({e}): {body}")))
    }
}

#[async_trait]
impl Broker for AlpacaBroker {
    async fn get_account(&self) -> Result<AccountSnapshot> {
        let (status, body) = self.call(Method::GET, "/v2/account", None).await?;
        let account: AccountResponse = Self::parse("/v2/account", status, &body)?;
        Ok(AccountSnapshot {
            cash: parse_num(&account.cash),
            equity: parse_num(&account.equity),
            buying_power: parse_num(&account.buying_power),
        })
    }

    async fn get_positions(&self) -> Result<HashMap<String, Position>> {
        let (status, body) = self.call(Method::GET, "/v2/positions", None).await?;
        let positions: Vec<PositionResponse> = Self::parse("/v2/positions", status, &body)?;
        Ok(positions
            .into_iter()
            .map(|p| {
                let position = Position {
                    symbol: p.symbol.clone(),
                    qty: p.qty.as_deref().and_then(|q| q.parse().ok()).unwrap_or(0),
                    cost_basis: parse_num(&p.cost_basis),
                    current_price: parse_opt_num(&p.current_price),
                    market_value: parse_num(&p.market_value),
                    unrealized_pl: parse_num(&p.unrealized_pl),
                };
                (p.symbol, position)
            })
            .collect())
    }

    async fn get_open_orders(&self) -> Result<Vec<OpenOrder>> {
        let path = "/v2/orders?status=open";
        let (status, body) = self.call(Method::GET, path, None).await?;
        let orders: Vec<OrderResponse> = Self::parse(path, status, &body)?;
        Ok(orders
            .into_iter()
            .filter_map(|o| {
                let side = o.side.as_deref()?.parse::<OrderSide>().ok()?;
                Some(OpenOrder { id: o.id, symbol: o.symbol?, side })
            })
            .collect())
    }

    async fn cancel_order(&self, order_id: &str) -> Result<()> {
        let path = format!("/v2/orders/{order_id}");
        let (status, body) = self.call(Method::DELETE, &path, None).await?;
        if !status.is_success() {
            return Err(EngineError::Api(format!("Alpaca cancel {order_id}: HTTP {status} {body}")));
        }
        Ok(())
    }

    async fn submit_limit_order(&self, ticket: &OrderTicket) -> Result<OrderAck> {
        let body = LimitOrderBody {
            symbol: &ticket.symbol,
            qty: ticket.qty,
            side: ticket.side.as_str(),
            order_type: "limit",
            limit_price: format!("{:.2}", round2(ticket.limit_price)),
            time_in_force: &ticket.time_in_force,
            extended_hours: ticket.extended_hours,
        };
        let payload = serde_json::to_string(&body)
            .map_err(|e| EngineError::Execution(format!("order encode: {e}")))?;

        let (status, text) = self.call(Method::POST, "/v2/orders", Some(payload)).await?;
        if !status.is_success() {
            return Err(EngineError::Execution(format!(
                "Alpaca order rejected: HTTP {status} {text}"
            )));
        }
        let ack: OrderResponse = serde_json::from_str(&text)
            .map_err(|e| EngineError::Execution(format!("order ack parse ({e}): {text}")))?;

        info!(
            symbol = %ticket.symbol,
            side = %ticket.side,
            qty = ticket.qty,
            limit = format!("{:.2}", ticket.limit_price),
            extended_hours = ticket.extended_hours,
            order_id = %ack.id,
            "order placed"
        );
        Ok(OrderAck {
            id: ack.id,
            status: ack.status.unwrap_or_else(|| "accepted".to_string()),
        })
    }
}
