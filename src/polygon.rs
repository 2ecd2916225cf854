/// polygon.rs — Polygon.io market-data client
///
/// Two endpoints: the last trade for the reference asset's live price, and
/// one-day minute aggregates for baseline computation.  The API key travels
/// as a query parameter and is stripped from the audited path.
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use tracing::warn;

use crate::bars::Bar;
use crate::broker::{LastTrade, MarketData};
use crate::error::{EngineError, Result};
use crate::models::IoLogRecord;

const BASE_URL: &str = "https://api.polygon.io";

#[derive(Deserialize)]
struct LastTradeResponse {
    results: Option<LastTradeResults>,
}

#[derive(Deserialize)]
struct LastTradeResults {
    /// price
    p: Option<f64>,
    /// SIP timestamp, nanoseconds
    t: Option<i64>,
}

#[derive(Deserialize)]
struct AggregatesResponse {
    status: Option<String>,
    results: Option<Vec<AggregateBar>>,
}

#[derive(Deserialize)]
struct AggregateBar {
    t: i64,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    v: f64,
}

pub struct PolygonClient {
    http: Client,
    audit: Arc<dyn crate::store::AuditStore>,
    user_id: String,
    wallet_id: Option<String>,
    api_key: String,
}

impl PolygonClient {
    pub fn new(
        http: Client,
        audit: Arc<dyn crate::store::AuditStore>,
        user_id: &str,
        wallet_id: Option<&str>,
        api_key: &str,
    ) -> Self {
        Self {
            http,
            audit,
            user_id: user_id.to_string(),
            wallet_id: wallet_id.map(str::to_string),
            api_key: api_key.to_string(),
        }
    }

    /// GET `path`, logging the key-less path to the vendor I/O trail.
    async fn get(&self, path: &str) -> Result<(StatusCode, String)> {
        let sep = if path.contains('?') { '&' } else { '?' };
        let url = format!("{BASE_URL}{path}{sep}apiKey={}", self.api_key);
        let response = self.http.get(&url).send().await?;
        let status = response.status();
        let text = response.text().await?;

        let record = IoLogRecord {
            user_id: self.user_id.clone(),
            env: "market-data".to_string(),
            method: Method::GET.to_string(),
            path: path.to_string(),
            request_body: None,
            status: Some(status.as_u16()),
            response_body: Some(text.clone()),
            wallet_id: self.wallet_id.clone(),
        };
        if let Err(e) = self.audit.record_io(&record).await {
            warn!("vendor I/O log write failed: {e}");
        }
        Ok((status, text))
    }
}

#[async_trait]
impl MarketData for PolygonClient {
    async fn last_trade(&self, ticker: &str) -> Result<LastTrade> {
        let path = format!("/v2/last/trade/{ticker}");
        let (status, body) = self.get(&path).await?;
        if !status.is_success() {
            return Err(EngineError::Api(format!("Polygon last trade {ticker}: HTTP {status} {body}")));
        }
        let parsed: LastTradeResponse = serde_json::from_str(&body)
            .map_err(|e| EngineError::Api(format!("Polygon last trade {ticker}: bad response ({e})")))?;

        let results = parsed
            .results
            .ok_or_else(|| EngineError::Api(format!("Polygon last trade {ticker}: empty results")))?;
        let price = results
            .p
            .filter(|p| *p > 0.0)
            .ok_or_else(|| EngineError::Api(format!("Polygon last trade {ticker}: invalid price")))?;
        Ok(LastTrade { price, timestamp: results.t.unwrap_or(0) })
    }

    async fn minute_bars(&self, ticker: &str, day: NaiveDate) -> Result<Vec<Bar>> {
        let date = day.format("%Y-%m-%d");
        let path = format!(
            "/v2/aggs/ticker/{ticker}/range/1/minute/{date}/{date}?adjusted=true&sort=asc&limit=50000"
        );
        let (status, body) = self.get(&path).await?;
        if !status.is_success() {
            return Err(EngineError::Api(format!("Polygon aggregates {ticker}: HTTP {status} {body}")));
        }
        let parsed: AggregatesResponse = serde_json::from_str(&body)
            .map_err(|e| EngineError::Api(format!("Polygon aggregates {ticker}: bad response ({e})")))?;

        let bars: Vec<Bar> = parsed
            .results
            .unwrap_or_default()
            .into_iter()
            .map(|b| Bar {
                timestamp: b.t,
                open: b.o,
                high: b.h,
                low: b.l,
                close: b.c,
                volume: b.v,
            })
            .collect();

        if bars.is_empty() {
            return Err(EngineError::Data(format!(
                "no bars for {ticker} on {day} (status: {})",
                parsed.status.as_deref().unwrap_or("unknown")
            )));
        }
        Ok(bars)
    }
}
