/// config.rs — Centralised configuration loaded from .env
///
/// All tunables consumed by the engine are defined here.  Loading happens
/// once at startup; every module borrows &AppConfig.  Vendor credentials are
/// NOT here: they live in the config store, resolved per wallet at run time.
use anyhow::Result;
use chrono::NaiveDate;
use std::env;

/// Default safety-gate band: an order may sit at most
/// min(market · 10%, $0.50) away from the live market price.
pub const DEFAULT_PRICE_BAND_FRAC: f64 = 0.10;
pub const DEFAULT_PRICE_BAND_ABS: f64 = 0.50;

#[derive(Debug, Clone)]
pub struct AppConfig {
    // ── Persistence ──────────────────────────────────────────────────
    pub database_url: String,

    // ── Reference asset ──────────────────────────────────────────────
    /// Market-data ticker the baselines and live ratio are computed against.
    pub reference_ticker: String,

    // ── Scheduler cadence ────────────────────────────────────────────
    /// Seconds between orchestrator passes.
    pub poll_secs: u64,

    // ── Order safety ─────────────────────────────────────────────────
    /// Seconds a (wallet, symbol) is blocked after a submission.
    pub cooldown_secs: i64,
    pub price_band_frac: f64,
    pub price_band_abs: f64,

    // ── Baseline job ─────────────────────────────────────────────────
    /// Trading day to compute; defaults to the previous calendar day.
    pub baseline_date: Option<NaiveDate>,
}

impl AppConfig {
    /// Load configuration from environment variables (after dotenv).
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok(); // ignore missing .env

        let database_url = env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL is not set"))?;

        let baseline_date = match env::var("BASELINE_DATE") {
            Ok(raw) => Some(
                raw.parse::<NaiveDate>()
                    .map_err(|e| anyhow::anyhow!("Config key BASELINE_DATE: {e}"))?,
            ),
            Err(_) => None,
        };

        Ok(Self {
            database_url,
            reference_ticker: env::var("REFERENCE_TICKER")
                .unwrap_or_else(|_| "X:BTCUSD".into()),

            poll_secs: parse_env("ENGINE_POLL_SECS", 60u64)?,

            cooldown_secs: parse_env("ORDER_COOLDOWN_SECS", 60i64)?,
            price_band_frac: parse_env("PRICE_BAND_FRAC", DEFAULT_PRICE_BAND_FRAC)?,
            price_band_abs: parse_env("PRICE_BAND_ABS", DEFAULT_PRICE_BAND_ABS)?,

            baseline_date,
        })
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr + Copy,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(v) => v
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Config key {key}: {e}")),
        Err(_) => Ok(default),
    }
}
