/// main.rs — Wallet engine entry point
///
/// Runs the minute-granularity orchestrator against Alpaca + Polygon.
///
/// FLOW:
///   1. Load config from .env (DATABASE_URL, cadence, safety-gate band)
///   2. Connect Postgres, create missing tables
///   3. Every tick: read the global switches, then run every enabled wallet
///      in sequence through the orchestrator
///
/// Wallets and symbols are processed strictly sequentially; one pass issues
/// no concurrent vendor calls.  A slow pass simply delays the next tick.
use std::sync::Arc;

use anyhow::Result;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::info;
use tracing_subscriber::EnvFilter;

use ratio_engine::broker::LiveVendors;
use ratio_engine::config::AppConfig;
use ratio_engine::cooldown::CooldownMap;
use ratio_engine::orchestrator::Orchestrator;
use ratio_engine::safety::OrderGate;
use ratio_engine::store::postgres::PgStore;
use ratio_engine::store::AuditStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════╗");
    info!("║      RATIO ENGINE  —  WALLET EXECUTION      ║");
    info!("╚══════════════════════════════════════════════╝");

    let cfg = AppConfig::from_env()?;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&cfg.database_url)
        .await?;
    let store = Arc::new(PgStore::new(pool));
    store.init_schema().await?;

    let audit: Arc<dyn AuditStore> = store.clone();
    let vendors = Arc::new(LiveVendors::new(audit.clone()));
    let gate = OrderGate {
        max_distance_frac: cfg.price_band_frac,
        max_distance_abs: cfg.price_band_abs,
    };

    let mut orchestrator = Orchestrator::new(
        store.clone(),
        store.clone(),
        audit,
        vendors,
        gate,
        CooldownMap::new(cfg.cooldown_secs * 1000),
        cfg.reference_ticker.clone(),
    );

    info!(
        poll_secs = cfg.poll_secs,
        reference = %cfg.reference_ticker,
        "entering scheduler loop"
    );

    let mut ticker = interval(Duration::from_secs(cfg.poll_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        orchestrator.run_pass().await;
    }
}
