/// baseline_main.rs — Baseline computation job
///
/// Nightly (or on-demand) companion to the wallet engine.  Resolves the
/// target trading day, collects the distinct enabled symbols across every
/// enabled wallet, and computes the full session × method baseline grid for
/// each, upserting the results.  One symbol's failure never stops the sweep.
///
/// The target day comes from BASELINE_DATE (YYYY-MM-DD) when set, otherwise
/// the previous calendar day; weekend and holiday days simply produce "no
/// bars" outcomes for equities and are reported as such.
use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ratio_engine::baseline;
use ratio_engine::broker::{LiveVendors, VendorGateway};
use ratio_engine::config::AppConfig;
use ratio_engine::store::postgres::PgStore;
use ratio_engine::store::{AuditStore, ConfigStore};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = AppConfig::from_env()?;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&cfg.database_url)
        .await?;
    let store = Arc::new(PgStore::new(pool));
    store.init_schema().await?;

    let audit: Arc<dyn AuditStore> = store.clone();
    let vendors = LiveVendors::new(audit.clone());

    let day = cfg
        .baseline_date
        .unwrap_or_else(|| (Utc::now() - Duration::days(1)).date_naive());
    info!(%day, reference = %cfg.reference_ticker, "computing daily baselines");

    let wallets = store.enabled_wallets().await?;
    if wallets.is_empty() {
        info!("no enabled wallets, nothing to compute");
        return Ok(());
    }

    let mut seen: HashSet<String> = HashSet::new();
    let mut computed = 0usize;
    let mut failed = 0usize;
    let mut rows = 0usize;

    for wallet in &wallets {
        let Some(key) = store.market_data_key(wallet).await? else {
            warn!(wallet_id = %wallet.wallet_id, "no market-data key, skipping wallet");
            continue;
        };
        let market = vendors.market_for(wallet, &key);

        for symbol_cfg in store.symbol_configs(&wallet.wallet_id).await? {
            // each symbol is computed once per sweep, whichever wallet
            // lists it first
            if !seen.insert(symbol_cfg.symbol.clone()) {
                continue;
            }
            match baseline::compute_symbol_baselines(
                market.as_ref(),
                store.as_ref(),
                audit.as_ref(),
                &wallet.user_id,
                Some(&wallet.wallet_id),
                &cfg.reference_ticker,
                &symbol_cfg.symbol,
                day,
            )
            .await
            {
                Ok(outcome) => {
                    computed += 1;
                    rows += outcome.values.len();
                }
                Err(e) => {
                    failed += 1;
                    error!(symbol = %symbol_cfg.symbol, "baseline computation failed: {e}");
                }
            }
        }
    }

    info!("════════════════════════════════════════════");
    info!("  BASELINE SWEEP COMPLETE");
    info!("  Trading day : {day}");
    info!("  Symbols     : {}", seen.len());
    info!("  Computed    : {computed}");
    info!("  Failed      : {failed}");
    info!("  Rows stored : {rows}");
    info!("════════════════════════════════════════════");
    Ok(())
}
