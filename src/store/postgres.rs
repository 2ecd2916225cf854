/// store/postgres.rs — Postgres-backed configuration, baseline, and audit stores
///
/// Raw SQL throughout; one `PgStore` implements all three store traits off a
/// shared connection pool.  `init_schema` is idempotent and runs at startup.
use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::error::{EngineError, Result};
use crate::models::{
    BaselineMethod, BaselineRow, BudgetPolicy, CancellationRecord, Credentials,
    ExecutionErrorRecord, ExecutionSnapshot, IoLogRecord, OrderRecord, SymbolConfig,
    SystemSettings, Wallet, WalletEnv,
};
use crate::session::{self, Session};
use crate::store::{AuditStore, BaselineStore, ConfigStore};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS wallets (
        wallet_id   TEXT PRIMARY KEY,
        user_id     TEXT NOT NULL,
        env         TEXT NOT NULL CHECK (env IN ('paper','live')),
        name        TEXT NOT NULL,
        enabled     BOOLEAN NOT NULL DEFAULT FALSE,
        created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS ix_wallets_user ON wallets(user_id, env)",
    r#"
    CREATE TABLE IF NOT EXISTS wallet_symbols (
        wallet_id       TEXT NOT NULL REFERENCES wallets(wallet_id) ON DELETE CASCADE,
        symbol          TEXT NOT NULL,
        budget_mode     TEXT,
        buy_budget_usd  DOUBLE PRECISION,
        percent_budget  DOUBLE PRECISION,
        buy_pct_rth     DOUBLE PRECISION,
        sell_pct_rth    DOUBLE PRECISION,
        buy_pct_ah      DOUBLE PRECISION,
        sell_pct_ah     DOUBLE PRECISION,
        method_rth      TEXT,
        method_ah       TEXT,
        enabled         BOOLEAN DEFAULT TRUE,
        updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (wallet_id, symbol)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS ix_wallet_symbols_wallet ON wallet_symbols(wallet_id)",
    r#"
    CREATE TABLE IF NOT EXISTS user_api_keys (
        user_id             TEXT PRIMARY KEY,
        polygon_key         TEXT,
        alpaca_paper_key    TEXT,
        alpaca_paper_secret TEXT,
        alpaca_live_key     TEXT,
        alpaca_live_secret  TEXT,
        updated_at          TIMESTAMPTZ DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS wallet_api_keys (
        wallet_id           TEXT PRIMARY KEY REFERENCES wallets(wallet_id) ON DELETE CASCADE,
        polygon_key         TEXT,
        alpaca_paper_key    TEXT,
        alpaca_paper_secret TEXT,
        alpaca_live_key     TEXT,
        alpaca_live_secret  TEXT,
        updated_at          TIMESTAMPTZ DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS baseline_daily (
        trading_day  DATE NOT NULL,
        symbol       TEXT NOT NULL,
        session      TEXT NOT NULL,
        method       TEXT NOT NULL,
        baseline     DOUBLE PRECISION NOT NULL,
        sample_count BIGINT NOT NULL DEFAULT 0,
        source       TEXT NOT NULL DEFAULT 'computed',
        computed_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (trading_day, symbol, session, method)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS ix_baseline_symbol ON baseline_daily(symbol, trading_day DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS system_settings (
        setting_key   TEXT PRIMARY KEY,
        setting_value TEXT NOT NULL,
        updated_at    TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS execution_orders (
        id              BIGSERIAL PRIMARY KEY,
        ts_utc          TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        user_id         TEXT NOT NULL,
        wallet_id       TEXT NOT NULL,
        symbol          TEXT NOT NULL,
        side            TEXT NOT NULL,
        qty             BIGINT NOT NULL,
        limit_price     DOUBLE PRECISION NOT NULL,
        status          TEXT NOT NULL,
        broker_order_id TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS execution_snapshots (
        id               BIGSERIAL PRIMARY KEY,
        ts_utc           TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        user_id          TEXT NOT NULL,
        wallet_id        TEXT NOT NULL,
        symbol           TEXT NOT NULL,
        reference_price  DOUBLE PRECISION NOT NULL,
        symbol_price     DOUBLE PRECISION,
        current_ratio    DOUBLE PRECISION,
        baseline_value   DOUBLE PRECISION NOT NULL,
        baseline_method  TEXT NOT NULL,
        buy_price        DOUBLE PRECISION NOT NULL,
        sell_price       DOUBLE PRECISION NOT NULL,
        decision         TEXT NOT NULL,
        decision_reason  TEXT NOT NULL,
        shares_owned     BIGINT NOT NULL,
        budget_available DOUBLE PRECISION NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS execution_errors (
        id            BIGSERIAL PRIMARY KEY,
        ts_utc        TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        user_id       TEXT,
        wallet_id     TEXT,
        symbol        TEXT,
        error_type    TEXT NOT NULL,
        error_message TEXT NOT NULL,
        function_name TEXT NOT NULL,
        severity      TEXT NOT NULL DEFAULT 'ERROR'
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS execution_cancellations (
        id                  BIGSERIAL PRIMARY KEY,
        ts_utc              TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        user_id             TEXT NOT NULL,
        wallet_id           TEXT NOT NULL,
        symbol              TEXT NOT NULL,
        broker_order_id     TEXT NOT NULL,
        cancellation_reason TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS vendor_io_log (
        id        BIGSERIAL PRIMARY KEY,
        ts_utc    TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        user_id   TEXT NOT NULL,
        env       TEXT NOT NULL,
        method    TEXT NOT NULL,
        path      TEXT NOT NULL,
        req_body  TEXT,
        status    INT,
        resp_body TEXT,
        wallet_id TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS ix_vendor_io_log_user ON vendor_io_log(user_id, ts_utc DESC)",
];

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    fn wallet_from_row(row: &sqlx::postgres::PgRow) -> Result<Wallet> {
        let env: String = row.try_get("env")?;
        Ok(Wallet {
            wallet_id: row.try_get("wallet_id")?,
            user_id: row.try_get("user_id")?,
            env: env.parse::<WalletEnv>().map_err(EngineError::Config)?,
            name: row.try_get("name")?,
            enabled: row.try_get("enabled")?,
        })
    }

    /// Key-pair columns for the wallet's environment.
    fn key_columns(env: WalletEnv) -> (&'static str, &'static str) {
        match env {
            WalletEnv::Paper => ("alpaca_paper_key", "alpaca_paper_secret"),
            WalletEnv::Live => ("alpaca_live_key", "alpaca_live_secret"),
        }
    }

    async fn credentials_from(
        &self,
        table: &str,
        id_column: &str,
        id: &str,
        env: WalletEnv,
    ) -> Result<Option<Credentials>> {
        let (key_col, secret_col) = Self::key_columns(env);
        let sql = format!("SELECT {key_col} AS key, {secret_col} AS secret FROM {table} WHERE {id_column} = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        let Some(row) = row else { return Ok(None) };
        let key: Option<String> = row.try_get("key")?;
        let secret: Option<String> = row.try_get("secret")?;
        match (key, secret) {
            (Some(key), Some(secret)) if !key.is_empty() && !secret.is_empty() => {
                Ok(Some(Credentials { key, secret }))
            }
            _ => Ok(None),
        }
    }

    async fn polygon_key_from(&self, table: &str, id_column: &str, id: &str) -> Result<Option<String>> {
        let sql = format!("SELECT polygon_key FROM {table} WHERE {id_column} = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        let Some(row) = row else { return Ok(None) };
        let key: Option<String> = row.try_get("polygon_key")?;
        Ok(key.filter(|k| !k.is_empty()))
    }
}

/// Canonical symbol config from the loosely-typed settings row.  Defaults are
/// applied here, once, at the boundary: budget mode falls back to fixed,
/// offsets to 1% buy / 2% sell, methods to EQUAL_MEAN.
fn symbol_config_from_row(row: &sqlx::postgres::PgRow) -> Result<SymbolConfig> {
    let mode: Option<String> = row.try_get("budget_mode")?;
    let fixed_budget: Option<f64> = row.try_get("buy_budget_usd")?;
    let percent_budget: Option<f64> = row.try_get("percent_budget")?;
    let budget = match mode.as_deref() {
        Some("percent") => BudgetPolicy::Percent(percent_budget.unwrap_or(0.0)),
        _ => BudgetPolicy::Fixed(fixed_budget.unwrap_or(0.0)),
    };

    let method = |col: &str| -> Result<BaselineMethod> {
        let raw: Option<String> = row.try_get(col)?;
        Ok(raw
            .and_then(|m| m.parse().ok())
            .unwrap_or(BaselineMethod::EqualMean))
    };

    Ok(SymbolConfig {
        symbol: row.try_get("symbol")?,
        budget,
        buy_pct_core: row.try_get::<Option<f64>, _>("buy_pct_rth")?.unwrap_or(1.0),
        sell_pct_core: row.try_get::<Option<f64>, _>("sell_pct_rth")?.unwrap_or(2.0),
        buy_pct_extended: row.try_get::<Option<f64>, _>("buy_pct_ah")?.unwrap_or(1.0),
        sell_pct_extended: row.try_get::<Option<f64>, _>("sell_pct_ah")?.unwrap_or(2.0),
        method_core: method("method_rth")?,
        method_extended: method("method_ah")?,
        enabled: row.try_get::<Option<bool>, _>("enabled")?.unwrap_or(true),
    })
}

#[async_trait]
impl ConfigStore for PgStore {
    async fn wallet(&self, wallet_id: &str) -> Result<Option<Wallet>> {
        let row = sqlx::query("SELECT wallet_id, user_id, env, name, enabled FROM wallets WHERE wallet_id = $1")
            .bind(wallet_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::wallet_from_row).transpose()
    }

    async fn enabled_wallets(&self) -> Result<Vec<Wallet>> {
        let rows =
            sqlx::query("SELECT wallet_id, user_id, env, name, enabled FROM wallets WHERE enabled = TRUE")
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(Self::wallet_from_row).collect()
    }

    async fn symbol_configs(&self, wallet_id: &str) -> Result<Vec<SymbolConfig>> {
        let rows = sqlx::query(
            r#"
            SELECT symbol, budget_mode, buy_budget_usd, percent_budget,
                   buy_pct_rth, sell_pct_rth, buy_pct_ah, sell_pct_ah,
                   method_rth, method_ah, enabled
              FROM wallet_symbols
             WHERE wallet_id = $1 AND enabled = TRUE
             ORDER BY symbol
            "#,
        )
        .bind(wallet_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(symbol_config_from_row).collect()
    }

    async fn broker_credentials(&self, wallet: &Wallet) -> Result<Option<Credentials>> {
        if let Some(creds) = self
            .credentials_from("wallet_api_keys", "wallet_id", &wallet.wallet_id, wallet.env)
            .await?
        {
            return Ok(Some(creds));
        }
        self.credentials_from("user_api_keys", "user_id", &wallet.user_id, wallet.env)
            .await
    }

    async fn market_data_key(&self, wallet: &Wallet) -> Result<Option<String>> {
        if let Some(key) = self
            .polygon_key_from("wallet_api_keys", "wallet_id", &wallet.wallet_id)
            .await?
        {
            return Ok(Some(key));
        }
        self.polygon_key_from("user_api_keys", "user_id", &wallet.user_id)
            .await
    }

    async fn system_settings(&self) -> Result<SystemSettings> {
        let rows = sqlx::query(
            r#"
            SELECT setting_key, setting_value
              FROM system_settings
             WHERE setting_key IN ('system_enabled', 'global_trading_start_et', 'global_trading_end_et')
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut enabled = true;
        let mut start = None;
        let mut end = None;
        for row in &rows {
            let key: String = row.try_get("setting_key")?;
            let value: String = row.try_get("setting_value")?;
            match key.as_str() {
                "system_enabled" => enabled = value != "false",
                "global_trading_start_et" => start = session::parse_minute(&value),
                "global_trading_end_et" => end = session::parse_minute(&value),
                _ => {}
            }
        }
        Ok(SystemSettings { enabled, window: start.zip(end) })
    }
}

#[async_trait]
impl BaselineStore for PgStore {
    async fn latest(
        &self,
        symbol: &str,
        session: Session,
        method: BaselineMethod,
    ) -> Result<Option<BaselineRow>> {
        let row = sqlx::query(
            r#"
            SELECT trading_day, baseline, sample_count, source
              FROM baseline_daily
             WHERE symbol = $1 AND session = $2 AND method = $3
             ORDER BY trading_day DESC
             LIMIT 1
            "#,
        )
        .bind(symbol)
        .bind(session.as_str())
        .bind(method.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        Ok(Some(BaselineRow {
            trading_day: row.try_get("trading_day")?,
            symbol: symbol.to_string(),
            session,
            method,
            baseline: row.try_get("baseline")?,
            sample_count: row.try_get("sample_count")?,
            source: row.try_get("source")?,
        }))
    }

    async fn upsert(&self, row: &BaselineRow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO baseline_daily (trading_day, symbol, session, method, baseline, sample_count, source, computed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
            ON CONFLICT (trading_day, symbol, session, method)
            DO UPDATE SET baseline = EXCLUDED.baseline,
                          sample_count = EXCLUDED.sample_count,
                          source = EXCLUDED.source,
                          computed_at = NOW()
            "#,
        )
        .bind(row.trading_day)
        .bind(&row.symbol)
        .bind(row.session.as_str())
        .bind(row.method.as_str())
        .bind(row.baseline)
        .bind(row.sample_count)
        .bind(&row.source)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl AuditStore for PgStore {
    async fn record_order(&self, record: &OrderRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO execution_orders (user_id, wallet_id, symbol, side, qty, limit_price, status, broker_order_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&record.user_id)
        .bind(&record.wallet_id)
        .bind(&record.symbol)
        .bind(record.side.as_str())
        .bind(record.qty)
        .bind(record.limit_price)
        .bind(&record.status)
        .bind(&record.broker_order_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_snapshot(&self, snapshot: &ExecutionSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO execution_snapshots (
                user_id, wallet_id, symbol,
                reference_price, symbol_price, current_ratio,
                baseline_value, baseline_method,
                buy_price, sell_price,
                decision, decision_reason,
                shares_owned, budget_available
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(&snapshot.user_id)
        .bind(&snapshot.wallet_id)
        .bind(&snapshot.symbol)
        .bind(snapshot.reference_price)
        .bind(snapshot.symbol_price)
        .bind(snapshot.current_ratio)
        .bind(snapshot.baseline_value)
        .bind(snapshot.baseline_method.as_str())
        .bind(snapshot.buy_price)
        .bind(snapshot.sell_price)
        .bind(snapshot.decision.as_str())
        .bind(&snapshot.decision_reason)
        .bind(snapshot.shares_owned)
        .bind(snapshot.budget_available)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_error(&self, record: &ExecutionErrorRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO execution_errors (user_id, wallet_id, symbol, error_type, error_message, function_name, severity)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&record.user_id)
        .bind(&record.wallet_id)
        .bind(&record.symbol)
        .bind(&record.error_type)
        .bind(&record.message)
        .bind(&record.function)
        .bind(&record.severity)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_cancellation(&self, record: &CancellationRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO execution_cancellations (user_id, wallet_id, symbol, broker_order_id, cancellation_reason)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&record.user_id)
        .bind(&record.wallet_id)
        .bind(&record.symbol)
        .bind(&record.broker_order_id)
        .bind(&record.reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_io(&self, record: &IoLogRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO vendor_io_log (user_id, env, method, path, req_body, status, resp_body, wallet_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&record.user_id)
        .bind(&record.env)
        .bind(&record.method)
        .bind(&record.path)
        .bind(&record.request_body)
        .bind(record.status.map(|s| s as i32))
        .bind(&record.response_body)
        .bind(&record.wallet_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
