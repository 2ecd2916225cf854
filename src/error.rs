/// error.rs — Engine error taxonomy
///
/// Every variant maps to a stable code recorded in the audit log's
/// error_type column, so operators can filter the error trail by class.
/// Propagation rules:
///   Config   → the affected wallet is skipped for the run
///   Data     → only the affected symbol / session / method is skipped
///   Api      → aborts the current symbol (or the wallet when it happens
///              before any symbol ran)
///   Execution→ broker rejected the order; symbol marked failed
///   Critical → wallet-level failure before symbol processing
/// None of these ever escape the orchestrator; each run yields a result.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Missing credentials or broken wallet configuration.
    #[error("config: {0}")]
    Config(String),

    /// Missing baseline or insufficient aligned bars.
    #[error("data: {0}")]
    Data(String),

    /// Brokerage or market-data transport failure.
    #[error("api: {0}")]
    Api(String),

    /// Order submission rejected by the broker.
    #[error("order: {0}")]
    Execution(String),

    /// Wallet lookup / credential resolution failure before any symbol ran.
    #[error("critical: {0}")]
    Critical(String),

    /// Persistence failure.
    #[error("store: {0}")]
    Store(#[from] sqlx::Error),
}

impl EngineError {
    /// Stable code written to the audit log.
    pub fn error_type(&self) -> &'static str {
        match self {
            EngineError::Config(_) => "CONFIG_ERROR",
            EngineError::Data(_) => "DATA_ERROR",
            EngineError::Api(_) => "API_ERROR",
            EngineError::Execution(_) => "ORDER_ERROR",
            EngineError::Critical(_) => "CRITICAL_ERROR",
            EngineError::Store(_) => "STORE_ERROR",
        }
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        EngineError::Api(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
