//! # Store Capability
//!
//! The one thing this crate needs from the outside world: run a SQL text
//! with ordered parameters and hand back named columns plus JSON rows.

use serde::Serialize;

use crate::sql::SqlParam;

/// Raw result of a single statement.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryOutput {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl QueryOutput {
    /// Position of a column by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// Failures a store round trip can surface.
#[derive(Debug, Clone, thiserror::Error, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum StoreError {
    /// No store handle is configured for this caller.
    #[error("Database not connected. Please configure connection first.")]
    NotConfigured,

    /// The store could not be reached.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The store rejected or failed the statement.
    #[error("Query failed: {0}")]
    Execution(String),

    /// The round trip exceeded its time budget.
    #[error("Query timeout after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// The result could not be decoded into the expected shape.
    #[error("Unexpected result shape: {0}")]
    Decode(String),
}

/// A configured query-execution capability.
///
/// Implementations must be safe for concurrent independent use: every
/// request calls [`QueryStore::execute`] exactly once on a shared handle.
#[async_trait::async_trait]
pub trait QueryStore: Send + Sync {
    /// Execute `sql`, binding `params` to its `?` placeholders in order.
    async fn execute(&self, sql: &str, params: &[SqlParam]) -> Result<QueryOutput, StoreError>;

    /// Name of the database the handle points at.
    fn database(&self) -> &str;
}

/// Run `fut` under a bounded time budget, mapping expiry to [`StoreError::Timeout`].
pub async fn with_timeout<T, F>(budget: std::time::Duration, fut: F) -> Result<T, StoreError>
where
    F: std::future::Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(budget, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout {
            elapsed_ms: budget.as_millis() as u64,
        }),
    }
}
