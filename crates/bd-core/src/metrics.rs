//! # Dashboard Metrics
//!
//! Last-24h roll-up computed with one tagged `UNION ALL` statement, the
//! same pattern as [`crate::combined`] minus pagination.

use serde::Serialize;

use crate::filter::{LogLevel, TimeRange};
use crate::rows::{as_f64, as_text, LOG_HISTORY, QUERY_HISTORY};
use crate::sql::{Predicate, SqlParam};
use crate::store::{QueryOutput, StoreError};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub total_logs: u64,
    /// Percentage of ERROR events, two decimals.
    pub error_rate: f64,
    /// Mean duration of finished queries in milliseconds.
    pub avg_query_time: f64,
    /// Distinct query ids seen in logs over the last five minutes.
    pub active_queries: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Metrics {
    pub fn empty(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

const TOTAL_LOGS: &str = "total_logs";
const ERROR_LOGS: &str = "error_logs";
const AVG_QUERY_MS: &str = "avg_query_ms";
const ACTIVE_QUERIES: &str = "active_queries";

/// Render the roll-up statement.
pub fn render() -> (String, Vec<SqlParam>) {
    let day_logs = Predicate::new().since(LOG_HISTORY.time_column, TimeRange::Hour24);
    let day_errors = Predicate::new()
        .since(LOG_HISTORY.time_column, TimeRange::Hour24)
        .eq_literal("log_level", LogLevel::Error.store_literal());
    let finished = Predicate::new()
        .since(QUERY_HISTORY.time_column, TimeRange::Hour24)
        .raw("log_type_name IN ('Finish', 'Error', 'Aborted')");
    let recent = Predicate::new()
        .since(LOG_HISTORY.time_column, TimeRange::Min5)
        .raw("query_id IS NOT NULL");

    let parts = [
        (TOTAL_LOGS, "COUNT(*)", LOG_HISTORY.table, &day_logs),
        (ERROR_LOGS, "COUNT(*)", LOG_HISTORY.table, &day_errors),
        (
            AVG_QUERY_MS,
            "COALESCE(AVG(query_duration_ms), 0)",
            QUERY_HISTORY.table,
            &finished,
        ),
        (
            ACTIVE_QUERIES,
            "COUNT(DISTINCT query_id)",
            LOG_HISTORY.table,
            &recent,
        ),
    ];

    let mut params = Vec::new();
    let sql = parts
        .iter()
        .map(|(metric, expr, table, predicate)| {
            params.extend_from_slice(predicate.params());
            format!(
                "SELECT '{}' AS metric, CAST({} AS DOUBLE) AS value FROM {} WHERE {}",
                metric,
                expr,
                table,
                predicate.sql()
            )
        })
        .collect::<Vec<_>>()
        .join("\nUNION ALL\n");

    (sql, params)
}

/// Decode the tagged roll-up rows.
pub fn decode(output: &QueryOutput) -> Result<Metrics, StoreError> {
    let metric_idx = output
        .column_index("metric")
        .ok_or_else(|| StoreError::Decode("missing column 'metric'".into()))?;
    let value_idx = output
        .column_index("value")
        .ok_or_else(|| StoreError::Decode("missing column 'value'".into()))?;

    let mut total_logs = 0.0;
    let mut error_logs = 0.0;
    let mut metrics = Metrics::default();

    for row in &output.rows {
        let name = row.get(metric_idx).and_then(as_text).unwrap_or_default();
        let value = row.get(value_idx).and_then(as_f64).unwrap_or(0.0);
        match name.as_str() {
            TOTAL_LOGS => total_logs = value,
            ERROR_LOGS => error_logs = value,
            AVG_QUERY_MS => metrics.avg_query_time = round2(value),
            ACTIVE_QUERIES => metrics.active_queries = value as u64,
            other => tracing::debug!(metric = other, "ignoring unknown metric"),
        }
    }

    metrics.total_logs = total_logs as u64;
    metrics.error_rate = if total_logs > 0.0 {
        round2(error_logs * 100.0 / total_logs)
    } else {
        0.0
    };
    Ok(metrics)
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
