//! # Row Decoding
//!
//! Column knowledge for the two history tables lives here and nowhere else:
//! [`TableShape`] names the columns the page sub-query selects, and each
//! table has exactly one decoder ([`LogRecord::from_row`],
//! [`QueryEvent::from_row`]) that reads those columns by name.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

// =============================================================================
// Table shapes
// =============================================================================

/// Static description of a history table as the combined query sees it.
#[derive(Debug)]
pub struct TableShape {
    pub table: &'static str,
    /// Record columns, in the order the page sub-query selects them.
    pub columns: &'static [&'static str],
    /// Deterministic page order.
    pub order_by: &'static str,
    /// Column used for time-range predicates and histogram buckets.
    pub time_column: &'static str,
    /// Expression yielding the stats/histogram category of a row.
    pub category_expr: &'static str,
    /// Aggregate for the mean duration reported next to the stats, if any.
    pub avg_duration_expr: Option<&'static str>,
}

pub const LOG_HISTORY: TableShape = TableShape {
    table: "system_history.log_history",
    columns: &[
        "timestamp",
        "query_id",
        "log_level",
        "target",
        "message",
        "path",
        "cluster_id",
        "node_id",
        "warehouse_id",
        "fields",
    ],
    // Events often share a timestamp; the tail columns break ties.
    order_by: "timestamp DESC, node_id, query_id, target, message",
    time_column: "timestamp",
    category_expr: "log_level",
    avg_duration_expr: None,
};

pub const QUERY_HISTORY: TableShape = TableShape {
    table: "system_history.query_history",
    columns: &[
        "query_id",
        "log_type_name",
        "query_text",
        "query_kind",
        "query_start_time",
        "event_time",
        "query_duration_ms",
        "sql_user",
        "current_database",
        "exception_code",
        "exception_text",
        "written_rows",
        "written_bytes",
        "scan_rows",
        "scan_bytes",
        "result_rows",
        "result_bytes",
        "client_address",
    ],
    // Rows of one query stay adjacent, oldest event first.
    order_by: "query_start_time DESC, query_id, event_time, log_type_name",
    time_column: "event_time",
    category_expr: "CASE WHEN COALESCE(exception_code, 0) = 0 THEN 'success' ELSE 'error' END",
    // Only terminal events carry a final duration.
    avg_duration_expr: Some(
        "COALESCE(AVG(CASE WHEN log_type_name IN ('Finish', 'End', 'Error', 'Aborted') \
         THEN query_duration_ms END), 0)",
    ),
};

// =============================================================================
// Generic row
// =============================================================================

/// One result row keyed by column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: Map<String, Value>,
}

impl Row {
    pub fn new(columns: &[String], values: &[Value]) -> Self {
        let values = columns
            .iter()
            .zip(values.iter())
            .map(|(c, v)| (c.clone(), v.clone()))
            .collect();
        Self { values }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.values.get(column).filter(|v| !v.is_null())
    }

    pub fn text(&self, column: &str) -> Option<String> {
        self.get(column).and_then(as_text)
    }

    pub fn int(&self, column: &str) -> Option<i64> {
        self.get(column).and_then(as_i64)
    }

    pub fn uint(&self, column: &str) -> Option<u64> {
        self.get(column).and_then(as_u64)
    }

    pub fn timestamp(&self, column: &str) -> Option<String> {
        self.text(column).map(|raw| normalize_timestamp(&raw))
    }
}

impl<const N: usize> From<[(&str, Value); N]> for Row {
    fn from(pairs: [(&str, Value); N]) -> Self {
        Self {
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        }
    }
}

// Databend's HTTP API returns every scalar as a string; native JSON numbers
// are accepted too.

pub fn as_text(v: &Value) -> Option<String> {
    match v {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

pub fn as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
        }
        _ => None,
    }
}

pub fn as_u64(v: &Value) -> Option<u64> {
    as_i64(v).and_then(|n| u64::try_from(n).ok())
}

pub fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Render store timestamps as RFC 3339 UTC; unknown formats pass through.
pub fn normalize_timestamp(raw: &str) -> String {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return dt
            .with_timezone(&Utc)
            .to_rfc3339_opts(SecondsFormat::AutoSi, true);
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return naive.and_utc().to_rfc3339_opts(SecondsFormat::AutoSi, true);
        }
    }
    raw.to_string()
}

// =============================================================================
// log_history
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRecord {
    pub timestamp: Option<String>,
    pub query_id: Option<String>,
    pub log_level: Option<String>,
    pub target: Option<String>,
    pub message: Option<String>,
    pub path: Option<String>,
    pub cluster_id: Option<String>,
    pub node_id: Option<String>,
    pub warehouse_id: Option<String>,
    /// Structured fields; parsed when the variant text is JSON.
    pub fields: Value,
}

impl LogRecord {
    pub fn from_row(row: &Row) -> Self {
        let fields = match row.get("fields") {
            Some(Value::String(raw)) => {
                serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.clone()))
            }
            Some(other) => other.clone(),
            None => Value::Null,
        };
        Self {
            timestamp: row.timestamp("timestamp"),
            query_id: row.text("query_id"),
            log_level: row.text("log_level"),
            target: row.text("target"),
            message: row.text("message"),
            path: row.text("path"),
            cluster_id: row.text("cluster_id"),
            node_id: row.text("node_id"),
            warehouse_id: row.text("warehouse_id"),
            fields,
        }
    }
}

// =============================================================================
// query_history
// =============================================================================

/// Lifecycle event kind (`log_type_name`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryEventKind {
    Start,
    Finish,
    Error,
    Aborted,
    Other(String),
}

impl QueryEventKind {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "Start" => Self::Start,
            "Finish" | "End" => Self::Finish,
            "Error" => Self::Error,
            "Aborted" => Self::Aborted,
            other => Self::Other(other.to_string()),
        }
    }

    /// Kinds that finalize a query's duration and outcome.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finish | Self::Error | Self::Aborted)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryEvent {
    pub query_id: Option<String>,
    pub log_type_name: Option<String>,
    pub query_text: Option<String>,
    pub query_kind: Option<String>,
    pub query_start_time: Option<String>,
    pub event_time: Option<String>,
    #[serde(rename = "duration_ms")]
    pub query_duration_ms: Option<i64>,
    pub sql_user: Option<String>,
    pub current_database: Option<String>,
    pub exception_code: Option<i64>,
    pub exception_text: Option<String>,
    pub written_rows: Option<u64>,
    pub written_bytes: Option<u64>,
    pub scan_rows: Option<u64>,
    pub scan_bytes: Option<u64>,
    pub result_rows: Option<u64>,
    pub result_bytes: Option<u64>,
    pub client_address: Option<String>,
}

impl QueryEvent {
    pub fn from_row(row: &Row) -> Self {
        Self {
            query_id: row.text("query_id"),
            log_type_name: row.text("log_type_name"),
            query_text: row.text("query_text"),
            query_kind: row.text("query_kind"),
            query_start_time: row.timestamp("query_start_time"),
            event_time: row.timestamp("event_time"),
            query_duration_ms: row.int("query_duration_ms"),
            sql_user: row.text("sql_user"),
            current_database: row.text("current_database"),
            exception_code: row.int("exception_code"),
            exception_text: row.text("exception_text").filter(|t| !t.is_empty()),
            written_rows: row.uint("written_rows"),
            written_bytes: row.uint("written_bytes"),
            scan_rows: row.uint("scan_rows"),
            scan_bytes: row.uint("scan_bytes"),
            result_rows: row.uint("result_rows"),
            result_bytes: row.uint("result_bytes"),
            client_address: row.text("client_address"),
        }
    }

    pub fn kind(&self) -> QueryEventKind {
        self.log_type_name
            .as_deref()
            .map(QueryEventKind::parse)
            .unwrap_or_else(|| QueryEventKind::Other(String::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_log_record_decodes_by_name() {
        let row = Row::from([
            ("message", json!("disk full")),
            ("timestamp", json!("2026-10-19 08:15:02.123456")),
            ("log_level", json!("ERROR")),
            ("query_id", Value::Null),
            ("fields", json!("{\"retry\":3}")),
        ]);
        let log = LogRecord::from_row(&row);
        assert_eq!(log.message.as_deref(), Some("disk full"));
        assert_eq!(log.timestamp.as_deref(), Some("2026-10-19T08:15:02.123456Z"));
        assert_eq!(log.query_id, None);
        assert_eq!(log.fields, json!({"retry": 3}));
        assert_eq!(log.node_id, None);
    }

    #[test]
    fn test_non_json_fields_kept_as_text() {
        let row = Row::from([("fields", json!("not json"))]);
        assert_eq!(LogRecord::from_row(&row).fields, json!("not json"));
    }

    #[test]
    fn test_query_event_coerces_numeric_strings() {
        let row = Row::from([
            ("query_id", json!("q1")),
            ("log_type_name", json!("Finish")),
            ("query_duration_ms", json!("42")),
            ("exception_code", json!(0)),
            ("exception_text", json!("")),
            ("scan_rows", json!("1000")),
        ]);
        let event = QueryEvent::from_row(&row);
        assert_eq!(event.query_duration_ms, Some(42));
        assert_eq!(event.exception_code, Some(0));
        assert_eq!(event.exception_text, None);
        assert_eq!(event.scan_rows, Some(1000));
        assert!(event.kind().is_terminal());
    }

    #[test]
    fn test_event_kinds() {
        assert_eq!(QueryEventKind::parse("End"), QueryEventKind::Finish);
        assert!(!QueryEventKind::parse("Start").is_terminal());
        assert!(QueryEventKind::parse("Aborted").is_terminal());
        assert_eq!(
            QueryEventKind::parse("Queued"),
            QueryEventKind::Other("Queued".into())
        );
    }

    #[test]
    fn test_normalize_timestamp_passthrough() {
        assert_eq!(normalize_timestamp("yesterday"), "yesterday");
        assert_eq!(
            normalize_timestamp("2026-10-19T08:00:00+02:00"),
            "2026-10-19T06:00:00Z"
        );
    }

    #[test]
    fn test_table_shapes_have_no_duplicate_columns() {
        for shape in [&LOG_HISTORY, &QUERY_HISTORY] {
            let mut cols: Vec<_> = shape.columns.to_vec();
            cols.sort();
            cols.dedup();
            assert_eq!(cols.len(), shape.columns.len(), "{}", shape.table);
        }
    }
}
