//! # Filter Specification
//!
//! Validated, immutable per-request search and pagination parameters.
//!
//! The wire form ([`FilterRequest`]) accepts any JSON for every field and is
//! normalized into [`LogFilter`] / [`QueryFilter`]. Normalization never
//! fails: unknown enum values are dropped, bad pagination falls back to
//! defaults.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 200;

// =============================================================================
// Enumerations
// =============================================================================

/// Relative look-back window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeRange {
    #[serde(rename = "1m")]
    Min1,
    #[serde(rename = "5m")]
    Min5,
    #[serde(rename = "15m")]
    Min15,
    #[serde(rename = "30m")]
    Min30,
    #[serde(rename = "1h")]
    Hour1,
    #[serde(rename = "3h")]
    Hour3,
    #[serde(rename = "6h")]
    Hour6,
    #[serde(rename = "12h")]
    Hour12,
    #[serde(rename = "24h")]
    Hour24,
    #[serde(rename = "2d")]
    Day2,
}

impl TimeRange {
    pub const ALL: [TimeRange; 10] = [
        Self::Min1,
        Self::Min5,
        Self::Min15,
        Self::Min30,
        Self::Hour1,
        Self::Hour3,
        Self::Hour6,
        Self::Hour12,
        Self::Hour24,
        Self::Day2,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.as_str() == raw)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Min1 => "1m",
            Self::Min5 => "5m",
            Self::Min15 => "15m",
            Self::Min30 => "30m",
            Self::Hour1 => "1h",
            Self::Hour3 => "3h",
            Self::Hour6 => "6h",
            Self::Hour12 => "12h",
            Self::Hour24 => "24h",
            Self::Day2 => "2d",
        }
    }

    /// SQL interval literal. Only ever produced from this fixed table.
    pub fn interval_literal(self) -> &'static str {
        match self {
            Self::Min1 => "INTERVAL 1 MINUTE",
            Self::Min5 => "INTERVAL 5 MINUTE",
            Self::Min15 => "INTERVAL 15 MINUTE",
            Self::Min30 => "INTERVAL 30 MINUTE",
            Self::Hour1 => "INTERVAL 1 HOUR",
            Self::Hour3 => "INTERVAL 3 HOUR",
            Self::Hour6 => "INTERVAL 6 HOUR",
            Self::Hour12 => "INTERVAL 12 HOUR",
            Self::Hour24 => "INTERVAL 24 HOUR",
            Self::Day2 => "INTERVAL 2 DAY",
        }
    }

    pub fn precision(self) -> Precision {
        match self {
            Self::Min1 => Precision::Second,
            Self::Min5 | Self::Min15 | Self::Min30 | Self::Hour1 | Self::Hour3 => {
                Precision::Minute
            }
            Self::Hour6 | Self::Hour12 | Self::Hour24 | Self::Day2 => Precision::Hour,
        }
    }
}

/// Truncation granularity for histogram buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    Second,
    Minute,
    Hour,
}

impl Precision {
    pub fn sql_unit(self) -> &'static str {
        match self {
            Self::Second => "SECOND",
            Self::Minute => "MINUTE",
            Self::Hour => "HOUR",
        }
    }
}

/// Log severity as exposed to dashboard clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Debug,
}

impl LogLevel {
    pub const ALL: [LogLevel; 4] = [Self::Error, Self::Warning, Self::Info, Self::Debug];

    /// Case-insensitive; accepts both client names and store literals.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "error" => Some(Self::Error),
            "warning" | "warn" => Some(Self::Warning),
            "info" => Some(Self::Info),
            "debug" => Some(Self::Debug),
            _ => None,
        }
    }

    /// Literal stored in `log_history.log_level`.
    pub fn store_literal(self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warning => "WARN",
            Self::Info => "INFO",
            Self::Debug => "DEBUG",
        }
    }

    /// Strict inverse of [`LogLevel::store_literal`].
    pub fn from_store(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.store_literal() == raw)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }
}

/// Query outcome derived from `exception_code`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Success,
    Error,
}

impl QueryStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "success" => Some(Self::Success),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Nonzero exception code means error; absent means success.
    pub fn from_exception_code(code: Option<i64>) -> Self {
        match code {
            Some(c) if c != 0 => Self::Error,
            _ => Self::Success,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

// =============================================================================
// Pagination
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub page_size: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl Pagination {
    pub fn new(page: Option<i64>, page_size: Option<i64>) -> Self {
        let page = match page {
            Some(p) if p >= 1 => p.min(u32::MAX as i64) as u32,
            _ => 1,
        };
        let page_size = match page_size {
            Some(s) if s >= 1 => s.min(MAX_PAGE_SIZE as i64) as u32,
            _ => DEFAULT_PAGE_SIZE,
        };
        Self { page, page_size }
    }

    /// Number of rows that precede this page.
    pub fn offset(&self) -> u64 {
        (self.page as u64 - 1) * self.page_size as u64
    }
}

// =============================================================================
// Normalized filters
// =============================================================================

/// Filter over `log_history`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct LogFilter {
    pub time_range: Option<TimeRange>,
    pub level: Option<LogLevel>,
    /// Exact `query_id`; supersedes `time_range` and `search`.
    pub identifier: Option<String>,
    pub search: Option<String>,
    pub pagination: Pagination,
}

impl LogFilter {
    pub fn precision(&self) -> Precision {
        bucket_precision(self.identifier.is_some(), self.time_range)
    }
}

/// Filter over `query_history`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct QueryFilter {
    pub time_range: Option<TimeRange>,
    pub status: Option<QueryStatus>,
    pub identifier: Option<String>,
    pub search: Option<String>,
    pub database: Option<String>,
    pub user: Option<String>,
    pub pagination: Pagination,
}

impl QueryFilter {
    pub fn precision(&self) -> Precision {
        bucket_precision(self.identifier.is_some(), self.time_range)
    }
}

fn bucket_precision(has_identifier: bool, range: Option<TimeRange>) -> Precision {
    if has_identifier {
        return Precision::Hour;
    }
    range.map(TimeRange::precision).unwrap_or(Precision::Hour)
}

// =============================================================================
// Wire form
// =============================================================================

/// Request body as posted by dashboard clients.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Value>,
    #[serde(default, alias = "identifier", skip_serializing_if = "Option::is_none")]
    pub query_id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<Value>,
}

impl FilterRequest {
    pub fn to_log_filter(&self) -> LogFilter {
        LogFilter {
            time_range: text(&self.time_range).and_then(|s| TimeRange::parse(&s)),
            level: text(&self.level).and_then(|s| LogLevel::parse(&s)),
            identifier: text(&self.query_id),
            search: search_text(&self.search),
            pagination: self.pagination(),
        }
    }

    pub fn to_query_filter(&self) -> QueryFilter {
        QueryFilter {
            time_range: text(&self.time_range).and_then(|s| TimeRange::parse(&s)),
            status: text(&self.status).and_then(|s| QueryStatus::parse(&s)),
            identifier: text(&self.query_id),
            search: search_text(&self.search),
            database: text(&self.database),
            user: text(&self.user),
            pagination: self.pagination(),
        }
    }

    fn pagination(&self) -> Pagination {
        Pagination::new(integer(&self.page), integer(&self.page_size))
    }
}

fn text(value: &Option<Value>) -> Option<String> {
    let raw = match value.as_ref()? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!raw.is_empty()).then_some(raw)
}

/// Search needles keep their surrounding whitespace; blank ones are absent.
fn search_text(value: &Option<Value>) -> Option<String> {
    match value.as_ref()? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn integer(value: &Option<Value>) -> Option<i64> {
    match value.as_ref()? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(body: Value) -> FilterRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_time_range_round_trips_through_str() {
        for range in TimeRange::ALL {
            assert_eq!(TimeRange::parse(range.as_str()), Some(range));
        }
        assert_eq!(TimeRange::parse("7w"), None);
    }

    #[test]
    fn test_precision_by_window() {
        assert_eq!(TimeRange::Min1.precision(), Precision::Second);
        assert_eq!(TimeRange::Hour1.precision(), Precision::Minute);
        assert_eq!(TimeRange::Day2.precision(), Precision::Hour);
    }

    #[test]
    fn test_identifier_lookup_uses_hour_buckets() {
        let filter = request(json!({"timeRange": "1m", "queryId": "q-1"})).to_log_filter();
        assert_eq!(filter.precision(), Precision::Hour);
        let filter = request(json!({"timeRange": "1m"})).to_log_filter();
        assert_eq!(filter.precision(), Precision::Second);
    }

    #[test]
    fn test_unknown_enums_are_dropped() {
        let filter = request(json!({"timeRange": "forever", "level": "fatal"})).to_log_filter();
        assert_eq!(filter.time_range, None);
        assert_eq!(filter.level, None);
    }

    #[test]
    fn test_level_accepts_store_literal() {
        assert_eq!(LogLevel::parse("WARN"), Some(LogLevel::Warning));
        assert_eq!(LogLevel::from_store("WARN"), Some(LogLevel::Warning));
        assert_eq!(LogLevel::from_store("warning"), None);
    }

    #[test]
    fn test_pagination_normalization() {
        let p = request(json!({"page": -3, "pageSize": 1000})).to_log_filter().pagination;
        assert_eq!(p, Pagination { page: 1, page_size: MAX_PAGE_SIZE });

        let p = request(json!({"page": "2", "pageSize": 0})).to_log_filter().pagination;
        assert_eq!(p, Pagination { page: 2, page_size: DEFAULT_PAGE_SIZE });

        let p = request(json!({"page": true, "pageSize": "abc"})).to_query_filter().pagination;
        assert_eq!(p, Pagination::default());
    }

    #[test]
    fn test_offset() {
        assert_eq!(Pagination::new(Some(2), Some(50)).offset(), 50);
        assert_eq!(Pagination::new(Some(1), Some(50)).offset(), 0);
    }

    #[test]
    fn test_blank_strings_are_absent() {
        let filter = request(json!({"search": "   ", "identifier": " q-9 "})).to_log_filter();
        assert_eq!(filter.search, None);
        assert_eq!(filter.identifier.as_deref(), Some("q-9"));
    }

    #[test]
    fn test_search_keeps_surrounding_spaces() {
        let req = request(json!({"search": " error ", "user": " root "}));
        assert_eq!(req.to_log_filter().search.as_deref(), Some(" error "));
        let filter = req.to_query_filter();
        assert_eq!(filter.search.as_deref(), Some(" error "));
        assert_eq!(filter.user.as_deref(), Some("root"));
    }

    #[test]
    fn test_query_filter_dimensions() {
        let filter = request(json!({
            "status": "ERROR",
            "database": "default",
            "user": "root",
            "timeRange": "24h"
        }))
        .to_query_filter();
        assert_eq!(filter.status, Some(QueryStatus::Error));
        assert_eq!(filter.database.as_deref(), Some("default"));
        assert_eq!(filter.user.as_deref(), Some("root"));
        assert_eq!(filter.time_range, Some(TimeRange::Hour24));
    }

    #[test]
    fn test_status_from_exception_code() {
        assert_eq!(QueryStatus::from_exception_code(None), QueryStatus::Success);
        assert_eq!(QueryStatus::from_exception_code(Some(0)), QueryStatus::Success);
        assert_eq!(QueryStatus::from_exception_code(Some(1025)), QueryStatus::Error);
    }
}
