//! # Query Builder
//!
//! Translates a normalized filter into a [`Predicate`]: a list of typed
//! clauses plus the ordered parameters their `?` placeholders bind to.
//!
//! Only two kinds of text ever reach the SQL string: column names and
//! literals from the fixed tables in [`crate::filter`] (intervals, level
//! names). Every caller-supplied string travels as a [`SqlParam`].

use serde::Serialize;

use crate::filter::{LogFilter, QueryFilter, QueryStatus, TimeRange};
use crate::store::StoreError;

/// A value bound to a `?` placeholder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum SqlParam {
    Text(String),
    Int(i64),
}

impl SqlParam {
    /// Quoted SQL literal for drivers that bind client-side.
    pub fn to_literal(&self) -> String {
        match self {
            Self::Int(n) => n.to_string(),
            Self::Text(s) => {
                let mut out = String::with_capacity(s.len() + 2);
                out.push('\'');
                for ch in s.chars() {
                    match ch {
                        '\\' => out.push_str("\\\\"),
                        '\'' => out.push_str("\\'"),
                        other => out.push(other),
                    }
                }
                out.push('\'');
                out
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Clause {
    /// `column >= NOW() - INTERVAL ...`
    Since {
        column: &'static str,
        range: TimeRange,
    },
    /// `column = '<allow-listed literal>'`
    EqLiteral {
        column: &'static str,
        literal: &'static str,
    },
    /// `column = ?`
    Eq { column: &'static str },
    /// `column LIKE ?`
    Like { column: &'static str },
    /// Fixed text without user input.
    Static(&'static str),
}

impl Clause {
    fn render(&self) -> String {
        match self {
            Self::Since { column, range } => {
                format!("{} >= NOW() - {}", column, range.interval_literal())
            }
            Self::EqLiteral { column, literal } => format!("{} = '{}'", column, literal),
            Self::Eq { column } => format!("{} = ?", column),
            Self::Like { column } => format!("{} LIKE ?", column),
            Self::Static(text) => (*text).to_string(),
        }
    }
}

/// Conjunction of clauses with their bound parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Predicate {
    clauses: Vec<Clause>,
    params: Vec<SqlParam>,
}

impl Predicate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn since(mut self, column: &'static str, range: TimeRange) -> Self {
        self.clauses.push(Clause::Since { column, range });
        self
    }

    pub fn eq_literal(mut self, column: &'static str, literal: &'static str) -> Self {
        self.clauses.push(Clause::EqLiteral { column, literal });
        self
    }

    pub fn eq(mut self, column: &'static str, value: &str) -> Self {
        self.clauses.push(Clause::Eq { column });
        self.params.push(SqlParam::Text(value.to_string()));
        self
    }

    /// Substring match; the needle is wrapped in `%` and bound.
    pub fn contains(mut self, column: &'static str, needle: &str) -> Self {
        self.clauses.push(Clause::Like { column });
        self.params.push(SqlParam::Text(format!("%{}%", needle)));
        self
    }

    pub fn raw(mut self, text: &'static str) -> Self {
        self.clauses.push(Clause::Static(text));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// WHERE body (without the keyword). Empty predicates match everything.
    pub fn sql(&self) -> String {
        if self.clauses.is_empty() {
            return "1 = 1".to_string();
        }
        self.clauses
            .iter()
            .map(Clause::render)
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    pub fn params(&self) -> &[SqlParam] {
        &self.params
    }
}

// =============================================================================
// log_history
// =============================================================================

/// Page predicate for log events.
///
/// An identifier lookup ignores recency and free text; the level filter
/// applies either way.
pub fn log_predicate(filter: &LogFilter) -> Predicate {
    let p = log_base(filter);
    match filter.level {
        Some(level) => p.eq_literal("log_level", level.store_literal()),
        None => p,
    }
}

/// Stats/histogram predicate for log events: the page predicate minus the
/// level filter, so per-level stats cover every level.
pub fn log_aggregate_predicate(filter: &LogFilter) -> Predicate {
    log_base(filter)
}

fn log_base(filter: &LogFilter) -> Predicate {
    let mut p = Predicate::new();
    if let Some(id) = &filter.identifier {
        return p.eq("query_id", id);
    }
    if let Some(range) = filter.time_range {
        p = p.since("timestamp", range);
    }
    if let Some(search) = &filter.search {
        p = p.contains("message", search);
    }
    p
}

// =============================================================================
// query_history
// =============================================================================

/// Predicate for query lifecycle events. All dimensions combine.
pub fn query_predicate(filter: &QueryFilter) -> Predicate {
    let mut p = Predicate::new();
    if let Some(range) = filter.time_range {
        p = p.since("event_time", range);
    }
    p = match filter.status {
        Some(QueryStatus::Success) => p.raw("COALESCE(exception_code, 0) = 0"),
        Some(QueryStatus::Error) => p.raw("COALESCE(exception_code, 0) <> 0"),
        None => p,
    };
    if let Some(id) = &filter.identifier {
        p = p.eq("query_id", id);
    }
    if let Some(search) = &filter.search {
        p = p.contains("query_text", search);
    }
    if let Some(db) = &filter.database {
        p = p.eq("current_database", db);
    }
    if let Some(user) = &filter.user {
        p = p.eq("sql_user", user);
    }
    p
}

/// Query history aggregates reuse the page predicate unchanged, status
/// filter included (unlike log events).
pub fn query_aggregate_predicate(filter: &QueryFilter) -> Predicate {
    query_predicate(filter)
}

// =============================================================================
// Client-side binding
// =============================================================================

/// Substitute `?` placeholders outside string literals with quoted params.
pub fn bind_inline(sql: &str, params: &[SqlParam]) -> Result<String, StoreError> {
    let mut out = String::with_capacity(sql.len() + params.len() * 8);
    let mut next = params.iter();
    let mut in_string = false;
    let mut chars = sql.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '\\' if in_string => {
                out.push(ch);
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            }
            '\'' => {
                // '' inside a literal is an escaped quote
                if in_string && chars.peek() == Some(&'\'') {
                    out.push(ch);
                    out.push(chars.next().unwrap_or('\''));
                } else {
                    in_string = !in_string;
                    out.push(ch);
                }
            }
            '?' if !in_string => {
                let param = next.next().ok_or_else(|| {
                    StoreError::Execution("more placeholders than parameters".into())
                })?;
                out.push_str(&param.to_literal());
            }
            other => out.push(other),
        }
    }

    if next.next().is_some() {
        return Err(StoreError::Execution(
            "more parameters than placeholders".into(),
        ));
    }
    Ok(out)
}
