//! # Result Assembler
//!
//! Packages count, stats, page and histogram into the response envelope.
//! Every envelope carries all structural fields, even on failure, so
//! clients never need null checks for them.

use std::collections::BTreeMap;
use std::fmt::Debug;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::combined::HistogramRow;
use crate::filter::{LogLevel, Pagination, QueryStatus, DEFAULT_PAGE_SIZE};
use crate::lifecycle::QueryRecord;
use crate::rows::{normalize_timestamp, LogRecord};

// =============================================================================
// Category tallies
// =============================================================================

/// Fixed set of per-category counters.
pub trait Categories: Debug + Clone + Default + PartialEq + Serialize {
    /// Add `n` to the counter for a store category. Unknown categories are
    /// ignored and reported as `false`.
    fn add(&mut self, category: &str, n: u64) -> bool;

    fn sum(&self) -> u64;

    /// Whether the stats for this tally report a mean duration.
    const TRACKS_DURATION: bool = false;
}

/// Per-level counters for log events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LevelCounts {
    pub error: u64,
    pub warning: u64,
    pub info: u64,
    pub debug: u64,
}

impl Categories for LevelCounts {
    fn add(&mut self, category: &str, n: u64) -> bool {
        let slot = match LogLevel::from_store(category) {
            Some(LogLevel::Error) => &mut self.error,
            Some(LogLevel::Warning) => &mut self.warning,
            Some(LogLevel::Info) => &mut self.info,
            Some(LogLevel::Debug) => &mut self.debug,
            None => return false,
        };
        *slot += n;
        true
    }

    fn sum(&self) -> u64 {
        self.error + self.warning + self.info + self.debug
    }
}

/// Per-outcome counters for query events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub success: u64,
    pub error: u64,
}

impl Categories for StatusCounts {
    const TRACKS_DURATION: bool = true;

    fn add(&mut self, category: &str, n: u64) -> bool {
        match QueryStatus::parse(category) {
            Some(QueryStatus::Success) => self.success += n,
            Some(QueryStatus::Error) => self.error += n,
            None => return false,
        }
        true
    }

    fn sum(&self) -> u64 {
        self.success + self.error
    }
}

/// Stats aggregate. `total` is always the sum of the category counters;
/// `avgDuration` sits beside them and is not part of that sum.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stats<C: Categories> {
    pub total: u64,
    #[serde(flatten)]
    pub counts: C,
    #[serde(rename = "avgDuration", skip_serializing_if = "Option::is_none")]
    pub avg_duration: Option<f64>,
}

impl<C: Categories> Default for Stats<C> {
    fn default() -> Self {
        Self {
            total: 0,
            counts: C::default(),
            avg_duration: C::TRACKS_DURATION.then_some(0.0),
        }
    }
}

impl<C: Categories> Stats<C> {
    pub fn from_rows(rows: &[(Option<String>, u64)]) -> Self {
        let mut counts = C::default();
        for (category, n) in rows {
            let known = category.as_deref().is_some_and(|c| counts.add(c, *n));
            if !known {
                tracing::debug!(?category, count = n, "uncategorized rows left out of stats");
            }
        }
        Self {
            total: counts.sum(),
            counts,
            ..Self::default()
        }
    }

    /// Attach the mean duration in milliseconds, rounded to two decimals.
    /// Ignored for tallies that do not report one.
    pub fn with_avg_duration(mut self, avg: Option<f64>) -> Self {
        if C::TRACKS_DURATION {
            let avg = avg.filter(|v| v.is_finite()).unwrap_or(0.0);
            self.avg_duration = Some((avg * 100.0).round() / 100.0);
        }
        self
    }
}

/// One histogram bar.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeBucket<C: Categories> {
    pub time_bucket: String,
    #[serde(flatten)]
    pub counts: C,
    pub total: u64,
}

/// Fold (bucket, category) rows into ascending, sparse buckets.
///
/// Buckets without matching rows are absent rather than zero-filled.
pub fn histogram<C: Categories>(rows: &[HistogramRow]) -> Vec<TimeBucket<C>> {
    let mut buckets: BTreeMap<String, C> = BTreeMap::new();
    for row in rows {
        let counts = buckets.entry(normalize_timestamp(&row.bucket)).or_default();
        if let Some(category) = &row.category {
            counts.add(category, row.count);
        }
    }
    buckets
        .into_iter()
        .filter_map(|(time_bucket, counts)| {
            let total = counts.sum();
            (total > 0).then_some(TimeBucket {
                time_bucket,
                counts,
                total,
            })
        })
        .collect()
}

// =============================================================================
// Envelope
// =============================================================================

/// Binds a record type to its category tally and JSON key.
pub trait RecordKind {
    const KEY: &'static str;
    type Record: Debug + Clone + PartialEq + Serialize;
    type Counts: Categories;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Logs {}

impl RecordKind for Logs {
    const KEY: &'static str = "logs";
    type Record = LogRecord;
    type Counts = LevelCounts;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Queries {}

impl RecordKind for Queries {
    const KEY: &'static str = "queries";
    type Record = QueryRecord;
    type Counts = StatusCounts;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<K: RecordKind> {
    pub records: Vec<K::Record>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u64,
    pub stats: Stats<K::Counts>,
    pub time_distribution: Vec<TimeBucket<K::Counts>>,
    pub error: Option<String>,
}

pub type LogEnvelope = Envelope<Logs>;
pub type QueryEnvelope = Envelope<Queries>;

/// `ceil(count / page_size)`; a zero page size counts as the default.
pub fn total_pages(count: u64, page_size: u32) -> u64 {
    let size = if page_size == 0 {
        DEFAULT_PAGE_SIZE
    } else {
        page_size
    };
    count.div_ceil(size as u64)
}

/// Build the envelope from demultiplexed parts.
pub fn assemble<K: RecordKind>(
    records: Vec<K::Record>,
    stats: Stats<K::Counts>,
    count: u64,
    time_distribution: Vec<TimeBucket<K::Counts>>,
    pagination: Pagination,
) -> Envelope<K> {
    Envelope {
        records,
        total: count,
        page: pagination.page,
        page_size: pagination.page_size,
        total_pages: total_pages(count, pagination.page_size),
        stats,
        time_distribution,
        error: None,
    }
}

impl<K: RecordKind> Envelope<K> {
    /// Zero-valued envelope carrying an error indicator.
    pub fn empty(pagination: Pagination, error: impl Into<String>) -> Self {
        Self {
            records: Vec::new(),
            total: 0,
            page: pagination.page,
            page_size: pagination.page_size,
            total_pages: 0,
            stats: Stats::default(),
            time_distribution: Vec::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

impl<K: RecordKind> Serialize for Envelope<K> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = if self.error.is_some() { 8 } else { 7 };
        let mut map = serializer.serialize_map(Some(len))?;
        map.serialize_entry(K::KEY, &self.records)?;
        map.serialize_entry("total", &self.total)?;
        map.serialize_entry("page", &self.page)?;
        map.serialize_entry("pageSize", &self.page_size)?;
        map.serialize_entry("totalPages", &self.total_pages)?;
        map.serialize_entry("stats", &self.stats)?;
        map.serialize_entry("timeDistribution", &self.time_distribution)?;
        if let Some(error) = &self.error {
            map.serialize_entry("error", error)?;
        }
        map.end()
    }
}
