//! # Combined-Query Executor
//!
//! Count, stats, page and histogram are named sub-queries over the same
//! table, unioned into one tagged result set and executed in a single round
//! trip. All views therefore come from one snapshot. Tables with a duration
//! column add a fifth `duration` section carrying the mean under the
//! aggregate predicate.
//!
//! Every sub-query yields the same column layout:
//!
//! ```text
//! section | bucket | category | cnt | rn | <record columns...>
//! ```
//!
//! Only `page` rows fill the record columns; the rest select `NULL`. The
//! `duration` row ships its mean as text in `category`.

use crate::filter::Precision;
use crate::rows::{as_f64, as_text, as_u64, Row, TableShape};
use crate::sql::{Predicate, SqlParam};
use crate::store::{QueryOutput, QueryStore, StoreError};

pub const SECTION_COUNT: &str = "count";
pub const SECTION_STATS: &str = "stats";
pub const SECTION_PAGE: &str = "page";
pub const SECTION_HISTOGRAM: &str = "histogram";
pub const SECTION_DURATION: &str = "duration";

/// Everything needed to render one combined statement.
#[derive(Debug)]
pub struct CombinedPlan<'a> {
    pub shape: &'static TableShape,
    /// Drives `count` and `page`.
    pub page_predicate: &'a Predicate,
    /// Drives `stats` and `histogram`.
    pub aggregate_predicate: &'a Predicate,
    pub page_size: u32,
    pub offset: u64,
    pub precision: Precision,
}

impl CombinedPlan<'_> {
    /// SQL text plus parameters in placeholder order.
    pub fn render(&self) -> (String, Vec<SqlParam>) {
        let shape = self.shape;
        let nulls = shape
            .columns
            .iter()
            .map(|c| format!("NULL AS {}", c))
            .collect::<Vec<_>>()
            .join(", ");
        let columns = shape.columns.join(", ");
        let page_where = self.page_predicate.sql();
        let agg_where = self.aggregate_predicate.sql();
        let bucket = format!(
            "DATE_TRUNC({}, {})",
            self.precision.sql_unit(),
            shape.time_column
        );

        let count = format!(
            "SELECT '{SECTION_COUNT}' AS section, NULL AS bucket, NULL AS category, \
             COUNT(*) AS cnt, NULL AS rn, {nulls} \
             FROM {table} WHERE {page_where}",
            table = shape.table,
        );
        let stats = format!(
            "SELECT '{SECTION_STATS}' AS section, NULL AS bucket, {cat} AS category, \
             COUNT(*) AS cnt, NULL AS rn, {nulls} \
             FROM {table} WHERE {agg_where} GROUP BY {cat}",
            cat = shape.category_expr,
            table = shape.table,
        );
        let page = format!(
            "SELECT '{SECTION_PAGE}' AS section, NULL AS bucket, NULL AS category, \
             NULL AS cnt, rn, {columns} \
             FROM (SELECT {columns}, ROW_NUMBER() OVER (ORDER BY {order}) AS rn \
             FROM {table} WHERE {page_where}) AS ranked \
             WHERE rn > ? AND rn <= ?",
            order = shape.order_by,
            table = shape.table,
        );
        let histogram = format!(
            "SELECT '{SECTION_HISTOGRAM}' AS section, {bucket} AS bucket, {cat} AS category, \
             COUNT(*) AS cnt, NULL AS rn, {nulls} \
             FROM {table} WHERE {agg_where} GROUP BY {bucket}, {cat}",
            cat = shape.category_expr,
            table = shape.table,
        );

        let mut sections = vec![count, stats, page, histogram];
        if let Some(avg) = shape.avg_duration_expr {
            sections.push(format!(
                "SELECT '{SECTION_DURATION}' AS section, NULL AS bucket, \
                 CAST({avg} AS VARCHAR) AS category, NULL AS cnt, NULL AS rn, {nulls} \
                 FROM {table} WHERE {agg_where}",
                table = shape.table,
            ));
        }
        let sql = sections.join("\nUNION ALL\n");

        let page_params = self.page_predicate.params();
        let agg_params = self.aggregate_predicate.params();
        let mut params = Vec::with_capacity(page_params.len() * 2 + agg_params.len() * 3 + 2);
        params.extend_from_slice(page_params);
        params.extend_from_slice(agg_params);
        params.extend_from_slice(page_params);
        params.push(SqlParam::Int(self.offset as i64));
        params.push(SqlParam::Int(self.offset as i64 + self.page_size as i64));
        params.extend_from_slice(agg_params);
        if shape.avg_duration_expr.is_some() {
            params.extend_from_slice(agg_params);
        }

        (sql, params)
    }
}

/// One `histogram` row: a (bucket, category) pair and its tally.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramRow {
    pub bucket: String,
    pub category: Option<String>,
    pub count: u64,
}

/// The combined result fanned out by section.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaggedRows {
    pub count: u64,
    pub stats: Vec<(Option<String>, u64)>,
    /// Page rows in row-number order.
    pub page: Vec<Row>,
    pub histogram: Vec<HistogramRow>,
    /// Mean duration, only for shapes that ask for it.
    pub avg_duration: Option<f64>,
}

impl TaggedRows {
    /// Demultiplex by the `section` discriminator.
    pub fn demux(output: QueryOutput) -> Result<Self, StoreError> {
        let idx = |name: &str| {
            output
                .column_index(name)
                .ok_or_else(|| StoreError::Decode(format!("missing column '{}'", name)))
        };
        let section_idx = idx("section")?;
        let bucket_idx = idx("bucket")?;
        let category_idx = idx("category")?;
        let cnt_idx = idx("cnt")?;
        let rn_idx = idx("rn")?;

        let mut tagged = TaggedRows::default();
        let mut ranked: Vec<(u64, Row)> = Vec::new();

        for values in &output.rows {
            let cell = |i: usize| values.get(i).filter(|v| !v.is_null());
            let section = cell(section_idx).and_then(as_text).unwrap_or_default();
            let cnt = cell(cnt_idx).and_then(as_u64).unwrap_or(0);

            match section.as_str() {
                SECTION_COUNT => tagged.count = cnt,
                SECTION_STATS => tagged.stats.push((cell(category_idx).and_then(as_text), cnt)),
                SECTION_PAGE => {
                    let rn = cell(rn_idx).and_then(as_u64).unwrap_or(u64::MAX);
                    ranked.push((rn, Row::new(&output.columns, values)));
                }
                SECTION_HISTOGRAM => {
                    let Some(bucket) = cell(bucket_idx).and_then(as_text) else {
                        tracing::debug!("histogram row without bucket skipped");
                        continue;
                    };
                    tagged.histogram.push(HistogramRow {
                        bucket,
                        category: cell(category_idx).and_then(as_text),
                        count: cnt,
                    });
                }
                SECTION_DURATION => {
                    tagged.avg_duration = Some(cell(category_idx).and_then(as_f64).unwrap_or(0.0));
                }
                other => tracing::debug!(section = other, "ignoring unknown section"),
            }
        }

        ranked.sort_by_key(|(rn, _)| *rn);
        tagged.page = ranked.into_iter().map(|(_, row)| row).collect();
        Ok(tagged)
    }
}

/// Run the combined statement once and fan its rows out.
///
/// Any store failure is returned whole; no partial sections are produced.
pub async fn execute(
    store: &dyn QueryStore,
    plan: &CombinedPlan<'_>,
) -> Result<TaggedRows, StoreError> {
    let (sql, params) = plan.render();
    tracing::debug!(
        table = plan.shape.table,
        params = params.len(),
        page_size = plan.page_size,
        offset = plan.offset,
        "executing combined query"
    );
    let output = store.execute(&sql, &params).await?;
    TaggedRows::demux(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{LogFilter, LogLevel, Pagination, QueryFilter, QueryStatus, TimeRange};
    use crate::rows::{LOG_HISTORY, QUERY_HISTORY};
    use crate::sql::{log_aggregate_predicate, log_predicate, query_aggregate_predicate, query_predicate};
    use crate::testing::{FakeStore, TaggedOutput};
    use serde_json::json;

    fn filter() -> LogFilter {
        LogFilter {
            time_range: Some(TimeRange::Hour1),
            level: Some(LogLevel::Error),
            search: Some("oom".into()),
            identifier: None,
            pagination: Pagination::new(Some(2), Some(50)),
        }
    }

    #[test]
    fn test_render_has_four_tagged_sections() {
        let f = filter();
        let page = log_predicate(&f);
        let agg = log_aggregate_predicate(&f);
        let plan = CombinedPlan {
            shape: &LOG_HISTORY,
            page_predicate: &page,
            aggregate_predicate: &agg,
            page_size: 50,
            offset: f.pagination.offset(),
            precision: f.precision(),
        };
        let (sql, params) = plan.render();

        assert_eq!(sql.matches("UNION ALL").count(), 3);
        for section in [SECTION_COUNT, SECTION_STATS, SECTION_PAGE, SECTION_HISTOGRAM] {
            assert!(sql.contains(&format!("'{}' AS section", section)));
        }
        assert!(!sql.contains(&format!("'{}' AS section", SECTION_DURATION)));
        assert!(sql.contains("DATE_TRUNC(MINUTE, timestamp)"));
        assert_eq!(sql.matches('?').count(), params.len());

        // count(search) + stats(search) + page(search, lo, hi) + histogram(search)
        let needle = SqlParam::Text("%oom%".into());
        assert_eq!(
            params,
            vec![
                needle.clone(),
                needle.clone(),
                needle.clone(),
                SqlParam::Int(50),
                SqlParam::Int(100),
                needle,
            ]
        );
    }

    #[test]
    fn test_log_page_order_breaks_timestamp_ties() {
        let f = LogFilter::default();
        let page = log_predicate(&f);
        let plan = CombinedPlan {
            shape: &LOG_HISTORY,
            page_predicate: &page,
            aggregate_predicate: &page,
            page_size: 50,
            offset: 50,
            precision: f.precision(),
        };
        let (sql, _) = plan.render();
        assert!(sql.contains(
            "ROW_NUMBER() OVER (ORDER BY timestamp DESC, node_id, query_id, target, message) AS rn"
        ));
    }

    #[test]
    fn test_query_render_adds_duration_section() {
        let f = QueryFilter {
            status: Some(QueryStatus::Error),
            search: Some("join".into()),
            ..QueryFilter::default()
        };
        let page = query_predicate(&f);
        let agg = query_aggregate_predicate(&f);
        let plan = CombinedPlan {
            shape: &QUERY_HISTORY,
            page_predicate: &page,
            aggregate_predicate: &agg,
            page_size: 50,
            offset: 0,
            precision: f.precision(),
        };
        let (sql, params) = plan.render();

        assert_eq!(sql.matches("UNION ALL").count(), 4);
        assert_eq!(sql.matches('?').count(), params.len());
        assert!(sql.contains(
            "ROW_NUMBER() OVER (ORDER BY query_start_time DESC, query_id, event_time, log_type_name)"
        ));

        let duration = sql.split("\nUNION ALL\n").last().unwrap();
        assert!(duration.starts_with(&format!("SELECT '{}' AS section", SECTION_DURATION)));
        assert!(duration.contains("AVG(CASE WHEN log_type_name IN ('Finish', 'End', 'Error', 'Aborted')"));
        assert!(duration.contains("COALESCE(exception_code, 0) <> 0"));
        assert!(!duration.contains("GROUP BY"));
    }

    #[test]
    fn test_page_and_aggregate_predicates_differ() {
        let f = filter();
        let page = log_predicate(&f);
        let agg = log_aggregate_predicate(&f);
        let plan = CombinedPlan {
            shape: &LOG_HISTORY,
            page_predicate: &page,
            aggregate_predicate: &agg,
            page_size: 50,
            offset: 0,
            precision: f.precision(),
        };
        let (sql, _) = plan.render();
        let sections: Vec<&str> = sql.split("\nUNION ALL\n").collect();
        assert!(sections[0].contains("log_level = 'ERROR'"));
        assert!(!sections[1].contains("log_level = 'ERROR'"));
        assert!(sections[2].contains("log_level = 'ERROR'"));
        assert!(!sections[3].contains("log_level = 'ERROR'"));
    }

    #[test]
    fn test_demux_sorts_page_by_row_number() {
        let output = TaggedOutput::new(&LOG_HISTORY)
            .page(52, [("message", json!("second"))])
            .count(120)
            .stats("ERROR", 120)
            .page(51, [("message", json!("first"))])
            .histogram("2026-10-19 08:00:00", "ERROR", 120)
            .build();

        let tagged = TaggedRows::demux(output).unwrap();
        assert_eq!(tagged.count, 120);
        assert_eq!(tagged.stats, vec![(Some("ERROR".into()), 120)]);
        assert_eq!(tagged.page.len(), 2);
        assert_eq!(tagged.page[0].text("message").as_deref(), Some("first"));
        assert_eq!(tagged.histogram[0].count, 120);
        assert_eq!(tagged.avg_duration, None);
    }

    #[test]
    fn test_demux_reads_duration_from_category() {
        let output = TaggedOutput::new(&QUERY_HISTORY)
            .count(4)
            .stats("success", 4)
            .avg_duration("12.5")
            .build();
        let tagged = TaggedRows::demux(output).unwrap();
        assert_eq!(tagged.avg_duration, Some(12.5));
        assert_eq!(tagged.stats, vec![(Some("success".into()), 4)]);
    }

    #[test]
    fn test_demux_rejects_untagged_output() {
        let output = QueryOutput {
            columns: vec!["x".into()],
            rows: vec![vec![json!(1)]],
        };
        assert!(matches!(
            TaggedRows::demux(output),
            Err(StoreError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn test_execute_makes_one_round_trip() {
        let store = FakeStore::returning(TaggedOutput::new(&LOG_HISTORY).count(3).build());
        let f = LogFilter::default();
        let page = log_predicate(&f);
        let agg = log_aggregate_predicate(&f);
        let plan = CombinedPlan {
            shape: &LOG_HISTORY,
            page_predicate: &page,
            aggregate_predicate: &agg,
            page_size: 50,
            offset: 0,
            precision: f.precision(),
        };
        let tagged = execute(&store, &plan).await.unwrap();
        assert_eq!(tagged.count, 3);
        assert_eq!(store.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_execute_propagates_store_error() {
        let store = FakeStore::failing(StoreError::Execution("boom".into()));
        let f = LogFilter::default();
        let page = log_predicate(&f);
        let plan = CombinedPlan {
            shape: &LOG_HISTORY,
            page_predicate: &page,
            aggregate_predicate: &page,
            page_size: 50,
            offset: 0,
            precision: f.precision(),
        };
        assert!(execute(&store, &plan).await.is_err());
    }
}
