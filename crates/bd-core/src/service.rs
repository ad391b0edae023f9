//! # Inbound Operations
//!
//! `list_logs`, `list_queries` and `get_metrics`. Each performs at most one
//! store round trip under a bounded timeout and never fails: errors collapse
//! into the zero-valued response with its `error` field set.

use std::time::{Duration, Instant};

use crate::combined::{self, CombinedPlan};
use crate::envelope::{self, histogram, LogEnvelope, Logs, Queries, QueryEnvelope, Stats};
use crate::filter::{LogFilter, QueryFilter};
use crate::lifecycle::reconcile;
use crate::metrics::{self, Metrics};
use crate::rows::{LogRecord, QueryEvent, LOG_HISTORY, QUERY_HISTORY};
use crate::sql;
use crate::store::{with_timeout, QueryStore, StoreError};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Page of log events with stats and histogram.
pub async fn list_logs(
    store: Option<&dyn QueryStore>,
    filter: &LogFilter,
    budget: Duration,
) -> LogEnvelope {
    let started = Instant::now();
    let Some(store) = store else {
        return LogEnvelope::empty(filter.pagination, StoreError::NotConfigured.to_string());
    };

    match with_timeout(budget, fetch_logs(store, filter)).await {
        Ok(env) => {
            tracing::info!(
                total = env.total,
                returned = env.records.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "listed logs"
            );
            env
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "log listing failed"
            );
            LogEnvelope::empty(filter.pagination, e.to_string())
        }
    }
}

async fn fetch_logs(store: &dyn QueryStore, filter: &LogFilter) -> Result<LogEnvelope, StoreError> {
    let page_predicate = sql::log_predicate(filter);
    let aggregate_predicate = sql::log_aggregate_predicate(filter);
    let plan = CombinedPlan {
        shape: &LOG_HISTORY,
        page_predicate: &page_predicate,
        aggregate_predicate: &aggregate_predicate,
        page_size: filter.pagination.page_size,
        offset: filter.pagination.offset(),
        precision: filter.precision(),
    };

    let tagged = combined::execute(store, &plan).await?;
    let records = tagged.page.iter().map(LogRecord::from_row).collect();

    Ok(envelope::assemble::<Logs>(
        records,
        Stats::from_rows(&tagged.stats),
        tagged.count,
        histogram(&tagged.histogram),
        filter.pagination,
    ))
}

/// Page of reconciled query records with stats and histogram.
pub async fn list_queries(
    store: Option<&dyn QueryStore>,
    filter: &QueryFilter,
    budget: Duration,
) -> QueryEnvelope {
    let started = Instant::now();
    let Some(store) = store else {
        return QueryEnvelope::empty(filter.pagination, StoreError::NotConfigured.to_string());
    };

    match with_timeout(budget, fetch_queries(store, filter)).await {
        Ok(env) => {
            tracing::info!(
                total = env.total,
                returned = env.records.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "listed queries"
            );
            env
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "query listing failed"
            );
            QueryEnvelope::empty(filter.pagination, e.to_string())
        }
    }
}

async fn fetch_queries(
    store: &dyn QueryStore,
    filter: &QueryFilter,
) -> Result<QueryEnvelope, StoreError> {
    let page_predicate = sql::query_predicate(filter);
    let aggregate_predicate = sql::query_aggregate_predicate(filter);
    let plan = CombinedPlan {
        shape: &QUERY_HISTORY,
        page_predicate: &page_predicate,
        aggregate_predicate: &aggregate_predicate,
        page_size: filter.pagination.page_size,
        offset: filter.pagination.offset(),
        precision: filter.precision(),
    };

    let tagged = combined::execute(store, &plan).await?;
    let events = tagged.page.iter().map(QueryEvent::from_row).collect();

    Ok(envelope::assemble::<Queries>(
        reconcile(events),
        Stats::from_rows(&tagged.stats).with_avg_duration(tagged.avg_duration),
        tagged.count,
        histogram(&tagged.histogram),
        filter.pagination,
    ))
}

/// Last-24h dashboard roll-up.
pub async fn get_metrics(store: Option<&dyn QueryStore>, budget: Duration) -> Metrics {
    let Some(store) = store else {
        return Metrics::empty(StoreError::NotConfigured.to_string());
    };

    let (sql, params) = metrics::render();
    let result = with_timeout(budget, async {
        let output = store.execute(&sql, &params).await?;
        metrics::decode(&output)
    })
    .await;

    match result {
        Ok(m) => {
            tracing::debug!(total_logs = m.total_logs, "computed metrics");
            m
        }
        Err(e) => {
            tracing::warn!(error = %e, "metrics roll-up failed");
            Metrics::empty(e.to_string())
        }
    }
}
