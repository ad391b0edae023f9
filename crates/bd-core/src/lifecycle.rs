//! # Lifecycle Reconciler
//!
//! A query shows up in `query_history` once per lifecycle event (start,
//! finish, error...). This module folds the rows of a page window into one
//! [`QueryRecord`] per `query_id`.

use std::collections::HashMap;

use serde::Serialize;

use crate::filter::QueryStatus;
use crate::rows::QueryEvent;

/// One logical query, merged from its lifecycle events.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryRecord {
    #[serde(flatten)]
    pub event: QueryEvent,
    pub status: QueryStatus,
}

impl QueryRecord {
    fn seed(event: QueryEvent) -> Self {
        let status = QueryStatus::from_exception_code(event.exception_code);
        Self { event, status }
    }

    /// Take duration and outcome from a terminal event.
    fn finalize(&mut self, terminal: &QueryEvent) {
        self.event.query_duration_ms = terminal.query_duration_ms;
        self.event.exception_code = terminal.exception_code;
        self.event.exception_text = terminal.exception_text.clone();
        self.status = QueryStatus::from_exception_code(terminal.exception_code);
    }
}

/// Collapse raw events into canonical records.
///
/// Output keeps first-seen order of identifiers with no duplicates. A later
/// terminal event overwrites duration and outcome; with several terminal
/// events the last one processed wins. Events without an identifier can
/// not be merged and each become their own record.
pub fn reconcile(events: Vec<QueryEvent>) -> Vec<QueryRecord> {
    let mut records: Vec<QueryRecord> = Vec::with_capacity(events.len());
    let mut by_id: HashMap<String, usize> = HashMap::new();

    for event in events {
        let terminal = event.kind().is_terminal();
        let existing = event.query_id.as_ref().and_then(|id| by_id.get(id).copied());

        match existing {
            Some(idx) => {
                if terminal {
                    records[idx].finalize(&event);
                }
            }
            None => {
                if let Some(id) = &event.query_id {
                    by_id.insert(id.clone(), records.len());
                }
                records.push(QueryRecord::seed(event));
            }
        }
    }

    records
}
