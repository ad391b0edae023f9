//! In-memory store doubles for unit tests.

use std::sync::Mutex;
use std::time::Duration;

use serde_json::{json, Value};

use crate::rows::TableShape;
use crate::sql::SqlParam;
use crate::store::{QueryOutput, QueryStore, StoreError};

/// Returns a canned result and records every statement it receives.
pub struct FakeStore {
    result: Result<QueryOutput, StoreError>,
    delay: Option<Duration>,
    calls: Mutex<Vec<(String, Vec<SqlParam>)>>,
}

impl FakeStore {
    pub fn returning(output: QueryOutput) -> Self {
        Self {
            result: Ok(output),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(err: StoreError) -> Self {
        Self {
            result: Err(err),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<(String, Vec<SqlParam>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl QueryStore for FakeStore {
    async fn execute(&self, sql: &str, params: &[SqlParam]) -> Result<QueryOutput, StoreError> {
        self.calls
            .lock()
            .unwrap()
            .push((sql.to_string(), params.to_vec()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.result.clone()
    }

    fn database(&self) -> &str {
        "system_history"
    }
}

/// Builds a tagged combined-query result for a table shape.
pub struct TaggedOutput {
    shape: &'static TableShape,
    rows: Vec<Vec<Value>>,
}

impl TaggedOutput {
    pub fn new(shape: &'static TableShape) -> Self {
        Self {
            shape,
            rows: Vec::new(),
        }
    }

    fn push(
        mut self,
        section: &str,
        bucket: Value,
        category: Value,
        cnt: Value,
        rn: Value,
        record: &[(&str, Value)],
    ) -> Self {
        let mut row = vec![json!(section), bucket, category, cnt, rn];
        for col in self.shape.columns {
            let value = record
                .iter()
                .find(|(name, _)| name == col)
                .map(|(_, v)| v.clone())
                .unwrap_or(Value::Null);
            row.push(value);
        }
        self.rows.push(row);
        self
    }

    pub fn count(self, n: u64) -> Self {
        // Databend ships numbers as strings
        self.push("count", Value::Null, Value::Null, json!(n.to_string()), Value::Null, &[])
    }

    pub fn stats(self, category: &str, n: u64) -> Self {
        self.push("stats", Value::Null, json!(category), json!(n.to_string()), Value::Null, &[])
    }

    pub fn page<const N: usize>(self, rn: u64, record: [(&str, Value); N]) -> Self {
        self.push("page", Value::Null, Value::Null, Value::Null, json!(rn.to_string()), &record)
    }

    pub fn histogram(self, bucket: &str, category: &str, n: u64) -> Self {
        self.push(
            "histogram",
            json!(bucket),
            json!(category),
            json!(n.to_string()),
            Value::Null,
            &[],
        )
    }

    pub fn avg_duration(self, mean: &str) -> Self {
        self.push("duration", Value::Null, json!(mean), Value::Null, Value::Null, &[])
    }

    pub fn build(self) -> QueryOutput {
        let mut columns: Vec<String> = ["section", "bucket", "category", "cnt", "rn"]
            .iter()
            .map(|c| c.to_string())
            .collect();
        columns.extend(self.shape.columns.iter().map(|c| c.to_string()));
        QueryOutput {
            columns,
            rows: self.rows,
        }
    }
}
