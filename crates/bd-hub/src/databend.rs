//! # Databend HTTP Store
//!
//! [`QueryStore`] over the Databend HTTP query API. A statement is posted to
//! `/v1/query`; the server answers with a first page and a `next_uri` to
//! poll until the result is drained.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use bd_core::sql::{bind_inline, SqlParam};
use bd_core::{QueryOutput, QueryStore, StoreError};

use crate::dsn::Dsn;

const QUERY_PATH: &str = "/v1/query";
const QUERY_ID_HEADER: &str = "X-DATABEND-QUERY-ID";

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    schema: Vec<SchemaField>,
    #[serde(default)]
    data: Vec<Vec<Value>>,
    #[serde(default)]
    error: Option<ApiError>,
    #[serde(default)]
    next_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SchemaField {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

/// Shared, pooled handle. Cloning is cheap and every clone reuses the
/// same connection pool.
#[derive(Clone)]
pub struct DatabendStore {
    client: reqwest::Client,
    base_url: String,
    user: String,
    password: String,
    database: String,
    request_timeout: Duration,
}

impl DatabendStore {
    pub fn connect(
        dsn: &Dsn,
        default_database: &str,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            base_url: dsn.base_url(),
            user: dsn.user.clone(),
            password: dsn.password.clone(),
            database: dsn
                .database
                .clone()
                .unwrap_or_else(|| default_database.to_string()),
            request_timeout,
        })
    }

    fn map_send_error(&self, e: reqwest::Error) -> StoreError {
        if e.is_timeout() {
            StoreError::Timeout {
                elapsed_ms: self.request_timeout.as_millis() as u64,
            }
        } else {
            StoreError::Connection(e.to_string())
        }
    }

    async fn read_page(&self, request: reqwest::RequestBuilder) -> Result<QueryResponse, StoreError> {
        let response = request
            .basic_auth(&self.user, Some(&self.password))
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.map_send_error(e))?;

        let page: QueryResponse = match serde_json::from_str(&body) {
            Ok(page) => page,
            Err(_) if !status.is_success() => {
                return Err(StoreError::Execution(format!("HTTP {}: {}", status, body.trim())))
            }
            Err(e) => return Err(StoreError::Decode(e.to_string())),
        };

        if let Some(err) = &page.error {
            return Err(StoreError::Execution(format!("[{}] {}", err.code, err.message)));
        }
        if !status.is_success() {
            return Err(StoreError::Execution(format!("HTTP {}", status)));
        }
        Ok(page)
    }
}

#[async_trait]
impl QueryStore for DatabendStore {
    async fn execute(&self, sql: &str, params: &[SqlParam]) -> Result<QueryOutput, StoreError> {
        let statement = bind_inline(sql, params)?;
        let query_id = uuid::Uuid::new_v4().simple().to_string();
        tracing::debug!(%query_id, database = %self.database, "submitting statement");

        let first = self
            .client
            .post(format!("{}{}", self.base_url, QUERY_PATH))
            .header(QUERY_ID_HEADER, &query_id)
            .json(&json!({
                "sql": statement,
                "session": { "database": self.database },
            }));
        let mut page = self.read_page(first).await?;

        let mut output = QueryOutput {
            columns: page.schema.iter().map(|f| f.name.clone()).collect(),
            rows: std::mem::take(&mut page.data),
        };

        while let Some(next) = page.next_uri.take() {
            let request = self.client.get(format!("{}{}", self.base_url, next));
            page = self.read_page(request).await?;
            if output.columns.is_empty() {
                output.columns = page.schema.iter().map(|f| f.name.clone()).collect();
            }
            output.rows.append(&mut page.data);
        }

        tracing::debug!(%query_id, rows = output.rows.len(), "statement drained");
        Ok(output)
    }

    fn database(&self) -> &str {
        &self.database
    }
}
