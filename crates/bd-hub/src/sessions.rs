//! # Session Registry
//!
//! Maps a caller's session key to its configured store handle and the
//! connection status shown in the UI. Handles are created once per
//! `configure` and shared by every request of that session.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::RwLock;

use bd_core::store::with_timeout;
use bd_core::QueryStore;

use crate::databend::DatabendStore;
use crate::dsn::{mask_dsn, Dsn};

pub const DEFAULT_SESSION: &str = "default";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub connected: bool,
    pub error: Option<String>,
    pub dsn_masked: Option<String>,
    pub database: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Clone, Default)]
pub struct Session {
    pub store: Option<Arc<dyn QueryStore>>,
    pub status: ConnectionStatus,
}

/// Knobs applied to every store a session configures.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub default_database: String,
    pub connect_timeout: Duration,
    pub query_timeout: Duration,
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
    settings: StoreSettings,
}

impl SessionRegistry {
    pub fn new(settings: StoreSettings) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            settings,
        }
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    /// Parse `raw`, build a Databend handle and register it under `session`.
    pub async fn configure(&self, session: &str, raw: &str) -> ConnectionStatus {
        let masked = mask_dsn(raw);
        let dsn = match Dsn::parse(raw) {
            Ok(dsn) => dsn,
            Err(e) => return self.record_failure(session, &masked, e.to_string()).await,
        };

        match DatabendStore::connect(
            &dsn,
            &self.settings.default_database,
            self.settings.connect_timeout,
            self.settings.query_timeout,
        ) {
            Ok(store) => self.attach(session, &dsn, &masked, Arc::new(store)).await,
            Err(e) => self.record_failure(session, &masked, e.to_string()).await,
        }
    }

    /// Check `store` with `SELECT 1` and, if it answers, make it the
    /// session's handle.
    pub async fn attach(
        &self,
        session: &str,
        dsn: &Dsn,
        masked: &str,
        store: Arc<dyn QueryStore>,
    ) -> ConnectionStatus {
        let started = Instant::now();
        tracing::info!(session, dsn = %masked, "testing database connection");

        let check = with_timeout(self.settings.connect_timeout, store.execute("SELECT 1", &[])).await;
        if let Err(e) = check {
            let message = format!("Database connection test failed: {}", e);
            return self.record_failure(session, masked, message).await;
        }

        let message = match dsn.database {
            Some(_) => "Successfully connected.".to_string(),
            None => format!(
                "Warning: No database specified in DSN, defaulting to '{}'.",
                store.database()
            ),
        };
        let status = ConnectionStatus {
            connected: true,
            error: None,
            dsn_masked: Some(masked.to_string()),
            database: Some(store.database().to_string()),
            message: Some(message),
        };

        self.sessions.write().await.insert(
            session.to_string(),
            Session {
                store: Some(store),
                status: status.clone(),
            },
        );
        tracing::info!(
            session,
            database = status.database.as_deref().unwrap_or_default(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "database connected"
        );
        status
    }

    async fn record_failure(&self, session: &str, masked: &str, error: String) -> ConnectionStatus {
        tracing::warn!(session, dsn = %masked, %error, "database connection failed");
        let status = ConnectionStatus {
            connected: false,
            error: Some(error),
            dsn_masked: Some(masked.to_string()),
            database: None,
            message: None,
        };
        self.sessions.write().await.insert(
            session.to_string(),
            Session {
                store: None,
                status: status.clone(),
            },
        );
        status
    }

    /// Store handle for `session`, if one is connected.
    pub async fn store(&self, session: &str) -> Option<Arc<dyn QueryStore>> {
        let sessions = self.sessions.read().await;
        sessions.get(session).and_then(|s| s.store.clone())
    }

    pub async fn status(&self, session: &str) -> ConnectionStatus {
        let sessions = self.sessions.read().await;
        sessions
            .get(session)
            .map(|s| s.status.clone())
            .unwrap_or_default()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use bd_core::sql::SqlParam;
    use bd_core::{QueryOutput, StoreError};
    use serde_json::json;

    /// Answers every statement with the same canned result.
    pub(crate) struct StaticStore {
        pub result: Result<QueryOutput, StoreError>,
    }

    #[async_trait]
    impl QueryStore for StaticStore {
        async fn execute(&self, _sql: &str, _params: &[SqlParam]) -> Result<QueryOutput, StoreError> {
            self.result.clone()
        }

        fn database(&self) -> &str {
            "system_history"
        }
    }

    pub(crate) fn settings() -> StoreSettings {
        StoreSettings {
            default_database: "system_history".into(),
            connect_timeout: Duration::from_secs(2),
            query_timeout: Duration::from_secs(5),
        }
    }

    pub(crate) fn healthy() -> Arc<dyn QueryStore> {
        Arc::new(StaticStore {
            result: Ok(QueryOutput {
                columns: vec!["1".into()],
                rows: vec![vec![json!("1")]],
            }),
        })
    }

    #[tokio::test]
    async fn test_attach_registers_store_per_session() {
        let registry = SessionRegistry::new(settings());
        let dsn = Dsn::parse("databend://root:pw@localhost:8000/system_history").unwrap();

        let status = registry
            .attach("alice", &dsn, "databend://root:**@localhost:8000/system_history", healthy())
            .await;
        assert!(status.connected);
        assert_eq!(status.message.as_deref(), Some("Successfully connected."));

        assert!(registry.store("alice").await.is_some());
        assert!(registry.store("bob").await.is_none());
        assert!(!registry.status("bob").await.connected);
    }

    #[tokio::test]
    async fn test_missing_database_warns() {
        let registry = SessionRegistry::new(settings());
        let dsn = Dsn::parse("databend://root@localhost:8000").unwrap();
        let status = registry
            .attach(DEFAULT_SESSION, &dsn, "databend://root@localhost:8000", healthy())
            .await;
        assert!(status.message.unwrap().starts_with("Warning: No database specified"));
        assert_eq!(status.database.as_deref(), Some("system_history"));
    }

    #[tokio::test]
    async fn test_failed_check_clears_store() {
        let registry = SessionRegistry::new(settings());
        let dsn = Dsn::parse("databend://root@localhost:8000/db").unwrap();
        registry.attach("s", &dsn, "m", healthy()).await;

        let broken: Arc<dyn QueryStore> = Arc::new(StaticStore {
            result: Err(StoreError::Connection("refused".into())),
        });
        let status = registry.attach("s", &dsn, "m", broken).await;
        assert!(!status.connected);
        assert!(status.error.unwrap().contains("refused"));
        assert!(registry.store("s").await.is_none());
    }

    #[tokio::test]
    async fn test_configure_rejects_bad_dsn() {
        let registry = SessionRegistry::new(settings());
        let status = registry.configure("s", "nonsense").await;
        assert!(!status.connected);
        assert!(status.error.unwrap().starts_with("Malformed DSN"));
        assert_eq!(registry.session_count().await, 1);
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let value = serde_json::to_value(ConnectionStatus::default()).unwrap();
        assert_eq!(
            value,
            json!({"connected": false, "error": null, "dsnMasked": null, "database": null})
        );
    }
}
