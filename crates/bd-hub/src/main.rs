use axum::{
    routing::{get, post},
    Router,
};
use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod databend;
mod dsn;
mod sessions;

use sessions::{SessionRegistry, StoreSettings, DEFAULT_SESSION};

// =============================================================================
// CLI
// =============================================================================

#[derive(Parser)]
#[command(
    name = "bd-hub",
    version,
    about = "BendDash: Databend log and query history dashboard"
)]
struct Args {
    /// Server bind address
    #[arg(long, default_value = "127.0.0.1:5002")]
    bind: String,

    /// DSN to connect the default session with at startup
    /// (falls back to $DATABEND_DSN)
    #[arg(long)]
    dsn: Option<String>,

    /// Path to config file
    #[arg(long, default_value = "bd-hub.toml")]
    config: PathBuf,

    /// Directory with the dashboard UI (overrides the config file)
    #[arg(long)]
    static_dir: Option<PathBuf>,
}

// =============================================================================
// Config
// =============================================================================

#[derive(Deserialize, Default, Clone, Debug)]
struct Config {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    store: StoreConfig,
}

#[derive(Deserialize, Clone, Debug)]
struct ServerConfig {
    #[serde(default = "default_query_timeout")]
    query_timeout_secs: u64,
    #[serde(default = "default_static_dir")]
    static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            query_timeout_secs: default_query_timeout(),
            static_dir: default_static_dir(),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
struct StoreConfig {
    #[serde(default = "default_database")]
    default_database: String,
    #[serde(default = "default_connect_timeout")]
    connect_timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            default_database: default_database(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

fn default_query_timeout() -> u64 {
    30
}
fn default_static_dir() -> PathBuf {
    PathBuf::from("static")
}
fn default_database() -> String {
    "system_history".into()
}
fn default_connect_timeout() -> u64 {
    10
}

fn load_config(path: &PathBuf) -> Config {
    if !path.exists() {
        return Config::default();
    }
    let content = std::fs::read_to_string(path).unwrap_or_default();
    match toml::from_str(&content) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("Ignoring unreadable config {:?}: {}", path, e);
            Config::default()
        }
    }
}

// =============================================================================
// Application State
// =============================================================================

struct AppState {
    sessions: SessionRegistry,
    config: Config,
    start_time: Instant,
}

impl AppState {
    fn new(config: Config) -> Self {
        let settings = StoreSettings {
            default_database: config.store.default_database.clone(),
            connect_timeout: Duration::from_secs(config.store.connect_timeout_secs),
            query_timeout: Duration::from_secs(config.server.query_timeout_secs),
        };
        Self {
            sessions: SessionRegistry::new(settings),
            config,
            start_time: Instant::now(),
        }
    }

    fn query_timeout(&self) -> Duration {
        self.sessions.settings().query_timeout
    }
}

fn router(state: Arc<AppState>, static_dir: PathBuf) -> Router {
    Router::new()
        .route("/api/logs", post(api::list_logs))
        .route("/api/queries", post(api::list_queries))
        .route("/api/metrics", get(api::get_metrics))
        .route("/api/connection/status", get(api::connection_status))
        .route("/api/connection/configure", post(api::configure_connection))
        .route("/api/health", get(api::health))
        // Static UI
        .fallback_service(ServeDir::new(static_dir))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "bd_hub=info,bd_core=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = load_config(&args.config);

    let addr: SocketAddr = match args.bind.parse() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!("Invalid bind address {:?}: {}", args.bind, e);
            std::process::exit(1);
        }
    };

    let static_dir = args
        .static_dir
        .clone()
        .unwrap_or_else(|| config.server.static_dir.clone());
    let state = Arc::new(AppState::new(config));

    let initial_dsn = args.dsn.or_else(|| std::env::var("DATABEND_DSN").ok());
    if let Some(dsn) = initial_dsn.filter(|d| !d.trim().is_empty()) {
        let status = state.sessions.configure(DEFAULT_SESSION, &dsn).await;
        if !status.connected {
            tracing::warn!("Starting without a database; configure one from the dashboard");
        }
    }

    let app = router(state.clone(), static_dir.clone());

    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    tracing::info!("  BendDash v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("  Dashboard:  http://{}", addr);
    tracing::info!("  API:        http://{}/api/health", addr);
    tracing::info!("  Static:     {:?}", static_dir);
    tracing::info!(
        "  Timeouts:   query {}s, connect {}s",
        state.config.server.query_timeout_secs,
        state.config.store.connect_timeout_secs
    );
    tracing::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server stopped: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_fill_missing_keys() {
        let config: Config = toml::from_str("[server]\nquery_timeout_secs = 5\n").unwrap();
        assert_eq!(config.server.query_timeout_secs, 5);
        assert_eq!(config.server.static_dir, PathBuf::from("static"));
        assert_eq!(config.store.default_database, "system_history");
        assert_eq!(config.store.connect_timeout_secs, 10);
    }

    #[test]
    fn test_state_uses_configured_timeout() {
        let mut config = Config::default();
        config.server.query_timeout_secs = 7;
        let state = AppState::new(config);
        assert_eq!(state.query_timeout(), Duration::from_secs(7));
    }

    #[test]
    fn test_missing_config_file_is_default() {
        let config = load_config(&PathBuf::from("/nonexistent/bd-hub.toml"));
        assert_eq!(config.server.query_timeout_secs, 30);
    }

    #[test]
    fn test_router_builds() {
        let state = Arc::new(AppState::new(Config::default()));
        let _ = router(state, PathBuf::from("static"));
    }
}
