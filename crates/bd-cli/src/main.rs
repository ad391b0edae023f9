//! # bd: BendDash terminal client
//!
//! Thin client for a running `bd-hub`.
//!
//! - `bd logs --range 1h --level error`: Page through log history.
//! - `bd queries --status error`: Page through reconciled query history.
//! - `bd metrics`: Last-24h roll-up.
//! - `bd status` / `bd connect <dsn>`: Inspect or set the session's database.

use clap::{Args, Parser, Subcommand};
use serde_json::{json, Map, Value};
use tabled::{settings::Style, Table, Tabled};

const SESSION_HEADER: &str = "x-session-id";

/// BendDash: browse Databend log and query history from the terminal.
#[derive(Parser)]
#[command(name = "bd", version, about, long_about = None)]
struct Cli {
    /// Print the raw JSON response instead of tables.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Default)]
struct Paging {
    /// Page number, 1-based.
    #[arg(long)]
    page: Option<u32>,

    /// Rows per page (max 200).
    #[arg(long)]
    page_size: Option<u32>,
}

#[derive(Subcommand)]
enum Commands {
    /// List log events.
    Logs {
        /// Time window: 1m, 5m, 15m, 30m, 1h, 3h, 6h, 12h, 24h, 2d.
        #[arg(long)]
        range: Option<String>,
        /// error, warning, info or debug.
        #[arg(long)]
        level: Option<String>,
        /// Substring to look for in messages.
        #[arg(long)]
        search: Option<String>,
        /// Show every event of one query.
        #[arg(long)]
        query_id: Option<String>,
        #[command(flatten)]
        paging: Paging,
    },

    /// List queries.
    Queries {
        #[arg(long)]
        range: Option<String>,
        /// success or error.
        #[arg(long)]
        status: Option<String>,
        #[arg(long)]
        search: Option<String>,
        #[arg(long)]
        query_id: Option<String>,
        #[arg(long)]
        database: Option<String>,
        #[arg(long)]
        user: Option<String>,
        #[command(flatten)]
        paging: Paging,
    },

    /// Show dashboard metrics.
    Metrics,

    /// Show the session's connection status.
    Status,

    /// Connect the session to a Databend DSN.
    Connect { dsn: String },
}

// =============================================================================
// Request bodies
// =============================================================================

fn insert_opt<T: Into<Value>>(body: &mut Map<String, Value>, key: &str, value: Option<T>) {
    if let Some(v) = value {
        body.insert(key.to_string(), v.into());
    }
}

fn logs_body(
    range: Option<String>,
    level: Option<String>,
    search: Option<String>,
    query_id: Option<String>,
    paging: &Paging,
) -> Value {
    let mut body = Map::new();
    insert_opt(&mut body, "timeRange", range);
    insert_opt(&mut body, "level", level);
    insert_opt(&mut body, "search", search);
    insert_opt(&mut body, "queryId", query_id);
    insert_opt(&mut body, "page", paging.page);
    insert_opt(&mut body, "pageSize", paging.page_size);
    Value::Object(body)
}

#[allow(clippy::too_many_arguments)]
fn queries_body(
    range: Option<String>,
    status: Option<String>,
    search: Option<String>,
    query_id: Option<String>,
    database: Option<String>,
    user: Option<String>,
    paging: &Paging,
) -> Value {
    let mut body = Map::new();
    insert_opt(&mut body, "timeRange", range);
    insert_opt(&mut body, "status", status);
    insert_opt(&mut body, "search", search);
    insert_opt(&mut body, "queryId", query_id);
    insert_opt(&mut body, "database", database);
    insert_opt(&mut body, "user", user);
    insert_opt(&mut body, "page", paging.page);
    insert_opt(&mut body, "pageSize", paging.page_size);
    Value::Object(body)
}

// =============================================================================
// Tables
// =============================================================================

#[derive(Tabled)]
struct LogRow {
    time: String,
    level: String,
    query_id: String,
    message: String,
}

#[derive(Tabled)]
struct QueryRow {
    query_id: String,
    status: String,
    user: String,
    duration_ms: String,
    query: String,
}

#[derive(Tabled)]
struct KeyValue {
    key: String,
    value: String,
}

fn field(record: &Value, key: &str) -> String {
    match record.get(key) {
        None | Some(Value::Null) => "-".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn short_time(raw: &str) -> String {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|_| raw.to_string())
}

fn truncate(text: &str, max: usize) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() <= max {
        return flat;
    }
    let head: String = flat.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", head)
}

fn records<'a>(envelope: &'a Value, key: &str) -> &'a [Value] {
    envelope
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn log_rows(envelope: &Value) -> Vec<LogRow> {
    records(envelope, "logs")
        .iter()
        .map(|r| LogRow {
            time: short_time(&field(r, "timestamp")),
            level: field(r, "log_level"),
            query_id: field(r, "query_id"),
            message: truncate(&field(r, "message"), 100),
        })
        .collect()
}

fn query_rows(envelope: &Value) -> Vec<QueryRow> {
    records(envelope, "queries")
        .iter()
        .map(|r| QueryRow {
            query_id: field(r, "query_id"),
            status: field(r, "status"),
            user: field(r, "sql_user"),
            duration_ms: field(r, "duration_ms"),
            query: truncate(&field(r, "query_text"), 80),
        })
        .collect()
}

fn key_values(object: &Value) -> Vec<KeyValue> {
    object
        .as_object()
        .map(|map| {
            map.keys()
                .map(|k| KeyValue {
                    key: k.clone(),
                    value: truncate(&field(object, k), 100),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// One-line summary under a listing.
fn footer(envelope: &Value) -> String {
    let mut line = format!(
        "page {} of {} ({} total, {} per page)",
        field(envelope, "page"),
        field(envelope, "totalPages"),
        field(envelope, "total"),
        field(envelope, "pageSize"),
    );
    if let Some(stats) = envelope.get("stats").and_then(Value::as_object) {
        let counts: Vec<String> = stats
            .iter()
            .filter(|(k, _)| k.as_str() != "total")
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        line.push_str(&format!(" | {}", counts.join(" ")));
    }
    if let Some(err) = envelope.get("error").and_then(Value::as_str) {
        line.push_str(&format!("\nerror: {}", err));
    }
    line
}

fn print_table<T: Tabled>(rows: Vec<T>) {
    if rows.is_empty() {
        println!("(no rows)");
        return;
    }
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{}", table);
}

// =============================================================================
// HTTP
// =============================================================================

async fn get_request(
    client: &reqwest::Client,
    url: &str,
    session: Option<&str>,
) -> Result<reqwest::Response, reqwest::Error> {
    let mut req = client.get(url);
    if let Some(s) = session {
        req = req.header(SESSION_HEADER, s);
    }
    req.send().await
}

async fn post_request(
    client: &reqwest::Client,
    url: &str,
    session: Option<&str>,
    json: &Value,
) -> Result<reqwest::Response, reqwest::Error> {
    let mut req = client.post(url).json(json);
    if let Some(s) = session {
        req = req.header(SESSION_HEADER, s);
    }
    req.send().await
}

/// Decode a JSON body regardless of status; the hub answers errors with
/// a full envelope.
async fn json_body(resp: Result<reqwest::Response, reqwest::Error>) -> Result<Value, String> {
    let resp = resp.map_err(|e| e.to_string())?;
    let status = resp.status();
    resp.json::<Value>()
        .await
        .map_err(|e| format!("HTTP {}: {}", status, e))
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base_url =
        std::env::var("BD_BASE_URL").unwrap_or_else(|_| "http://127.0.0.1:5002".to_string());
    let session = std::env::var("BD_SESSION").ok();
    let session = session.as_deref();

    let result = match cli.command {
        Commands::Logs {
            range,
            level,
            search,
            query_id,
            paging,
        } => {
            let url = format!("{}/api/logs", base_url);
            let body = logs_body(range, level, search, query_id, &paging);
            json_body(post_request(&client, &url, session, &body).await)
                .await
                .map(|env| {
                    if !cli.json {
                        print_table(log_rows(&env));
                        println!("{}", footer(&env));
                    }
                    env
                })
        }

        Commands::Queries {
            range,
            status,
            search,
            query_id,
            database,
            user,
            paging,
        } => {
            let url = format!("{}/api/queries", base_url);
            let body = queries_body(range, status, search, query_id, database, user, &paging);
            json_body(post_request(&client, &url, session, &body).await)
                .await
                .map(|env| {
                    if !cli.json {
                        print_table(query_rows(&env));
                        println!("{}", footer(&env));
                    }
                    env
                })
        }

        Commands::Metrics => {
            let url = format!("{}/api/metrics", base_url);
            json_body(get_request(&client, &url, session).await)
                .await
                .map(|m| {
                    if !cli.json {
                        print_table(key_values(&m));
                    }
                    m
                })
        }

        Commands::Status => {
            let url = format!("{}/api/connection/status", base_url);
            json_body(get_request(&client, &url, session).await)
                .await
                .map(|s| {
                    if !cli.json {
                        print_table(key_values(&s));
                    }
                    s
                })
        }

        Commands::Connect { dsn } => {
            let url = format!("{}/api/connection/configure", base_url);
            let body = json!({ "dsn": dsn });
            json_body(post_request(&client, &url, session, &body).await)
                .await
                .map(|r| {
                    if !cli.json {
                        let ok = r.get("success").and_then(Value::as_bool).unwrap_or(false);
                        println!("{}", if ok { "Connected." } else { "Connection failed." });
                        if let Some(status) = r.get("status") {
                            print_table(key_values(status));
                        } else if let Some(err) = r.get("error").and_then(Value::as_str) {
                            println!("error: {}", err);
                        }
                    }
                    r
                })
        }
    };

    match result {
        Ok(value) if cli.json => println!("{}", pretty(&value)),
        Ok(_) => {}
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
