//! Caixa POS backend.
//!
//! Daily cash closing, delivery commissions and staff consumption credit for
//! a single location. Operations are exposed as named channels
//! (`closing:finalize`, `consumption:record`, ...) that take a JSON payload
//! and return JSON; `run()` serves them as JSON lines over stdin/stdout.

use serde::Deserialize;
use serde_json::{json, Value};
use std::io::{BufRead, Write};
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod auth;
pub mod closing;
pub mod commands;
pub mod config;
pub mod daybook;
pub mod db;
pub mod diagnostics;
pub mod error;
pub mod ledger;
pub mod models;
pub mod money;
pub mod roster;
pub mod store;
pub mod work_log;

use config::{AppConfig, BusinessRules};
use daybook::DayBook;
use store::SqliteDocumentStore;

pub(crate) fn value_str(v: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = v.get(*key).and_then(|x| x.as_str()) {
            let trimmed = s.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

/// First of `keys` holding a usable amount; numeric strings count.
pub(crate) fn value_f64(v: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .find_map(|key| v.get(*key).and_then(money::amount_if_numeric))
}

// ============================================================================
// Shared state
// ============================================================================

/// Everything a channel handler can reach.
pub struct AppState {
    pub config: AppConfig,
    pub store: SqliteDocumentStore,
    pub auth: auth::AuthState,
    /// The date the cashier is working on, once `day:open` ran.
    pub day: Mutex<Option<DayBook>>,
}

impl AppState {
    /// Open (or create) the database under `config.data_dir` and seed PINs.
    pub fn new(config: AppConfig) -> Result<Self, String> {
        let db = db::init(&config.data_dir)?;
        Self::with_db(config, db)
    }

    pub fn in_memory() -> Result<Self, String> {
        let config = AppConfig::with_data_dir(
            std::env::temp_dir().join(config::APP_IDENTIFIER),
            config::DEFAULT_LOG_FILTER.to_string(),
        );
        Self::with_db(config, db::open_in_memory()?)
    }

    fn with_db(config: AppConfig, db: db::DbState) -> Result<Self, String> {
        auth::seed_default_pins(&db)?;
        Ok(Self {
            config,
            store: SqliteDocumentStore::new(db),
            auth: auth::AuthState::new(),
            day: Mutex::new(None),
        })
    }

    pub fn rules(&self) -> Result<BusinessRules, String> {
        let conn = self.store.db().conn.lock().map_err(|e| e.to_string())?;
        Ok(BusinessRules::load(&conn))
    }

    pub(crate) fn day(&self) -> MutexGuard<'_, Option<DayBook>> {
        self.day.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ============================================================================
// Logging
// ============================================================================

/// Console plus daily rolling file under `config.log_dir`.
pub fn init_logging(config: &AppConfig) {
    let env_filter = EnvFilter::try_new(&config.log_filter)
        .unwrap_or_else(|_| EnvFilter::new(config::DEFAULT_LOG_FILTER));

    diagnostics::prune_old_logs(&config.log_dir);
    std::fs::create_dir_all(&config.log_dir).ok();

    let file_appender =
        tracing_appender::rolling::daily(&config.log_dir, diagnostics::LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true);
    // stdout carries channel responses
    let console_layer = fmt::layer().with_writer(std::io::stderr).with_target(true);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    // Lives until process exit; dropping it would stop the file writer.
    std::mem::forget(guard);
}

// ============================================================================
// Channel server
// ============================================================================

#[derive(Debug, Deserialize)]
struct ChannelRequest {
    #[serde(default)]
    id: Option<Value>,
    channel: String,
    #[serde(default, alias = "arg0")]
    payload: Option<Value>,
}

/// Handle one request line and return the response line.
pub fn handle_line(state: &AppState, line: &str) -> Value {
    let request: ChannelRequest = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "Malformed request line");
            return json!({ "ok": false, "error": format!("Invalid request: {e}") });
        }
    };
    let id = request.id.unwrap_or(Value::Null);
    match commands::dispatch(&request.channel, request.payload, state) {
        Ok(data) => json!({ "id": id, "ok": true, "data": data }),
        Err(error) => {
            warn!(channel = %request.channel, error = %error, "Channel failed");
            json!({ "id": id, "ok": false, "error": error })
        }
    }
}

/// Serve requests until `input` ends. Blank lines are skipped.
pub fn serve<R: BufRead, W: Write>(state: &AppState, input: R, mut output: W) -> std::io::Result<()> {
    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let response = handle_line(state, &line);
        writeln!(output, "{response}")?;
        output.flush()?;
    }
    Ok(())
}

// ============================================================================
// App entry point
// ============================================================================

pub fn run() -> anyhow::Result<()> {
    let config = AppConfig::from_env();
    init_logging(&config);

    info!(
        "Starting Caixa POS v{} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_GIT_SHA")
    );
    info!(data_dir = %config.data_dir.display(), "Using data directory");

    let state = AppState::new(config).map_err(anyhow::Error::msg)?;

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    serve(&state, stdin.lock(), stdout.lock())?;

    info!("Input closed, shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_helpers() {
        let v = json!({ "name": "  ", "nome": " Ana ", "amount": "12.5", "valor": 3 });
        assert_eq!(value_str(&v, &["name", "nome"]), Some("Ana".into()));
        assert_eq!(value_str(&v, &["missing"]), None);
        assert_eq!(value_f64(&v, &["amount"]), Some(12.5));
        assert_eq!(value_f64(&v, &["nope", "valor"]), Some(3.0));
    }

    #[test]
    fn serve_answers_each_line() {
        let state = AppState::in_memory().unwrap();
        let input = concat!(
            "{\"id\":1,\"channel\":\"auth:login\",\"payload\":{\"role\":\"admin\",\"pin\":\"1234\"}}\n",
            "\n",
            "not json\n",
            "{\"id\":2,\"channel\":\"nope:nope\"}\n",
        );
        let mut out = Vec::new();
        serve(&state, input.as_bytes(), &mut out).unwrap();

        let lines: Vec<Value> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["id"], 1);
        assert_eq!(lines[0]["ok"], true);
        assert_eq!(lines[0]["data"]["role"], "admin");
        assert_eq!(lines[1]["ok"], false);
        assert!(lines[1]["error"].as_str().unwrap().starts_with("Invalid request"));
        assert_eq!(lines[2]["error"], "Unknown channel: nope:nope");
    }
}
